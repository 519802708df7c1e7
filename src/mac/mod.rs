// MAC layer: time-slotted medium access. Frames of `slots_per_frame`
// slots, slot claims via coordinator grant or identifier-hash contention,
// collisions resolved by binary exponential backoff.

pub mod queue;
pub mod slots;
pub mod tdma;

pub use queue::{PendingFrame, TxQueue};
pub use slots::{assign_slots, contention_slots, SlotRequest, SlotTable};
pub use tdma::{MacConfig, SlotMode, TdmaMac, TickOutcome};
