use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::mac::queue::{PendingFrame, TxQueue};
use crate::mac::slots::{assign_slots, contention_slots, SlotRequest, SlotTable};
use crate::utils::consts::{
    FRAME_DURATION_MS, MAX_BACKOFF_SLOTS, SLOTS_PER_FRAME, SLOT_DURATION_MS,
};

/// How this device obtains its slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMode {
    /// This device grants slot requests from peers.
    Coordinator,
    /// No coordinator: slots are self-picked by identifier hash.
    Contention,
}

/// Timing knobs for the TDMA round.
#[derive(Debug, Clone, Copy)]
pub struct MacConfig {
    pub frame_duration: Duration,
    pub slot_duration: Duration,
    pub slots_per_frame: usize,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            frame_duration: Duration::from_millis(FRAME_DURATION_MS),
            slot_duration: Duration::from_millis(SLOT_DURATION_MS),
            slots_per_frame: SLOTS_PER_FRAME,
        }
    }
}

/// What a scheduler tick produced.
#[derive(Debug)]
pub enum TickOutcome {
    /// Still inside the same slot, or an unowned slot began.
    Idle,
    /// One of our slots began and the queue had a frame ready.
    Transmit(PendingFrame),
    /// A frame boundary passed; carries the recomputed utilisation and the
    /// outcome of any pending slot requests.
    FrameStart {
        utilisation: f32,
        grants: Vec<(String, Result<Vec<usize>>)>,
    },
}

/// Time-slotted medium access engine.
///
/// The frame grid is anchored to a wall-clock multiple of the frame
/// duration at construction so independently started devices land on a
/// shared grid; after that all arithmetic runs on the monotonic clock.
pub struct TdmaMac {
    device_id: String,
    config: MacConfig,
    mode: SlotMode,
    queue: TxQueue,
    slot_table: SlotTable,
    assigned_slots: Vec<usize>,
    pending_requests: Vec<SlotRequest>,
    collision_count: u32,
    utilisation: f32,
    anchor: Instant,
    anchor_offset: Duration,
    last_slot: Option<u64>,
}

impl TdmaMac {
    pub fn new(device_id: impl Into<String>, mode: SlotMode, config: MacConfig) -> Self {
        let wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let anchor_offset =
            Duration::from_millis(wall_ms % config.frame_duration.as_millis() as u64);

        Self {
            device_id: device_id.into(),
            config,
            mode,
            queue: TxQueue::new(),
            slot_table: SlotTable::new(config.slots_per_frame),
            assigned_slots: Vec::new(),
            pending_requests: Vec::new(),
            collision_count: 0,
            utilisation: 0.0,
            anchor: Instant::now(),
            anchor_offset,
            last_slot: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn assigned_slots(&self) -> &[usize] {
        &self.assigned_slots
    }

    pub fn utilisation(&self) -> f32 {
        self.utilisation
    }

    pub fn slot_table(&self) -> &SlotTable {
        &self.slot_table
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Slot index the local clock is currently inside.
    pub fn current_slot(&self) -> usize {
        (self.absolute_slot() % self.config.slots_per_frame as u64) as usize
    }

    fn absolute_slot(&self) -> u64 {
        let elapsed = self.anchor_offset + self.anchor.elapsed();
        (elapsed.as_millis() / self.config.slot_duration.as_millis()) as u64
    }

    /// Claim slots for this device. In contention mode the identifier hash
    /// picks them; a coordinator assigns its own out of the free pool.
    pub fn acquire_slots(&mut self, num_slots: usize, priority: u8) -> Result<Vec<usize>> {
        let slots = match self.mode {
            SlotMode::Contention => contention_slots(
                &self.device_id,
                num_slots,
                priority,
                self.config.slots_per_frame,
            ),
            SlotMode::Coordinator => {
                let request = SlotRequest {
                    device: self.device_id.clone(),
                    num_slots,
                    priority,
                };
                let device = self.device_id.clone();
                assign_slots(&mut self.slot_table, &[request])
                    .remove(0)
                    .map_err(|e| {
                        warn!("self-assignment failed for {device}: {e}");
                        e
                    })?
            }
        };

        self.slot_table.replace(&self.device_id, slots.iter().copied());
        self.assigned_slots = self.slot_table.slots_of(&self.device_id);
        info!("{} owns slots {:?}", self.device_id, self.assigned_slots);
        Ok(self.assigned_slots.clone())
    }

    /// Queue application bytes for transmission.
    pub fn enqueue(&mut self, frame_bytes: Vec<u8>, priority: u8) {
        self.queue.push(frame_bytes, priority);
    }

    pub fn enqueue_retry(&mut self, frame_bytes: Vec<u8>, priority: u8, retries: u32) {
        self.queue.push_with_retries(frame_bytes, priority, retries);
    }

    /// Record a peer's slot request for the next frame boundary.
    pub fn submit_slot_request(&mut self, request: SlotRequest) {
        debug!(
            "slot request from {} for {} slots",
            request.device, request.num_slots
        );
        self.pending_requests.push(request);
    }

    /// Advance the slot clock. Call at `slot_duration` granularity or finer.
    pub fn tick(&mut self) -> TickOutcome {
        let absolute = self.absolute_slot();
        if Some(absolute) == self.last_slot {
            return TickOutcome::Idle;
        }
        let crossed_frame = match self.last_slot {
            Some(prev) => {
                absolute / self.config.slots_per_frame as u64
                    != prev / self.config.slots_per_frame as u64
            }
            None => false,
        };
        self.last_slot = Some(absolute);

        if crossed_frame {
            return self.on_frame_start();
        }

        let slot = (absolute % self.config.slots_per_frame as u64) as usize;
        if self.assigned_slots.contains(&slot) {
            if let Some(frame) = self.queue.pop() {
                debug!("slot {slot}: transmitting (priority {})", frame.priority);
                return TickOutcome::Transmit(frame);
            }
        }
        TickOutcome::Idle
    }

    /// Frame boundary: refresh utilisation and serve pending requests.
    fn on_frame_start(&mut self) -> TickOutcome {
        let requests = std::mem::take(&mut self.pending_requests);
        let grants = if requests.is_empty() {
            Vec::new()
        } else {
            let results = assign_slots(&mut self.slot_table, &requests);
            // assign_slots processes in priority order; re-derive the
            // device each grant belongs to from the table
            let mut ordered: Vec<&SlotRequest> = requests.iter().collect();
            ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
            ordered
                .iter()
                .map(|r| r.device.clone())
                .zip(results)
                .collect()
        };

        self.utilisation = self.slot_table.utilisation();
        debug!(
            "frame start: utilisation {:.2}, {} grants",
            self.utilisation,
            grants.len()
        );
        TickOutcome::FrameStart {
            utilisation: self.utilisation,
            grants,
        }
    }

    /// A frame arrived inside a slot we believed was ours: binary
    /// exponential backoff onto a single fresh slot, and the head of the
    /// queue goes around again.
    pub fn handle_collision(&mut self) {
        self.collision_count += 1;
        let window = MAX_BACKOFF_SLOTS.min(1u32 << self.collision_count.min(30));
        let offset = rand::thread_rng().gen_range(0..window) as usize;
        let new_slot = (self.current_slot() + offset) % self.config.slots_per_frame;

        warn!(
            "collision #{}: moving from {:?} to slot {}",
            self.collision_count, self.assigned_slots, new_slot
        );
        self.assigned_slots = vec![new_slot];
        self.slot_table
            .replace(&self.device_id, [new_slot]);

        if let Some(head) = self.queue.pop() {
            let retries = head.retries + 1;
            self.queue
                .push_with_retries(head.frame_bytes, head.priority, retries);
        }
    }

    /// Take over slots a coordinator granted us.
    pub fn adopt_granted_slots(&mut self, slots: &[usize]) {
        let valid: Vec<usize> = slots
            .iter()
            .copied()
            .filter(|&s| s < self.config.slots_per_frame)
            .collect();
        self.slot_table.replace(&self.device_id, valid.iter().copied());
        self.assigned_slots = self.slot_table.slots_of(&self.device_id);
        self.collision_count = 0;
    }

    pub fn collision_count(&self) -> u32 {
        self.collision_count
    }

    /// Stop participating: drop queued traffic and slot claims.
    pub fn shutdown(&mut self) {
        self.queue.clear();
        self.slot_table.clear();
        self.assigned_slots.clear();
    }
}
