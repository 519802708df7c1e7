use thiserror::Error;

/// Failures the stack can report.
///
/// DSP-level failures (`NoPreamble`, frame parse errors, `CrcMismatch`) are
/// recovered locally by dropping the offending block or frame; MAC-level
/// failures surface to the caller once retries are exhausted. Audio-device
/// failures are fatal to the running instance.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("audio device unavailable: {0}")]
    AudioUnavailable(String),

    #[error("no preamble detected (peak correlation {0:.3})")]
    NoPreamble(f32),

    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("bad frame magic")]
    BadMagic,

    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("CRC mismatch (expected {expected:#010x}, computed {computed:#010x})")]
    CrcMismatch { expected: u32, computed: u32 },

    #[error("reassembly missing fragment {0}")]
    MissingFragment(u16),

    #[error("no route to {0}")]
    NoRoute(String),

    #[error("no acknowledgement for seq {0} after {1} attempts")]
    AckTimeout(u16, u32),

    #[error("no slots available for {0}")]
    NoSlotsAvailable(String),

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("stack is stopped")]
    Stopped,
}

impl MeshError {
    /// Frames failing only the integrity check are worth a retransmission
    /// request; structurally broken ones are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MeshError::CrcMismatch { .. } | MeshError::MissingFragment(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;
