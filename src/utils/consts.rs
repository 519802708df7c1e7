/// Log level used when RUST_LOG is not set
pub const LOG_LEVEL: &str = "info";

/// Frame magic, first byte
pub const FRAME_MAGIC_0: u8 = 0xAC;

/// Frame magic, second byte
pub const FRAME_MAGIC_1: u8 = 0x4D;

/// Wire overhead: magic (2) + type (1) + flags (1) + seq (2) + len (2) + crc (4)
pub const FRAME_OVERHEAD_BYTES: usize = 12;

/// Maximum payload carried by a single frame (bytes)
pub const MAX_PAYLOAD_SIZE: usize = 256;

// ============================================================================
// Physical Layer Parameters
// ============================================================================

/// Sample rate (Hz)
pub const SAMPLE_RATE: u32 = 44100;

/// Symbol duration (seconds)
pub const SYMBOL_DURATION: f32 = 0.01;

/// Guard interval between symbols (seconds)
pub const GUARD_INTERVAL: f32 = 0.002;

/// Preamble chirp duration (seconds)
pub const PREAMBLE_DURATION: f32 = 0.1;

/// Chirp sweeps from base - margin to base + bandwidth + margin (Hz)
pub const PREAMBLE_FREQ_MARGIN: f32 = 500.0;

/// Preamble and symbol amplitude
pub const TX_AMPLITUDE: f32 = 0.8;

/// Correlation above this counts as a detected preamble
pub const PREAMBLE_THRESHOLD: f32 = 0.3;

/// Preamble search step (1 ms worth of samples at 44.1 kHz)
pub const PREAMBLE_SEARCH_STEP: usize = 44;

/// Correlation subsampling factor during preamble search
pub const PREAMBLE_SEARCH_DECIMATION: usize = 4;

// ============================================================================
// Signal Conditioning Parameters
// ============================================================================

/// Analysis window for the denoiser and Doppler estimator
pub const FFT_SIZE: usize = 2048;

/// Bandpass FIR length
pub const BANDPASS_TAPS: usize = 65;

/// Noise-floor adaptation rate
pub const NOISE_FLOOR_ALPHA: f32 = 0.01;

/// Spectral subtraction safety factor
pub const NOISE_SUBTRACT_FACTOR: f32 = 2.0;

/// Echo canceller FIR length
pub const ECHO_TAPS: usize = 128;

/// LMS step size
pub const ECHO_MU: f32 = 0.01;

/// Doppler error history length
pub const DOPPLER_HISTORY: usize = 10;

/// Shifts below this are left uncorrected (Hz)
pub const DOPPLER_MIN_SHIFT: f32 = 5.0;

/// AGC output RMS target
pub const AGC_TARGET: f32 = 0.3;

/// AGC attack coefficient (gain falling)
pub const AGC_ATTACK: f32 = 0.1;

/// AGC release coefficient (gain rising)
pub const AGC_RELEASE: f32 = 0.01;

/// AGC gain clamp
pub const AGC_GAIN_MIN: f32 = 0.1;
pub const AGC_GAIN_MAX: f32 = 10.0;

/// RMS above this means the channel is occupied
pub const CARRIER_SENSE_THRESHOLD: f32 = 0.05;

// ============================================================================
// Encoding Parameters
// ============================================================================

/// Copies of every byte emitted by the FEC encoder
pub const FEC_REPLICAS: usize = 3;

/// Interleaver depth (columns)
pub const INTERLEAVE_DEPTH: usize = 8;

// ============================================================================
// MAC Parameters
// ============================================================================

/// TDMA frame duration (ms)
pub const FRAME_DURATION_MS: u64 = 1000;

/// Slot duration (ms)
pub const SLOT_DURATION_MS: u64 = 50;

/// Slots per TDMA frame
pub const SLOTS_PER_FRAME: usize = (FRAME_DURATION_MS / SLOT_DURATION_MS) as usize;

/// Backoff window cap (slots)
pub const MAX_BACKOFF_SLOTS: u32 = 16;

/// Acknowledgement window (ms)
pub const ACK_TIMEOUT_MS: u64 = 2000;

/// Retransmissions before a unicast send fails
pub const MAX_RETRIES: u32 = 3;

/// Beacon priority
pub const BEACON_PRIORITY: u8 = 5;

/// Acknowledgement priority
pub const ACK_PRIORITY: u8 = 10;

/// Highest priority level
pub const PRIORITY_MAX: u8 = 10;

/// Default audio capture block length (samples)
pub const AUDIO_BLOCK_SIZE: usize = 4096;
