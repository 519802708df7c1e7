// Physical layer: M-ary FSK over a configurable frequency band.
// Modulation emits a chirp preamble followed by Hann-windowed tone bursts;
// demodulation correlates for the preamble and runs a Goertzel bank per
// symbol window.

pub mod demodulator;
pub mod goertzel;
pub mod modulator;
pub mod preamble;

pub use demodulator::{Demodulated, Demodulator};
pub use modulator::Modulator;

use crate::utils::consts::*;

/// Frequency plan for one acoustic band. Immutable once built.
#[derive(Debug, Clone)]
pub struct BandConfig {
    pub base_freq: f32,
    pub freq_spacing: f32,
    pub num_frequencies: usize,
    pub bandwidth: f32,
    frequencies: Vec<f32>,
}

impl BandConfig {
    pub fn new(base_freq: f32, freq_spacing: f32, num_frequencies: usize, bandwidth: f32) -> Self {
        assert!(
            num_frequencies.is_power_of_two(),
            "symbol alphabet must be a power of two"
        );
        let frequencies = (0..num_frequencies)
            .map(|i| base_freq + i as f32 * freq_spacing)
            .collect();
        Self {
            base_freq,
            freq_spacing,
            num_frequencies,
            bandwidth,
            frequencies,
        }
    }

    /// 18 kHz band, 16 tones: inaudible to most adults.
    pub fn ultrasonic() -> Self {
        Self::new(18_000.0, 100.0, 16, 1600.0)
    }

    /// 1 kHz band, 8 tones: survives cheap speakers and codecs.
    pub fn audible() -> Self {
        Self::new(1000.0, 200.0, 8, 1600.0)
    }

    pub fn frequencies(&self) -> &[f32] {
        &self.frequencies
    }

    pub fn bits_per_symbol(&self) -> usize {
        self.num_frequencies.trailing_zeros() as usize
    }

    /// Passband edges used by the chirp and the receive bandpass filter.
    pub fn band_edges(&self) -> (f32, f32) {
        (
            self.base_freq - PREAMBLE_FREQ_MARGIN,
            self.base_freq + self.bandwidth + PREAMBLE_FREQ_MARGIN,
        )
    }
}

/// Sample-level timing, shared by both directions.
#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    pub sample_rate: u32,
    pub symbol_duration: f32,
    pub guard_interval: f32,
    pub preamble_duration: f32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            symbol_duration: SYMBOL_DURATION,
            guard_interval: GUARD_INTERVAL,
            preamble_duration: PREAMBLE_DURATION,
        }
    }
}

impl TimingConfig {
    pub fn samples_per_symbol(&self) -> usize {
        (self.sample_rate as f32 * self.symbol_duration) as usize
    }

    pub fn guard_samples(&self) -> usize {
        (self.sample_rate as f32 * self.guard_interval) as usize
    }

    pub fn preamble_samples(&self) -> usize {
        (self.sample_rate as f32 * self.preamble_duration) as usize
    }

    /// Samples consumed by one symbol plus its guard gap.
    pub fn slot_stride(&self) -> usize {
        self.samples_per_symbol() + self.guard_samples()
    }
}

/// Map bytes onto M-ary symbols.
///
/// For 16 tones each byte splits into high nibble then low nibble. For 8
/// tones bits are packed MSB-first across byte boundaries and the final
/// partial group is left-padded with zeros.
pub fn bytes_to_symbols(data: &[u8], bits_per_symbol: usize) -> Vec<u8> {
    match bits_per_symbol {
        4 => data.iter().flat_map(|&b| [b >> 4, b & 0x0F]).collect(),
        _ => {
            let mut symbols = Vec::with_capacity(data.len() * 8 / bits_per_symbol + 1);
            let mut acc: u16 = 0;
            let mut bits = 0usize;
            let mask = (1u16 << bits_per_symbol) - 1;
            for &byte in data {
                acc = (acc << 8) | byte as u16;
                bits += 8;
                while bits >= bits_per_symbol {
                    bits -= bits_per_symbol;
                    symbols.push(((acc >> bits) & mask) as u8);
                }
                acc &= (1 << bits) - 1;
            }
            if bits > 0 {
                symbols.push(((acc << (bits_per_symbol - bits)) & mask) as u8);
            }
            symbols
        }
    }
}

/// Inverse of [`bytes_to_symbols`]; incomplete trailing bits are dropped.
pub fn symbols_to_bytes(symbols: &[u8], bits_per_symbol: usize) -> Vec<u8> {
    match bits_per_symbol {
        4 => symbols
            .chunks_exact(2)
            .map(|pair| (pair[0] << 4) | (pair[1] & 0x0F))
            .collect(),
        _ => {
            let mut bytes = Vec::with_capacity(symbols.len() * bits_per_symbol / 8);
            let mut acc: u32 = 0;
            let mut bits = 0usize;
            for &sym in symbols {
                acc = (acc << bits_per_symbol) | sym as u32;
                bits += bits_per_symbol;
                if bits >= 8 {
                    bits -= 8;
                    bytes.push(((acc >> bits) & 0xFF) as u8);
                }
            }
            bytes
        }
    }
}
