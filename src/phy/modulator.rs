use std::f32::consts::PI;

use tracing::trace;

use crate::phy::preamble::generate_chirp;
use crate::phy::{bytes_to_symbols, BandConfig, TimingConfig};
use crate::utils::consts::TX_AMPLITUDE;

/// Turns frame bytes into a playable waveform: chirp preamble, then one
/// Hann-windowed tone burst per symbol with a guard gap after each.
pub struct Modulator {
    band: BandConfig,
    timing: TimingConfig,
    preamble: Vec<f32>,
}

impl Modulator {
    pub fn new(band: BandConfig, timing: TimingConfig) -> Self {
        let (f_start, f_end) = band.band_edges();
        let preamble = generate_chirp(
            f_start,
            f_end,
            timing.preamble_samples(),
            timing.sample_rate as f32,
            TX_AMPLITUDE,
        );
        Self {
            band,
            timing,
            preamble,
        }
    }

    pub fn band(&self) -> &BandConfig {
        &self.band
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// The reference chirp, shared with the demodulator's correlator.
    pub fn preamble(&self) -> &[f32] {
        &self.preamble
    }

    /// Waveform length for a given symbol count:
    /// `preamble + n·(symbol + guard)`.
    pub fn waveform_len(&self, num_symbols: usize) -> usize {
        self.timing.preamble_samples() + num_symbols * self.timing.slot_stride()
    }

    pub fn modulate(&self, data: &[u8]) -> Vec<f32> {
        let symbols = bytes_to_symbols(data, self.band.bits_per_symbol());
        trace!("modulating {} bytes as {} symbols", data.len(), symbols.len());

        let samples_per_symbol = self.timing.samples_per_symbol();
        let guard_samples = self.timing.guard_samples();
        let sample_rate = self.timing.sample_rate as f32;

        let mut samples = Vec::with_capacity(self.waveform_len(symbols.len()));
        samples.extend_from_slice(&self.preamble);

        for &symbol in &symbols {
            let freq = self.band.frequencies()[symbol as usize];
            for j in 0..samples_per_symbol {
                let window =
                    0.5 * (1.0 - (2.0 * PI * j as f32 / samples_per_symbol as f32).cos());
                let tone = (2.0 * PI * freq * j as f32 / sample_rate).sin();
                samples.push(TX_AMPLITUDE * window * tone);
            }
            samples.extend(std::iter::repeat(0.0).take(guard_samples));
        }

        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::goertzel::Goertzel;

    fn modulator() -> Modulator {
        Modulator::new(BandConfig::ultrasonic(), TimingConfig::default())
    }

    #[test]
    fn output_length_law() {
        let m = modulator();
        for len in [0usize, 1, 5, 32] {
            let data = vec![0x5A; len];
            let samples = m.modulate(&data);
            // 16 tones: two symbols per byte
            assert_eq!(samples.len(), m.waveform_len(len * 2));
        }
    }

    #[test]
    fn single_byte_places_expected_tones() {
        let m = modulator();
        let samples = m.modulate(&[0x3C]);

        let timing = TimingConfig::default();
        let start = timing.preamble_samples();
        let stride = timing.slot_stride();
        let n = timing.samples_per_symbol();
        let first = &samples[start..start + n];
        let second = &samples[start + stride..start + stride + n];

        // High nibble 0x3 -> 18300 Hz, low nibble 0xC -> 19200 Hz
        let probe_3 = Goertzel::new(18_300.0, 44100.0, n);
        let probe_c = Goertzel::new(19_200.0, 44100.0, n);
        assert!(probe_3.power(first) > probe_c.power(first) * 10.0);
        assert!(probe_c.power(second) > probe_3.power(second) * 10.0);
    }

    #[test]
    fn guard_gaps_are_silent() {
        let m = modulator();
        let samples = m.modulate(&[0xFF]);
        let timing = TimingConfig::default();
        let guard_start = timing.preamble_samples() + timing.samples_per_symbol();
        let guard = &samples[guard_start..guard_start + timing.guard_samples()];
        assert!(guard.iter().all(|&s| s == 0.0));
    }
}
