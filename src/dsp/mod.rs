// Signal conditioning for the receive path: bandpass -> denoise -> echo
// cancel -> AGC, with Doppler correction folded in after the echo stage.
// Each stage owns its state; buffers move through by value.

pub mod agc;
pub mod bandpass;
pub mod denoise;
pub mod doppler;
pub mod echo;

pub use agc::Agc;
pub use bandpass::BandpassFilter;
pub use denoise::SpectralDenoiser;
pub use doppler::DopplerCompensator;
pub use echo::EchoCanceller;

use crate::phy::BandConfig;
use crate::utils::consts::CARRIER_SENSE_THRESHOLD;

/// Per-block measurements used for carrier sensing and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct BlockFeatures {
    pub rms: f32,
    pub peak: f32,
    pub peak_freq: Option<f32>,
}

impl BlockFeatures {
    /// Energy-based carrier sense.
    pub fn channel_busy(&self) -> bool {
        self.rms > CARRIER_SENSE_THRESHOLD
    }
}

/// The full conditioning chain, owned by the producer task.
pub struct SignalPipeline {
    band: BandConfig,
    bandpass: BandpassFilter,
    denoiser: SpectralDenoiser,
    echo: EchoCanceller,
    doppler: DopplerCompensator,
    agc: Agc,
}

impl SignalPipeline {
    pub fn new(band: BandConfig, sample_rate: f32) -> Self {
        let (low, high) = band.band_edges();
        Self {
            band,
            bandpass: BandpassFilter::new(low, high, sample_rate),
            denoiser: SpectralDenoiser::new(),
            echo: EchoCanceller::new(),
            doppler: DopplerCompensator::new(sample_rate),
            agc: Agc::new(),
        }
    }

    /// Register transmitted samples as the echo reference.
    pub fn feed_reference(&mut self, samples: &[f32]) {
        self.echo.feed_reference(samples);
    }

    /// Condition one captured block, consuming it.
    pub fn process(&mut self, samples: Vec<f32>) -> Vec<f32> {
        let filtered = self.bandpass.process(&samples);
        let denoised = self.denoiser.process(&filtered);
        let echo_free = self.echo.process(&denoised);

        // Track the strongest tone against the nearest expected one so the
        // shift estimate follows actual receptions.
        let compensated = match self.doppler.detect_peak(&echo_free) {
            Some(peak) if self.in_band(peak) => {
                let expected = self.nearest_tone(peak);
                self.doppler.observe(peak, expected);
                self.doppler.compensate(&echo_free)
            }
            _ => echo_free,
        };

        self.agc.process(&compensated)
    }

    /// Features of a raw block, before conditioning.
    pub fn features(&mut self, samples: &[f32]) -> BlockFeatures {
        let rms = if samples.is_empty() {
            0.0
        } else {
            (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
        };
        let peak = samples.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        let peak_freq = self.doppler.detect_peak(samples);
        BlockFeatures {
            rms,
            peak,
            peak_freq,
        }
    }

    fn in_band(&self, freq: f32) -> bool {
        let (low, high) = self.band.band_edges();
        freq >= low && freq <= high
    }

    fn nearest_tone(&self, freq: f32) -> f32 {
        self.band
            .frequencies()
            .iter()
            .copied()
            .min_by(|a, b| {
                (a - freq)
                    .abs()
                    .partial_cmp(&(b - freq).abs())
                    .unwrap()
            })
            .unwrap_or(freq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn pipeline_preserves_block_length() {
        let mut pipeline = SignalPipeline::new(BandConfig::ultrasonic(), 44100.0);
        let block: Vec<f32> = (0..4096)
            .map(|i| (2.0 * PI * 18_500.0 * i as f32 / 44100.0).sin() * 0.3)
            .collect();
        let out = pipeline.process(block.clone());
        assert_eq!(out.len(), block.len());
    }

    #[test]
    fn features_flag_busy_channel() {
        let mut pipeline = SignalPipeline::new(BandConfig::audible(), 44100.0);
        let loud: Vec<f32> = (0..1024)
            .map(|i| (2.0 * PI * 1500.0 * i as f32 / 44100.0).sin() * 0.5)
            .collect();
        assert!(pipeline.features(&loud).channel_busy());
        assert!(!pipeline.features(&vec![0.0; 1024]).channel_busy());
    }
}
