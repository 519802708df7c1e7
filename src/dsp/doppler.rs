use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use tracing::trace;

use crate::utils::consts::{DOPPLER_HISTORY, DOPPLER_MIN_SHIFT, FFT_SIZE};

/// Doppler estimator and compensator.
///
/// Peak frequency comes from an FFT magnitude argmax refined by quadratic
/// interpolation of the three surrounding bins. Observed errors against the
/// expected tone go into a short ring; the mean of the ring is the shift
/// estimate. Small shifts are ignored.
pub struct DopplerCompensator {
    sample_rate: f32,
    fft: Arc<dyn Fft<f32>>,
    errors: VecDeque<f32>,
    scratch: Vec<Complex32>,
}

impl DopplerCompensator {
    pub fn new(sample_rate: f32) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            sample_rate,
            fft: planner.plan_fft_forward(FFT_SIZE),
            errors: VecDeque::with_capacity(DOPPLER_HISTORY),
            scratch: vec![Complex32::new(0.0, 0.0); FFT_SIZE],
        }
    }

    /// Dominant frequency of the block, or `None` for inputs shorter than
    /// the analysis window or without a clear peak.
    pub fn detect_peak(&mut self, input: &[f32]) -> Option<f32> {
        if input.len() < FFT_SIZE {
            return None;
        }
        for (slot, &x) in self.scratch.iter_mut().zip(input.iter()) {
            *slot = Complex32::new(x, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let half = FFT_SIZE / 2;
        let mut peak = 1usize;
        let mut peak_mag = 0.0f32;
        for k in 1..half - 1 {
            let mag = self.scratch[k].norm();
            if mag > peak_mag {
                peak_mag = mag;
                peak = k;
            }
        }
        if peak_mag <= f32::EPSILON {
            return None;
        }

        // Quadratic fit through the three bins around the peak
        let y0 = self.scratch[peak - 1].norm();
        let y1 = peak_mag;
        let y2 = self.scratch[peak + 1].norm();
        let denom = y0 - 2.0 * y1 + y2;
        let delta = if denom.abs() > f32::EPSILON {
            (y0 - y2) / (2.0 * denom)
        } else {
            0.0
        };

        Some((peak as f32 + delta) * self.sample_rate / FFT_SIZE as f32)
    }

    /// Record one (detected − expected) frequency error.
    pub fn observe(&mut self, detected: f32, expected: f32) {
        if self.errors.len() == DOPPLER_HISTORY {
            self.errors.pop_front();
        }
        self.errors.push_back(detected - expected);
    }

    /// Mean of the error ring.
    pub fn shift(&self) -> f32 {
        if self.errors.is_empty() {
            return 0.0;
        }
        self.errors.iter().sum::<f32>() / self.errors.len() as f32
    }

    /// Mix the block down by the current shift estimate. Blocks pass
    /// through untouched while the estimate stays inside the dead zone.
    pub fn compensate(&self, input: &[f32]) -> Vec<f32> {
        let shift = self.shift();
        if shift.abs() <= DOPPLER_MIN_SHIFT {
            return input.to_vec();
        }
        trace!("compensating doppler shift of {:.1} Hz", shift);
        input
            .iter()
            .enumerate()
            .map(|(n, &x)| x * (2.0 * PI * (-shift) * n as f32 / self.sample_rate).cos())
            .collect()
    }
}
