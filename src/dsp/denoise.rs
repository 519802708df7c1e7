use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::utils::consts::{FFT_SIZE, NOISE_FLOOR_ALPHA, NOISE_SUBTRACT_FACTOR};

/// Spectral-subtraction denoiser.
///
/// Keeps a running per-bin noise-floor magnitude: bins quieter than the
/// floor pull it down immediately, louder bins raise it slowly at half the
/// adaptation rate. Each block is resynthesised from the subtracted
/// magnitudes and the original phases.
pub struct SpectralDenoiser {
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    noise_floor: Vec<f32>,
    scratch: Vec<Complex32>,
}

impl SpectralDenoiser {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let ifft = planner.plan_fft_inverse(FFT_SIZE);
        let window = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / FFT_SIZE as f32).cos()))
            .collect();
        Self {
            fft,
            ifft,
            window,
            noise_floor: vec![0.0; FFT_SIZE / 2],
            scratch: vec![Complex32::new(0.0, 0.0); FFT_SIZE],
        }
    }

    pub fn noise_floor(&self) -> &[f32] {
        &self.noise_floor
    }

    /// Denoise one block. Blocks shorter than the analysis window pass
    /// through untouched; longer input is processed in window-sized pieces
    /// with the remainder passed through.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let mut output = Vec::with_capacity(input.len());
        let mut chunks = input.chunks_exact(FFT_SIZE);
        for chunk in &mut chunks {
            output.extend(self.process_window(chunk));
        }
        output.extend_from_slice(chunks.remainder());
        output
    }

    fn process_window(&mut self, chunk: &[f32]) -> Vec<f32> {
        for (i, (&x, w)) in chunk.iter().zip(self.window.iter()).enumerate() {
            self.scratch[i] = Complex32::new(x * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        // Subtract the tracked floor from the positive-frequency half;
        // mirror onto the conjugate half to keep the output real.
        for k in 0..FFT_SIZE / 2 {
            let magnitude = self.scratch[k].norm();
            let floor = &mut self.noise_floor[k];
            if magnitude < *floor || *floor == 0.0 {
                *floor = magnitude;
            } else {
                *floor = *floor * (1.0 - NOISE_FLOOR_ALPHA)
                    + magnitude * NOISE_FLOOR_ALPHA * 0.5;
            }

            let clean = (magnitude - NOISE_SUBTRACT_FACTOR * *floor).max(0.0);
            let phase = self.scratch[k].arg();
            let bin = Complex32::from_polar(clean, phase);
            self.scratch[k] = bin;
            if k > 0 {
                self.scratch[FFT_SIZE - k] = bin.conj();
            }
        }

        self.ifft.process(&mut self.scratch);

        // rustfft leaves the inverse unscaled
        let scale = 1.0 / FFT_SIZE as f32;
        self.scratch.iter().map(|c| c.re * scale).collect()
    }
}

impl Default for SpectralDenoiser {
    fn default() -> Self {
        Self::new()
    }
}
