use std::f32::consts::PI;

/// Single-bin DFT power via the Goertzel recurrence.
///
/// The coefficient is `2·cos(2πk/N)` with `k = round(freq·N / sample_rate)`,
/// so the probe snaps to the nearest DFT bin of the window.
#[derive(Debug, Clone, Copy)]
pub struct Goertzel {
    coeff: f32,
}

impl Goertzel {
    pub fn new(target_freq: f32, sample_rate: f32, window_len: usize) -> Self {
        let k = (target_freq * window_len as f32 / sample_rate).round();
        let coeff = 2.0 * (2.0 * PI * k / window_len as f32).cos();
        Self { coeff }
    }

    /// Power of the probed bin over `window`.
    pub fn power(&self, window: &[f32]) -> f32 {
        let mut s1 = 0.0f32;
        let mut s2 = 0.0f32;
        for &x in window {
            let s0 = x + self.coeff * s1 - s2;
            s2 = s1;
            s1 = s0;
        }
        s1 * s1 + s2 * s2 - self.coeff * s1 * s2
    }
}

/// One Goertzel probe per tone of the band.
#[derive(Debug, Clone)]
pub struct GoertzelBank {
    probes: Vec<Goertzel>,
}

impl GoertzelBank {
    pub fn new(frequencies: &[f32], sample_rate: f32, window_len: usize) -> Self {
        let probes = frequencies
            .iter()
            .map(|&f| Goertzel::new(f, sample_rate, window_len))
            .collect();
        Self { probes }
    }

    pub fn powers(&self, window: &[f32]) -> Vec<f32> {
        self.probes.iter().map(|p| p.power(window)).collect()
    }

    /// Strongest tone index plus a separation-based confidence in `[0, 1]`:
    /// `(top1 − top2) / top1`.
    pub fn detect(&self, window: &[f32]) -> (u8, f32) {
        let powers = self.powers(window);

        let mut top1 = 0usize;
        for (i, &p) in powers.iter().enumerate() {
            if p > powers[top1] {
                top1 = i;
            }
        }
        let runner_up = powers
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != top1)
            .map(|(_, &p)| p)
            .fold(0.0f32, f32::max);

        let confidence = if powers[top1] > f32::EPSILON {
            ((powers[top1] - runner_up) / powers[top1]).clamp(0.0, 1.0)
        } else {
            0.0
        };

        (top1 as u8, confidence)
    }
}
