use crate::utils::consts::{
    AGC_ATTACK, AGC_GAIN_MAX, AGC_GAIN_MIN, AGC_RELEASE, AGC_TARGET,
};

/// Automatic gain control with asymmetric attack/release.
///
/// Gain reductions (attack) move fast to catch clipping; gain increases
/// (release) creep so silence between frames does not get amplified into
/// noise bursts.
pub struct Agc {
    gain: f32,
}

impl Agc {
    pub fn new() -> Self {
        Self { gain: 1.0 }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }

        let rms =
            (input.iter().map(|&s| s * s).sum::<f32>() / input.len() as f32).sqrt();
        if rms > f32::EPSILON {
            let target_gain = AGC_TARGET / rms;
            let beta = if target_gain < self.gain {
                AGC_ATTACK
            } else {
                AGC_RELEASE
            };
            self.gain = self.gain * (1.0 - beta) + target_gain * beta;
            self.gain = self.gain.clamp(AGC_GAIN_MIN, AGC_GAIN_MAX);
        }

        input.iter().map(|&s| s * self.gain).collect()
    }
}

impl Default for Agc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loud_input_pulls_gain_down() {
        let mut agc = Agc::new();
        let loud = vec![0.9f32; 1024];
        for _ in 0..50 {
            agc.process(&loud);
        }
        assert!(agc.gain() < 1.0);
    }

    #[test]
    fn quiet_input_raises_gain_slowly() {
        let mut agc = Agc::new();
        let quiet = vec![0.01f32; 1024];
        agc.process(&quiet);
        let after_one = agc.gain();
        assert!(after_one > 1.0);
        // Release is slow: one block moves gain only slightly
        assert!(after_one < 2.0);
    }

    #[test]
    fn gain_stays_clamped() {
        let mut agc = Agc::new();
        let whisper = vec![1e-4f32; 1024];
        for _ in 0..2000 {
            agc.process(&whisper);
        }
        assert!(agc.gain() <= AGC_GAIN_MAX);

        let blast = vec![1.0f32; 1024];
        for _ in 0..2000 {
            agc.process(&blast);
        }
        assert!(agc.gain() >= AGC_GAIN_MIN);
    }

    #[test]
    fn silence_keeps_gain_unchanged() {
        let mut agc = Agc::new();
        let before = agc.gain();
        agc.process(&vec![0.0f32; 512]);
        assert_eq!(agc.gain(), before);
    }
}
