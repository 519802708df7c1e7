use std::collections::VecDeque;

use crate::utils::consts::{ECHO_MU, ECHO_TAPS, SAMPLE_RATE};

/// LMS echo canceller.
///
/// The adaptive filter models the speaker-to-microphone path, so its delay
/// line is fed from the *transmitted* waveform (`feed_reference`), not from
/// the captured input. While nothing is being transmitted the reference is
/// silence, the echo estimate is zero and the taps stay frozen.
pub struct EchoCanceller {
    taps: Vec<f32>,
    delay: Vec<f32>,
    head: usize,
    pending_reference: VecDeque<f32>,
}

impl EchoCanceller {
    pub fn new() -> Self {
        Self {
            taps: vec![0.0; ECHO_TAPS],
            delay: vec![0.0; SAMPLE_RATE as usize],
            head: 0,
            pending_reference: VecDeque::new(),
        }
    }

    /// Queue transmitted samples as the echo reference. Called by the
    /// transmit path right before the waveform goes to the speaker.
    pub fn feed_reference(&mut self, samples: &[f32]) {
        self.pending_reference.extend(samples.iter().copied());
        // Bound the backlog to the delay line's horizon
        while self.pending_reference.len() > self.delay.len() {
            self.pending_reference.pop_front();
        }
    }

    /// Subtract the estimated echo from one captured block.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let n = self.delay.len();
        let mut output = Vec::with_capacity(input.len());

        for &x in input {
            let r = self.pending_reference.pop_front().unwrap_or(0.0);
            self.head = (self.head + 1) % n;
            self.delay[self.head] = r;

            let mut estimate = 0.0f32;
            for (j, &h) in self.taps.iter().enumerate() {
                estimate += h * self.delay[(self.head + n - j) % n];
            }

            let error = x - estimate;
            for (j, h) in self.taps.iter_mut().enumerate() {
                *h += ECHO_MU * error * self.delay[(self.head + n - j) % n];
            }

            output.push(error);
        }

        output
    }
}

impl Default for EchoCanceller {
    fn default() -> Self {
        Self::new()
    }
}
