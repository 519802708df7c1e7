use std::f32::consts::PI;

use crate::utils::consts::{PREAMBLE_SEARCH_DECIMATION, PREAMBLE_SEARCH_STEP};

/// Linear chirp used for packet detection and timing.
///
/// Sample `i` carries the instantaneous frequency interpolated from
/// `f_start` to `f_end` by `i / samples`.
pub fn generate_chirp(
    f_start: f32,
    f_end: f32,
    samples: usize,
    sample_rate: f32,
    amplitude: f32,
) -> Vec<f32> {
    (0..samples)
        .map(|i| {
            let tau = i as f32 / samples as f32;
            let freq = f_start + (f_end - f_start) * tau;
            amplitude * (2.0 * PI * freq * i as f32 / sample_rate).sin()
        })
        .collect()
}

/// Best alignment of `reference` inside `source`.
#[derive(Debug, Clone, Copy)]
pub struct PreamblePeak {
    pub offset: usize,
    pub correlation: f32,
}

/// Slide the reference across the source and return the offset with the
/// highest normalised cross-correlation.
///
/// A coarse scan in millisecond steps finds the neighbourhood, then a
/// sample-accurate pass around the coarse winner pins the peak; a chirp
/// decorrelates within a few samples, so the coarse grid alone can sit on
/// the skirt of the true maximum. Dot products are decimated; offsets are
/// full-rate samples.
pub fn correlate_preamble(reference: &[f32], source: &[f32]) -> Option<PreamblePeak> {
    if source.len() < reference.len() || reference.is_empty() {
        return None;
    }

    let ref_energy: f32 = reference
        .iter()
        .step_by(PREAMBLE_SEARCH_DECIMATION)
        .map(|&r| r * r)
        .sum();
    if ref_energy <= f32::EPSILON {
        return None;
    }
    let ref_norm = ref_energy.sqrt();

    let last_offset = source.len() - reference.len();
    let correlation_at = |offset: usize| -> f32 {
        let window = &source[offset..offset + reference.len()];
        let mut dot = 0.0f32;
        let mut energy = 0.0f32;
        let mut i = 0;
        while i < window.len() {
            let s = window[i];
            dot += s * reference[i];
            energy += s * s;
            i += PREAMBLE_SEARCH_DECIMATION;
        }
        if energy > f32::EPSILON {
            dot / (energy.sqrt() * ref_norm)
        } else {
            0.0
        }
    };

    let mut best = PreamblePeak {
        offset: 0,
        correlation: f32::MIN,
    };
    let mut offset = 0;
    while offset <= last_offset {
        let correlation = correlation_at(offset);
        if correlation > best.correlation {
            best = PreamblePeak {
                offset,
                correlation,
            };
        }
        offset += PREAMBLE_SEARCH_STEP;
    }

    let fine_start = best.offset.saturating_sub(PREAMBLE_SEARCH_STEP);
    let fine_end = (best.offset + PREAMBLE_SEARCH_STEP).min(last_offset);
    for offset in fine_start..=fine_end {
        let correlation = correlation_at(offset);
        if correlation > best.correlation {
            best = PreamblePeak {
                offset,
                correlation,
            };
        }
    }

    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chirp_length_and_amplitude() {
        let chirp = generate_chirp(500.0, 3100.0, 4410, 44100.0, 0.8);
        assert_eq!(chirp.len(), 4410);
        assert!(chirp.iter().all(|s| s.abs() <= 0.8 + 1e-6));
        assert!(chirp.iter().any(|s| s.abs() > 0.5));
    }

    #[test]
    fn correlation_peaks_at_true_offset() {
        let chirp = generate_chirp(17_500.0, 20_100.0, 4410, 44100.0, 0.8);
        let lead = PREAMBLE_SEARCH_STEP * 20;
        let mut source = vec![0.0f32; lead];
        source.extend_from_slice(&chirp);
        source.extend(std::iter::repeat(0.0).take(2000));

        let peak = correlate_preamble(&chirp, &source).unwrap();
        assert_eq!(peak.offset, lead);
        assert!(peak.correlation > 0.99);
    }

    #[test]
    fn silence_has_weak_correlation() {
        let chirp = generate_chirp(17_500.0, 20_100.0, 4410, 44100.0, 0.8);
        let source = vec![0.0f32; 10_000];
        let peak = correlate_preamble(&chirp, &source).unwrap();
        assert!(peak.correlation < 0.3);
    }
}
