use tracing::debug;

use crate::codec::frame::{MessageType, WireFrame, FLAG_FIRST_FRAGMENT, FLAG_MORE_FRAGMENTS};
use crate::error::{MeshError, Result};
use crate::utils::consts::MAX_PAYLOAD_SIZE;

/// Split a payload into wire frames of at most `MAX_PAYLOAD_SIZE` bytes.
///
/// Fragment i of N carries sequence i, the more-fragments flag on all but
/// the last and the first-fragment flag on the first. A payload that fits
/// in one frame still gets both boundary markers.
pub fn fragment(msg_type: MessageType, payload: &[u8]) -> Result<Vec<WireFrame>> {
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&[]]
    } else {
        payload.chunks(MAX_PAYLOAD_SIZE).collect()
    };

    let total = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut flags = 0u8;
            if i == 0 {
                flags |= FLAG_FIRST_FRAGMENT;
            }
            if i < total - 1 {
                flags |= FLAG_MORE_FRAGMENTS;
            }
            Ok(WireFrame::new(msg_type, i as u16, chunk.to_vec())?.with_flags(flags))
        })
        .collect()
}

/// Stitch received fragments back into the original payload.
///
/// Fragments may arrive out of order; they are sorted by sequence. The set
/// must contain the first-fragment marker, a terminal fragment, and no
/// sequence gaps, otherwise the lowest missing sequence is reported.
pub fn reassemble(fragments: &[WireFrame]) -> Result<Vec<u8>> {
    if fragments.is_empty() {
        return Err(MeshError::MissingFragment(0));
    }

    let mut sorted: Vec<&WireFrame> = fragments.iter().collect();
    sorted.sort_by_key(|f| f.sequence);
    sorted.dedup_by_key(|f| f.sequence);

    if !sorted[0].first_fragment() || sorted[0].sequence != 0 {
        debug!("reassembly missing leading fragment");
        return Err(MeshError::MissingFragment(0));
    }

    let last = *sorted.last().unwrap();
    if last.more_fragments() {
        // Terminal fragment never arrived
        return Err(MeshError::MissingFragment(last.sequence + 1));
    }

    let mut payload = Vec::new();
    for (expected, frame) in sorted.iter().enumerate() {
        if frame.sequence as usize != expected {
            return Err(MeshError::MissingFragment(expected as u16));
        }
        payload.extend_from_slice(&frame.payload);
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_is_single_fragment() {
        let frames = fragment(MessageType::Data, b"hello").unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].first_fragment());
        assert!(!frames[0].more_fragments());
        assert_eq!(reassemble(&frames).unwrap(), b"hello");
    }

    #[test]
    fn three_hundred_bytes_make_two_fragments() {
        let payload = vec![0xAB; 300];
        let frames = fragment(MessageType::Data, &payload).unwrap();
        assert_eq!(frames.len(), 2);

        assert!(frames[0].first_fragment());
        assert!(frames[0].more_fragments());
        assert_eq!(frames[0].payload.len(), 256);

        assert!(!frames[1].first_fragment());
        assert!(!frames[1].more_fragments());
        assert_eq!(frames[1].payload.len(), 44);

        assert_eq!(reassemble(&frames).unwrap(), payload);
    }

    #[test]
    fn out_of_order_arrival_reassembles() {
        let payload: Vec<u8> = (0..=255).cycle().take(700).collect();
        let mut frames = fragment(MessageType::Data, &payload).unwrap();
        frames.reverse();
        assert_eq!(reassemble(&frames).unwrap(), payload);
    }

    #[test]
    fn missing_middle_fragment_is_reported() {
        let payload = vec![7u8; 600];
        let mut frames = fragment(MessageType::Data, &payload).unwrap();
        assert_eq!(frames.len(), 3);
        frames.remove(1);
        let err = reassemble(&frames).unwrap_err();
        assert!(matches!(err, MeshError::MissingFragment(1)));
    }

    #[test]
    fn missing_tail_fragment_is_reported() {
        let payload = vec![7u8; 600];
        let mut frames = fragment(MessageType::Data, &payload).unwrap();
        frames.pop();
        let err = reassemble(&frames).unwrap_err();
        assert!(matches!(err, MeshError::MissingFragment(2)));
    }

    #[test]
    fn empty_payload_round_trips() {
        let frames = fragment(MessageType::Data, &[]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(reassemble(&frames).unwrap().is_empty());
    }
}
