// Wire format:
// [Magic:2 = AC 4D] [Type:1] [Flags:1] [Seq:2 BE] [Len:2 BE] [Payload:Len] [CRC32:4 BE]
// The CRC covers everything before it.

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use crate::error::{MeshError, Result};
use crate::utils::consts::{
    FRAME_MAGIC_0, FRAME_MAGIC_1, FRAME_OVERHEAD_BYTES, MAX_PAYLOAD_SIZE,
};

/// Payload offset inside a frame.
const HEADER_BYTES: usize = 8;

/// Fragment bookkeeping bits inside the flags byte.
pub const FLAG_MORE_FRAGMENTS: u8 = 0b1000_0000;
pub const FLAG_FIRST_FRAGMENT: u8 = 0b0100_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Beacon,
    Data,
    Ack,
    Nack,
    Discovery,
    SlotRequest,
    SlotGrant,
    StreamStart,
    StreamData,
    StreamEnd,
    /// Any value outside the assigned table, including the key-exchange
    /// range 0x08-0x0A. Carried through intact but never originated here.
    Reserved(u8),
}

impl MessageType {
    /// Total: every byte maps to a type, so a frame's validity is decided
    /// by its structure and CRC alone.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => MessageType::Beacon,
            0x02 => MessageType::Data,
            0x03 => MessageType::Ack,
            0x04 => MessageType::Nack,
            0x05 => MessageType::Discovery,
            0x06 => MessageType::SlotRequest,
            0x07 => MessageType::SlotGrant,
            0x0B => MessageType::StreamStart,
            0x0C => MessageType::StreamData,
            0x0D => MessageType::StreamEnd,
            other => MessageType::Reserved(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            MessageType::Beacon => 0x01,
            MessageType::Data => 0x02,
            MessageType::Ack => 0x03,
            MessageType::Nack => 0x04,
            MessageType::Discovery => 0x05,
            MessageType::SlotRequest => 0x06,
            MessageType::SlotGrant => 0x07,
            MessageType::StreamStart => 0x0B,
            MessageType::StreamData => 0x0C,
            MessageType::StreamEnd => 0x0D,
            MessageType::Reserved(value) => value,
        }
    }
}

/// One bytes-on-wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    pub msg_type: MessageType,
    pub flags: u8,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl WireFrame {
    pub fn new(msg_type: MessageType, sequence: u16, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MeshError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            msg_type,
            flags: 0,
            sequence,
            payload,
        })
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn more_fragments(&self) -> bool {
        self.flags & FLAG_MORE_FRAGMENTS != 0
    }

    pub fn first_fragment(&self) -> bool {
        self.flags & FLAG_FIRST_FRAGMENT != 0
    }

    /// Serialize, appending the CRC over header + payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAME_OVERHEAD_BYTES + self.payload.len());
        bytes.push(FRAME_MAGIC_0);
        bytes.push(FRAME_MAGIC_1);
        bytes.push(self.msg_type.to_u8());
        bytes.push(self.flags);

        let mut field = [0u8; 2];
        BigEndian::write_u16(&mut field, self.sequence);
        bytes.extend_from_slice(&field);
        BigEndian::write_u16(&mut field, self.payload.len() as u16);
        bytes.extend_from_slice(&field);

        bytes.extend_from_slice(&self.payload);

        let crc = crc32fast::hash(&bytes);
        let mut crc_field = [0u8; 4];
        BigEndian::write_u32(&mut crc_field, crc);
        bytes.extend_from_slice(&crc_field);

        bytes
    }

    /// Parse one frame from the start of `bytes`. Trailing bytes beyond the
    /// frame are ignored so padded FEC output parses cleanly.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_OVERHEAD_BYTES {
            return Err(MeshError::FrameTooShort(bytes.len()));
        }
        if bytes[0] != FRAME_MAGIC_0 || bytes[1] != FRAME_MAGIC_1 {
            return Err(MeshError::BadMagic);
        }

        let sequence = BigEndian::read_u16(&bytes[4..6]);
        let payload_len = BigEndian::read_u16(&bytes[6..8]) as usize;

        let total = FRAME_OVERHEAD_BYTES + payload_len;
        if bytes.len() < total {
            return Err(MeshError::Truncated {
                need: total,
                have: bytes.len(),
            });
        }

        // Integrity decides validity; the type byte is interpreted only
        // after the frame has passed the CRC, so a corrupted type shows
        // up as a CRC mismatch like any other damaged byte.
        let expected = BigEndian::read_u32(&bytes[total - 4..total]);
        let computed = crc32fast::hash(&bytes[..HEADER_BYTES + payload_len]);
        if expected != computed {
            debug!(
                "crc mismatch on seq {}: expected {expected:#010x}, computed {computed:#010x}",
                sequence
            );
            return Err(MeshError::CrcMismatch { expected, computed });
        }

        Ok(Self {
            msg_type: MessageType::from_u8(bytes[2]),
            flags: bytes[3],
            sequence,
            payload: bytes[HEADER_BYTES..HEADER_BYTES + payload_len].to_vec(),
        })
    }

    /// Total on-wire length of this frame.
    pub fn wire_len(&self) -> usize {
        FRAME_OVERHEAD_BYTES + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_fields() {
        let frame = WireFrame::new(MessageType::Data, 0x1234, vec![1, 2, 3])
            .unwrap()
            .with_flags(FLAG_FIRST_FRAGMENT);
        let parsed = WireFrame::from_bytes(&frame.to_bytes()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn magic_bytes_lead_every_frame() {
        let bytes = WireFrame::new(MessageType::Beacon, 0, vec![])
            .unwrap()
            .to_bytes();
        assert_eq!(bytes[0], 0xAC);
        assert_eq!(bytes[1], 0x4D);
    }

    #[test]
    fn empty_payload_is_twelve_bytes() {
        let frame = WireFrame::new(MessageType::Ack, 7, vec![]).unwrap();
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert!(WireFrame::from_bytes(&bytes).unwrap().payload.is_empty());
    }

    #[test]
    fn max_payload_is_268_bytes() {
        let frame = WireFrame::new(MessageType::Data, 0, vec![0xEE; 256]).unwrap();
        assert_eq!(frame.to_bytes().len(), 268);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let err = WireFrame::new(MessageType::Data, 0, vec![0; 257]).unwrap_err();
        assert!(matches!(err, MeshError::PayloadTooLarge(257)));
    }

    #[test]
    fn reserved_type_values_parse_as_valid_frames() {
        for value in [0x00u8, 0x08, 0x09, 0x0A, 0x7F, 0xFF] {
            let frame = WireFrame::new(MessageType::Reserved(value), 1, vec![0x11]).unwrap();
            let parsed = WireFrame::from_bytes(&frame.to_bytes()).unwrap();
            assert_eq!(parsed.msg_type, MessageType::Reserved(value));
            assert_eq!(parsed.payload, vec![0x11]);
        }
    }

    #[test]
    fn corrupted_type_byte_is_a_crc_mismatch() {
        let frame = WireFrame::new(MessageType::Data, 4, vec![1, 2]).unwrap();
        let mut bytes = frame.to_bytes();
        bytes[2] = 0x09;
        let err = WireFrame::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, MeshError::CrcMismatch { .. }));
    }

    #[test]
    fn crc_catches_payload_flip() {
        let frame = WireFrame::new(MessageType::Data, 1, vec![0x01, 0x02, 0x03]).unwrap();
        let mut bytes = frame.to_bytes();
        bytes[8] ^= 0x01;
        let err = WireFrame::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, MeshError::CrcMismatch { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn short_buffer_and_bad_magic() {
        assert!(matches!(
            WireFrame::from_bytes(&[0xAC]).unwrap_err(),
            MeshError::FrameTooShort(1)
        ));
        let mut bytes = WireFrame::new(MessageType::Data, 0, vec![]).unwrap().to_bytes();
        bytes[0] = 0x00;
        assert!(matches!(
            WireFrame::from_bytes(&bytes).unwrap_err(),
            MeshError::BadMagic
        ));
    }

    #[test]
    fn truncated_frame_is_reported() {
        let bytes = WireFrame::new(MessageType::Data, 0, vec![5; 40])
            .unwrap()
            .to_bytes();
        let err = WireFrame::from_bytes(&bytes[..20]).unwrap_err();
        assert!(matches!(err, MeshError::Truncated { need: 52, have: 20 }));
    }

    #[test]
    fn trailing_padding_is_ignored() {
        let frame = WireFrame::new(MessageType::Data, 3, vec![9, 9]).unwrap();
        let mut bytes = frame.to_bytes();
        bytes.extend_from_slice(&[0, 0, 0, 0, 0]);
        assert_eq!(WireFrame::from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn crc_test_vectors() {
        assert_eq!(crc32fast::hash(b""), 0x0000_0000);
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF4_3926);
    }
}
