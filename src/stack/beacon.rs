use byteorder::{BigEndian, ByteOrder};

use crate::error::{MeshError, Result};

/// Identity announcement, encoded compactly for the acoustic link:
/// `[id_len:1] [id] [name_len:1] [name] [timestamp_ms:8 BE] [sequence:2 BE]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub device_id: String,
    pub device_name: String,
    pub timestamp_ms: u64,
    pub sequence: u16,
}

impl Beacon {
    pub fn encode(&self) -> Vec<u8> {
        let id = self.device_id.as_bytes();
        let name = self.device_name.as_bytes();
        let id_len = id.len().min(u8::MAX as usize);
        let name_len = name.len().min(u8::MAX as usize);

        let mut bytes = Vec::with_capacity(2 + id_len + name_len + 10);
        bytes.push(id_len as u8);
        bytes.extend_from_slice(&id[..id_len]);
        bytes.push(name_len as u8);
        bytes.extend_from_slice(&name[..name_len]);

        let mut field = [0u8; 8];
        BigEndian::write_u64(&mut field, self.timestamp_ms);
        bytes.extend_from_slice(&field);
        let mut seq = [0u8; 2];
        BigEndian::write_u16(&mut seq, self.sequence);
        bytes.extend_from_slice(&seq);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let too_short = || MeshError::FrameTooShort(bytes.len());

        let mut cursor = 0usize;
        let id_len = *bytes.first().ok_or_else(too_short)? as usize;
        cursor += 1;
        let id = bytes.get(cursor..cursor + id_len).ok_or_else(too_short)?;
        cursor += id_len;

        let name_len = *bytes.get(cursor).ok_or_else(too_short)? as usize;
        cursor += 1;
        let name = bytes
            .get(cursor..cursor + name_len)
            .ok_or_else(too_short)?;
        cursor += name_len;

        let tail = bytes.get(cursor..cursor + 10).ok_or_else(too_short)?;

        Ok(Self {
            device_id: String::from_utf8_lossy(id).into_owned(),
            device_name: String::from_utf8_lossy(name).into_owned(),
            timestamp_ms: BigEndian::read_u64(&tail[..8]),
            sequence: BigEndian::read_u16(&tail[8..10]),
        })
    }
}
