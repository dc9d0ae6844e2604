//! Binary file header and record framing
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header (128 bytes)                           │
//! │  - Magic: "GDSRS\x00\x01\x00"                │
//! │  - Version, creation timestamp               │
//! │  - Index slot A, index slot B                │
//! ├──────────────────────────────────────────────┤
//! │ Records (append-only)                        │
//! │  [tag: u8][len: u32][crc32: u32][payload]    │
//! │  - Chunk: one compressed payload chunk       │
//! │  - Index: bincode-encoded node tree          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The two index slots alternate. A sync appends a fresh index record and
//! then overwrites only the slot with the lower generation, so the slot
//! describing the previous durable index is never touched. On open the valid
//! slot with the highest generation wins.

use crate::error::{GdsError, Result};

pub const MAGIC: [u8; 8] = *b"GDSRS\x00\x01\x00";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;
pub const HEADER_SIZE: usize = 128;

/// Byte offset of index slot `i` within the header
pub const SLOT_OFFSETS: [usize; 2] = [32, 64];
pub const SLOT_SIZE: usize = 32;

/// Size of the frame preceding every record payload
pub const RECORD_HEADER_SIZE: usize = 9;

/// Record types stored after the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordTag {
    /// Compressed payload chunk of a block store
    Chunk = 1,
    /// Serialized node tree
    Index = 2,
}

impl RecordTag {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordTag::Chunk),
            2 => Ok(RecordTag::Index),
            _ => Err(GdsError::CorruptData(format!("invalid record tag: {}", value))),
        }
    }
}

/// Pointer from the header to the current index record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexSlot {
    /// Monotonic sync counter; 0 means the slot was never written
    pub generation: u64,
    /// File offset of the index record frame
    pub offset: u64,
    /// Payload length of the index record
    pub len: u64,
}

impl IndexSlot {
    pub fn to_bytes(&self) -> [u8; SLOT_SIZE] {
        let mut bytes = [0u8; SLOT_SIZE];
        bytes[0..8].copy_from_slice(&self.generation.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.offset.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.len.to_le_bytes());
        let crc = crc32fast::hash(&bytes[0..24]);
        bytes[24..28].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Decode a slot; a torn or blank slot yields `None`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SLOT_SIZE {
            return None;
        }
        let stored_crc = u32::from_le_bytes(bytes[24..28].try_into().ok()?);
        if stored_crc != crc32fast::hash(&bytes[0..24]) {
            return None;
        }
        let slot = IndexSlot {
            generation: u64::from_le_bytes(bytes[0..8].try_into().ok()?),
            offset: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            len: u64::from_le_bytes(bytes[16..24].try_into().ok()?),
        };
        if slot.generation == 0 {
            return None;
        }
        Some(slot)
    }
}

/// Container file header
#[derive(Debug, Clone)]
pub struct Header {
    /// Magic number: "GDSRS\x00\x01\x00"
    pub magic: [u8; 8],

    /// Format version (major)
    pub version_major: u16,

    /// Format version (minor)
    pub version_minor: u16,

    /// Creation time (Unix epoch seconds)
    pub created_at: i64,

    /// Alternating index slots
    pub slots: [Option<IndexSlot>; 2],
}

impl Header {
    /// Create a new header with default values
    pub fn new() -> Self {
        Header {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            created_at: chrono::Utc::now().timestamp(),
            slots: [None, None],
        }
    }

    /// Validate magic and version
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(GdsError::CorruptData(String::from(
                "invalid magic number in header (not a container file)",
            )));
        }
        if self.version_major != VERSION_MAJOR {
            return Err(GdsError::CorruptData(format!(
                "unsupported format version: {}.{}",
                self.version_major, self.version_minor
            )));
        }
        Ok(())
    }

    /// The slot describing the most recent durable index
    pub fn current(&self) -> Option<(usize, IndexSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|s| (i, s)))
            .max_by_key(|(_, s)| s.generation)
    }

    /// The slot a new index should be written to
    pub fn next_slot(&self) -> usize {
        match self.current() {
            Some((i, _)) => 1 - i,
            None => 0,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(&self.magic);
        bytes[8..10].copy_from_slice(&self.version_major.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.version_minor.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.created_at.to_le_bytes());
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                let offset = SLOT_OFFSETS[i];
                bytes[offset..offset + SLOT_SIZE].copy_from_slice(&slot.to_bytes());
            }
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(GdsError::CorruptData(format!(
                "header truncated: {} bytes (expected {})",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        let header = Header {
            magic,
            version_major: u16::from_le_bytes([bytes[8], bytes[9]]),
            version_minor: u16::from_le_bytes([bytes[10], bytes[11]]),
            created_at: i64::from_le_bytes(bytes[12..20].try_into().map_err(|_| {
                GdsError::CorruptData(String::from("header timestamp unreadable"))
            })?),
            slots: [
                IndexSlot::from_bytes(&bytes[SLOT_OFFSETS[0]..SLOT_OFFSETS[0] + SLOT_SIZE]),
                IndexSlot::from_bytes(&bytes[SLOT_OFFSETS[1]..SLOT_OFFSETS[1] + SLOT_SIZE]),
            ],
        };
        header.validate()?;
        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode the frame that precedes a record payload
pub fn encode_record_header(tag: RecordTag, payload: &[u8]) -> Result<[u8; RECORD_HEADER_SIZE]> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        GdsError::CorruptData(format!("record of {} bytes exceeds u32 length", payload.len()))
    })?;
    let mut frame = [0u8; RECORD_HEADER_SIZE];
    frame[0] = tag as u8;
    frame[1..5].copy_from_slice(&len.to_le_bytes());
    frame[5..9].copy_from_slice(&crc32fast::hash(payload).to_le_bytes());
    Ok(frame)
}

/// Decoded record frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFrame {
    pub tag: RecordTag,
    pub len: u32,
    pub crc: u32,
}

pub fn decode_record_header(bytes: &[u8; RECORD_HEADER_SIZE]) -> Result<RecordFrame> {
    Ok(RecordFrame {
        tag: RecordTag::from_u8(bytes[0])?,
        len: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        crc: u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut header = Header::new();
        header.slots[1] = Some(IndexSlot {
            generation: 7,
            offset: 4096,
            len: 321,
        });

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let decoded = Header::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.created_at, header.created_at);
        assert_eq!(decoded.slots[0], None);
        assert_eq!(decoded.slots[1], header.slots[1]);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = Header::new().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(GdsError::CorruptData(_))
        ));
    }

    #[test]
    fn test_torn_slot_is_ignored() {
        let mut header = Header::new();
        header.slots[0] = Some(IndexSlot {
            generation: 1,
            offset: 128,
            len: 10,
        });
        header.slots[1] = Some(IndexSlot {
            generation: 2,
            offset: 512,
            len: 10,
        });

        let mut bytes = header.to_bytes();
        // Tear slot B: the older slot A must win
        bytes[SLOT_OFFSETS[1] + 3] ^= 0xFF;

        let decoded = Header::from_bytes(&bytes).unwrap();
        let (idx, slot) = decoded.current().unwrap();
        assert_eq!(idx, 0);
        assert_eq!(slot.generation, 1);
        assert_eq!(decoded.next_slot(), 1);
    }

    #[test]
    fn test_slot_alternation() {
        let mut header = Header::new();
        assert!(header.current().is_none());
        assert_eq!(header.next_slot(), 0);

        header.slots[0] = Some(IndexSlot {
            generation: 1,
            offset: 128,
            len: 1,
        });
        assert_eq!(header.next_slot(), 1);

        header.slots[1] = Some(IndexSlot {
            generation: 2,
            offset: 256,
            len: 1,
        });
        assert_eq!(header.next_slot(), 0);
    }

    #[test]
    fn test_record_frame() {
        let payload = b"chunk payload";
        let frame = encode_record_header(RecordTag::Chunk, payload).unwrap();
        let decoded = decode_record_header(&frame).unwrap();

        assert_eq!(decoded.tag, RecordTag::Chunk);
        assert_eq!(decoded.len as usize, payload.len());
        assert_eq!(decoded.crc, crc32fast::hash(payload));
    }
}
