//! Disk I/O for container files
//!
//! All growth happens at the end of the file. The only in-place write is a
//! single 32-byte index slot in the header (see [`crate::header`]).

use crate::error::{GdsError, Result};
use crate::header::{
    decode_record_header, encode_record_header, Header, IndexSlot, RecordFrame, RecordTag,
    HEADER_SIZE, RECORD_HEADER_SIZE, SLOT_OFFSETS,
};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Location of a record in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    /// Offset of the record frame
    pub offset: u64,
    /// Payload length
    pub len: u64,
}

impl RecordRef {
    /// Bytes occupied on disk including the frame
    pub fn footprint(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.len
    }
}

/// Disk-backed container storage
pub struct ContainerFile {
    file: File,
    path: PathBuf,
    readonly: bool,
    len: u64,
}

impl ContainerFile {
    /// Create a new container file, truncating any existing file
    pub fn create<P: AsRef<Path>>(path: P, header: &Header) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&header.to_bytes())?;
        file.flush()?;

        Ok(ContainerFile {
            file,
            path: path.as_ref().to_path_buf(),
            readonly: false,
            len: HEADER_SIZE as u64,
        })
    }

    /// Open an existing container file
    pub fn open<P: AsRef<Path>>(path: P, readonly: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!readonly)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    GdsError::FileNotFound(path.as_ref().display().to_string())
                }
                _ => GdsError::Io(e),
            })?;
        let len = file.metadata()?.len();

        Ok(ContainerFile {
            file,
            path: path.as_ref().to_path_buf(),
            readonly,
            len,
        })
    }

    /// Read and validate the header
    pub fn read_header(&mut self) -> Result<Header> {
        if self.len < HEADER_SIZE as u64 {
            return Err(GdsError::CorruptData(format!(
                "{}: file too small for a header ({} bytes)",
                self.path.display(),
                self.len
            )));
        }
        let buffer = self.read_at(0, HEADER_SIZE)?;
        Header::from_bytes(&buffer)
    }

    /// Overwrite one index slot
    pub fn write_slot(&mut self, index: usize, slot: &IndexSlot) -> Result<()> {
        self.ensure_writable()?;
        self.file.seek(SeekFrom::Start(SLOT_OFFSETS[index] as u64))?;
        self.file.write_all(&slot.to_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    /// Append a framed record at the end of the file
    pub fn append_record(&mut self, tag: RecordTag, payload: &[u8]) -> Result<RecordRef> {
        self.ensure_writable()?;
        let frame = encode_record_header(tag, payload)?;
        let offset = self.len;

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&frame)?;
        self.file.write_all(payload)?;
        self.len += (RECORD_HEADER_SIZE + payload.len()) as u64;

        Ok(RecordRef {
            offset,
            len: payload.len() as u64,
        })
    }

    /// Read a record payload, checking its tag, length and (optionally) CRC
    pub fn read_record(
        &mut self,
        record: RecordRef,
        expected: RecordTag,
        verify: bool,
    ) -> Result<Vec<u8>> {
        let frame = self.read_frame(record.offset)?;
        if frame.tag != expected {
            return Err(GdsError::CorruptData(format!(
                "record at offset {} is {:?}, expected {:?}",
                record.offset, frame.tag, expected
            )));
        }
        if frame.len as u64 != record.len {
            return Err(GdsError::CorruptData(format!(
                "record at offset {} holds {} bytes, index says {}",
                record.offset, frame.len, record.len
            )));
        }

        let payload = self.read_at(record.offset + RECORD_HEADER_SIZE as u64, record.len as usize)?;
        if verify && crc32fast::hash(&payload) != frame.crc {
            return Err(GdsError::CorruptData(format!(
                "checksum mismatch for record at offset {}",
                record.offset
            )));
        }
        Ok(payload)
    }

    /// Read the frame at `offset`
    pub fn read_frame(&mut self, offset: u64) -> Result<RecordFrame> {
        let bytes = self.read_at(offset, RECORD_HEADER_SIZE)?;
        let mut frame = [0u8; RECORD_HEADER_SIZE];
        frame.copy_from_slice(&bytes);
        decode_record_header(&frame)
    }

    /// Walk every record frame after the header
    ///
    /// Stops at the first frame that cannot be decoded or runs past the end
    /// of the file (a torn tail from an interrupted append).
    pub fn scan_records(&mut self) -> Result<Vec<(RecordRef, RecordTag)>> {
        let mut records = Vec::new();
        let mut offset = HEADER_SIZE as u64;

        while offset + RECORD_HEADER_SIZE as u64 <= self.len {
            let frame = match self.read_frame(offset) {
                Ok(frame) => frame,
                Err(GdsError::CorruptData(_)) => break,
                Err(e) => return Err(e),
            };
            let record = RecordRef {
                offset,
                len: frame.len as u64,
            };
            if offset + record.footprint() > self.len {
                break;
            }
            records.push((record, frame.tag));
            offset += record.footprint();
        }

        Ok(records)
    }

    /// Read `len` bytes at `offset`
    pub fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset + len as u64 > self.len {
            return Err(GdsError::CorruptData(format!(
                "{}: read of {} bytes at offset {} past end of file ({} bytes)",
                self.path.display(),
                len,
                offset,
                self.len
            )));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(GdsError::invalid_op(
                self.path.display().to_string(),
                "container is opened read-only",
            ));
        }
        Ok(())
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
