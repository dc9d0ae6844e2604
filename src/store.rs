//! Chunked block storage for node payloads
//!
//! A [`BlockStore`] holds the payload of one node as a sequence of
//! independently compressed chunks, each written once as a `Chunk` record at
//! the end of the container file. Appends accumulate in an in-memory tail;
//! whenever the tail reaches the configured chunk size it is compressed with
//! the store's encoder and sealed. A sync seals whatever remains, so chunks
//! may be shorter than the chunk size but are never rewritten.
//!
//! Random access only decompresses the chunks overlapping the requested
//! range. Decompressed chunks go through a shared LRU cache keyed by their
//! file offset, which is stable because records are never moved in place.

use crate::codec::{CodecRegistry, EncoderSpec};
use crate::error::{GdsError, Result};
use crate::header::RecordTag;
use crate::io::{ContainerFile, RecordRef};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Default raw bytes per chunk (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// One sealed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// Offset of the chunk record frame in the file
    pub offset: u64,
    /// Encoded (on-disk) length
    pub stored_len: u64,
    /// Decoded length
    pub raw_len: u64,
}

impl ChunkRef {
    fn record(&self) -> RecordRef {
        RecordRef {
            offset: self.offset,
            len: self.stored_len,
        }
    }
}

/// Shared state every block store of a container reads and writes through
pub struct StoreBackend {
    file: Mutex<ContainerFile>,
    codecs: CodecRegistry,
    cache: Mutex<LruCache<u64, Arc<Vec<u8>>>>,
    verify_checksums: bool,
}

impl StoreBackend {
    pub fn new(
        file: ContainerFile,
        codecs: CodecRegistry,
        cache_capacity: usize,
        verify_checksums: bool,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        StoreBackend {
            file: Mutex::new(file),
            codecs,
            cache: Mutex::new(LruCache::new(capacity)),
            verify_checksums,
        }
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Exclusive access to the file for non-chunk records
    pub fn file(&self) -> parking_lot::MutexGuard<'_, ContainerFile> {
        self.file.lock()
    }

    pub fn file_len(&self) -> u64 {
        self.file.lock().len()
    }

    /// Number of decoded chunks currently cached
    pub fn cached_chunks(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Decoded bytes of one chunk, from the cache when possible
    fn load_chunk(&self, spec: &EncoderSpec, chunk: &ChunkRef) -> Result<Arc<Vec<u8>>> {
        if let Some(hit) = self.cache.lock().get(&chunk.offset) {
            return Ok(Arc::clone(hit));
        }

        // Hold the file lock only for the read; decode runs unlocked
        let encoded = self
            .file
            .lock()
            .read_record(chunk.record(), RecordTag::Chunk, self.verify_checksums)?;
        let decoded = Arc::new(
            self.codecs
                .decompress(spec, &encoded, chunk.raw_len as usize)?,
        );

        self.cache.lock().put(chunk.offset, Arc::clone(&decoded));
        Ok(decoded)
    }
}

/// Chunked payload of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStore {
    /// Canonical encoder name; empty means uncompressed
    encoder: String,
    chunk_size: u64,
    chunks: Vec<ChunkRef>,
    /// Raw offset at which each chunk starts
    starts: Vec<u64>,
    sealed_raw: u64,
    sealed_stored: u64,
    /// Appended bytes not yet sealed into a chunk
    #[serde(skip)]
    tail: Vec<u8>,
}

impl BlockStore {
    /// Empty store; the encoder name must already be validated
    pub fn new(spec: &EncoderSpec, chunk_size: usize) -> Self {
        BlockStore {
            encoder: spec.to_string(),
            chunk_size: chunk_size.max(1) as u64,
            chunks: Vec::new(),
            starts: Vec::new(),
            sealed_raw: 0,
            sealed_stored: 0,
            tail: Vec::new(),
        }
    }

    pub fn encoder(&self) -> &str {
        &self.encoder
    }

    pub fn spec(&self) -> Result<EncoderSpec> {
        EncoderSpec::parse(&self.encoder)
    }

    /// Total payload bytes, sealed or not
    pub fn raw_len(&self) -> u64 {
        self.sealed_raw + self.tail.len() as u64
    }

    /// Payload bytes occupied on disk (pending tail counted uncompressed)
    pub fn stored_len(&self) -> u64 {
        self.sealed_stored + self.tail.len() as u64
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[ChunkRef] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.raw_len() == 0
    }

    pub fn has_pending(&self) -> bool {
        !self.tail.is_empty()
    }

    /// Compressed size divided by raw size
    ///
    /// `NaN` when nothing is stored or the store is uncompressed.
    pub fn ratio(&self) -> f64 {
        if self.encoder.is_empty() || self.raw_len() == 0 {
            return f64::NAN;
        }
        self.stored_len() as f64 / self.raw_len() as f64
    }

    /// Append bytes, sealing every chunk that fills up
    ///
    /// Either every byte is appended or, on error, the store is left as it
    /// was. Chunk records already written by a failed call stay in the file
    /// as unreferenced fragments.
    pub fn append(&mut self, backend: &StoreBackend, data: &[u8]) -> Result<()> {
        let chunk_size = self.chunk_size as usize;
        if self.tail.len() + data.len() < chunk_size {
            self.tail.extend_from_slice(data);
            return Ok(());
        }

        let spec = self.spec()?;
        let mut pending = Vec::with_capacity(self.tail.len() + data.len());
        pending.extend_from_slice(&self.tail);
        pending.extend_from_slice(data);
        let full = pending.len() / chunk_size * chunk_size;

        let mark = self.sealed_mark();
        for raw in pending[..full].chunks(chunk_size) {
            if let Err(e) = self.seal_bytes(backend, &spec, raw) {
                self.rewind(mark);
                return Err(e);
            }
        }
        self.tail = pending.split_off(full);
        Ok(())
    }

    /// Seal the pending tail into a (possibly short) chunk
    pub fn seal(&mut self, backend: &StoreBackend) -> Result<()> {
        if self.tail.is_empty() {
            return Ok(());
        }
        let spec = self.spec()?;
        let raw = std::mem::take(&mut self.tail);
        if let Err(e) = self.seal_bytes(backend, &spec, &raw) {
            self.tail = raw;
            return Err(e);
        }
        Ok(())
    }

    fn sealed_mark(&self) -> (usize, u64, u64) {
        (self.chunks.len(), self.sealed_raw, self.sealed_stored)
    }

    fn rewind(&mut self, (chunks, raw, stored): (usize, u64, u64)) {
        self.chunks.truncate(chunks);
        self.starts.truncate(chunks);
        self.sealed_raw = raw;
        self.sealed_stored = stored;
    }

    fn seal_bytes(&mut self, backend: &StoreBackend, spec: &EncoderSpec, raw: &[u8]) -> Result<()> {
        let encoded = backend.codecs.compress(spec, raw)?;
        let record = backend.file.lock().append_record(RecordTag::Chunk, &encoded)?;

        debug!(
            "Sealed chunk at offset {}: {} -> {} bytes ({})",
            record.offset,
            raw.len(),
            encoded.len(),
            if self.encoder.is_empty() { "none" } else { self.encoder.as_str() }
        );

        self.starts.push(self.sealed_raw);
        self.chunks.push(ChunkRef {
            offset: record.offset,
            stored_len: record.len,
            raw_len: raw.len() as u64,
        });
        self.sealed_raw += raw.len() as u64;
        self.sealed_stored += record.len;
        Ok(())
    }

    /// Read `len` bytes starting at raw `offset`
    pub fn read_range(&self, backend: &StoreBackend, offset: u64, len: u64) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.raw_len())
            .ok_or_else(|| {
                GdsError::out_of_range(
                    "block store",
                    format!(
                        "range {}+{} exceeds stored length {}",
                        offset,
                        len,
                        self.raw_len()
                    ),
                )
            })?;

        let mut out = Vec::with_capacity(len as usize);
        if len == 0 {
            return Ok(out);
        }

        if offset < self.sealed_raw {
            let spec = self.spec()?;
            // Last chunk starting at or before `offset`
            let first = self.starts.partition_point(|&s| s <= offset).saturating_sub(1);

            for (chunk, &start) in self.chunks[first..].iter().zip(&self.starts[first..]) {
                if start >= end {
                    break;
                }
                let decoded = backend.load_chunk(&spec, chunk)?;
                let from = offset.max(start) - start;
                let to = end.min(start + chunk.raw_len) - start;
                out.extend_from_slice(&decoded[from as usize..to as usize]);
            }
        }

        if end > self.sealed_raw {
            let from = offset.max(self.sealed_raw) - self.sealed_raw;
            let to = end - self.sealed_raw;
            out.extend_from_slice(&self.tail[from as usize..to as usize]);
        }

        Ok(out)
    }

    /// Read the whole payload
    pub fn read_all(&self, backend: &StoreBackend) -> Result<Vec<u8>> {
        self.read_range(backend, 0, self.raw_len())
    }

    /// Copy sealed chunks verbatim into another file
    ///
    /// Used by compaction: chunk bytes are moved without recompressing. The
    /// pending tail must have been sealed beforehand.
    pub fn relocate(&self, backend: &StoreBackend, dst: &mut ContainerFile) -> Result<BlockStore> {
        let mut moved = BlockStore {
            encoder: self.encoder.clone(),
            chunk_size: self.chunk_size,
            chunks: Vec::with_capacity(self.chunks.len()),
            starts: self.starts.clone(),
            sealed_raw: self.sealed_raw,
            sealed_stored: self.sealed_stored,
            tail: self.tail.clone(),
        };

        for chunk in &self.chunks {
            let encoded = backend
                .file
                .lock()
                .read_record(chunk.record(), RecordTag::Chunk, true)?;
            let record = dst.append_record(RecordTag::Chunk, &encoded)?;
            moved.chunks.push(ChunkRef {
                offset: record.offset,
                ..*chunk
            });
        }
        Ok(moved)
    }
}
