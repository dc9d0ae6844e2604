//! Codec registry for payload chunks
//!
//! Every chunk of a block store is compressed by exactly one codec, picked by
//! an encoder name of the form `ALGO` or `ALGO.level`:
//!
//! - `none` (or the empty string): bytes are stored as-is
//! - `LZ4`: lz4_flex block format, size-prepended
//! - `ZSTD`: zstd bulk API, levels `fast` (1), `default` (3), `max` (19)
//! - `ZIP`: deflate (flate2) in zlib framing
//! - `LZMA`: xz2 streams
//!
//! Callers never match on the algorithm; they go through [`CodecRegistry`],
//! so new codecs can be registered without touching the block store.

use crate::error::{GdsError, Result};
use ahash::AHashMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

lazy_static! {
    /// Grammar for encoder names: `ALGO` or `ALGO.level`
    static ref ENCODER_NAME: Regex =
        Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)(?:\.([a-z]+))?$").unwrap();
}

/// Compression effort requested by an encoder name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    Fast,
    #[default]
    Default,
    Max,
}

impl Level {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "fast" => Some(Level::Fast),
            "default" => Some(Level::Default),
            "max" => Some(Level::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Fast => "fast",
            Level::Default => "default",
            Level::Max => "max",
        }
    }
}

/// Uniform compress/decompress contract
///
/// Implementations must be stateless: the same codec instance is shared by
/// every block store of every open container and may be called concurrently.
pub trait Codec: Send + Sync {
    /// Algorithm name as it appears in encoder names (e.g. `ZSTD`)
    fn name(&self) -> &'static str;

    /// Compress a raw chunk
    fn compress(&self, raw: &[u8], level: Level) -> Result<Vec<u8>>;

    /// Decompress a chunk that is known to expand to `expected_len` bytes
    ///
    /// Any mismatch between the decoded length and `expected_len` is
    /// reported as [`GdsError::CorruptData`].
    fn decompress(&self, encoded: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

/// No-op codec
pub struct NoneCodec;

impl Codec for NoneCodec {
    fn name(&self) -> &'static str {
        "none"
    }

    fn compress(&self, raw: &[u8], _level: Level) -> Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decompress(&self, encoded: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        check_len("none", encoded.len(), expected_len)?;
        Ok(encoded.to_vec())
    }
}

/// LZ4 codec (fast, moderate ratio)
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "LZ4"
    }

    fn compress(&self, raw: &[u8], _level: Level) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(raw))
    }

    fn decompress(&self, encoded: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let decoded = lz4_flex::decompress_size_prepended(encoded)
            .map_err(|e| GdsError::CorruptData(format!("LZ4 decompression failed: {}", e)))?;
        check_len("LZ4", decoded.len(), expected_len)?;
        Ok(decoded)
    }
}

/// Zstd codec (slower, better ratio)
pub struct ZstdCodec;

impl ZstdCodec {
    fn level(level: Level) -> i32 {
        match level {
            Level::Fast => 1,
            Level::Default => 3,
            Level::Max => 19,
        }
    }
}

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "ZSTD"
    }

    fn compress(&self, raw: &[u8], level: Level) -> Result<Vec<u8>> {
        zstd::bulk::compress(raw, Self::level(level))
            .map_err(|e| GdsError::CorruptData(format!("Zstd compression failed: {}", e)))
    }

    fn decompress(&self, encoded: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        // The capacity bound doubles as the length check: zstd refuses to
        // write past it, and a short frame is caught below.
        let decoded = zstd::bulk::decompress(encoded, expected_len)
            .map_err(|e| GdsError::CorruptData(format!("Zstd decompression failed: {}", e)))?;
        check_len("ZSTD", decoded.len(), expected_len)?;
        Ok(decoded)
    }
}

/// Deflate codec in zlib framing, levels `fast` (1), `default` (6), `max` (9)
pub struct ZipCodec;

impl ZipCodec {
    fn level(level: Level) -> flate2::Compression {
        match level {
            Level::Fast => flate2::Compression::fast(),
            Level::Default => flate2::Compression::default(),
            Level::Max => flate2::Compression::best(),
        }
    }
}

impl Codec for ZipCodec {
    fn name(&self) -> &'static str {
        "ZIP"
    }

    fn compress(&self, raw: &[u8], level: Level) -> Result<Vec<u8>> {
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), Self::level(level));
        encoder
            .write_all(raw)
            .and_then(|_| encoder.finish())
            .map_err(|e| GdsError::CorruptData(format!("Deflate compression failed: {}", e)))
    }

    fn decompress(&self, encoded: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let decoder = flate2::read::ZlibDecoder::new(encoded);
        let decoded = read_bounded(decoder, expected_len)
            .map_err(|e| GdsError::CorruptData(format!("Deflate decompression failed: {}", e)))?;
        check_len("ZIP", decoded.len(), expected_len)?;
        Ok(decoded)
    }
}

/// LZMA codec in xz framing, presets `fast` (1), `default` (6), `max` (9)
pub struct LzmaCodec;

impl LzmaCodec {
    fn preset(level: Level) -> u32 {
        match level {
            Level::Fast => 1,
            Level::Default => 6,
            Level::Max => 9,
        }
    }
}

impl Codec for LzmaCodec {
    fn name(&self) -> &'static str {
        "LZMA"
    }

    fn compress(&self, raw: &[u8], level: Level) -> Result<Vec<u8>> {
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), Self::preset(level));
        encoder
            .write_all(raw)
            .and_then(|_| encoder.finish())
            .map_err(|e| GdsError::CorruptData(format!("LZMA compression failed: {}", e)))
    }

    fn decompress(&self, encoded: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let decoder = xz2::read::XzDecoder::new(encoded);
        let decoded = read_bounded(decoder, expected_len)
            .map_err(|e| GdsError::CorruptData(format!("LZMA decompression failed: {}", e)))?;
        check_len("LZMA", decoded.len(), expected_len)?;
        Ok(decoded)
    }
}

/// Drain a streaming decoder, stopping one byte past `expected_len`
fn read_bounded<R: Read>(decoder: R, expected_len: usize) -> std::io::Result<Vec<u8>> {
    let mut decoded = Vec::with_capacity(expected_len);
    decoder
        .take(expected_len as u64 + 1)
        .read_to_end(&mut decoded)?;
    Ok(decoded)
}

fn check_len(codec: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(GdsError::CorruptData(format!(
            "{} chunk decoded to {} bytes, expected {}",
            codec, actual, expected
        )));
    }
    Ok(())
}

/// Parsed encoder name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSpec {
    algorithm: String,
    level: Level,
    explicit_level: bool,
}

impl EncoderSpec {
    /// Parse an encoder name; the empty string means `none`
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() || name.eq_ignore_ascii_case("none") {
            return Ok(Self::none());
        }

        let caps = ENCODER_NAME
            .captures(name)
            .ok_or_else(|| GdsError::UnsupportedCodec(format!("malformed encoder name '{}'", name)))?;

        let algorithm = caps[1].to_ascii_uppercase();
        let (level, explicit_level) = match caps.get(2) {
            Some(m) => {
                let level = Level::parse(m.as_str()).ok_or_else(|| {
                    GdsError::UnsupportedCodec(format!(
                        "unknown level '{}' in encoder name '{}'",
                        m.as_str(),
                        name
                    ))
                })?;
                (level, true)
            }
            None => (Level::Default, false),
        };

        Ok(EncoderSpec {
            algorithm,
            level,
            explicit_level,
        })
    }

    /// The no-op encoder
    pub fn none() -> Self {
        EncoderSpec {
            algorithm: String::from("none"),
            level: Level::Default,
            explicit_level: false,
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// True when payloads are stored uncompressed
    pub fn is_none(&self) -> bool {
        self.algorithm == "none"
    }
}

impl fmt::Display for EncoderSpec {
    /// Renders the canonical name; `none` renders as the empty string
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return Ok(());
        }
        if self.explicit_level {
            write!(f, "{}.{}", self.algorithm, self.level.as_str())
        } else {
            write!(f, "{}", self.algorithm)
        }
    }
}

/// Encoder-name keyed set of codecs
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: AHashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Registry with the built-in codecs (`none`, `LZ4`, `LZMA`, `ZIP`,
    /// `ZSTD`)
    pub fn new() -> Self {
        let mut registry = CodecRegistry {
            codecs: AHashMap::new(),
        };
        registry.register(Arc::new(NoneCodec));
        registry.register(Arc::new(Lz4Codec));
        registry.register(Arc::new(ZstdCodec));
        registry.register(Arc::new(ZipCodec));
        registry.register(Arc::new(LzmaCodec));
        registry
    }

    /// Add or replace a codec under its own name
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        let key = if codec.name().eq_ignore_ascii_case("none") {
            String::from("none")
        } else {
            codec.name().to_ascii_uppercase()
        };
        self.codecs.insert(key, codec);
    }

    /// Look up the codec for a parsed encoder name
    pub fn get(&self, spec: &EncoderSpec) -> Result<Arc<dyn Codec>> {
        self.codecs
            .get(spec.algorithm())
            .cloned()
            .ok_or_else(|| GdsError::UnsupportedCodec(spec.algorithm().to_string()))
    }

    /// Check that an encoder name parses and is registered
    pub fn validate(&self, name: &str) -> Result<EncoderSpec> {
        let spec = EncoderSpec::parse(name)?;
        self.get(&spec)?;
        Ok(spec)
    }

    /// Names of all registered algorithms, sorted
    pub fn algorithms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.codecs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn compress(&self, spec: &EncoderSpec, raw: &[u8]) -> Result<Vec<u8>> {
        self.get(spec)?.compress(raw, spec.level())
    }

    pub fn decompress(
        &self,
        spec: &EncoderSpec,
        encoded: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>> {
        self.get(spec)?.decompress(encoded, expected_len)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}
