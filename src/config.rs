//! Container configuration
//!
//! Options can be built in code or loaded from TOML:
//!
//! ```toml
//! chunk_size = 65536
//! encoder = "ZSTD.max"
//! cache_capacity = 128
//! verify_checksums = true
//! ```

use crate::codec::{Codec, CodecRegistry};
use crate::container::Container;
use crate::error::{GdsError, Result};
use crate::manager::FileManager;
use crate::store::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Tunables applied to a container handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Raw bytes per sealed chunk
    pub chunk_size: usize,
    /// Encoder for new raw and array nodes that do not name one
    pub encoder: String,
    /// Decoded chunks kept in the LRU cache
    pub cache_capacity: usize,
    /// Check the CRC32 of every record read
    pub verify_checksums: bool,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        ContainerOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
            encoder: String::new(),
            cache_capacity: 64,
            verify_checksums: true,
        }
    }
}

impl ContainerOptions {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let options: ContainerOptions = toml::from_str(s)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(GdsError::invalid_op("options", "chunk_size must be positive"));
        }
        CodecRegistry::new().validate(&self.encoder)?;
        Ok(())
    }
}

/// Builder for creating or opening containers with custom settings
///
/// # Examples
///
/// ```rust,no_run
/// use gds_rs::ContainerBuilder;
///
/// # fn main() -> gds_rs::Result<()> {
/// let container = ContainerBuilder::new()
///     .chunk_size(256 * 1024)
///     .encoder("ZSTD.max")
///     .create("genotypes.gds")?;
/// # Ok(())
/// # }
/// ```
pub struct ContainerBuilder {
    options: ContainerOptions,
    codecs: CodecRegistry,
    allow_dup: bool,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        ContainerBuilder {
            options: ContainerOptions::default(),
            codecs: CodecRegistry::new(),
            allow_dup: false,
        }
    }

    /// Start from existing options
    pub fn options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.options.chunk_size = bytes;
        self
    }

    pub fn encoder<S: Into<String>>(mut self, name: S) -> Self {
        self.options.encoder = name.into();
        self
    }

    pub fn cache_capacity(mut self, chunks: usize) -> Self {
        self.options.cache_capacity = chunks;
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.options.verify_checksums = verify;
        self
    }

    /// Permit a handle on a path that is already open in this process
    pub fn allow_dup(mut self, allow: bool) -> Self {
        self.allow_dup = allow;
        self
    }

    /// Register an additional codec
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codecs.register(codec);
        self
    }

    fn check(&self) -> Result<()> {
        if self.options.chunk_size == 0 {
            return Err(GdsError::invalid_op("options", "chunk_size must be positive"));
        }
        self.codecs.validate(&self.options.encoder)?;
        Ok(())
    }

    /// Create a new container (read-write)
    pub fn create<P: AsRef<Path>>(self, path: P) -> Result<Container> {
        self.check()?;
        FileManager::global().create(path.as_ref(), self.allow_dup, self.options, self.codecs)
    }

    /// Open an existing container
    pub fn open<P: AsRef<Path>>(self, path: P, readonly: bool) -> Result<Container> {
        self.check()?;
        FileManager::global().open(
            path.as_ref(),
            readonly,
            self.allow_dup,
            self.options,
            self.codecs,
        )
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
