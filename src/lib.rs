//! # gds-rs - Hierarchical Container Format for Typed Arrays
//!
//! `gds-rs` stores a tree of named nodes in a single file: folders, typed
//! n-dimensional arrays, labels, raw byte streams and virtual folders that
//! link to other container files. Every node carries ordered key/value
//! attributes; array payloads are stored in independently compressed chunks
//! so that partial reads only decompress what they touch.
//!
//! - **Crash-consistent updates**: an index record is appended and then
//!   published through one of two alternating header slots
//! - **Random access** into compressed payloads with an LRU chunk cache
//! - **Selections** by contiguous ranges or per-dimension boolean masks
//! - **Virtual folders** resolved lazily; a missing target is an empty folder
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gds_rs::{ArrayData, ArraySpec, Container, ElemType, Result};
//!
//! # fn main() -> Result<()> {
//! let gds = Container::create("study.gds", false)?;
//! let g = gds.root().add_folder("g")?;
//! let x = g.add_array("x", ArraySpec::integer(ElemType::Int32, vec![0]))?;
//! x.append_values(ArrayData::Int32(vec![1, 2, 3, 4]))?;
//!
//! let part = x.read(Some(&[1]), Some(&[2]), None)?;
//! assert_eq!(part.data, ArrayData::Int32(vec![2, 3]));
//!
//! x.rename("y")?;
//! assert!(gds.resolve("/g/y", false)?.is_some());
//! gds.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Container / Node API    (container)         │
//! ├──────────────────────────────────────────────┤
//! │  FileManager registry    (manager)           │
//! │  Virtual folder links    (vfolder)           │
//! ├──────────────────────────────────────────────┤
//! │  Node tree index         (tree, node)        │
//! │  Typed reads and writes  (reader, array)     │
//! │  Attributes              (attribute)         │
//! ├──────────────────────────────────────────────┤
//! │  Chunked block store     (store)             │
//! │  Codec registry          (codec)             │
//! ├──────────────────────────────────────────────┤
//! │  Records and header      (io, header)        │
//! └──────────────────────────────────────────────┘
//! ```

pub mod array;
pub mod attribute;
pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod header;
pub mod io;
pub mod manager;
pub mod node;
mod reader;
pub mod store;
pub mod tree;
mod vfolder;

pub use crate::array::{ArrayClass, ArrayData, ElemType, TypedArray, COUNT_TO_END};
pub use crate::attribute::{AttrValue, Attributes};
pub use crate::codec::{Codec, CodecRegistry, EncoderSpec, Level};
pub use crate::config::{ContainerBuilder, ContainerOptions};
pub use crate::container::{Container, Mode, Node};
pub use crate::error::{GdsError, Result};
pub use crate::manager::{CleanupReport, FileManager};
pub use crate::node::{ArraySpec, Kind, NodeId, NodeInfo, NodeSpec};

/// Create a container; see [`Container::create`]
pub fn create<P: AsRef<std::path::Path>>(path: P, allow_dup: bool) -> Result<Container> {
    Container::create(path, allow_dup)
}

/// Open a container; see [`Container::open`]
pub fn open<P: AsRef<std::path::Path>>(path: P, readonly: bool, allow_dup: bool) -> Result<Container> {
    Container::open(path, readonly, allow_dup)
}

/// Compact a closed container; see [`FileManager::cleanup`]
pub fn cleanup<P: AsRef<std::path::Path>>(path: P, verbose: bool) -> Result<CleanupReport> {
    Container::cleanup(path, verbose)
}
