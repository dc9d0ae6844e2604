//! Process-wide registry of open container files
//!
//! Every handle is registered under the canonical path of its file. The
//! registry enforces the duplicate-open policy:
//!
//! - a path with no active handle can be opened in any mode
//! - without `allow_dup`, a path that is already open is refused
//! - with `allow_dup`, read-only handles are granted alongside any others
//! - a read-write handle (including `create`) always needs exclusive access
//!
//! The registry also runs the offline [`FileManager::cleanup`] compaction,
//! holding its lock for the whole run so the file cannot be opened halfway.

use crate::codec::CodecRegistry;
use crate::config::ContainerOptions;
use crate::container::{load_index, Container, Mode};
use crate::error::{GdsError, Result};
use crate::header::{Header, IndexSlot, RecordTag};
use crate::io::ContainerFile;
use crate::store::StoreBackend;
use ahash::{AHashMap, AHashSet};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Outcome of a cleanup run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub path: PathBuf,
    /// File size before compaction
    pub old_size: u64,
    /// File size after compaction
    pub new_size: u64,
    /// Records no longer reachable from the index before compaction
    pub fragments: usize,
    /// Records carried over
    pub live_records: usize,
}

impl CleanupReport {
    pub fn reclaimed(&self) -> u64 {
        self.old_size.saturating_sub(self.new_size)
    }
}

/// Registry of open handles
pub struct FileManager {
    open: Mutex<AHashMap<PathBuf, Vec<(u64, Mode)>>>,
    next_handle: AtomicU64,
}

lazy_static! {
    static ref MANAGER: FileManager = FileManager::new();
}

/// Canonical path of an existing file
fn canonical(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => GdsError::FileNotFound(path.display().to_string()),
        _ => GdsError::Io(e),
    })
}

/// Canonical path of a file that may not exist yet
fn canonical_new(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| GdsError::invalid_op(path.display().to_string(), "not a file path"))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Ok(std::fs::canonicalize(dir)?.join(name))
}

/// Check the duplicate-open policy against the active handles of a path
fn admit(handles: &[(u64, Mode)], mode: Mode, allow_dup: bool) -> std::result::Result<(), String> {
    if handles.is_empty() {
        return Ok(());
    }
    if !allow_dup {
        return Err(format!(
            "{} handle(s) already open in this process",
            handles.len()
        ));
    }
    if mode == Mode::ReadWrite {
        return Err(String::from(
            "a read-write handle needs exclusive access to the file",
        ));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

impl FileManager {
    fn new() -> Self {
        FileManager {
            open: Mutex::new(AHashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static FileManager {
        &MANAGER
    }

    /// Create a container and register a read-write handle on it
    pub fn create(
        &self,
        path: &Path,
        allow_dup: bool,
        options: ContainerOptions,
        codecs: CodecRegistry,
    ) -> Result<Container> {
        let key = canonical_new(path)?;
        let mut open = self.open.lock();

        let handles = open.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        admit(handles, Mode::ReadWrite, allow_dup).map_err(|reason| GdsError::AlreadyOpen {
            path: key.display().to_string(),
            reason,
        })?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let container = Container::create_file(handle, key.clone(), options, codecs)?;
        open.entry(key).or_default().push((handle, Mode::ReadWrite));
        Ok(container)
    }

    /// Open a container and register the handle
    pub fn open(
        &self,
        path: &Path,
        readonly: bool,
        allow_dup: bool,
        options: ContainerOptions,
        codecs: CodecRegistry,
    ) -> Result<Container> {
        let key = canonical(path)?;
        let mode = if readonly {
            Mode::ReadOnly
        } else {
            Mode::ReadWrite
        };
        let mut open = self.open.lock();

        let handles = open.get(&key).map(Vec::as_slice).unwrap_or(&[]);
        admit(handles, mode, allow_dup).map_err(|reason| GdsError::AlreadyOpen {
            path: key.display().to_string(),
            reason,
        })?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let container = Container::open_file(handle, key.clone(), mode, options, codecs)?;
        open.entry(key).or_default().push((handle, mode));
        Ok(container)
    }

    /// Forget a handle; unknown handles are ignored
    pub(crate) fn release(&self, path: &Path, handle: u64) {
        let mut open = self.open.lock();
        if let Some(handles) = open.get_mut(path) {
            handles.retain(|(h, _)| *h != handle);
            if handles.is_empty() {
                open.remove(path);
            }
        }
        debug!("Released handle {} on {}", handle, path.display());
    }

    /// Number of active handles on `path`
    pub fn handle_count<P: AsRef<Path>>(&self, path: P) -> usize {
        let Ok(key) = canonical(path.as_ref()) else {
            return 0;
        };
        self.open.lock().get(&key).map_or(0, Vec::len)
    }

    pub fn is_open<P: AsRef<Path>>(&self, path: P) -> bool {
        self.handle_count(path) > 0
    }

    /// Compact a container that is not open in this process
    ///
    /// Live chunks and the current index are copied verbatim into
    /// `<path>.tmp`, which then replaces the original. Records no longer
    /// reachable from the index (deleted nodes, superseded indexes) are
    /// dropped.
    pub fn cleanup(&self, path: &Path, verbose: bool) -> Result<CleanupReport> {
        let key = canonical(path)?;
        let open = self.open.lock();
        if open.get(&key).is_some_and(|h| !h.is_empty()) {
            return Err(GdsError::AlreadyOpen {
                path: key.display().to_string(),
                reason: String::from("cleanup needs the file to be closed"),
            });
        }

        let log = |message: String| {
            if verbose {
                info!("{}", message);
            } else {
                debug!("{}", message);
            }
        };
        log(format!("Clean up the fragments of {}", key.display()));

        let mut src = ContainerFile::open(&key, true)?;
        let header = src.read_header()?;
        let (mut tree, slot) = load_index(&mut src, &header)?;

        let mut live: AHashSet<u64> = AHashSet::new();
        for entry in tree.entries_mut() {
            if let Some(store) = entry.kind.store() {
                live.extend(store.chunks().iter().map(|c| c.offset));
            }
        }
        if let Some(slot) = slot {
            live.insert(slot.offset);
        }
        let records = src.scan_records()?;
        let fragments = records
            .iter()
            .filter(|(record, _)| !live.contains(&record.offset))
            .count();
        let old_size = src.len();
        log(format!("# of fragments: {}", fragments));

        let source = StoreBackend::new(src, CodecRegistry::new(), 1, true);
        let tmp = tmp_path(&key);
        log(format!("Save to {}", tmp.display()));

        let written = (|| -> Result<usize> {
            let mut dst = ContainerFile::create(
                &tmp,
                &Header {
                    created_at: header.created_at,
                    ..Header::new()
                },
            )?;
            let mut chunks = 0;
            for entry in tree.entries_mut() {
                if let Some(store) = entry.kind.store_mut() {
                    *store = store.relocate(&source, &mut dst)?;
                    chunks += store.chunk_count();
                }
            }

            let payload = tree.to_bytes()?;
            let record = dst.append_record(RecordTag::Index, &payload)?;
            dst.sync()?;
            dst.write_slot(
                0,
                &IndexSlot {
                    generation: slot.map_or(1, |s| s.generation + 1),
                    offset: record.offset,
                    len: record.len,
                },
            )?;
            dst.sync()?;
            Ok(chunks + 1)
        })();

        drop(source);
        let live_records = match written {
            Ok(count) => count,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                return Err(e);
            }
        };

        log(format!("Rename {} to {}", tmp.display(), key.display()));
        std::fs::rename(&tmp, &key)?;
        let new_size = std::fs::metadata(&key)?.len();
        drop(open);

        log(format!(
            "# of fragments: 0 ({} -> {} bytes)",
            old_size, new_size
        ));
        Ok(CleanupReport {
            path: key,
            old_size,
            new_size,
            fragments,
            live_records,
        })
    }
}
