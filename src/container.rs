//! Container handles and nodes
//!
//! A [`Container`] is a cheaply cloneable handle on one open file. All of its
//! state sits behind a single `parking_lot::RwLock`: reads share it, while
//! structural changes and appends hold it exclusively for the whole
//! operation. Closing the handle empties the lock, after which every
//! operation fails with [`GdsError::InvalidOperation`].
//!
//! A [`Node`] pairs a container handle with a [`NodeId`]; it stays valid
//! until the node is deleted or the container is closed.

use crate::array::{ArrayClass, ArrayData, ElemType, TypedArray};
use crate::attribute::{AttrValue, Attributes, CLASS, INVISIBLE, LEVELS, LOGICAL};
use crate::codec::CodecRegistry;
use crate::config::{ContainerBuilder, ContainerOptions};
use crate::error::{GdsError, Result};
use crate::header::{Header, IndexSlot, RecordTag};
use crate::io::{ContainerFile, RecordRef};
use crate::manager::{CleanupReport, FileManager};
use crate::node::{
    ArrayNode, ArraySpec, Kind, NodeId, NodeInfo, NodeKind, NodeSpec, VirtualLink,
};
use crate::reader::{encode_values, ArrayView};
use crate::store::{BlockStore, StoreBackend};
use crate::tree::{segments, Tree, Walk};
use crate::vfolder::LinkTable;
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Access mode of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

/// Everything a handle owns while open
pub(crate) struct OpenState {
    tree: Tree,
    backend: StoreBackend,
    header: Header,
    dirty: bool,
}

impl OpenState {
    /// Seal pending chunks, append a fresh index and flip the header slot
    ///
    /// A handle without changes since the last commit writes nothing.
    fn commit(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        for entry in self.tree.entries_mut() {
            if let Some(store) = entry.kind.store_mut() {
                store.seal(&self.backend)?;
            }
        }

        let payload = self.tree.to_bytes()?;
        let mut file = self.backend.file();
        let record = file.append_record(RecordTag::Index, &payload)?;
        file.sync()?;

        let next = self.header.next_slot();
        let slot = IndexSlot {
            generation: self.header.current().map_or(1, |(_, s)| s.generation + 1),
            offset: record.offset,
            len: record.len,
        };
        file.write_slot(next, &slot)?;
        file.sync()?;

        debug!(
            "Committed index generation {} ({} bytes) to slot {}",
            slot.generation, record.len, next
        );
        self.header.slots[next] = Some(slot);
        self.dirty = false;
        Ok(())
    }
}

/// Load the most recent readable index of a file
///
/// Slots are tried newest first, so an index record damaged after its slot
/// was written falls back to the previous generation.
pub(crate) fn load_index(file: &mut ContainerFile, header: &Header) -> Result<(Tree, Option<IndexSlot>)> {
    let mut slots: Vec<IndexSlot> = header.slots.iter().flatten().copied().collect();
    slots.sort_by(|a, b| b.generation.cmp(&a.generation));

    let mut last_error = None;
    for slot in slots {
        let record = RecordRef {
            offset: slot.offset,
            len: slot.len,
        };
        match file
            .read_record(record, RecordTag::Index, true)
            .and_then(|payload| Tree::from_bytes(&payload))
        {
            Ok(tree) => return Ok((tree, Some(slot))),
            Err(e) => {
                warn!(
                    "Index generation {} of {} is unreadable: {}",
                    slot.generation,
                    file.path().display(),
                    e
                );
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => Ok((Tree::new(), None)),
    }
}

pub(crate) struct Shared {
    handle: u64,
    path: PathBuf,
    mode: Mode,
    options: ContainerOptions,
    codecs: CodecRegistry,
    state: RwLock<Option<OpenState>>,
    links: LinkTable,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(state) = self.state.get_mut().as_mut() {
            if self.mode == Mode::ReadWrite {
                if let Err(e) = state.commit() {
                    warn!("Failed to flush {} on drop: {}", self.path.display(), e);
                }
            }
            FileManager::global().release(&self.path, self.handle);
        }
    }
}

/// Handle on an open container file
///
/// # Examples
///
/// ```rust,no_run
/// use gds_rs::{ArrayData, ArraySpec, Container, ElemType};
///
/// # fn main() -> gds_rs::Result<()> {
/// let gds = Container::create("study.gds", false)?;
/// let g = gds.root().add_folder("g")?;
/// let x = g.add_array("x", ArraySpec::integer(ElemType::Int32, vec![0]))?;
/// x.append_values(ArrayData::Int32(vec![1, 2, 3, 4]))?;
/// gds.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Container {
    shared: Arc<Shared>,
}

impl Container {
    /// Create a container (read-write), replacing any file at `path`
    pub fn create<P: AsRef<Path>>(path: P, allow_dup: bool) -> Result<Container> {
        ContainerBuilder::new().allow_dup(allow_dup).create(path)
    }

    /// Open an existing container
    pub fn open<P: AsRef<Path>>(path: P, readonly: bool, allow_dup: bool) -> Result<Container> {
        ContainerBuilder::new().allow_dup(allow_dup).open(path, readonly)
    }

    /// Compact a closed container, see [`FileManager::cleanup`]
    pub fn cleanup<P: AsRef<Path>>(path: P, verbose: bool) -> Result<CleanupReport> {
        FileManager::global().cleanup(path.as_ref(), verbose)
    }

    pub(crate) fn create_file(
        handle: u64,
        path: PathBuf,
        options: ContainerOptions,
        codecs: CodecRegistry,
    ) -> Result<Container> {
        let header = Header::new();
        let file = ContainerFile::create(&path, &header)?;
        let mut state = OpenState {
            tree: Tree::new(),
            backend: StoreBackend::new(
                file,
                codecs.clone(),
                options.cache_capacity,
                options.verify_checksums,
            ),
            header,
            dirty: true,
        };
        state.commit()?;

        info!("Created container {}", path.display());
        Ok(Self::assemble(handle, path, Mode::ReadWrite, options, codecs, state))
    }

    pub(crate) fn open_file(
        handle: u64,
        path: PathBuf,
        mode: Mode,
        options: ContainerOptions,
        codecs: CodecRegistry,
    ) -> Result<Container> {
        let mut file = ContainerFile::open(&path, mode == Mode::ReadOnly)?;
        let mut header = file.read_header()?;
        let (tree, slot) = load_index(&mut file, &header)?;
        // Newer slots that failed to load are overwritten first
        if let Some(loaded) = slot {
            for entry in header.slots.iter_mut() {
                if entry.is_some_and(|s| s.generation > loaded.generation) {
                    *entry = None;
                }
            }
        }

        info!(
            "Opened container {} ({:?}, {} nodes, index generation {})",
            path.display(),
            mode,
            tree.len(),
            slot.map_or(0, |s| s.generation)
        );

        let state = OpenState {
            tree,
            backend: StoreBackend::new(
                file,
                codecs.clone(),
                options.cache_capacity,
                options.verify_checksums,
            ),
            header,
            dirty: false,
        };
        Ok(Self::assemble(handle, path, mode, options, codecs, state))
    }

    fn assemble(
        handle: u64,
        path: PathBuf,
        mode: Mode,
        options: ContainerOptions,
        codecs: CodecRegistry,
        state: OpenState,
    ) -> Container {
        Container {
            shared: Arc::new(Shared {
                handle,
                path,
                mode,
                options,
                codecs,
                state: RwLock::new(Some(state)),
                links: LinkTable::new(),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Container {
        Container { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Canonical path of the file
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn mode(&self) -> Mode {
        self.shared.mode
    }

    pub fn is_readonly(&self) -> bool {
        self.shared.mode == Mode::ReadOnly
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.read().is_some()
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.shared.options
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.shared.codecs
    }

    /// Registry id of this handle
    pub fn handle(&self) -> u64 {
        self.shared.handle
    }

    /// Root folder of the tree
    pub fn root(&self) -> Node {
        Node {
            container: self.clone(),
            id: NodeId::ROOT,
            via: None,
        }
    }

    /// Resolve `path` from the root; see [`Node::resolve`]
    pub fn resolve(&self, path: &str, silent: bool) -> Result<Option<Node>> {
        self.root().resolve(path, silent)
    }

    /// Size of the file in bytes
    pub fn filesize(&self) -> Result<u64> {
        self.with_state(|state| Ok(state.backend.file_len()))
    }

    /// Make every change durable without closing
    pub fn sync(&self) -> Result<()> {
        self.ensure_writable()?;
        let mut guard = self.shared.state.write();
        let state = guard.as_mut().ok_or_else(|| self.closed())?;
        state.commit()?;
        debug!("Synced {}", self.shared.path.display());
        Ok(())
    }

    /// Flush (read-write handles) and release the handle
    ///
    /// Closing twice is a no-op. If the final flush fails the handle stays
    /// open and the error is returned.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.shared.state.write();
        let Some(mut state) = guard.take() else {
            return Ok(());
        };
        if self.shared.mode == Mode::ReadWrite {
            if let Err(e) = state.commit() {
                *guard = Some(state);
                return Err(e);
            }
        }
        drop(state);
        drop(guard);

        self.shared.links.clear();
        FileManager::global().release(&self.shared.path, self.shared.handle);
        info!("Closed container {}", self.shared.path.display());
        Ok(())
    }

    fn closed(&self) -> GdsError {
        GdsError::invalid_op(self.shared.path.display().to_string(), "container is closed")
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.shared.mode == Mode::ReadOnly {
            return Err(GdsError::invalid_op(
                self.shared.path.display().to_string(),
                "container is opened read-only",
            ));
        }
        Ok(())
    }

    fn with_state<R>(&self, f: impl FnOnce(&OpenState) -> Result<R>) -> Result<R> {
        let guard = self.shared.state.read();
        let state = guard.as_ref().ok_or_else(|| self.closed())?;
        f(state)
    }

    fn with_state_mut<R>(&self, f: impl FnOnce(&mut OpenState) -> Result<R>) -> Result<R> {
        self.ensure_writable()?;
        let mut guard = self.shared.state.write();
        let state = guard.as_mut().ok_or_else(|| self.closed())?;
        let result = f(state)?;
        state.dirty = true;
        Ok(result)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("path", &self.shared.path)
            .field("mode", &self.shared.mode)
            .field("open", &self.is_open())
            .finish()
    }
}

/// A node of an open container
///
/// A node reached through a virtual folder remembers that folder, so its
/// full name and parent chain continue into the owning container.
#[derive(Clone)]
pub struct Node {
    container: Container,
    id: NodeId,
    via: Option<Arc<Node>>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Node name, or the slash-joined path from the root when `full`
    ///
    /// The root of a linked container takes the name of the virtual folder
    /// it was reached through.
    pub fn name(&self, full: bool) -> Result<String> {
        if full {
            let local = self.container.with_state(|state| state.tree.full_name(self.id))?;
            return self.owner_path(local);
        }
        match (&self.via, self.id) {
            (Some(link), NodeId::ROOT) => link.name(false),
            _ => self
                .container
                .with_state(|state| Ok(state.tree.get(self.id)?.name.clone())),
        }
    }

    /// Prefix a path local to this node's container with the path of the
    /// virtual folder it was reached through
    fn owner_path(&self, local: String) -> Result<String> {
        match &self.via {
            Some(link) => {
                let owner = link.name(true)?;
                Ok(if local.is_empty() { owner } else { join(&owner, &local) })
            }
            None => Ok(local),
        }
    }

    pub fn kind(&self) -> Result<Kind> {
        self.container
            .with_state(|state| Ok(state.tree.get(self.id)?.kind.kind()))
    }

    /// Parent folder; `None` for the root
    ///
    /// Children of a linked container's root report the virtual folder as
    /// their parent.
    pub fn parent(&self) -> Result<Option<Node>> {
        let parent = self.container.with_state(|state| state.tree.parent(self.id))?;
        match (parent, &self.via) {
            (Some(NodeId::ROOT), Some(link)) => Ok(Some(Node::clone(link))),
            (Some(id), _) => Ok(Some(self.sibling(id))),
            (None, Some(link)) => link.parent(),
            (None, None) => Ok(None),
        }
    }

    fn sibling(&self, id: NodeId) -> Node {
        Node {
            container: self.container.clone(),
            id,
            via: self.via.clone(),
        }
    }

    /// Target path of a virtual folder
    fn link(&self) -> Result<Option<String>> {
        self.container.with_state(|state| match &state.tree.get(self.id)?.kind {
            NodeKind::VirtualFolder(link) => Ok(Some(link.target_path.clone())),
            _ => Ok(None),
        })
    }

    /// Root of the container a virtual folder points at
    fn link_root(&self, target: &str) -> Option<Node> {
        let linked = self
            .container
            .shared
            .links
            .resolve(&self.container, self.id, target)?;
        Some(Node {
            via: Some(Arc::new(self.clone())),
            ..linked.root()
        })
    }

    /// Resolve a slash-separated path relative to this node
    ///
    /// Empty segments are ignored. Crossing a virtual folder continues in
    /// the linked container; a broken link has no children. An unmatched
    /// segment yields `Ok(None)` when `silent`, else [`GdsError::NotFound`].
    pub fn resolve(&self, path: &str, silent: bool) -> Result<Option<Node>> {
        let mut node = self.clone();
        let mut rest = segments(path);

        loop {
            let walk = node
                .container
                .with_state(|state| state.tree.walk(node.id, &rest))?;

            let segment = match walk {
                Walk::Found(id) => return Ok(Some(node.sibling(id))),
                Walk::Missing { segment } => segment,
                Walk::Crossed { vfolder, rest: remaining } => {
                    let link = node.sibling(vfolder);
                    let target = link.link()?.unwrap_or_default();
                    match link.link_root(&target) {
                        Some(root) => {
                            node = root;
                            rest = remaining;
                            continue;
                        }
                        None => remaining.first().cloned().unwrap_or_default(),
                    }
                }
            };

            return if silent {
                Ok(None)
            } else {
                Err(GdsError::not_found(path, segment))
            };
        }
    }

    /// Direct child by name
    pub fn child(&self, name: &str) -> Result<Node> {
        self.resolve(name, false)?
            .ok_or_else(|| GdsError::not_found(name, name))
    }

    /// Ordered child names; empty for non-folders and broken links
    pub fn list_children(&self, include_hidden: bool) -> Result<Vec<String>> {
        match self.link()? {
            Some(target) => match self.link_root(&target) {
                Some(root) => root.list_children(include_hidden),
                None => Ok(Vec::new()),
            },
            None => self
                .container
                .with_state(|state| state.tree.list_children(self.id, include_hidden)),
        }
    }

    pub fn child_count(&self) -> Result<usize> {
        match self.link()? {
            Some(target) => match self.link_root(&target) {
                Some(root) => root.child_count(),
                None => Ok(0),
            },
            None => self
                .container
                .with_state(|state| state.tree.child_count(self.id)),
        }
    }

    pub fn rename(&self, new_name: &str) -> Result<()> {
        self.container
            .with_state_mut(|state| state.tree.rename(self.id, new_name))
    }

    /// Remove this node and its subtree
    ///
    /// The payload chunks stay in the file until [`Container::cleanup`].
    pub fn delete(&self) -> Result<()> {
        let removed = self
            .container
            .with_state_mut(|state| state.tree.remove(self.id))?;
        for (id, _) in removed {
            self.container.shared.links.forget(id);
        }
        Ok(())
    }

    pub fn attributes(&self) -> Result<Attributes> {
        self.container
            .with_state(|state| Ok(state.tree.get(self.id)?.attributes.clone()))
    }

    /// Set an attribute, returning the value it replaced
    pub fn set_attribute<K, V>(&self, key: K, value: V) -> Result<Option<AttrValue>>
    where
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let (key, value) = (key.into(), value.into());
        self.container.with_state_mut(|state| {
            let entry = state.tree.get_mut(self.id)?;
            debug!("Set attribute '{}' on {}", key, self.id);
            Ok(entry.attributes.set(key, value))
        })
    }

    pub fn remove_attribute(&self, key: &str) -> Result<Option<AttrValue>> {
        self.container
            .with_state_mut(|state| Ok(state.tree.get_mut(self.id)?.attributes.remove(key)))
    }

    /// Hide or show the node; showing also drops `R.invisible`
    pub fn set_hidden(&self, hidden: bool) -> Result<()> {
        self.container.with_state_mut(|state| {
            let entry = state.tree.get_mut(self.id)?;
            entry.hidden = hidden;
            if !hidden {
                entry.attributes.remove(INVISIBLE);
            }
            Ok(())
        })
    }

    pub fn is_hidden(&self) -> Result<bool> {
        self.container
            .with_state(|state| Ok(state.tree.get(self.id)?.is_hidden()))
    }

    /// Describe the node
    pub fn describe(&self) -> Result<NodeInfo> {
        let mut info = self.container.with_state(|state| {
            let entry = state.tree.get(self.id)?;
            let store = entry.kind.store();
            Ok(NodeInfo {
                name: entry.name.clone(),
                full_name: state.tree.full_name(self.id)?,
                kind: entry.kind.kind(),
                trait_name: entry.kind.trait_name(),
                storage: entry.kind.storage_name(),
                dim: entry.kind.dim().map(<[u64]>::to_vec),
                encoder: store.map(|s| s.encoder().to_string()).unwrap_or_default(),
                ratio: store.map_or(f64::NAN, BlockStore::ratio),
                size: store.map_or(f64::NAN, |s| s.stored_len() as f64),
                good: !matches!(entry.kind, NodeKind::Unknown { .. }),
                hidden: entry.is_hidden(),
                message: String::new(),
            })
        })?;
        info.full_name = self.owner_path(std::mem::take(&mut info.full_name))?;

        if let Some(target) = self.link()? {
            if self.link_root(&target).is_none() {
                info.good = false;
                info.message = self
                    .container
                    .shared
                    .links
                    .message(self.id)
                    .unwrap_or_default();
            }
        }
        Ok(info)
    }

    /// Add a child node
    ///
    /// Under a virtual folder the call is forwarded to the linked container,
    /// which is always read-only.
    pub fn add_child(&self, name: &str, spec: NodeSpec) -> Result<Node> {
        if let Some(target) = self.link()? {
            return match self.link_root(&target) {
                Some(root) => root.add_child(name, spec),
                None => Err(GdsError::invalid_op(
                    self.name(true)?,
                    "virtual folder link is broken",
                )),
            };
        }

        let options = &self.container.shared.options;
        let codecs = &self.container.shared.codecs;
        let new_store = |encoder: Option<String>| -> Result<BlockStore> {
            let name = encoder.unwrap_or_else(|| options.encoder.clone());
            let spec = codecs.validate(&name)?;
            Ok(BlockStore::new(&spec, options.chunk_size))
        };

        let id = self.container.with_state_mut(|state| {
            let path = join(&state.tree.full_name(self.id)?, name);
            let mut attributes = Vec::new();

            let kind = match spec {
                NodeSpec::Folder => NodeKind::Folder,
                NodeSpec::Label => NodeKind::Label,
                NodeSpec::Raw { encoder } => NodeKind::Raw(new_store(encoder)?),
                NodeSpec::VirtualFolder { target } => {
                    NodeKind::VirtualFolder(VirtualLink { target_path: target })
                }
                NodeSpec::Array(ArraySpec {
                    class,
                    elem,
                    dim,
                    encoder,
                    levels,
                }) => {
                    if !class.accepts(elem) {
                        return Err(GdsError::invalid_op(
                            path,
                            format!("{:?} arrays cannot store {}", class, elem),
                        ));
                    }
                    if dim.is_empty() {
                        return Err(GdsError::dim_mismatch(path, "arrays need at least one dimension"));
                    }
                    match class {
                        ArrayClass::Factor => {
                            attributes.push((CLASS, AttrValue::from("factor")));
                            attributes.push((LEVELS, AttrValue::from(levels)));
                        }
                        ArrayClass::Logical => attributes.push((LOGICAL, AttrValue::None)),
                        _ => {}
                    }
                    NodeKind::Array(ArrayNode {
                        class,
                        elem,
                        dim,
                        len: 0,
                        store: new_store(encoder)?,
                        string_marks: Vec::new(),
                    })
                }
            };

            let id = state.tree.add_child(self.id, name, kind)?;
            let entry = state.tree.get_mut(id)?;
            for (key, value) in attributes {
                entry.attributes.set(key, value);
            }
            Ok(id)
        })?;

        Ok(self.sibling(id))
    }

    pub fn add_folder(&self, name: &str) -> Result<Node> {
        self.add_child(name, NodeSpec::Folder)
    }

    pub fn add_label(&self, name: &str) -> Result<Node> {
        self.add_child(name, NodeSpec::Label)
    }

    /// Add a raw byte stream; `None` uses the container's default encoder
    pub fn add_raw(&self, name: &str, encoder: Option<&str>) -> Result<Node> {
        self.add_child(
            name,
            NodeSpec::Raw {
                encoder: encoder.map(String::from),
            },
        )
    }

    pub fn add_array(&self, name: &str, spec: ArraySpec) -> Result<Node> {
        self.add_child(name, NodeSpec::Array(spec))
    }

    /// Add a virtual folder linking to another container file
    pub fn add_vfolder(&self, name: &str, target: &str) -> Result<Node> {
        self.add_child(
            name,
            NodeSpec::VirtualFolder {
                target: target.to_string(),
            },
        )
    }

    /// Append bytes to a raw stream
    pub fn append_raw(&self, bytes: &[u8]) -> Result<()> {
        self.container.with_state_mut(|state| {
            let OpenState { tree, backend, .. } = state;
            let path = tree.full_name(self.id)?;
            match &mut tree.get_mut(self.id)?.kind {
                NodeKind::Raw(store) => store.append(backend, bytes),
                other => Err(GdsError::invalid_op(
                    path,
                    format!("{} nodes do not hold a raw stream", other.kind()),
                )),
            }
        })
    }

    /// Read `len` bytes of a raw stream starting at `offset`
    pub fn read_raw(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.container.with_state(|state| {
            let path = state.tree.full_name(self.id)?;
            match &state.tree.get(self.id)?.kind {
                NodeKind::Raw(store) => store
                    .read_range(&state.backend, offset, len)
                    .map_err(|e| match e {
                        GdsError::OutOfRange { detail, .. } => GdsError::out_of_range(path, detail),
                        other => other,
                    }),
                other => Err(GdsError::invalid_op(
                    path,
                    format!("{} nodes do not hold a raw stream", other.kind()),
                )),
            }
        })
    }

    /// Length of a raw stream in bytes
    pub fn raw_len(&self) -> Result<u64> {
        self.container.with_state(|state| {
            match &state.tree.get(self.id)?.kind {
                NodeKind::Raw(store) => Ok(store.raw_len()),
                other => Err(GdsError::invalid_op(
                    state.tree.full_name(self.id)?,
                    format!("{} nodes do not hold a raw stream", other.kind()),
                )),
            }
        })
    }

    /// Append typed values to an array
    ///
    /// Values are cast to the array's element type. The first dimension
    /// grows by every complete row.
    pub fn append_values(&self, data: ArrayData) -> Result<()> {
        self.container.with_state_mut(|state| {
            let OpenState { tree, backend, .. } = state;
            let path = tree.full_name(self.id)?;
            match &mut tree.get_mut(self.id)?.kind {
                NodeKind::Array(array) => {
                    let (bytes, count) = encode_values(array, data, &path)?;
                    let base = array.store.raw_len();
                    // Leaves the store untouched on failure
                    array.store.append(backend, &bytes)?;
                    if array.elem.is_string() {
                        array.mark_strings(base, &bytes);
                    }
                    array.len += count;
                    array.grow();
                    debug!("Appended {} elements to {} (dim {:?})", count, path, array.dim);
                    Ok(())
                }
                other => Err(GdsError::invalid_op(
                    path,
                    format!("{} nodes do not hold typed values", other.kind()),
                )),
            }
        })
    }

    /// Read a contiguous block
    ///
    /// Omitted `start`/`count` default to the full extent. A count entry of
    /// [`COUNT_TO_END`](crate::COUNT_TO_END) reads from its start to the end
    /// of that dimension.
    pub fn read(
        &self,
        start: Option<&[u64]>,
        count: Option<&[u64]>,
        convert: Option<ElemType>,
    ) -> Result<TypedArray> {
        self.with_array(|view| view.read(start, count, convert))
    }

    /// Read the cross-product of the indices selected by per-dimension masks
    pub fn read_selected(&self, masks: &[Vec<bool>], convert: Option<ElemType>) -> Result<TypedArray> {
        self.with_array(|view| view.read_selected(masks, convert))
    }

    fn with_array<R>(&self, f: impl FnOnce(&ArrayView<'_>) -> Result<R>) -> Result<R> {
        self.container.with_state(|state| {
            let path = state.tree.full_name(self.id)?;
            let entry = state.tree.get(self.id)?;
            match &entry.kind {
                NodeKind::Array(array) => f(&ArrayView {
                    path: &path,
                    array,
                    attributes: &entry.attributes,
                    backend: &state.backend,
                }),
                other => Err(GdsError::invalid_op(
                    path.clone(),
                    format!("{} nodes are not arrays", other.kind()),
                )),
            }
        })
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.container.shared, &other.container.shared) && self.id == other.id
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("container", &self.container.shared.path)
            .field("id", &self.id)
            .field("via", &self.via.as_ref().map(|link| link.id))
            .finish()
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}
