//! Lazy binding of virtual folders to external containers
//!
//! A virtual folder names another container file. The link is resolved on
//! first use by opening the target read-only (duplicates allowed) through the
//! file manager. A failed resolution is remembered together with its error
//! message and the folder then behaves as an empty, non-expandable folder;
//! the failure is logged but never returned to the caller.
//!
//! Bindings are weak: the table never keeps a target open by itself. A
//! [`Container`] handed out by [`LinkTable::resolve`] keeps the target alive
//! for as long as the caller holds it.

use crate::container::{Container, Shared};
use crate::manager::FileManager;
use crate::node::NodeId;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

enum LinkState {
    Bound(Weak<Shared>),
    Broken(String),
}

/// Resolution state of every virtual folder in one container
#[derive(Default)]
pub(crate) struct LinkTable {
    links: Mutex<AHashMap<NodeId, LinkState>>,
}

/// Where a link target lives on disk
pub(crate) fn target_location(owner: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        return target.to_path_buf();
    }
    match owner.parent() {
        Some(dir) => dir.join(target),
        None => target.to_path_buf(),
    }
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target container of the link `id`, or `None` when it is broken
    ///
    /// The target is opened without holding the table lock, so resolving one
    /// link never blocks lookups of the others.
    pub fn resolve(&self, owner: &Container, id: NodeId, target: &str) -> Option<Container> {
        if let Some(bound) = self.lookup(id) {
            return bound;
        }

        let location = target_location(owner.path(), target);
        let opened = FileManager::global().open(
            &location,
            true,
            true,
            owner.options().clone(),
            owner.codecs().clone(),
        );

        let mut links = self.links.lock();
        // Another thread may have bound the link while the file was opening
        if let Some(LinkState::Bound(weak)) = links.get(&id) {
            if let Some(shared) = weak.upgrade() {
                let container = Container::from_shared(shared);
                if container.is_open() {
                    return Some(container);
                }
            }
        }

        match opened {
            Ok(container) => {
                debug!(
                    "Resolved virtual folder {} -> {}",
                    id,
                    container.path().display()
                );
                links.insert(id, LinkState::Bound(Arc::downgrade(container.shared())));
                Some(container)
            }
            Err(e) => {
                warn!(
                    "Virtual folder {} in {} cannot open '{}': {}",
                    id,
                    owner.path().display(),
                    target,
                    e
                );
                links.insert(id, LinkState::Broken(e.to_string()));
                None
            }
        }
    }

    /// Settled state of a link: `Some(None)` when broken, `Some(target)`
    /// when bound to an open target, `None` when it needs opening
    fn lookup(&self, id: NodeId) -> Option<Option<Container>> {
        match self.links.lock().get(&id)? {
            LinkState::Broken(_) => Some(None),
            LinkState::Bound(weak) => weak
                .upgrade()
                .map(Container::from_shared)
                .filter(Container::is_open)
                .map(Some),
        }
    }

    /// Last resolution error of a broken link
    pub fn message(&self, id: NodeId) -> Option<String> {
        match self.links.lock().get(&id) {
            Some(LinkState::Broken(message)) => Some(message.clone()),
            _ => None,
        }
    }

    /// Drop the binding of a deleted or retargeted link
    pub fn forget(&self, id: NodeId) {
        self.links.lock().remove(&id);
    }

    /// Drop every binding
    pub fn clear(&self) {
        self.links.lock().clear();
    }
}
