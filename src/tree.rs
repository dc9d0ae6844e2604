//! Node tree index
//!
//! The tree is an arena of [`NodeEntry`] slots addressed by [`NodeId`]. Every
//! non-root entry records its parent, every folder its ordered children.
//! Child lookup by name goes through an ahash map rebuilt after loading.
//! The whole arena is serialized with bincode into the index record.

use crate::attribute::{Attributes, INVISIBLE};
use crate::error::{GdsError, Result};
use crate::node::{Kind, NodeId, NodeKind};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One node of the tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
    pub attributes: Attributes,
    pub hidden: bool,
}

impl NodeEntry {
    fn new(name: String, parent: Option<NodeId>, kind: NodeKind) -> Self {
        NodeEntry {
            name,
            parent,
            children: Vec::new(),
            kind,
            attributes: Attributes::new(),
            hidden: false,
        }
    }

    /// Hidden by flag or by the `R.invisible` attribute
    pub fn is_hidden(&self) -> bool {
        self.hidden || self.attributes.contains(INVISIBLE)
    }
}

/// Outcome of walking a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Walk {
    Found(NodeId),
    /// `segment` has no match below the walked prefix
    Missing { segment: String },
    /// The walk reached a virtual folder with `rest` still to resolve
    Crossed { vfolder: NodeId, rest: Vec<String> },
}

/// Split a path into its non-empty segments
pub fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Check a node name
pub fn validate_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("node name cannot be empty");
    }
    if name.contains('/') {
        return Err("node name cannot contain '/'");
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Option<NodeEntry>>,
    #[serde(skip)]
    names: AHashMap<NodeId, AHashMap<String, NodeId>>,
}

impl Tree {
    /// Tree holding only the nameless root folder
    pub fn new() -> Self {
        Tree {
            nodes: vec![Some(NodeEntry::new(String::new(), None, NodeKind::Folder))],
            names: AHashMap::new(),
        }
    }

    /// Decode a tree from an index record payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut tree: Tree = bincode::deserialize(bytes)?;
        match tree.nodes.first() {
            Some(Some(root)) if matches!(root.kind, NodeKind::Folder) && root.parent.is_none() => {}
            _ => {
                return Err(GdsError::CorruptData(String::from(
                    "index record has no root folder",
                )))
            }
        }
        tree.quarantine_inconsistent();
        tree.rebuild_names();
        Ok(tree)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Replace array descriptions that cannot be read back with `Unknown`
    fn quarantine_inconsistent(&mut self) {
        for (index, slot) in self.nodes.iter_mut().enumerate() {
            let Some(entry) = slot else { continue };
            let storage = match &entry.kind {
                NodeKind::Array(array) if !array.is_consistent() => array.elem.storage_name(),
                _ => continue,
            };
            warn!(
                "Node {} ({}) has an inconsistent array description",
                NodeId(index as u32),
                entry.name
            );
            entry.kind = NodeKind::Unknown {
                storage: storage.to_string(),
            };
        }
    }

    fn rebuild_names(&mut self) {
        self.names.clear();
        for (index, slot) in self.nodes.iter().enumerate() {
            let Some(entry) = slot else { continue };
            if !entry.children.is_empty() {
                let map = entry
                    .children
                    .iter()
                    .filter_map(|&child| self.nodes[child.index()].as_ref().map(|c| (c.name.clone(), child)))
                    .collect();
                self.names.insert(NodeId(index as u32), map);
            }
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Number of live nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.index()), Some(Some(_)))
    }

    pub fn get(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| GdsError::not_found(id.to_string(), id.to_string()))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| GdsError::not_found(id.to_string(), id.to_string()))
    }

    /// Ids of all live nodes in arena order
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    /// Every live entry, mutably
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut NodeEntry> {
        self.nodes.iter_mut().filter_map(Option::as_mut)
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.names.get(&parent).and_then(|m| m.get(name)).copied()
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.get(id)?.parent)
    }

    /// Slash-joined names from the root; the root itself is ""
    pub fn full_name(&self, id: NodeId) -> Result<String> {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            let entry = self.get(node)?;
            if entry.parent.is_some() {
                parts.push(entry.name.as_str());
            }
            current = entry.parent;
        }
        parts.reverse();
        Ok(parts.join("/"))
    }

    /// Walk `segments` from `start`
    pub fn walk(&self, start: NodeId, segments: &[String]) -> Result<Walk> {
        let mut current = start;
        for (i, segment) in segments.iter().enumerate() {
            let entry = self.get(current)?;
            match entry.kind {
                NodeKind::VirtualFolder(_) => {
                    return Ok(Walk::Crossed {
                        vfolder: current,
                        rest: segments[i..].to_vec(),
                    })
                }
                NodeKind::Folder => match self.child(current, segment) {
                    Some(next) => current = next,
                    None => {
                        return Ok(Walk::Missing {
                            segment: segment.clone(),
                        })
                    }
                },
                _ => {
                    return Ok(Walk::Missing {
                        segment: segment.clone(),
                    })
                }
            }
        }
        Ok(Walk::Found(current))
    }

    /// Ordered child names; empty for non-folders
    pub fn list_children(&self, id: NodeId, include_hidden: bool) -> Result<Vec<String>> {
        let entry = self.get(id)?;
        let mut names = Vec::with_capacity(entry.children.len());
        for &child in &entry.children {
            let child = self.get(child)?;
            if include_hidden || !child.is_hidden() {
                names.push(child.name.clone());
            }
        }
        Ok(names)
    }

    pub fn child_count(&self, id: NodeId) -> Result<usize> {
        Ok(self.get(id)?.children.len())
    }

    /// Add a node under a folder
    pub fn add_child(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> Result<NodeId> {
        let parent_entry = self.get(parent)?;
        if parent_entry.kind.kind() != Kind::Folder {
            return Err(GdsError::InvalidParent {
                path: self.full_name(parent)?,
                kind: parent_entry.kind.kind().to_string(),
            });
        }
        validate_name(name).map_err(|reason| GdsError::invalid_op(name, reason))?;
        if self.child(parent, name).is_some() {
            return Err(GdsError::NameConflict {
                parent: self.full_name(parent)?,
                name: name.to_string(),
            });
        }

        let id = NodeId(u32::try_from(self.nodes.len()).map_err(|_| {
            GdsError::invalid_op(self.full_name(parent).unwrap_or_default(), "node arena is full")
        })?);
        self.nodes
            .push(Some(NodeEntry::new(name.to_string(), Some(parent), kind)));
        self.get_mut(parent)?.children.push(id);
        self.names
            .entry(parent)
            .or_default()
            .insert(name.to_string(), id);

        debug!("Added node {} '{}' under {}", id, name, parent);
        Ok(id)
    }

    pub fn rename(&mut self, id: NodeId, new_name: &str) -> Result<()> {
        let entry = self.get(id)?;
        let Some(parent) = entry.parent else {
            return Err(GdsError::invalid_op("/", "the root cannot be renamed"));
        };
        validate_name(new_name)
            .map_err(|reason| GdsError::invalid_op(self.full_name(id).unwrap_or_default(), reason))?;
        if entry.name == new_name {
            return Ok(());
        }
        if self.child(parent, new_name).is_some() {
            return Err(GdsError::NameConflict {
                parent: self.full_name(parent)?,
                name: new_name.to_string(),
            });
        }

        let old_name = std::mem::replace(&mut self.get_mut(id)?.name, new_name.to_string());
        if let Some(map) = self.names.get_mut(&parent) {
            map.remove(&old_name);
            map.insert(new_name.to_string(), id);
        }
        debug!("Renamed node {} '{}' -> '{}'", id, old_name, new_name);
        Ok(())
    }

    /// Remove a node and its subtree, returning the removed entries
    pub fn remove(&mut self, id: NodeId) -> Result<Vec<(NodeId, NodeEntry)>> {
        let entry = self.get(id)?;
        let Some(parent) = entry.parent else {
            return Err(GdsError::invalid_op("/", "the root cannot be deleted"));
        };
        let name = entry.name.clone();

        let parent_entry = self.get_mut(parent)?;
        parent_entry.children.retain(|&c| c != id);
        if let Some(map) = self.names.get_mut(&parent) {
            map.remove(&name);
        }

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(entry) = self.nodes.get_mut(node.index()).and_then(Option::take) {
                stack.extend(entry.children.iter().copied());
                self.names.remove(&node);
                removed.push((node, entry));
            }
        }

        debug!("Removed node {} '{}' ({} nodes)", id, name, removed.len());
        Ok(removed)
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttrValue;

    fn sample() -> (Tree, NodeId, NodeId) {
        let mut tree = Tree::new();
        let g = tree.add_child(tree.root(), "g", NodeKind::Folder).unwrap();
        let x = tree.add_child(g, "x", NodeKind::Label).unwrap();
        (tree, g, x)
    }

    #[test]
    fn test_walk_and_full_name() {
        let (tree, g, x) = sample();
        assert_eq!(tree.walk(tree.root(), &segments("/g/x")).unwrap(), Walk::Found(x));
        assert_eq!(tree.walk(tree.root(), &segments("g//x/")).unwrap(), Walk::Found(x));
        assert_eq!(tree.walk(g, &segments("x")).unwrap(), Walk::Found(x));
        assert_eq!(tree.walk(tree.root(), &segments("")).unwrap(), Walk::Found(tree.root()));
        assert_eq!(
            tree.walk(tree.root(), &segments("g/y")).unwrap(),
            Walk::Missing {
                segment: "y".into()
            }
        );
        // Labels have no children
        assert_eq!(
            tree.walk(tree.root(), &segments("g/x/z")).unwrap(),
            Walk::Missing {
                segment: "z".into()
            }
        );
        assert_eq!(tree.full_name(x).unwrap(), "g/x");
        assert_eq!(tree.full_name(tree.root()).unwrap(), "");
    }

    #[test]
    fn test_walk_crosses_virtual_folder() {
        let mut tree = Tree::new();
        let link = tree
            .add_child(
                tree.root(),
                "ext",
                NodeKind::VirtualFolder(crate::node::VirtualLink {
                    target_path: "other.gds".into(),
                }),
            )
            .unwrap();
        assert_eq!(
            tree.walk(tree.root(), &segments("ext/a/b")).unwrap(),
            Walk::Crossed {
                vfolder: link,
                rest: vec!["a".into(), "b".into()]
            }
        );
        assert_eq!(tree.walk(tree.root(), &segments("ext")).unwrap(), Walk::Found(link));
    }

    #[test]
    fn test_add_child_errors() {
        let (mut tree, g, x) = sample();
        assert!(matches!(
            tree.add_child(g, "x", NodeKind::Folder),
            Err(GdsError::NameConflict { .. })
        ));
        assert!(matches!(
            tree.add_child(x, "y", NodeKind::Folder),
            Err(GdsError::InvalidParent { .. })
        ));
        assert!(matches!(
            tree.add_child(g, "a/b", NodeKind::Folder),
            Err(GdsError::InvalidOperation { .. })
        ));
        assert!(matches!(
            tree.add_child(g, "", NodeKind::Folder),
            Err(GdsError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_rename() {
        let (mut tree, g, x) = sample();
        tree.add_child(g, "other", NodeKind::Label).unwrap();

        tree.rename(x, "y").unwrap();
        assert_eq!(tree.child(g, "y"), Some(x));
        assert_eq!(tree.child(g, "x"), None);
        assert!(matches!(
            tree.rename(x, "other"),
            Err(GdsError::NameConflict { .. })
        ));
        assert!(matches!(
            tree.rename(tree.root(), "r"),
            Err(GdsError::InvalidOperation { .. })
        ));
        // Renaming to the current name is a no-op
        tree.rename(x, "y").unwrap();
    }

    #[test]
    fn test_listing_order_and_hidden() {
        let mut tree = Tree::new();
        let root = tree.root();
        for name in ["c", "a", "b"] {
            tree.add_child(root, name, NodeKind::Label).unwrap();
        }
        let a = tree.child(root, "a").unwrap();
        tree.get_mut(a)
            .unwrap()
            .attributes
            .set(INVISIBLE, AttrValue::None);
        let b = tree.child(root, "b").unwrap();
        tree.get_mut(b).unwrap().hidden = true;

        assert_eq!(tree.list_children(root, true).unwrap(), vec!["c", "a", "b"]);
        assert_eq!(tree.list_children(root, false).unwrap(), vec!["c"]);
        assert!(tree.list_children(a, true).unwrap().is_empty());
    }

    #[test]
    fn test_remove_subtree_never_reuses_ids() {
        let (mut tree, g, x) = sample();
        let removed = tree.remove(g).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!tree.contains(g));
        assert!(!tree.contains(x));
        assert_eq!(tree.len(), 1);

        let again = tree.add_child(tree.root(), "g", NodeKind::Folder).unwrap();
        assert!(again.index() > x.index());
        assert!(matches!(
            tree.remove(tree.root()),
            Err(GdsError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_serialization_rebuilds_lookup() {
        let (tree, g, x) = sample();
        let bytes = tree.to_bytes().unwrap();
        let loaded = Tree::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.child(g, "x"), Some(x));
        assert_eq!(loaded.full_name(x).unwrap(), "g/x");

        assert!(Tree::from_bytes(&[1, 2, 3]).is_err());
    }
}
