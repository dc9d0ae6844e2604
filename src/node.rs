//! Node identity, kinds and descriptions

use crate::array::{ArrayClass, ElemType};
use crate::error::{GdsError, Result};
use crate::store::BlockStore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable arena index of a node
///
/// Ids are never reused within a container's lifetime; a deleted node leaves
/// a hole in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse node kind reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    Folder,
    VirtualFolder,
    Label,
    Raw,
    Integer,
    Factor,
    Logical,
    Real,
    String,
    Unknown,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Folder => "Folder",
            Kind::VirtualFolder => "VFolder",
            Kind::Label => "Label",
            Kind::Raw => "Raw",
            Kind::Integer => "Integer",
            Kind::Factor => "Factor",
            Kind::Logical => "Logical",
            Kind::Real => "Real",
            Kind::String => "String",
            Kind::Unknown => "Unknown",
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Kind::Folder | Kind::VirtualFolder)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ArrayClass> for Kind {
    fn from(class: ArrayClass) -> Self {
        match class {
            ArrayClass::Integer => Kind::Integer,
            ArrayClass::Factor => Kind::Factor,
            ArrayClass::Logical => Kind::Logical,
            ArrayClass::Real => Kind::Real,
            ArrayClass::String => Kind::String,
        }
    }
}

/// Elements between two entries of a string array's mark table
pub const STRING_MARK_STRIDE: u64 = 64;

/// Typed, shaped payload of an array node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayNode {
    pub class: ArrayClass,
    pub elem: ElemType,
    /// Extents, row-major; the first dimension grows on append
    pub dim: Vec<u64>,
    /// Elements appended so far
    pub len: u64,
    pub store: BlockStore,
    /// Payload offset of every `STRING_MARK_STRIDE`-th element of a string
    /// array; empty for fixed-width types
    pub string_marks: Vec<u64>,
}

impl ArrayNode {
    /// Elements per step of the first dimension
    pub fn row_len(&self) -> u64 {
        self.dim.iter().skip(1).product()
    }

    /// Total elements addressable through `dim`
    pub fn extent(&self) -> u64 {
        self.dim.iter().product()
    }

    /// Grow `dim[0]` to cover every complete row appended so far
    pub(crate) fn grow(&mut self) {
        if self.dim.is_empty() {
            return;
        }
        let row = self.row_len();
        if row > 0 {
            self.dim[0] = self.dim[0].max(self.len / row);
        }
    }

    /// Whether the stored description is internally consistent
    pub(crate) fn is_consistent(&self) -> bool {
        if !self.class.accepts(self.elem) || self.dim.is_empty() {
            return false;
        }
        match self.elem.size() {
            Some(size) => self.store.raw_len() == self.len * size as u64 && self.string_marks.is_empty(),
            None => {
                self.string_marks.len() as u64 == self.len.div_ceil(STRING_MARK_STRIDE)
                    && self.string_marks.iter().all(|&m| m < self.store.raw_len())
            }
        }
    }

    /// Record marks for string elements encoded in `bytes`, which were
    /// appended at payload offset `base`; call before bumping `len`
    pub(crate) fn mark_strings(&mut self, base: u64, bytes: &[u8]) {
        let unit = match self.elem {
            ElemType::Utf16 => 2,
            _ => 1,
        };
        let mut pos = 0usize;
        let mut index = self.len;
        while pos + 4 <= bytes.len() {
            if index % STRING_MARK_STRIDE == 0 {
                self.string_marks.push(base + pos as u64);
            }
            let count = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]);
            pos += 4 + count as usize * unit;
            index += 1;
        }
    }

    /// Payload span holding stored string elements `first..first + count`
    ///
    /// Returns the index of the first element in the span, the span's
    /// payload offset and its byte length.
    pub(crate) fn string_span(&self, first: u64, count: u64) -> Result<(u64, u64, u64)> {
        let lo = first / STRING_MARK_STRIDE;
        let hi = (first + count).div_ceil(STRING_MARK_STRIDE);
        let from = *self.string_marks.get(lo as usize).ok_or_else(|| {
            GdsError::CorruptData(format!("no string mark for element {}", first))
        })?;
        let to = self
            .string_marks
            .get(hi as usize)
            .copied()
            .unwrap_or_else(|| self.store.raw_len());
        Ok((lo * STRING_MARK_STRIDE, from, to.saturating_sub(from)))
    }
}

/// Cross-file link to the root of another container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualLink {
    /// Absolute, or relative to the directory of the containing file
    pub target_path: String,
}

/// Payload of a node; `dim` exists only on array-bearing kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    Folder,
    VirtualFolder(VirtualLink),
    Label,
    Raw(BlockStore),
    Array(ArrayNode),
    /// Node whose stored description failed validation on load
    Unknown { storage: String },
}

impl NodeKind {
    pub fn kind(&self) -> Kind {
        match self {
            NodeKind::Folder => Kind::Folder,
            NodeKind::VirtualFolder(_) => Kind::VirtualFolder,
            NodeKind::Label => Kind::Label,
            NodeKind::Raw(_) => Kind::Raw,
            NodeKind::Array(array) => array.class.into(),
            NodeKind::Unknown { .. } => Kind::Unknown,
        }
    }

    pub fn storage_name(&self) -> String {
        match self {
            NodeKind::Folder => String::from("dFolder"),
            NodeKind::VirtualFolder(_) => String::from("dVFolder"),
            NodeKind::Label => String::from("dLabel"),
            NodeKind::Raw(_) => String::from("dStream"),
            NodeKind::Array(array) => array.elem.storage_name().to_string(),
            NodeKind::Unknown { storage } => storage.clone(),
        }
    }

    pub fn trait_name(&self) -> String {
        match self {
            NodeKind::Folder => String::from("Folder"),
            NodeKind::VirtualFolder(link) => link.target_path.clone(),
            NodeKind::Label => String::from("Label"),
            NodeKind::Raw(_) => String::from("Stream"),
            NodeKind::Array(array) => array.elem.trait_name().to_string(),
            NodeKind::Unknown { .. } => String::new(),
        }
    }

    pub fn store(&self) -> Option<&BlockStore> {
        match self {
            NodeKind::Raw(store) => Some(store),
            NodeKind::Array(array) => Some(&array.store),
            _ => None,
        }
    }

    pub fn store_mut(&mut self) -> Option<&mut BlockStore> {
        match self {
            NodeKind::Raw(store) => Some(store),
            NodeKind::Array(array) => Some(&mut array.store),
            _ => None,
        }
    }

    pub fn dim(&self) -> Option<&[u64]> {
        match self {
            NodeKind::Array(array) => Some(&array.dim),
            _ => None,
        }
    }
}

/// Description of an array node to create
#[derive(Debug, Clone, PartialEq)]
pub struct ArraySpec {
    pub class: ArrayClass,
    pub elem: ElemType,
    /// Initial extents; reads past the appended data yield zeros or empty
    /// strings
    pub dim: Vec<u64>,
    /// Encoder name; `None` uses the container default
    pub encoder: Option<String>,
    /// Level strings of a factor
    pub levels: Vec<String>,
}

impl ArraySpec {
    pub fn new(class: ArrayClass, elem: ElemType, dim: Vec<u64>) -> Self {
        ArraySpec {
            class,
            elem,
            dim,
            encoder: None,
            levels: Vec::new(),
        }
    }

    pub fn integer(elem: ElemType, dim: Vec<u64>) -> Self {
        Self::new(ArrayClass::Integer, elem, dim)
    }

    pub fn real(elem: ElemType, dim: Vec<u64>) -> Self {
        Self::new(ArrayClass::Real, elem, dim)
    }

    pub fn string(elem: ElemType, dim: Vec<u64>) -> Self {
        Self::new(ArrayClass::String, elem, dim)
    }

    pub fn logical(dim: Vec<u64>) -> Self {
        Self::new(ArrayClass::Logical, ElemType::Int32, dim)
    }

    pub fn factor<S: Into<String>>(levels: Vec<S>, dim: Vec<u64>) -> Self {
        ArraySpec {
            levels: levels.into_iter().map(Into::into).collect(),
            ..Self::new(ArrayClass::Factor, ElemType::Int32, dim)
        }
    }

    pub fn with_encoder<S: Into<String>>(mut self, encoder: S) -> Self {
        self.encoder = Some(encoder.into());
        self
    }
}

/// Node to add under a folder
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpec {
    Folder,
    Label,
    Raw { encoder: Option<String> },
    Array(ArraySpec),
    VirtualFolder { target: String },
}

/// Snapshot of a node's description
///
/// `ratio` and `size` are `NaN` where they do not apply; serde_json writes
/// those as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub full_name: String,
    pub kind: Kind,
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub storage: String,
    pub dim: Option<Vec<u64>>,
    pub encoder: String,
    pub ratio: f64,
    pub size: f64,
    pub good: bool,
    pub hidden: bool,
    pub message: String,
}

impl NodeInfo {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncoderSpec;

    fn array(class: ArrayClass, elem: ElemType, dim: Vec<u64>) -> ArrayNode {
        ArrayNode {
            class,
            elem,
            dim,
            len: 0,
            store: BlockStore::new(&EncoderSpec::none(), 1024),
            string_marks: Vec::new(),
        }
    }

    #[test]
    fn test_kind_names() {
        let node = NodeKind::Array(array(ArrayClass::Real, ElemType::Float64, vec![3]));
        assert_eq!(node.kind(), Kind::Real);
        assert_eq!(node.trait_name(), "Float64");
        assert_eq!(node.storage_name(), "dFloat64");
        assert_eq!(node.dim(), Some(&[3u64][..]));

        let link = NodeKind::VirtualFolder(VirtualLink {
            target_path: "other.gds".into(),
        });
        assert_eq!(link.kind(), Kind::VirtualFolder);
        assert_eq!(link.trait_name(), "other.gds");
        assert_eq!(link.storage_name(), "dVFolder");
        assert!(link.dim().is_none());
        assert!(link.store().is_none());
    }

    #[test]
    fn test_grow_counts_complete_rows() {
        let mut node = array(ArrayClass::Integer, ElemType::Int32, vec![0, 3]);
        node.len = 7;
        node.grow();
        assert_eq!(node.dim, vec![2, 3]);

        // Declared extent is never shrunk
        let mut node = array(ArrayClass::Integer, ElemType::Int32, vec![10]);
        node.len = 4;
        node.grow();
        assert_eq!(node.dim, vec![10]);
    }

    #[test]
    fn test_consistency() {
        assert!(array(ArrayClass::Integer, ElemType::Int8, vec![0]).is_consistent());
        assert!(!array(ArrayClass::Factor, ElemType::Float32, vec![0]).is_consistent());
        assert!(!array(ArrayClass::Integer, ElemType::Int8, vec![]).is_consistent());

        let mut bad = array(ArrayClass::Integer, ElemType::Int8, vec![4]);
        bad.len = 4;
        assert!(!bad.is_consistent());

        assert!(array(ArrayClass::String, ElemType::Utf8, vec![0]).is_consistent());
        let mut unmarked = array(ArrayClass::String, ElemType::Utf8, vec![1]);
        unmarked.len = 1;
        assert!(!unmarked.is_consistent());
    }

    #[test]
    fn test_string_marks_and_spans() {
        let mut node = array(ArrayClass::String, ElemType::Utf8, vec![0]);
        let values = |n: usize| {
            // Every element encodes to 4 + 3 bytes
            crate::array::ArrayData::Utf8((0..n).map(|i| format!("id{}", i % 10)).collect()).encode()
        };

        node.mark_strings(0, &values(100));
        node.len = 100;
        assert_eq!(node.string_marks, vec![0, 64 * 7]);

        // A second append continues the element count
        node.mark_strings(700, &values(50));
        node.len = 150;
        assert_eq!(node.string_marks, vec![0, 64 * 7, 128 * 7]);

        assert_eq!(node.string_span(0, 1).unwrap(), (0, 0, 64 * 7));
        assert_eq!(node.string_span(60, 10).unwrap(), (0, 0, 128 * 7));
        assert_eq!(node.string_span(64, 64).unwrap(), (64, 64 * 7, 64 * 7));
        assert!(node.string_span(200, 1).is_err());
    }

    #[test]
    fn test_info_json() {
        let info = NodeInfo {
            name: "x".into(),
            full_name: "g/x".into(),
            kind: Kind::Integer,
            trait_name: "Int32".into(),
            storage: "dInt32".into(),
            dim: Some(vec![4]),
            encoder: String::new(),
            ratio: f64::NAN,
            size: 16.0,
            good: true,
            hidden: false,
            message: String::new(),
        };
        let json = info.to_json();
        assert_eq!(json["trait"], "Int32");
        assert_eq!(json["kind"], "Integer");
        assert!(json["ratio"].is_null());
        assert_eq!(json["dim"][0], 4);
    }
}
