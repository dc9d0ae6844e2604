//! Error types for container operations

use thiserror::Error;

/// Container operation errors
///
/// Every variant names the offending path or node together with the
/// constraint that was violated.
#[derive(Error, Debug)]
pub enum GdsError {
    /// Path or name resolution failed
    #[error("No such node \"{path}\" (segment \"{segment}\" not found)")]
    NotFound { path: String, segment: String },

    /// Container file does not exist on disk
    ///
    /// The file-level counterpart of [`GdsError::NotFound`]: both form the
    /// not-found class, and [`GdsError::is_not_found`] matches either.
    #[error("No such container file: {0}")]
    FileNotFound(String),

    /// Duplicate-open policy violation
    #[error("The file '{path}' has been created or opened: {reason}")]
    AlreadyOpen { path: String, reason: String },

    /// A sibling already holds the name
    #[error("Name conflict: \"{name}\" already exists in \"{parent}\"")]
    NameConflict { parent: String, name: String },

    /// Children can only be added to folders
    #[error("Invalid parent \"{path}\": {kind} nodes cannot hold children")]
    InvalidParent { path: String, kind: String },

    /// Operation not permitted on this node or handle
    #[error("Invalid operation on \"{path}\": {reason}")]
    InvalidOperation { path: String, reason: String },

    /// Selection rank or mask length disagrees with the node's dimensions
    #[error("Dimension mismatch on \"{path}\": {detail}")]
    DimensionMismatch { path: String, detail: String },

    /// Offset or extent beyond the stored data
    #[error("Out of range on \"{path}\": {detail}")]
    OutOfRange { path: String, detail: String },

    /// Requested conversion target cannot be produced from the stored type
    #[error("Unsupported conversion on \"{path}\": {from} -> {to}")]
    UnsupportedConversion {
        path: String,
        from: String,
        to: String,
    },

    /// Encoder name is not registered
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Codec or integrity failure
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    /// Underlying storage failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Index record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl GdsError {
    /// True for node resolution failures and missing container files
    pub fn is_not_found(&self) -> bool {
        matches!(self, GdsError::NotFound { .. } | GdsError::FileNotFound(_))
    }

    pub(crate) fn not_found(path: impl Into<String>, segment: impl Into<String>) -> Self {
        GdsError::NotFound {
            path: path.into(),
            segment: segment.into(),
        }
    }

    pub(crate) fn invalid_op(path: impl Into<String>, reason: impl Into<String>) -> Self {
        GdsError::InvalidOperation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_range(path: impl Into<String>, detail: impl Into<String>) -> Self {
        GdsError::OutOfRange {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn dim_mismatch(path: impl Into<String>, detail: impl Into<String>) -> Self {
        GdsError::DimensionMismatch {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GdsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_class() {
        assert!(GdsError::not_found("g/x", "x").is_not_found());
        assert!(GdsError::FileNotFound("missing.gds".into()).is_not_found());
        assert!(!GdsError::invalid_op("g", "read-only").is_not_found());
        assert!(!GdsError::CorruptData("bad crc".into()).is_not_found());
    }
}
