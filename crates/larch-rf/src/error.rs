use std::path::PathBuf;

/// Broad failure category of a [`ForestError`].
///
/// Callers that only need to branch on the kind of failure (bad input,
/// missing sample, filesystem, damaged model file, internal defect) can match
/// on this instead of the individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller-supplied value was rejected.
    InvalidArgument,
    /// A sample id is unknown to both the committed index and the staging log.
    NotFound,
    /// Reading or writing the underlying file or stream failed.
    Io,
    /// Persisted bytes are malformed, truncated or of an incompatible version.
    CorruptData,
    /// A leaf counter would have gone negative, or counters disagree with the samples.
    InvariantViolation,
}

/// Errors from forest construction, mutation, classification and persistence.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// Returned when n_trees is zero.
    #[error("n_trees must be at least 1, got {n_trees}")]
    InvalidTreeCount {
        /// The invalid n_trees value provided.
        n_trees: usize,
    },

    /// Returned when max_depth is zero or above the supported cap.
    #[error("max_depth must be in [1, {max}], got {max_depth}")]
    InvalidMaxDepth {
        /// The invalid max_depth value provided.
        max_depth: usize,
        /// The largest supported depth.
        max: usize,
    },

    /// Returned when the feature index range is inverted.
    #[error("feature range {start}..={end} is empty")]
    InvalidFeatureRange {
        /// Lower bound of the range.
        start: u32,
        /// Upper bound of the range.
        end: u32,
    },

    /// Returned when the threshold range is inverted.
    #[error("threshold range {start}..={end} is empty")]
    InvalidThresholdRange {
        /// Lower bound of the range.
        start: i64,
        /// Upper bound of the range.
        end: i64,
    },

    /// Returned when the leaf budget is zero.
    #[error("max_leaves must be at least 1, got {max_leaves}")]
    InvalidLeafBudget {
        /// The invalid leaf budget.
        max_leaves: usize,
    },

    /// Returned when bag_fraction is not in (0.0, 1.0].
    #[error("bag_fraction must be in (0.0, 1.0], got {fraction}")]
    InvalidBagFraction {
        /// The invalid fraction provided.
        fraction: f64,
    },

    /// Returned when a sample label is neither 0 nor 1.
    #[error("sample {id:?} has label {label}, expected 0 or 1")]
    InvalidLabel {
        /// Id of the offending sample.
        id: String,
        /// The rejected label.
        label: u8,
    },

    /// Returned when a feature vector lists the same feature twice.
    #[error("feature {feature} appears more than once")]
    DuplicateFeature {
        /// The repeated feature index.
        feature: u32,
    },

    /// Returned when a partial classification asks for an unusable tree count.
    #[error("cannot classify with {requested} trees, forest has {available}")]
    InvalidPartialTreeCount {
        /// Number of trees requested.
        requested: usize,
        /// Number of trees in the forest.
        available: usize,
    },

    /// Returned when a sample id is neither committed nor staged.
    #[error("unknown sample id {id:?}")]
    SampleNotFound {
        /// The unknown id.
        id: String,
    },

    /// Returned when a leaf counter would drop below zero.
    #[error("leaf {node} of tree {tree} would go negative for label {label}")]
    NegativeLeafCount {
        /// Position of the tree in the forest.
        tree: usize,
        /// Arena index of the leaf.
        node: usize,
        /// Label whose counter underflowed.
        label: u8,
    },

    /// Returned when a counter update targets a node that is not a leaf.
    #[error("node {node} of tree {tree} is not a leaf")]
    NotALeaf {
        /// Position of the tree in the forest.
        tree: usize,
        /// Arena index of the node.
        node: usize,
    },

    /// Returned by validation when stored counters disagree with the sample index.
    #[error("leaf {node} of tree {tree} stores ({stored0}, {stored1}) but samples give ({expected0}, {expected1})")]
    LeafCountMismatch {
        /// Position of the tree in the forest.
        tree: usize,
        /// Arena index of the leaf.
        node: usize,
        /// Stored label-0 count.
        stored0: u64,
        /// Stored label-1 count.
        stored1: u64,
        /// Label-0 count recomputed from the index.
        expected0: u64,
        /// Label-1 count recomputed from the index.
        expected1: u64,
    },

    /// Returned when model serialization fails.
    #[error("failed to serialize model")]
    SerializeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when model bytes cannot be decoded.
    #[error("failed to decode model")]
    DecodeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when decoded model content is structurally invalid.
    #[error("corrupt model: {reason}")]
    CorruptModel {
        /// Human-readable description of the defect.
        reason: String,
    },

    /// Returned when the byte stream does not start with the model tag.
    #[error("not a larch model (tag {found:?})")]
    UnrecognizedFormat {
        /// The four leading bytes that were found.
        found: [u8; 4],
    },

    /// Returned when loading a model with an incompatible format version.
    #[error("incompatible model version: expected {expected}, found {found}")]
    IncompatibleModelVersion {
        /// The model format version this build expects.
        expected: u32,
        /// The model format version found in the stream.
        found: u32,
    },

    /// Returned when writing the model file fails.
    #[error("failed to write model to {path}")]
    WriteModel {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the model file fails.
    #[error("failed to read model from {path}")]
    ReadModel {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a stream read or write fails outside of decoding.
    #[error("model stream I/O failed")]
    Stream {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl ForestError {
    /// Return the broad category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForestError::InvalidTreeCount { .. }
            | ForestError::InvalidMaxDepth { .. }
            | ForestError::InvalidFeatureRange { .. }
            | ForestError::InvalidThresholdRange { .. }
            | ForestError::InvalidLeafBudget { .. }
            | ForestError::InvalidBagFraction { .. }
            | ForestError::InvalidLabel { .. }
            | ForestError::DuplicateFeature { .. }
            | ForestError::InvalidPartialTreeCount { .. } => ErrorKind::InvalidArgument,
            ForestError::SampleNotFound { .. } => ErrorKind::NotFound,
            ForestError::NegativeLeafCount { .. }
            | ForestError::NotALeaf { .. }
            | ForestError::LeafCountMismatch { .. } => ErrorKind::InvariantViolation,
            ForestError::WriteModel { .. }
            | ForestError::ReadModel { .. }
            | ForestError::Stream { .. }
            | ForestError::SerializeModel { .. } => ErrorKind::Io,
            ForestError::DecodeModel { source } => match source.as_ref() {
                bincode::ErrorKind::Io(e) if e.kind() != std::io::ErrorKind::UnexpectedEof => {
                    ErrorKind::Io
                }
                _ => ErrorKind::CorruptData,
            },
            ForestError::CorruptModel { .. }
            | ForestError::UnrecognizedFormat { .. }
            | ForestError::IncompatibleModelVersion { .. } => ErrorKind::CorruptData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, ForestError};

    #[test]
    fn label_error_is_invalid_argument() {
        let err = ForestError::InvalidLabel {
            id: "a".to_string(),
            label: 2,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.to_string(), "sample \"a\" has label 2, expected 0 or 1");
    }

    #[test]
    fn truncated_decode_is_corrupt_data() {
        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        let err = ForestError::DecodeModel {
            source: Box::new(bincode::ErrorKind::Io(eof)),
        };
        assert_eq!(err.kind(), ErrorKind::CorruptData);
    }

    #[test]
    fn broken_pipe_during_decode_is_io() {
        let pipe = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        let err = ForestError::DecodeModel {
            source: Box::new(bincode::ErrorKind::Io(pipe)),
        };
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn negative_count_is_invariant_violation() {
        let err = ForestError::NegativeLeafCount {
            tree: 0,
            node: 3,
            label: 1,
        };
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }
}
