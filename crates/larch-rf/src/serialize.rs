//! Model serialization and deserialization via bincode.
//!
//! Layout, in order: a header (tag + format version), then a body holding the
//! configuration, the tree count, one pre-order node stream per tree and the
//! full committed sample set in ascending id order. Raw sample features are
//! stored so a reloaded forest can keep accepting adds and removes.

use std::io::{Read, Write};
use std::path::Path;

use bincode::Options;
use tracing::{debug, info, instrument};

use crate::config::ForestConfig;
use crate::error::ForestError;
use crate::features::SparseFeatures;
use crate::forest::Forest;
use crate::index::{SampleIndex, StoredSample};
use crate::inspect::check_tree;
use crate::node::{FeatureIndex, LeafCounts, Node, NodeIndex};
use crate::staging::StagingLog;
use crate::tree::SplitTree;

/// Leading tag of every model stream.
const MAGIC: [u8; 4] = *b"LRCH";

/// Current binary format version.
const FORMAT_VERSION: u32 = 1;

#[derive(serde::Serialize, serde::Deserialize)]
struct Header {
    magic: [u8; 4],
    format_version: u32,
}

/// One node of a pre-order tree stream.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
enum PersistedNode {
    Split { feature: u32, threshold: i64 },
    Leaf { count0: u64, count1: u64 },
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedSample {
    id: String,
    features: Vec<(u32, i64)>,
    label: u8,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Body {
    config: ForestConfig,
    n_trees: u64,
    trees: Vec<Vec<PersistedNode>>,
    samples: Vec<PersistedSample>,
}

/// Fixed-int little-endian encoding, shared by both directions.
fn encode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

/// Decoding options that refuse to read more than `limit` bytes, so a
/// damaged length prefix fails before anything is allocated for it.
fn decode_options(limit: usize) -> impl Options {
    encode_options().with_limit(limit as u64)
}

fn corrupt(reason: impl Into<String>) -> ForestError {
    ForestError::CorruptModel {
        reason: reason.into(),
    }
}

/// Flatten an arena tree into its pre-order node stream.
fn encode_tree(tree: &SplitTree) -> Vec<PersistedNode> {
    let mut out = Vec::with_capacity(tree.n_nodes());
    let mut stack = vec![0usize];
    while let Some(idx) = stack.pop() {
        match &tree.nodes()[idx] {
            Node::Leaf(c) => out.push(PersistedNode::Leaf {
                count0: c.count0,
                count1: c.count1,
            }),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                out.push(PersistedNode::Split {
                    feature: feature.index(),
                    threshold: *threshold,
                });
                stack.push(right.index());
                stack.push(left.index());
            }
        }
    }
    out
}

/// Rebuild an arena tree from a pre-order node stream.
///
/// Every split must be followed by two complete subtrees, no node may sit
/// deeper than `max_depth`, and the stream must end exactly after the root's
/// subtree.
fn decode_tree(
    tree_pos: usize,
    stream: &[PersistedNode],
    max_depth: usize,
) -> Result<SplitTree, ForestError> {
    let mut nodes: Vec<Node> = Vec::with_capacity(stream.len());
    // Split nodes still waiting for a left (false) or right (true) child,
    // with their depth.
    let mut open: Vec<(usize, bool, usize)> = Vec::new();

    for (pos, persisted) in stream.iter().enumerate() {
        if pos > 0 && open.is_empty() {
            return Err(corrupt(format!(
                "tree {tree_pos}: {} trailing nodes after root subtree",
                stream.len() - pos
            )));
        }
        let idx = nodes.len();
        let mut depth = 0;
        if let Some((parent, filled_left, parent_depth)) = open.pop() {
            depth = parent_depth + 1;
            if let Node::Split { left, right, .. } = &mut nodes[parent] {
                if filled_left {
                    *right = NodeIndex::new(idx);
                } else {
                    *left = NodeIndex::new(idx);
                    open.push((parent, true, parent_depth));
                }
            }
        }
        if depth > max_depth {
            return Err(corrupt(format!(
                "tree {tree_pos}: node {idx} at depth {depth} exceeds max_depth {max_depth}"
            )));
        }
        match *persisted {
            PersistedNode::Leaf { count0, count1 } => {
                nodes.push(Node::Leaf(LeafCounts { count0, count1 }));
            }
            PersistedNode::Split { feature, threshold } => {
                nodes.push(Node::Split {
                    feature: FeatureIndex::new(feature),
                    threshold,
                    left: NodeIndex::new(idx),
                    right: NodeIndex::new(idx),
                });
                open.push((idx, false, depth));
            }
        }
    }

    if nodes.is_empty() {
        return Err(corrupt(format!("tree {tree_pos}: empty node stream")));
    }
    if !open.is_empty() {
        return Err(corrupt(format!("tree {tree_pos}: node stream ends mid-subtree")));
    }
    Ok(SplitTree::from_nodes(nodes))
}

fn decode_samples(samples: Vec<PersistedSample>) -> Result<SampleIndex, ForestError> {
    let mut index = SampleIndex::default();
    for s in samples {
        if s.label > 1 {
            return Err(corrupt(format!("sample {:?} has label {}", s.id, s.label)));
        }
        let features = SparseFeatures::from_pairs(s.features)
            .map_err(|e| corrupt(format!("sample {:?}: {e}", s.id)))?;
        let id = s.id;
        let sample = StoredSample {
            features,
            label: s.label,
        };
        if index.contains(&id) {
            return Err(corrupt(format!("duplicate sample id {id:?}")));
        }
        index.upsert(id, sample);
    }
    Ok(index)
}

impl Forest {
    /// Commit, then write the whole forest to `writer`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::SerializeModel`] | bincode encoding or the write failed |
    /// | any commit error | pending changes could not be committed |
    #[instrument(skip_all, fields(n_trees = self.trees.len()))]
    pub fn write_to<W: Write>(&mut self, mut writer: W) -> Result<(), ForestError> {
        self.commit()?;

        let header = Header {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
        };
        let body = Body {
            config: self.config.clone(),
            n_trees: self.trees.len() as u64,
            trees: self.trees.iter().map(encode_tree).collect(),
            samples: self
                .index
                .iter()
                .map(|s| PersistedSample {
                    id: s.id.to_string(),
                    features: s.features.to_raw(),
                    label: s.label,
                })
                .collect(),
        };

        encode_options()
            .serialize_into(&mut writer, &header)
            .and_then(|()| encode_options().serialize_into(&mut writer, &body))
            .map_err(|source| ForestError::SerializeModel { source })?;
        writer
            .flush()
            .map_err(|source| ForestError::Stream { source })?;

        debug!(n_samples = body.samples.len(), "model written");
        Ok(())
    }

    /// Read a forest previously written by [`Forest::write_to`].
    ///
    /// The reader is drained to its end before decoding.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::Stream`] | reading from `reader` failed |
    /// | anything from [`Forest::from_bytes`] | content is malformed |
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, ForestError> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|source| ForestError::Stream { source })?;
        Self::from_bytes(&bytes)
    }

    /// Decode a forest from bytes produced by [`Forest::to_bytes`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::DecodeModel`] | bytes are truncated, undecodable or declare lengths past the end |
    /// | [`ForestError::UnrecognizedFormat`] | the bytes do not start with the model tag |
    /// | [`ForestError::IncompatibleModelVersion`] | format version mismatch |
    /// | [`ForestError::CorruptModel`] | decoded content is inconsistent |
    #[instrument(skip_all, fields(size_bytes = bytes.len()))]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ForestError> {
        let mut rest = bytes;
        let header: Header = decode_options(rest.len())
            .deserialize_from(&mut rest)
            .map_err(|source| ForestError::DecodeModel { source })?;
        if header.magic != MAGIC {
            return Err(ForestError::UnrecognizedFormat {
                found: header.magic,
            });
        }
        if header.format_version != FORMAT_VERSION {
            return Err(ForestError::IncompatibleModelVersion {
                expected: FORMAT_VERSION,
                found: header.format_version,
            });
        }

        let body: Body = decode_options(rest.len())
            .deserialize_from(&mut rest)
            .map_err(|source| ForestError::DecodeModel { source })?;
        if !rest.is_empty() {
            return Err(corrupt(format!(
                "{} trailing bytes after model body",
                rest.len()
            )));
        }

        Self::from_body(body)
    }

    fn from_body(body: Body) -> Result<Self, ForestError> {
        body.config
            .validate()
            .map_err(|e| corrupt(format!("stored configuration rejected: {e}")))?;
        let n_trees = usize::try_from(body.n_trees)
            .map_err(|_| corrupt(format!("tree count {} does not fit in memory", body.n_trees)))?;
        if n_trees != body.config.n_trees || n_trees != body.trees.len() {
            return Err(corrupt(format!(
                "tree count {} disagrees with config ({}) or stream ({})",
                n_trees,
                body.config.n_trees,
                body.trees.len()
            )));
        }

        let trees = body
            .trees
            .iter()
            .enumerate()
            .map(|(pos, stream)| decode_tree(pos, stream, body.config.max_depth))
            .collect::<Result<Vec<_>, _>>()?;
        let index = decode_samples(body.samples)?;

        for (pos, tree) in trees.iter().enumerate() {
            check_tree(pos, tree, &index, body.config.bag_fraction)
                .map_err(|e| corrupt(format!("counters disagree with samples: {e}")))?;
        }

        debug!(n_trees, n_samples = index.len(), "model decoded");
        Ok(Self {
            config: body.config,
            trees,
            index,
            staging: StagingLog::default(),
        })
    }

    /// Commit, then encode the whole forest into a byte vector.
    ///
    /// # Errors
    ///
    /// Same as [`Forest::write_to`].
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, ForestError> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Commit, then save the model to a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::SerializeModel`] | bincode encoding failed |
    /// | [`ForestError::WriteModel`] | file write failed |
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), ForestError> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;

        std::fs::write(path, &bytes).map_err(|e| ForestError::WriteModel {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!(
            size_bytes = bytes.len(),
            n_trees = self.trees.len(),
            n_samples = self.index.len(),
            "model saved"
        );
        Ok(())
    }

    /// Load a model from a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::ReadModel`] | file read failed |
    /// | anything from [`Forest::read_from`] | content is malformed |
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ForestError> {
        let path = path.as_ref();

        let bytes = std::fs::read(path).map_err(|e| ForestError::ReadModel {
            path: path.to_path_buf(),
            source: e,
        })?;
        let forest = Self::from_bytes(&bytes)?;

        info!(
            n_trees = forest.trees.len(),
            n_samples = forest.index.len(),
            "model loaded"
        );
        Ok(forest)
    }
}
