//! Incremental binary classification with randomized split trees.
//!
//! A [`Forest`] holds `T` split trees whose topology is drawn once from a
//! seed, independently of any data, plus the set of committed samples.
//! Samples are staged with [`Forest::add`] / [`Forest::remove`] and applied
//! on [`Forest::commit`], which only touches the single root-to-leaf path a
//! sample maps to in each tree. Reads commit first, so they always see a fully
//! drained state. Forests persist to a versioned bincode stream.
//!
//! ```
//! use larch_rf::{ForestConfig, SparseFeatures};
//!
//! let mut forest = ForestConfig::new(25)?.with_seed(7).build()?;
//! forest.add("a", SparseFeatures::from_pairs([(1, 1), (3, 1)])?, 0)?;
//! forest.add("b", SparseFeatures::from_pairs([(2, 1)])?, 1)?;
//! let p = forest.classify(&SparseFeatures::from_pairs([(2, 1)])?)?;
//! assert!((0.0..=1.0).contains(&p));
//! # Ok::<(), larch_rf::ForestError>(())
//! ```

mod bag;
mod commit;
mod config;
mod error;
mod features;
mod forest;
mod index;
mod inspect;
mod node;
mod serialize;
mod staging;
mod tree;

pub use config::{ForestConfig, MAX_SUPPORTED_DEPTH};
pub use error::{ErrorKind, ForestError};
pub use features::SparseFeatures;
pub use forest::Forest;
pub use index::{SampleRef, Samples, StoredSample};
pub use node::{FeatureIndex, LeafCounts, Node, NodeIndex};
pub use staging::{StagedOp, StagingLog};
pub use tree::SplitTree;
