//! Structural diff and patch for JSON trees.
//!
//! [`diff`] compares two values and produces a [`DiffNode`]: a flat map of
//! dot-separated paths to [`ChangeOp`]s, plus array moves. [`patch`] applies a
//! node to a base value to reconstruct the target.
//!
//! Arrays are compared by position unless [`DiffOptions::object_identifier`]
//! names a field to correlate elements by, or
//! [`DiffOptions::detect_array_move`] asks for reorder detection in scalar
//! arrays. Both correlated modes match greedily (first unclaimed candidate),
//! so with duplicate keys the reported moves are valid but not necessarily
//! minimal.
//!
//! # Example
//!
//! ```
//! use delta_store::diff::{diff, patch, DiffOptions};
//! use serde_json::json;
//!
//! let old = json!({"a": 1, "b": "x"});
//! let new = json!({"a": 2, "b": "x"});
//!
//! let node = diff(&old, &new, &DiffOptions::default());
//! assert_eq!(node.changes.len(), 1);
//! assert_eq!(patch(&old, &node), new);
//! ```
//!
//! Object keys that a dot path cannot address (empty, or containing `.`)
//! are not diffed key by key: an object holding one is replaced as a whole
//! when it changes.

mod engine;
mod node;
mod patch;
mod path;

pub use engine::{diff, values_equal};
pub use node::{ChangeOp, DiffFormat, DiffKind, DiffNode, DiffOptions, DiffStats, Move};
pub use patch::patch;
pub use path::{Path, PathSegment};
