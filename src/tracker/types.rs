//! Tracker configuration and query types.

use crate::diff::DiffOptions;
use crate::types::{ChangeEntry, ChangeKind, Timestamp};
use serde::{Deserialize, Serialize};

/// Configuration for a [`ChangeTracker`](super::ChangeTracker).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Storage key the change log lives under.
    /// Default: "changes"
    pub namespace: String,

    /// Cap on pending entries across all collections.
    /// Default: 1000
    pub max_changes: usize,

    /// Keep the last snapshot of deleted entities.
    pub include_original_data: bool,

    /// Options for update diffs.
    pub diff: DiffOptions,
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_max_changes(mut self, max_changes: usize) -> Self {
        self.max_changes = max_changes;
        self
    }

    pub fn with_original_data(mut self, include: bool) -> Self {
        self.include_original_data = include;
        self
    }

    pub fn with_diff_options(mut self, diff: DiffOptions) -> Self {
        self.diff = diff;
        self
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            namespace: "changes".to_string(),
            max_changes: 1000,
            include_original_data: false,
            diff: DiffOptions::default(),
        }
    }
}

/// Restricts which entries a query returns. Bounds are inclusive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeFilter {
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub types: Option<Vec<ChangeKind>>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    pub fn types(mut self, types: Vec<ChangeKind>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn matches(&self, entry: &ChangeEntry) -> bool {
        if self.since.map_or(false, |since| entry.timestamp < since) {
            return false;
        }
        if self.until.map_or(false, |until| entry.timestamp > until) {
            return false;
        }
        if let Some(ref types) = self.types {
            return types.contains(&entry.kind);
        }
        true
    }
}

/// What goes into a generated [`ChangeBatch`](crate::types::ChangeBatch).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchOptions {
    /// Only entries at or after this time.
    pub since: Option<Timestamp>,

    /// Only these collections (None = all).
    pub collections: Option<Vec<String>>,

    pub types: Option<Vec<ChangeKind>>,

    /// Delete the captured entries once the batch is built.
    pub clear_after_generate: bool,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = Some(collections.into_iter().map(Into::into).collect());
        self
    }

    pub fn types(mut self, types: Vec<ChangeKind>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn clear_after_generate(mut self, clear: bool) -> Self {
        self.clear_after_generate = clear;
        self
    }

    pub(crate) fn includes_collection(&self, collection: &str) -> bool {
        self.collections
            .as_ref()
            .map_or(true, |names| names.iter().any(|name| name == collection))
    }

    pub(crate) fn entry_filter(&self) -> ChangeFilter {
        ChangeFilter {
            since: self.since,
            until: None,
            types: self.types.clone(),
        }
    }
}
