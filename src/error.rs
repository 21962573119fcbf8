//! Error types.
//!
//! [`ConfigError`] covers everything that can be rejected before the chain starts
//! (invalid hyperparameters, inconsistent dimensions, impossible truncations).
//! [`SamplerError`] covers failures while a sweep is running.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} {message} (got {value})")]
    Constraint {
        name: &'static str,
        value: f64,
        message: &'static str,
    },

    #[error("{what} has {found} entries, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("row {row} has {found} columns, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("count matrix needs at least one category")]
    NoCategories,

    #[error("item {item} has label {label}, but labels must be less than {k_max}")]
    LabelOutOfRange {
        item: usize,
        label: usize,
        k_max: usize,
    },

    #[error("item {item}, category {category} has a positive count but is marked not at risk")]
    StructuralZeroWithCount { item: usize, category: usize },

    #[error("split-merge needs at least two items (got {n_items})")]
    TooFewItems { n_items: usize },

    // With a single component every anchor pair shares a cluster and no split slot
    // exists, so the anchor draw would never finish.
    #[error("truncation must allow at least two clusters (got {k_max})")]
    TruncationTooSmall { k_max: usize },

    #[error("cannot redraw {n_split} log-rate coordinates out of {n_categories}")]
    SplitCoordinates { n_split: usize, n_categories: usize },

    #[error("thinning interval must be positive")]
    ZeroThin,
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("no finite log weight among {n} candidates")]
    DegenerateWeights { n: usize },

    #[error("categorical draw failed: {0}")]
    Categorical(#[from] rand::distr::weighted::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
