//! Build utilities shared by the layout stages.
//!
//! - [`context`] - Per-invocation build context and well-known tree paths
//! - [`filesystem`] - Ownership-preserving tree copies and tolerated removals

pub mod context;
pub mod filesystem;
