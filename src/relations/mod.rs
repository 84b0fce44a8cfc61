//! Post-pipeline relation resolution.

pub mod embedded;
pub mod merge;

pub use merge::merge_related;
