// strata/src/graph/mod.rs

//! Build-time resolution: dependency ordering and segment placement.

pub mod dependency_graph;
pub mod segmenter;
pub mod tree;

pub use dependency_graph::{DependencyGraph, DependencyGroup};
pub use segmenter::Segmenter;
pub use tree::SegmentTree;
