// strata/src/pipeline/mod.rs

//! Registration, the built `Pipeline`, and its execution.

pub mod builder;
pub mod definition;
pub mod execution;

pub use builder::{PipelineBuilder, Registration};
pub use definition::Pipeline;
