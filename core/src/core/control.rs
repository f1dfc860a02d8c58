// strata/src/core/control.rs

//! The outcome of running a request through a pipeline.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineResult {
  /// Every middleware passed control on and the request ran off the end of
  /// the pipeline. The host decides what happens next (typically a 404).
  Completed,
  /// A middleware returned without running its continuation.
  Stopped,
}
