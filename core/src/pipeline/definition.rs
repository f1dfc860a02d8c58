// strata/src/pipeline/definition.rs

//! The resolved, immutable pipeline produced by
//! [`PipelineBuilder::build`](crate::PipelineBuilder::build).

use crate::error::{StrataError, StrataResult};
use crate::routing::PipelineSegment;
use std::collections::HashMap;
use std::sync::Arc;

/// Every segment is resolved and read-only, so a `Pipeline` can be shared
/// across tasks behind an `Arc` and serve requests concurrently.
pub struct Pipeline {
  pub(crate) root: Arc<PipelineSegment>,
  segments: Vec<Arc<PipelineSegment>>,
  placements: HashMap<String, Vec<String>>,
}

impl Pipeline {
  /// `segments` must start with the root segment.
  pub(crate) fn new(segments: Vec<Arc<PipelineSegment>>, placements: HashMap<String, Vec<String>>) -> Self {
    Self {
      root: segments[0].clone(),
      segments,
      placements,
    }
  }

  pub fn root(&self) -> &Arc<PipelineSegment> {
    &self.root
  }

  pub fn segment(&self, name: &str) -> Option<&Arc<PipelineSegment>> {
    self.segments.iter().find(|s| s.name() == name)
  }

  /// Segment names, root first, then routes in declaration order.
  pub fn segment_names(&self) -> impl Iterator<Item = &str> {
    self.segments.iter().map(|s| s.name())
  }

  /// The ordered chain of `segment`.
  pub fn chain(&self, segment: &str) -> StrataResult<&[String]> {
    self
      .segment(segment)
      .ok_or_else(|| StrataError::UnknownSegment {
        segment: segment.to_string(),
        message: "no such segment in this pipeline".to_string(),
      })?
      .chain_names()
  }

  /// Segments `component` was placed in. Empty for components that ended up
  /// unplaced.
  pub fn placement(&self, component: &str) -> StrataResult<&[String]> {
    self
      .placements
      .get(component)
      .map(Vec::as_slice)
      .ok_or_else(|| StrataError::UnknownNode {
        node: component.to_string(),
      })
  }
}

impl std::fmt::Debug for Pipeline {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pipeline")
      .field("segments", &self.segment_names().collect::<Vec<_>>())
      .field("placements", &self.placements)
      .finish()
  }
}
