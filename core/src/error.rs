// strata/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrataError {
  #[error("Duplicate key: '{key}' is already registered")]
  DuplicateKey { key: String },

  #[error("Dependency cycle detected: {}", path.join(" -> "))]
  Cycle { path: Vec<String> },

  #[error("Unsatisfiable dependency for '{node}': none of [{}] is registered", alternatives.join(", "))]
  UnsatisfiableDependency { node: String, alternatives: Vec<String> },

  #[error("Unsatisfiable segment constraint for '{node}' in segment '{segment}': {message}")]
  UnsatisfiableSegmentConstraint {
    node: String,
    segment: String,
    message: String,
  },

  #[error("Segment error for '{segment}': {message}")]
  UnknownSegment { segment: String, message: String },

  #[error("'{component}' is not ready: dependencies have not been resolved")]
  NotReady { component: String },

  #[error("'{component}' has already been resolved and can no longer be modified")]
  AlreadyResolved { component: String },

  #[error("Routing configuration error: {message}")]
  RoutingConfiguration { message: String },

  #[error("Ambiguous dependency in '{component}': kind '{kind}' has several instances, the reference must carry a name")]
  AmbiguousDependency { component: String, kind: String },

  #[error("Unknown node: {node}")]
  UnknownNode { node: String },

  #[error("Configuration error for '{key}': {message}")]
  Configuration { key: String, message: String },

  #[error("Error in middleware or external operation. Source: {source}")]
  Handler {
    #[source]
    source: AnyhowError,
  },
}

impl StrataError {
  /// True for every variant raised while resolving a pipeline, as opposed to
  /// errors surfaced by middleware bodies at request time.
  pub fn is_build_error(&self) -> bool {
    !matches!(self, StrataError::Handler { .. } | StrataError::NotReady { .. })
  }
}

impl From<AnyhowError> for StrataError {
  fn from(err: AnyhowError) -> Self {
    StrataError::Handler { source: err }
  }
}

pub type StrataResult<T, E = StrataError> = std::result::Result<T, E>;
