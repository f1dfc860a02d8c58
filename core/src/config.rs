// strata/src/config.rs

use crate::error::{StrataError, StrataResult};
use std::env;

pub const ROOT_SEGMENT_VAR: &str = "STRATA_ROOT_SEGMENT";
pub const PLACE_UNCLAIMED_VAR: &str = "STRATA_PLACE_UNCLAIMED";

/// Settings for [`PipelineBuilder`](crate::PipelineBuilder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderConfig {
  /// Name of the segment holding the top-level chain. Route names may not reuse it.
  pub root_segment: String,
  /// Place unrestricted components that no other component depends on in the
  /// root segment. When off, such components are left out of the pipeline.
  pub place_unclaimed_in_root: bool,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    Self {
      root_segment: "root".to_string(),
      place_unclaimed_in_root: true,
    }
  }
}

impl BuilderConfig {
  /// Reads overrides from `STRATA_ROOT_SEGMENT` and `STRATA_PLACE_UNCLAIMED`.
  /// Unset variables keep their defaults.
  pub fn from_env() -> StrataResult<Self> {
    let defaults = Self::default();

    let root_segment = match env::var(ROOT_SEGMENT_VAR) {
      Ok(value) if value.trim().is_empty() => {
        return Err(StrataError::Configuration {
          key: ROOT_SEGMENT_VAR.to_string(),
          message: "must not be empty".to_string(),
        })
      }
      Ok(value) => value.trim().to_string(),
      Err(_) => defaults.root_segment,
    };

    let place_unclaimed_in_root = match env::var(PLACE_UNCLAIMED_VAR) {
      Ok(value) => value
        .trim()
        .to_ascii_lowercase()
        .parse::<bool>()
        .map_err(|e| StrataError::Configuration {
          key: PLACE_UNCLAIMED_VAR.to_string(),
          message: format!("invalid value '{}': {}", value, e),
        })?,
      Err(_) => defaults.place_unclaimed_in_root,
    };

    tracing::debug!(%root_segment, place_unclaimed_in_root, "Builder configuration loaded from environment.");
    Ok(Self {
      root_segment,
      place_unclaimed_in_root,
    })
  }
}
