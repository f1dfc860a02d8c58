// strata/src/graph/tree.rs

//! The segment tree: named segments with ordered children, built incrementally.

use crate::error::{StrataError, StrataResult};
use std::collections::HashMap;
use tracing::{event, Level};

#[derive(Debug)]
struct Segment {
  name: String,
  parent: Option<usize>,
  children: Vec<usize>,
}

/// A forest of named segments. Each segment has at most one parent, and the
/// structure can never contain a loop.
#[derive(Debug, Default)]
pub struct SegmentTree {
  segments: Vec<Segment>,
  index: HashMap<String, usize>,
}

impl SegmentTree {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declares `name` (if new) and appends `children` to it. Children are
  /// declared on the fly. Naming a child already under this parent is a no-op.
  pub fn add<S, I>(&mut self, name: &str, children: I) -> StrataResult<()>
  where
    S: AsRef<str>,
    I: IntoIterator<Item = S>,
  {
    let parent = self.ensure(name);
    for child in children {
      let child = child.as_ref();
      let c = self.ensure(child);
      match self.segments[c].parent {
        Some(p) if p == parent => continue,
        Some(p) => {
          event!(Level::ERROR, segment = %child, parent = %self.segments[p].name, "Segment already has a parent.");
          return Err(StrataError::UnknownSegment {
            segment: child.to_string(),
            message: format!(
              "already a child of '{}', cannot also be a child of '{}'",
              self.segments[p].name, name
            ),
          });
        }
        None => {
          if c == parent || self.is_ancestor(c, parent) {
            return Err(StrataError::UnknownSegment {
              segment: child.to_string(),
              message: format!("making it a child of '{}' would create a loop", name),
            });
          }
          self.segments[c].parent = Some(parent);
          self.segments[parent].children.push(c);
        }
      }
    }
    event!(Level::DEBUG, segment = %name, num_children = self.segments[parent].children.len(), "Segment declared.");
    Ok(())
  }

  fn ensure(&mut self, name: &str) -> usize {
    if let Some(&i) = self.index.get(name) {
      return i;
    }
    let i = self.segments.len();
    self.segments.push(Segment {
      name: name.to_string(),
      parent: None,
      children: Vec::new(),
    });
    self.index.insert(name.to_string(), i);
    i
  }

  pub fn len(&self) -> usize {
    self.segments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  /// Segment names in declaration order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.segments.iter().map(|s| s.name.as_str())
  }

  pub fn roots(&self) -> Vec<&str> {
    self
      .segments
      .iter()
      .filter(|s| s.parent.is_none())
      .map(|s| s.name.as_str())
      .collect()
  }

  pub fn parent(&self, name: &str) -> Option<&str> {
    let i = *self.index.get(name)?;
    self.segments[i].parent.map(|p| self.segments[p].name.as_str())
  }

  pub fn children(&self, name: &str) -> Vec<&str> {
    self
      .index
      .get(name)
      .map(|&i| {
        self.segments[i]
          .children
          .iter()
          .map(|&c| self.segments[c].name.as_str())
          .collect()
      })
      .unwrap_or_default()
  }

  /// Strict ancestors of `name`, nearest first.
  pub fn ancestors(&self, name: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let Some(&i) = self.index.get(name) else {
      return out;
    };
    let mut current = self.segments[i].parent;
    while let Some(p) = current {
      out.push(self.segments[p].name.as_str());
      current = self.segments[p].parent;
    }
    out
  }

  // --- index-based helpers for the segmenter ---

  pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
    self.index.get(name).copied()
  }

  pub(crate) fn name_of(&self, i: usize) -> &str {
    &self.segments[i].name
  }

  pub(crate) fn parent_of(&self, i: usize) -> Option<usize> {
    self.segments[i].parent
  }

  pub(crate) fn children_of(&self, i: usize) -> &[usize] {
    &self.segments[i].children
  }

  pub(crate) fn depth_of(&self, i: usize) -> usize {
    let mut depth = 0;
    let mut current = self.segments[i].parent;
    while let Some(p) = current {
      depth += 1;
      current = self.segments[p].parent;
    }
    depth
  }

  /// True when `ancestor` is a strict ancestor of `i`.
  pub(crate) fn is_ancestor(&self, ancestor: usize, i: usize) -> bool {
    let mut current = self.segments[i].parent;
    while let Some(p) = current {
      if p == ancestor {
        return true;
      }
      current = self.segments[p].parent;
    }
    false
  }

  pub(crate) fn is_ancestor_or_self(&self, ancestor: usize, i: usize) -> bool {
    ancestor == i || self.is_ancestor(ancestor, i)
  }

  /// Lowest common ancestor of two segments, `None` across separate roots.
  pub(crate) fn lca_pair(&self, a: usize, b: usize) -> Option<usize> {
    let (mut a, mut b) = (a, b);
    let (mut da, mut db) = (self.depth_of(a), self.depth_of(b));
    while da > db {
      a = self.segments[a].parent?;
      da -= 1;
    }
    while db > da {
      b = self.segments[b].parent?;
      db -= 1;
    }
    while a != b {
      a = self.segments[a].parent?;
      b = self.segments[b].parent?;
    }
    Some(a)
  }

  pub(crate) fn lca<I: IntoIterator<Item = usize>>(&self, segments: I) -> Option<usize> {
    let mut iter = segments.into_iter();
    let first = iter.next()?;
    iter.try_fold(first, |acc, s| self.lca_pair(acc, s))
  }
}
