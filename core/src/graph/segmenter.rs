// strata/src/graph/segmenter.rs

//! Places nodes into the segments of a [`SegmentTree`].
//!
//! A node restricted to a set of segments always runs there. An unrestricted
//! node floats: it is placed only where its consumers need it, and when it is
//! needed in several segments it moves up to their lowest common ancestor so
//! that one instance serves every branch below.
//!
//! Resolution happens once, in four passes:
//!
//! 1. **Region.** The segments a node may occupy at all. Unrestricted nodes may
//!    go anywhere. A restricted node may occupy its allowed segments, their
//!    descendants, and any segment whose children are all in the region (a
//!    parent that only ever routes into allowed branches).
//! 2. **Feasibility.** A segment stays feasible for a node only while every
//!    required group of the node has an alternative feasible in that same
//!    segment. Iterated until nothing changes.
//! 3. **Demand.** Starting from the allowed segments, each placed node demands
//!    its dependencies in the segments it occupies: every restricted
//!    alternative feasible there, otherwise the first feasible unrestricted
//!    one. Iterated until no demand set grows.
//! 4. **Placement.** A node with consumers and several demand segments
//!    collapses to their lowest common ancestor when it is feasible there;
//!    otherwise it keeps its demand segments, minus those already covered by
//!    an ancestor in the set.

use crate::error::{StrataError, StrataResult};
use crate::graph::dependency_graph::DependencyGroup;
use crate::graph::tree::SegmentTree;
use std::collections::{BTreeSet, HashMap};
use tracing::{event, instrument, Level};

struct SegmentNode {
  name: String,
  groups: Vec<DependencyGroup<String>>,
  allowed: Vec<String>,
}

/// A group with its alternatives resolved to node indices.
struct ResolvedGroup {
  known: Vec<usize>,
  optional: bool,
}

#[derive(Debug)]
struct Placement {
  node_segments: Vec<Vec<usize>>,
  segment_nodes: Vec<Vec<usize>>,
}

#[derive(Default)]
pub struct Segmenter {
  tree: SegmentTree,
  nodes: Vec<SegmentNode>,
  node_index: HashMap<String, usize>,
  default_segment: Option<String>,
  placement: Option<Placement>,
}

impl Segmenter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declares a segment and appends `children` to it.
  pub fn add_segment<S, I>(&mut self, name: &str, children: I) -> StrataResult<()>
  where
    S: AsRef<str>,
    I: IntoIterator<Item = S>,
  {
    self.ensure_mutable()?;
    self.tree.add(name, children)
  }

  /// Registers a node. An empty `allowed_segments` leaves it unrestricted.
  pub fn add_node<S, I>(
    &mut self,
    name: &str,
    groups: Vec<DependencyGroup<String>>,
    allowed_segments: I,
  ) -> StrataResult<()>
  where
    S: Into<String>,
    I: IntoIterator<Item = S>,
  {
    self.ensure_mutable()?;
    if self.node_index.contains_key(name) {
      return Err(StrataError::DuplicateKey { key: name.to_string() });
    }
    let mut allowed: Vec<String> = Vec::new();
    for segment in allowed_segments {
      let segment = segment.into();
      if !allowed.contains(&segment) {
        allowed.push(segment);
      }
    }
    event!(Level::DEBUG, node = %name, num_groups = groups.len(), ?allowed, "Segment node added.");
    self.node_index.insert(name.to_string(), self.nodes.len());
    self.nodes.push(SegmentNode {
      name: name.to_string(),
      groups: groups.into_iter().filter(|g| !g.is_empty()).collect(),
      allowed,
    });
    Ok(())
  }

  /// Unrestricted nodes that nobody consumes are placed here instead of being
  /// left out.
  pub fn set_default_segment(&mut self, segment: impl Into<String>) -> StrataResult<()> {
    self.ensure_mutable()?;
    self.default_segment = Some(segment.into());
    Ok(())
  }

  pub fn tree(&self) -> &SegmentTree {
    &self.tree
  }

  pub fn is_resolved(&self) -> bool {
    self.placement.is_some()
  }

  /// Nodes placed directly in `segment`, in registration order. A node placed
  /// in an ancestor is not repeated for the descendants.
  pub fn segment_nodes(&self, segment: &str) -> StrataResult<Vec<&str>> {
    let placement = self.placement()?;
    let s = self.tree.index_of(segment).ok_or_else(|| StrataError::UnknownSegment {
      segment: segment.to_string(),
      message: "not declared".to_string(),
    })?;
    Ok(placement.segment_nodes[s].iter().map(|&n| self.nodes[n].name.as_str()).collect())
  }

  /// Every segment `node` must be present in, in segment declaration order.
  pub fn node_segments(&self, node: &str) -> StrataResult<Vec<&str>> {
    let placement = self.placement()?;
    let n = *self
      .node_index
      .get(node)
      .ok_or_else(|| StrataError::UnknownNode { node: node.to_string() })?;
    Ok(placement.node_segments[n].iter().map(|&s| self.tree.name_of(s)).collect())
  }

  fn placement(&self) -> StrataResult<&Placement> {
    self.placement.as_ref().ok_or_else(|| StrataError::NotReady {
      component: "segmenter".to_string(),
    })
  }

  fn ensure_mutable(&self) -> StrataResult<()> {
    if self.placement.is_some() {
      return Err(StrataError::AlreadyResolved {
        component: "segmenter".to_string(),
      });
    }
    Ok(())
  }

  #[instrument(
    name = "Segmenter::resolve",
    skip_all,
    fields(num_segments = self.tree.len(), num_nodes = self.nodes.len()),
    err(Display)
  )]
  pub fn resolve(&mut self) -> StrataResult<()> {
    self.ensure_mutable()?;

    let allowed = self.allowed_indices()?;
    let default_segment = match &self.default_segment {
      Some(name) => Some(self.tree.index_of(name).ok_or_else(|| StrataError::UnknownSegment {
        segment: name.clone(),
        message: "default segment is not declared".to_string(),
      })?),
      None => None,
    };
    let groups = self.resolved_groups();

    let region: Vec<Vec<bool>> = allowed.iter().map(|a| self.region(a)).collect();
    let feasible = self.feasible(region, &groups);

    let mut demand: Vec<BTreeSet<usize>> = allowed.iter().map(|a| a.iter().copied().collect()).collect();
    let mut consumed = vec![false; self.nodes.len()];
    for (n, homes) in demand.iter().enumerate() {
      for &s in homes {
        if !feasible[n][s] {
          return Err(self.home_failure(n, s, &groups, &feasible));
        }
      }
    }
    self.propagate(&mut demand, &mut consumed, &groups, &feasible)?;

    if let Some(d) = default_segment {
      let mut defaulted = false;
      for n in 0..self.nodes.len() {
        if allowed[n].is_empty() && demand[n].is_empty() {
          let homes = self.default_homes(n, d, &feasible);
          if homes.is_empty() {
            return Err(self.home_failure(n, d, &groups, &feasible));
          }
          event!(
            Level::DEBUG,
            node = %self.nodes[n].name,
            segments = ?homes.iter().map(|&s| self.tree.name_of(s)).collect::<Vec<_>>(),
            "Unclaimed node given a default home."
          );
          demand[n].extend(homes);
          defaulted = true;
        }
      }
      if defaulted {
        self.propagate(&mut demand, &mut consumed, &groups, &feasible)?;
      }
    }

    let mut node_segments = Vec::with_capacity(self.nodes.len());
    let mut segment_nodes = vec![Vec::new(); self.tree.len()];
    for n in 0..self.nodes.len() {
      let mut placed = self.place(n, &demand[n], consumed[n], &feasible);
      placed.sort_unstable();
      for &s in &placed {
        segment_nodes[s].push(n);
      }
      event!(
        Level::DEBUG,
        node = %self.nodes[n].name,
        segments = ?placed.iter().map(|&s| self.tree.name_of(s)).collect::<Vec<_>>(),
        "Node placed."
      );
      node_segments.push(placed);
    }

    self.placement = Some(Placement {
      node_segments,
      segment_nodes,
    });
    event!(Level::INFO, "Segment placement resolved.");
    Ok(())
  }

  fn allowed_indices(&self) -> StrataResult<Vec<Vec<usize>>> {
    self
      .nodes
      .iter()
      .map(|node| {
        node
          .allowed
          .iter()
          .map(|segment| {
            self.tree.index_of(segment).ok_or_else(|| StrataError::UnknownSegment {
              segment: segment.clone(),
              message: format!("node '{}' is restricted to a segment that was never declared", node.name),
            })
          })
          .collect()
      })
      .collect()
  }

  fn resolved_groups(&self) -> Vec<Vec<ResolvedGroup>> {
    self
      .nodes
      .iter()
      .map(|node| {
        node
          .groups
          .iter()
          .map(|g| ResolvedGroup {
            known: g
              .alternatives()
              .iter()
              .filter_map(|k| self.node_index.get(k).copied())
              .collect(),
            optional: g.is_optional(),
          })
          .collect()
      })
      .collect()
  }

  fn region(&self, allowed: &[usize]) -> Vec<bool> {
    let count = self.tree.len();
    if allowed.is_empty() {
      return vec![true; count];
    }
    let mut region: Vec<bool> = (0..count)
      .map(|s| allowed.iter().any(|&a| self.tree.is_ancestor_or_self(a, s)))
      .collect();
    // Deepest first so a parent sees its children's final state.
    let mut by_depth: Vec<usize> = (0..count).collect();
    by_depth.sort_by_key(|&s| std::cmp::Reverse(self.tree.depth_of(s)));
    for s in by_depth {
      let children = self.tree.children_of(s);
      if !region[s] && !children.is_empty() && children.iter().all(|&c| region[c]) {
        region[s] = true;
      }
    }
    region
  }

  fn feasible(&self, mut feasible: Vec<Vec<bool>>, groups: &[Vec<ResolvedGroup>]) -> Vec<Vec<bool>> {
    loop {
      let mut changed = false;
      for n in 0..self.nodes.len() {
        for s in 0..self.tree.len() {
          if !feasible[n][s] {
            continue;
          }
          let blocked = groups[n]
            .iter()
            .any(|g| !g.optional && !g.known.iter().any(|&m| feasible[m][s]));
          if blocked {
            feasible[n][s] = false;
            changed = true;
          }
        }
      }
      if !changed {
        return feasible;
      }
    }
  }

  fn propagate(
    &self,
    demand: &mut [BTreeSet<usize>],
    consumed: &mut [bool],
    groups: &[Vec<ResolvedGroup>],
    feasible: &[Vec<bool>],
  ) -> StrataResult<()> {
    let mut rounds = 0usize;
    loop {
      rounds += 1;
      let mut changed = false;
      for n in 0..self.nodes.len() {
        let placed = self.place(n, &demand[n], consumed[n], feasible);
        for s in placed {
          for (g, group) in groups[n].iter().enumerate() {
            let picks = self.pick(group, s, feasible);
            if picks.is_empty() && !group.optional {
              return Err(self.group_failure(n, g, s, groups));
            }
            for m in picks {
              changed |= demand[m].insert(s);
              if !consumed[m] {
                consumed[m] = true;
                changed = true;
              }
            }
          }
        }
      }
      if !changed {
        event!(Level::TRACE, rounds, "Demand propagation reached a fixed point.");
        return Ok(());
      }
    }
  }

  /// Alternatives of `group` that a node placed in `s` depends on.
  fn pick(&self, group: &ResolvedGroup, s: usize, feasible: &[Vec<bool>]) -> Vec<usize> {
    let restricted: Vec<usize> = group
      .known
      .iter()
      .copied()
      .filter(|&m| !self.nodes[m].allowed.is_empty() && feasible[m][s])
      .collect();
    if !restricted.is_empty() {
      return restricted;
    }
    group
      .known
      .iter()
      .copied()
      .find(|&m| self.nodes[m].allowed.is_empty() && feasible[m][s])
      .into_iter()
      .collect()
  }

  /// The default segment itself when the node can run there, otherwise the
  /// highest segments below it where the node can run.
  fn default_homes(&self, n: usize, default: usize, feasible: &[Vec<bool>]) -> Vec<usize> {
    if feasible[n][default] {
      return vec![default];
    }
    (0..self.tree.len())
      .filter(|&s| feasible[n][s] && self.tree.is_ancestor(default, s))
      .filter(|&s| {
        let mut current = self.tree.parent_of(s);
        while let Some(p) = current {
          if feasible[n][p] {
            return false;
          }
          current = self.tree.parent_of(p);
        }
        true
      })
      .collect()
  }

  fn place(&self, n: usize, demand: &BTreeSet<usize>, consumed: bool, feasible: &[Vec<bool>]) -> Vec<usize> {
    if consumed && demand.len() > 1 {
      if let Some(lca) = self.tree.lca(demand.iter().copied()) {
        if feasible[n][lca] {
          return vec![lca];
        }
      }
    }
    demand
      .iter()
      .copied()
      .filter(|&s| !demand.iter().any(|&other| self.tree.is_ancestor(other, s)))
      .collect()
  }

  fn home_failure(&self, n: usize, s: usize, groups: &[Vec<ResolvedGroup>], feasible: &[Vec<bool>]) -> StrataError {
    let failing = groups[n]
      .iter()
      .position(|g| !g.optional && !g.known.iter().any(|&m| feasible[m][s]));
    match failing {
      Some(g) => self.group_failure(n, g, s, groups),
      None => StrataError::UnsatisfiableSegmentConstraint {
        node: self.nodes[n].name.clone(),
        segment: self.tree.name_of(s).to_string(),
        message: "the segment lies outside the node's allowed segments".to_string(),
      },
    }
  }

  fn group_failure(&self, n: usize, g: usize, s: usize, groups: &[Vec<ResolvedGroup>]) -> StrataError {
    let node = &self.nodes[n];
    let alternatives: Vec<String> = node.groups[g].alternatives().to_vec();
    let err = if groups[n][g].known.is_empty() {
      StrataError::UnsatisfiableDependency {
        node: node.name.clone(),
        alternatives,
      }
    } else {
      StrataError::UnsatisfiableSegmentConstraint {
        node: node.name.clone(),
        segment: self.tree.name_of(s).to_string(),
        message: format!(
          "requires one of [{}], but their segment restrictions keep all of them out of this segment",
          alternatives.join(", ")
        ),
      }
    };
    event!(Level::ERROR, error = %err, "Segment placement failed.");
    err
  }
}
