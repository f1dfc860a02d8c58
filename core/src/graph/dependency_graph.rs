// strata/src/graph/dependency_graph.rs

//! A keyed dependency graph whose edges are AND-of-OR groups.
//!
//! Every node carries a payload and zero or more [`DependencyGroup`]s. A group
//! is satisfied once any one of its alternatives has been placed earlier in
//! the order. An optional group none of whose alternatives is registered is
//! satisfied from the start. A node is ready once all
//! of its groups are satisfied. When every remaining node is blocked, the
//! earliest one with unsatisfied optional groups gives them up, so optional
//! edges never turn into a cycle. Ordering is a generalised Kahn's algorithm in
//! which ties between ready nodes go to the earliest registered one, so the
//! same registration sequence always yields the same order.

use crate::error::{StrataError, StrataResult};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::hash::Hash;
use tracing::{event, instrument, Level};

/// One OR-set of acceptable predecessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGroup<K> {
  alternatives: Vec<K>,
  optional: bool,
}

impl<K> DependencyGroup<K> {
  /// A required group satisfied by any of `alternatives`.
  pub fn any_of(alternatives: impl IntoIterator<Item = K>) -> Self {
    Self {
      alternatives: alternatives.into_iter().collect(),
      optional: false,
    }
  }

  /// A required group with a single alternative.
  pub fn one(key: K) -> Self {
    Self {
      alternatives: vec![key],
      optional: false,
    }
  }

  /// Adds the optional sentinel: the group is satisfied even if none of its
  /// alternatives is present.
  pub fn optional(mut self) -> Self {
    self.optional = true;
    self
  }

  pub fn alternatives(&self) -> &[K] {
    &self.alternatives
  }

  pub fn is_optional(&self) -> bool {
    self.optional
  }

  pub fn is_empty(&self) -> bool {
    self.alternatives.is_empty()
  }
}

/// `None` entries act as the optional sentinel.
impl<K> FromIterator<Option<K>> for DependencyGroup<K> {
  fn from_iter<I: IntoIterator<Item = Option<K>>>(iter: I) -> Self {
    let mut group = DependencyGroup {
      alternatives: Vec::new(),
      optional: false,
    };
    for entry in iter {
      match entry {
        Some(key) => group.alternatives.push(key),
        None => group.optional = true,
      }
    }
    group
  }
}

struct GraphNode<K, T> {
  key: K,
  payload: T,
  groups: Vec<DependencyGroup<K>>,
}

/// Dependency graph over unique keys `K` with attached payloads `T`.
pub struct DependencyGraph<K, T> {
  nodes: Vec<GraphNode<K, T>>,
  index: HashMap<K, usize>,
}

impl<K, T> Default for DependencyGraph<K, T>
where
  K: Eq + Hash + Clone + fmt::Display,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<K, T> DependencyGraph<K, T>
where
  K: Eq + Hash + Clone + fmt::Display,
{
  pub fn new() -> Self {
    Self {
      nodes: Vec::new(),
      index: HashMap::new(),
    }
  }

  /// Registers a node. Empty groups are dropped since they constrain nothing.
  pub fn add(&mut self, key: K, payload: T, groups: Vec<DependencyGroup<K>>) -> StrataResult<()> {
    if self.index.contains_key(&key) {
      event!(Level::ERROR, %key, "Duplicate key in dependency graph.");
      return Err(StrataError::DuplicateKey { key: key.to_string() });
    }
    let groups: Vec<_> = groups.into_iter().filter(|g| !g.is_empty()).collect();
    event!(Level::TRACE, %key, num_groups = groups.len(), "Node added to dependency graph.");
    self.index.insert(key.clone(), self.nodes.len());
    self.nodes.push(GraphNode { key, payload, groups });
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, key: &K) -> bool {
    self.index.contains_key(key)
  }

  pub fn get(&self, key: &K) -> Option<&T> {
    self.index.get(key).map(|&i| &self.nodes[i].payload)
  }

  /// Payloads in dependency order.
  pub fn get_all_data(&self) -> StrataResult<Vec<&T>> {
    Ok(self.order()?.into_iter().map(|i| &self.nodes[i].payload).collect())
  }

  /// Keys in dependency order.
  pub fn ordered_keys(&self) -> StrataResult<Vec<&K>> {
    Ok(self.order()?.into_iter().map(|i| &self.nodes[i].key).collect())
  }

  /// Consumes the graph, yielding `(key, payload)` pairs in dependency order.
  pub fn into_ordered(self) -> StrataResult<Vec<(K, T)>> {
    let order = self.order()?;
    let mut rank = vec![0usize; self.nodes.len()];
    for (position, &node) in order.iter().enumerate() {
      rank[node] = position;
    }
    let mut ranked: Vec<(usize, K, T)> = self
      .nodes
      .into_iter()
      .enumerate()
      .map(|(i, node)| (rank[i], node.key, node.payload))
      .collect();
    ranked.sort_by_key(|(r, _, _)| *r);
    Ok(ranked.into_iter().map(|(_, key, payload)| (key, payload)).collect())
  }

  /// Computes the order as node indices.
  #[instrument(name = "DependencyGraph::order", skip_all, fields(num_nodes = self.nodes.len()))]
  fn order(&self) -> StrataResult<Vec<usize>> {
    // Group alternatives resolved to node indices; unknown keys drop out.
    let resolved: Vec<Vec<Vec<usize>>> = self
      .nodes
      .iter()
      .map(|node| {
        node
          .groups
          .iter()
          .map(|g| g.alternatives.iter().filter_map(|k| self.index.get(k).copied()).collect())
          .collect()
      })
      .collect();

    for (node, groups) in self.nodes.iter().zip(&resolved) {
      for (group, known) in node.groups.iter().zip(groups) {
        if known.is_empty() && !group.optional {
          event!(Level::ERROR, node = %node.key, "Dependency group references only unknown keys.");
          return Err(StrataError::UnsatisfiableDependency {
            node: node.key.to_string(),
            alternatives: group.alternatives.iter().map(ToString::to_string).collect(),
          });
        }
      }
    }

    // watchers[k] lists (node, group) pairs that k can satisfy.
    let mut watchers: Vec<Vec<(usize, usize)>> = vec![Vec::new(); self.nodes.len()];
    let mut satisfied: Vec<Vec<bool>> = Vec::with_capacity(self.nodes.len());
    let mut pending = vec![0usize; self.nodes.len()];
    let mut ready = BinaryHeap::new();

    for (i, node) in self.nodes.iter().enumerate() {
      let mut flags = Vec::with_capacity(node.groups.len());
      for g in 0..node.groups.len() {
        // An optional group still orders after whichever alternatives exist.
        let absent = resolved[i][g].is_empty();
        flags.push(absent);
        if !absent {
          pending[i] += 1;
          for &alt in &resolved[i][g] {
            watchers[alt].push((i, g));
          }
        }
      }
      satisfied.push(flags);
      if pending[i] == 0 {
        ready.push(Reverse(i));
      }
    }

    let mut order = Vec::with_capacity(self.nodes.len());
    let mut placed = vec![false; self.nodes.len()];
    loop {
      while let Some(Reverse(i)) = ready.pop() {
        placed[i] = true;
        order.push(i);
        for &(node, group) in &watchers[i] {
          if !satisfied[node][group] {
            satisfied[node][group] = true;
            pending[node] -= 1;
            if pending[node] == 0 {
              ready.push(Reverse(node));
            }
          }
        }
      }
      if order.len() == self.nodes.len() {
        break;
      }
      // Stuck: let the earliest blocked node drop its optional groups, whose
      // alternatives can no longer run first.
      let released = (0..self.nodes.len()).find(|&i| {
        !placed[i] && (0..self.nodes[i].groups.len()).any(|g| self.nodes[i].groups[g].optional && !satisfied[i][g])
      });
      let Some(i) = released else {
        break;
      };
      for g in 0..self.nodes[i].groups.len() {
        if self.nodes[i].groups[g].optional && !satisfied[i][g] {
          satisfied[i][g] = true;
          pending[i] -= 1;
        }
      }
      event!(Level::DEBUG, node = %self.nodes[i].key, "Optional dependencies released to break a cycle.");
      if pending[i] == 0 {
        ready.push(Reverse(i));
      }
    }

    if order.len() < self.nodes.len() {
      let path = self.find_cycle(&resolved, &satisfied, &placed);
      event!(Level::ERROR, cycle = %path.join(" -> "), "Dependency graph has no valid order.");
      return Err(StrataError::Cycle { path });
    }

    event!(Level::TRACE, "Dependency order computed.");
    Ok(order)
  }

  /// Walks from the earliest stuck node along unsatisfied groups until a node
  /// repeats. Every stuck node has an unsatisfied group whose known
  /// alternatives are all stuck too, so the walk always closes.
  fn find_cycle(&self, resolved: &[Vec<Vec<usize>>], satisfied: &[Vec<bool>], placed: &[bool]) -> Vec<String> {
    let Some(start) = placed.iter().position(|p| !p) else {
      return Vec::new();
    };
    let mut visited_at: HashMap<usize, usize> = HashMap::new();
    let mut walk = Vec::new();
    let mut current = start;
    loop {
      if let Some(&first) = visited_at.get(&current) {
        let mut path: Vec<String> = walk[first..].iter().map(|&i: &usize| self.nodes[i].key.to_string()).collect();
        path.push(self.nodes[current].key.to_string());
        return path;
      }
      visited_at.insert(current, walk.len());
      walk.push(current);
      let next = satisfied[current]
        .iter()
        .position(|s| !s)
        .and_then(|g| resolved[current][g].iter().copied().find(|&alt| !placed[alt]));
      match next {
        Some(n) => current = n,
        None => return walk.iter().map(|&i| self.nodes[i].key.to_string()).collect(),
      }
    }
  }
}
