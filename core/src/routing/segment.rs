// strata/src/routing/segment.rs

//! One branch of the pipeline and its resolved middleware chain.

use crate::core::component::{identities, target_key, Component, ComponentKind, DependencyTarget};
use crate::core::context::RequestContext;
use crate::core::middleware::{Middleware, Next, RouteNext};
use crate::error::{StrataError, StrataResult};
use crate::graph::{DependencyGraph, DependencyGroup};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{event, instrument, Level};

#[derive(Clone)]
struct Member {
  id: Option<String>,
  component: Component,
  after: Vec<String>,
}

#[derive(Clone)]
struct Upstream {
  key: String,
  kind: ComponentKind,
  name: Option<String>,
}

/// An instance a dependency of this segment can refer to.
struct Visible<'a> {
  key: &'a str,
  kind: &'a ComponentKind,
  name: Option<&'a str>,
  upstream: bool,
}

struct ResolvedChain {
  middleware: Vec<Arc<dyn Middleware>>,
  names: Vec<String>,
  routing: Vec<Arc<dyn Middleware>>,
  upstream_used: Vec<String>,
}

/// Collects the components of one segment, orders them once, and then serves
/// requests from the cached chain.
///
/// Components living in enclosing segments are registered as upstream: a
/// dependency on any of them is satisfied before this segment runs, provided
/// the enclosing segment orders them ahead of the router leading here.
/// [`upstream_used`](Self::upstream_used) reports which ones were relied on.
///
/// A kind with a single visible instance (local or upstream) is referenced by
/// kind alone and any name on the reference is ignored. A kind with several
/// visible instances must be referenced by name.
pub struct PipelineSegment {
  name: String,
  members: Mutex<Vec<Member>>,
  upstream: Mutex<Vec<Upstream>>,
  resolved: OnceCell<ResolvedChain>,
}

impl PipelineSegment {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      members: Mutex::new(Vec::new()),
      upstream: Mutex::new(Vec::new()),
      resolved: OnceCell::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_resolved(&self) -> bool {
    self.resolved.get().is_some()
  }

  /// Number of components added so far.
  pub fn len(&self) -> usize {
    self.members.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Adds a component keyed by its kind and name within this segment.
  pub fn add(&self, component: Component) -> StrataResult<()> {
    self.push(None, component)
  }

  /// Adds a component under a key assigned by the caller.
  pub(crate) fn add_as(&self, id: String, component: Component) -> StrataResult<()> {
    self.push(Some(id), component)
  }

  fn push(&self, id: Option<String>, component: Component) -> StrataResult<()> {
    self.ensure_unresolved()?;
    event!(Level::DEBUG, segment = %self.name, component = %component.label(), "Component added to segment.");
    self.members.lock().push(Member {
      id,
      component,
      after: Vec::new(),
    });
    Ok(())
  }

  /// Records a component that runs in an enclosing segment.
  pub fn add_upstream(&self, kind: ComponentKind, name: Option<String>) -> StrataResult<()> {
    let key = match &name {
      Some(name) => format!("{}:{}", kind, name.to_lowercase()),
      None => kind.to_string(),
    };
    self.add_upstream_as(key, kind, name)
  }

  pub(crate) fn add_upstream_as(&self, key: String, kind: ComponentKind, name: Option<String>) -> StrataResult<()> {
    self.ensure_unresolved()?;
    self.upstream.lock().push(Upstream { key, kind, name });
    Ok(())
  }

  /// Makes the member keyed `id` run after the member keyed `predecessor`.
  pub(crate) fn order_after(&self, id: &str, predecessor: &str) -> StrataResult<()> {
    self.ensure_unresolved()?;
    let mut members = self.members.lock();
    let member = members
      .iter_mut()
      .find(|m| m.id.as_deref() == Some(id))
      .ok_or_else(|| StrataError::UnknownNode { node: id.to_string() })?;
    if !member.after.iter().any(|p| p == predecessor) {
      member.after.push(predecessor.to_string());
    }
    Ok(())
  }

  fn ensure_unresolved(&self) -> StrataResult<()> {
    if self.is_resolved() {
      return Err(StrataError::AlreadyResolved {
        component: format!("segment '{}'", self.name),
      });
    }
    Ok(())
  }

  /// Orders the components and caches the chain. Fails if already resolved.
  #[instrument(name = "PipelineSegment::resolve_dependencies", skip(self), fields(segment = %self.name), err(Display))]
  pub fn resolve_dependencies(&self) -> StrataResult<()> {
    self.ensure_unresolved()?;
    let members = self.members.lock().clone();
    let upstream = self.upstream.lock().clone();

    let derived = identities(members.iter().map(|m| &m.component));
    let keys: Vec<String> = members
      .iter()
      .zip(derived)
      .map(|(m, key)| m.id.clone().unwrap_or(key))
      .collect();

    let mut visible: Vec<Visible<'_>> = members
      .iter()
      .zip(&keys)
      .map(|(m, key)| Visible {
        key,
        kind: m.component.kind(),
        name: m.component.name(),
        upstream: false,
      })
      .collect();
    visible.extend(upstream.iter().map(|u| Visible {
      key: &u.key,
      kind: &u.kind,
      name: u.name.as_deref(),
      upstream: true,
    }));

    let mut graph: DependencyGraph<String, usize> = DependencyGraph::new();
    let mut upstream_used: Vec<String> = Vec::new();
    for (i, (member, key)) in members.iter().zip(&keys).enumerate() {
      let component = &member.component;
      let mut groups = Vec::with_capacity(component.dependencies().len() + member.after.len());
      for dependency in component.dependencies() {
        let mut alternatives = Vec::with_capacity(dependency.targets().len());
        let mut satisfied_by: Option<&str> = None;
        for target in dependency.targets() {
          let found = candidates(component, target, &visible)?;
          if found.is_empty() {
            alternatives.push(target_key(target));
          }
          for candidate in found {
            if candidate.upstream {
              if satisfied_by.is_none() {
                satisfied_by = Some(candidate.key);
              }
            } else {
              alternatives.push(candidate.key.to_string());
            }
          }
        }
        if let Some(upstream_key) = satisfied_by {
          if !upstream_used.iter().any(|u| u == upstream_key) {
            upstream_used.push(upstream_key.to_string());
          }
          continue;
        }
        let group = DependencyGroup::any_of(alternatives);
        groups.push(if dependency.is_required() { group } else { group.optional() });
      }
      groups.extend(member.after.iter().cloned().map(DependencyGroup::one));
      graph.add(key.clone(), i, groups)?;
    }

    let ordered = graph.into_ordered()?;
    let mut chain = ResolvedChain {
      middleware: Vec::with_capacity(ordered.len()),
      names: Vec::with_capacity(ordered.len()),
      routing: Vec::new(),
      upstream_used,
    };
    for (key, i) in ordered {
      let middleware = members[i].component.middleware().clone();
      if middleware.routing_processor().is_some() {
        chain.routing.push(middleware.clone());
      }
      chain.middleware.push(middleware);
      chain.names.push(key);
    }

    event!(
      Level::DEBUG,
      chain = ?chain.names,
      upstream_used = ?chain.upstream_used,
      num_routing = chain.routing.len(),
      "Segment chain resolved."
    );
    if self.resolved.set(chain).is_err() {
      return Err(StrataError::AlreadyResolved {
        component: format!("segment '{}'", self.name),
      });
    }
    Ok(())
  }

  fn chain(&self) -> StrataResult<&ResolvedChain> {
    self.resolved.get().ok_or_else(|| StrataError::NotReady {
      component: format!("segment '{}'", self.name),
    })
  }

  /// Keys of the resolved chain, in invocation order.
  pub fn chain_names(&self) -> StrataResult<&[String]> {
    Ok(&self.chain()?.names)
  }

  /// Keys of upstream components this segment's dependencies rely on, in
  /// first-use order.
  pub fn upstream_used(&self) -> StrataResult<&[String]> {
    Ok(&self.chain()?.upstream_used)
  }

  /// Runs the routing phase of this segment's participants, then `next`.
  pub fn route_request(&self, ctx: &mut RequestContext, next: RouteNext<'_>) -> StrataResult<()> {
    let chain = self.chain()?;
    RouteNext::new(&chain.routing, next).run(ctx)
  }

  /// Invokes the chain, then `next`.
  pub async fn invoke(&self, ctx: &mut RequestContext, next: Next<'_>) -> StrataResult<()> {
    let chain = self.chain()?;
    Next::new(&chain.middleware, next).run(ctx).await
  }
}

/// Visible instances `target` refers to. Empty when none matches, in which
/// case the reference stays unresolved.
fn candidates<'v, 'a>(
  component: &Component,
  target: &DependencyTarget,
  visible: &'v [Visible<'a>],
) -> StrataResult<Vec<&'v Visible<'a>>> {
  let of_kind: Vec<&Visible<'a>> = visible.iter().filter(|v| v.kind == &target.kind).collect();
  if of_kind.len() <= 1 {
    return Ok(of_kind);
  }
  if target.name.is_none() {
    event!(Level::ERROR, component = %component.label(), kind = %target.kind, "Unnamed reference to a multi-instance kind.");
    return Err(StrataError::AmbiguousDependency {
      component: component.label(),
      kind: target.kind.to_string(),
    });
  }
  Ok(of_kind.into_iter().filter(|v| target.matches(v.kind, v.name)).collect())
}
