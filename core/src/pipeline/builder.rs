// strata/src/pipeline/builder.rs

//! Registration API and the one-shot build that turns declarations into a
//! resolved [`Pipeline`].

use crate::config::BuilderConfig;
use crate::core::component::{identities, target_key, Component, ComponentKind, Dependency};
use crate::core::middleware::Middleware;
use crate::error::{StrataError, StrataResult};
use crate::graph::{DependencyGroup, Segmenter};
use crate::pipeline::definition::Pipeline;
use crate::routing::{PipelineSegment, Router};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{event, instrument, Level};

struct Entry {
  component: Component,
  routes: Vec<String>,
  router: Option<Arc<Router>>,
}

/// Handle returned by [`PipelineBuilder::register`] for refining a component.
pub struct Registration<'b> {
  entry: &'b mut Entry,
}

impl<'b> Registration<'b> {
  /// Names this instance. Required to reference one of several components of
  /// the same kind.
  pub fn named(self, name: impl Into<String>) -> Self {
    self.entry.component.set_name(name.into());
    self
  }

  pub fn run_after(self, dependency: Dependency) -> Self {
    self.entry.component.push_dependency(dependency);
    self
  }

  /// Restricts the component to the given route segment. May be called more
  /// than once for components that belong to several routes.
  pub fn on_route(self, route: impl Into<String>) -> Self {
    let route = route.into();
    if !self.entry.routes.contains(&route) {
      self.entry.routes.push(route);
    }
    self
  }
}

/// Collects components and routers, then resolves them into a [`Pipeline`].
pub struct PipelineBuilder {
  config: BuilderConfig,
  entries: Vec<Entry>,
}

impl Default for PipelineBuilder {
  fn default() -> Self {
    Self::new(BuilderConfig::default())
  }
}

impl PipelineBuilder {
  pub fn new(config: BuilderConfig) -> Self {
    Self {
      config,
      entries: Vec::new(),
    }
  }

  pub fn config(&self) -> &BuilderConfig {
    &self.config
  }

  pub fn register<M>(&mut self, kind: impl Into<ComponentKind>, middleware: M) -> Registration<'_>
  where
    M: Middleware,
  {
    self.register_arc(kind, Arc::new(middleware))
  }

  /// Like [`register`](Self::register) for middleware that is already shared.
  pub fn register_arc(&mut self, kind: impl Into<ComponentKind>, middleware: Arc<dyn Middleware>) -> Registration<'_> {
    let component = Component::new(kind, middleware);
    event!(Level::DEBUG, kind = %component.kind(), index = self.entries.len(), "Component registered.");
    self.push(Entry {
      component,
      routes: Vec::new(),
      router: None,
    })
  }

  /// Registers a router. Its routes become child segments of the route it is
  /// placed on with [`Registration::on_route`], or of the root segment.
  pub fn register_router(&mut self, router: Router) -> Registration<'_> {
    let router = Arc::new(router);
    let component = Component::new(ComponentKind::ROUTER, router.clone() as Arc<dyn Middleware>);
    event!(
      Level::DEBUG,
      routes = ?router.route_names().collect::<Vec<_>>(),
      index = self.entries.len(),
      "Router registered."
    );
    self.push(Entry {
      component,
      routes: Vec::new(),
      router: Some(router),
    })
  }

  fn push(&mut self, entry: Entry) -> Registration<'_> {
    self.entries.push(entry);
    let last = self.entries.len() - 1;
    Registration {
      entry: &mut self.entries[last],
    }
  }

  /// Places every component, orders every segment and returns the immutable
  /// pipeline. Any configuration problem is reported here.
  #[instrument(name = "PipelineBuilder::build", skip_all, fields(num_components = self.entries.len()), err(Display))]
  pub fn build(self) -> StrataResult<Pipeline> {
    let root_name = self.config.root_segment.clone();
    let ids = self.global_ids()?;

    let mut segmenter = Segmenter::new();
    segmenter.add_segment(&root_name, Vec::<&str>::new())?;
    let segments = self.declare_segments(&root_name, &mut segmenter)?;

    let mut instances: HashMap<&ComponentKind, Vec<(&str, Option<&str>)>> = HashMap::new();
    for (entry, id) in self.entries.iter().zip(&ids) {
      instances
        .entry(entry.component.kind())
        .or_default()
        .push((id.as_str(), entry.component.name()));
    }
    for (entry, id) in self.entries.iter().zip(&ids) {
      let groups = entry
        .component
        .dependencies()
        .iter()
        .map(|d| global_group(d, &instances))
        .collect();
      // A router always lives where its routes hang.
      let allowed = if entry.router.is_some() && entry.routes.is_empty() {
        vec![root_name.clone()]
      } else {
        entry.routes.clone()
      };
      segmenter.add_node(id, groups, allowed)?;
    }
    if self.config.place_unclaimed_in_root {
      segmenter.set_default_segment(root_name.clone())?;
    }
    segmenter.resolve()?;

    let by_name: HashMap<&str, &Arc<PipelineSegment>> = segments.iter().map(|s| (s.name(), s)).collect();
    let mut placements: HashMap<String, Vec<String>> = HashMap::with_capacity(ids.len());
    for (entry, id) in self.entries.iter().zip(&ids) {
      let placed: Vec<String> = segmenter.node_segments(id)?.into_iter().map(str::to_string).collect();
      if placed.is_empty() {
        event!(Level::WARN, component = %id, "Component is not placed in any segment and will never run.");
      }
      for name in &placed {
        let segment = by_name.get(name.as_str()).ok_or_else(|| StrataError::UnknownSegment {
          segment: name.clone(),
          message: "placed segment has no pipeline segment".to_string(),
        })?;
        segment.add_as(id.clone(), entry.component.clone())?;
      }
      placements.insert(id.clone(), placed);
    }

    let id_index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
    for segment in &segments {
      for ancestor in segmenter.tree().ancestors(segment.name()) {
        for node in segmenter.segment_nodes(ancestor)? {
          if let Some(&i) = id_index.get(node) {
            let component = &self.entries[i].component;
            segment.add_upstream_as(
              node.to_string(),
              component.kind().clone(),
              component.name().map(str::to_string),
            )?;
          }
        }
      }
    }

    let mut route_routers: HashMap<&str, &str> = HashMap::new();
    for (entry, id) in self.entries.iter().zip(&ids) {
      if let Some(router) = &entry.router {
        for route in router.route_names() {
          route_routers.insert(route, id.as_str());
        }
      }
    }

    // Deepest segments first: what a branch relies on upstream becomes an
    // ordering constraint on the router that leads into it.
    let mut resolution_order: Vec<&Arc<PipelineSegment>> = segments.iter().collect();
    resolution_order.sort_by_key(|s| Reverse(segmenter.tree().ancestors(s.name()).len()));
    for segment in resolution_order {
      segment.resolve_dependencies()?;
      event!(Level::INFO, segment = %segment.name(), chain = ?segment.chain_names()?, "Segment chain ready.");
      for used in segment.upstream_used()? {
        order_router_after(segment.name(), used, &segmenter, &by_name, &route_routers)?;
      }
    }

    event!(Level::INFO, num_segments = segments.len(), num_components = ids.len(), "Pipeline built.");
    Ok(Pipeline::new(segments, placements))
  }

  /// Identities of every registration; two of them colliding is an error.
  fn global_ids(&self) -> StrataResult<Vec<String>> {
    let ids = identities(self.entries.iter().map(|e| &e.component));
    let mut seen = HashSet::with_capacity(ids.len());
    for id in &ids {
      if !seen.insert(id.as_str()) {
        event!(Level::ERROR, component = %id, "Duplicate component identity.");
        return Err(StrataError::DuplicateKey { key: id.clone() });
      }
    }
    Ok(ids)
  }

  /// Builds the segment tree from the routers and returns the segments, root
  /// first.
  fn declare_segments(&self, root_name: &str, segmenter: &mut Segmenter) -> StrataResult<Vec<Arc<PipelineSegment>>> {
    let mut segments = vec![Arc::new(PipelineSegment::new(root_name))];
    let mut route_names: HashSet<String> = HashSet::new();

    for entry in &self.entries {
      let Some(router) = &entry.router else {
        continue;
      };
      let host = match entry.routes.as_slice() {
        [] => root_name,
        [host] => host.as_str(),
        _ => {
          return Err(StrataError::RoutingConfiguration {
            message: format!(
              "router '{}' is placed on {} routes, a router can live on at most one",
              entry.component.label(),
              entry.routes.len()
            ),
          })
        }
      };
      let names: Vec<&str> = router.route_names().collect();
      for name in &names {
        if *name == root_name {
          return Err(StrataError::RoutingConfiguration {
            message: format!("route '{}' reuses the root segment name", name),
          });
        }
        if !route_names.insert(name.to_string()) {
          return Err(StrataError::RoutingConfiguration {
            message: format!("route '{}' is declared more than once", name),
          });
        }
      }
      segmenter.add_segment(host, &names)?;
      segments.extend(router.segments().cloned());
    }

    if let Some(orphan) = segmenter.tree().roots().into_iter().find(|r| *r != root_name) {
      event!(Level::ERROR, segment = %orphan, "Router placed on an undeclared route.");
      return Err(StrataError::UnknownSegment {
        segment: orphan.to_string(),
        message: "a router is placed on this route, but no router declares it".to_string(),
      });
    }
    Ok(segments)
  }
}

/// Dependency in terms of component identities. A target whose kind has one
/// instance means that instance whatever the name, and an unnamed target of a
/// repeated kind means any of its instances. Which one a segment actually
/// relies on is settled when that segment resolves.
fn global_group(
  dependency: &Dependency,
  instances: &HashMap<&ComponentKind, Vec<(&str, Option<&str>)>>,
) -> DependencyGroup<String> {
  let mut alternatives = Vec::with_capacity(dependency.targets().len());
  for target in dependency.targets() {
    match instances.get(&target.kind).map(Vec::as_slice) {
      Some([(id, _)]) => alternatives.push(id.to_string()),
      Some(all) if target.name.is_none() => alternatives.extend(all.iter().map(|(id, _)| id.to_string())),
      Some(all) => {
        let before = alternatives.len();
        alternatives.extend(
          all
            .iter()
            .filter(|(_, name)| target.matches(&target.kind, *name))
            .map(|(id, _)| id.to_string()),
        );
        if alternatives.len() == before {
          alternatives.push(target_key(target));
        }
      }
      None => alternatives.push(target_key(target)),
    }
  }
  let group = DependencyGroup::any_of(alternatives);
  if dependency.is_required() {
    group
  } else {
    group.optional()
  }
}

/// Orders the router leading from the segment holding `upstream` towards
/// `segment` after `upstream`, so the dependency has run by the time the
/// branch is entered.
fn order_router_after(
  segment: &str,
  upstream: &str,
  segmenter: &Segmenter,
  by_name: &HashMap<&str, &Arc<PipelineSegment>>,
  route_routers: &HashMap<&str, &str>,
) -> StrataResult<()> {
  let tree = segmenter.tree();
  let mut holder = None;
  for ancestor in tree.ancestors(segment) {
    if segmenter.segment_nodes(ancestor)?.contains(&upstream) {
      holder = Some(ancestor);
      break;
    }
  }
  let Some(holder) = holder else {
    return Ok(());
  };
  let mut child = segment;
  while let Some(parent) = tree.parent(child) {
    if parent == holder {
      break;
    }
    child = parent;
  }
  let (Some(router), Some(host)) = (route_routers.get(child), by_name.get(holder)) else {
    return Ok(());
  };
  event!(Level::DEBUG, segment = %holder, router = %router, after = %upstream, "Router ordered after upstream dependency.");
  host.order_after(router, upstream)
}
