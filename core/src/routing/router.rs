// strata/src/routing/router.rs

//! A branch point: mutually exclusive, filter-guarded segments.

use crate::core::context::{ContextKey, RequestContext};
use crate::core::middleware::{Middleware, Next, RouteNext, RoutingProcessor};
use crate::error::{StrataError, StrataResult};
use crate::routing::segment::PipelineSegment;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{event, Level};

pub type RouteFilter = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

struct Route {
  filter: RouteFilter,
  segment: Arc<PipelineSegment>,
}

/// Index of the branch selected for the current request.
#[derive(Debug, Clone, Copy)]
struct SelectedRoute(usize);

/// Chooses one of its routes per request.
///
/// Selection happens in the routing phase: filters are tried in the order the
/// routes were declared and the first match is remembered in the request
/// context under this router's own key. The invocation phase then runs the
/// selected route's chain followed by the rest of the enclosing pipeline. If
/// no filter matched, the router passes straight through.
pub struct Router {
  routes: Vec<Route>,
  key: ContextKey,
}

impl Default for Router {
  fn default() -> Self {
    Self::new()
  }
}

impl Router {
  pub fn new() -> Self {
    Self {
      routes: Vec::new(),
      key: ContextKey::new(),
    }
  }

  /// Declares a route. Its segment starts out empty.
  pub fn route<F>(mut self, name: impl Into<String>, filter: F) -> Self
  where
    F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
  {
    let name = name.into();
    event!(Level::DEBUG, route = %name, index = self.routes.len(), "Route declared.");
    self.routes.push(Route {
      filter: Arc::new(filter),
      segment: Arc::new(PipelineSegment::new(name)),
    });
    self
  }

  pub fn route_names(&self) -> impl Iterator<Item = &str> {
    self.routes.iter().map(|r| r.segment.name())
  }

  pub fn segment(&self, name: &str) -> Option<&Arc<PipelineSegment>> {
    self.routes.iter().map(|r| &r.segment).find(|s| s.name() == name)
  }

  pub fn segments(&self) -> impl Iterator<Item = &Arc<PipelineSegment>> {
    self.routes.iter().map(|r| &r.segment)
  }

  /// Resolves every route's segment.
  pub fn resolve_dependencies(&self) -> StrataResult<()> {
    for route in &self.routes {
      route.segment.resolve_dependencies()?;
    }
    Ok(())
  }

  /// Name of the route selected for this request, if any.
  pub fn selected_route(&self, ctx: &RequestContext) -> Option<&str> {
    ctx
      .slot::<SelectedRoute>(self.key)
      .and_then(|s| self.routes.get(s.0))
      .map(|r| r.segment.name())
  }

  fn selected(&self, ctx: &RequestContext) -> StrataResult<Option<&Arc<PipelineSegment>>> {
    match ctx.slot::<SelectedRoute>(self.key) {
      None => Ok(None),
      Some(SelectedRoute(i)) => self
        .routes
        .get(*i)
        .map(|r| Some(&r.segment))
        .ok_or_else(|| StrataError::RoutingConfiguration {
          message: format!("selected route index {} is out of range", i),
        }),
    }
  }
}

impl RoutingProcessor for Router {
  fn route_request(&self, ctx: &mut RequestContext, next: RouteNext<'_>) -> StrataResult<()> {
    ctx.remove_slot(self.key);
    let Some(index) = self.routes.iter().position(|r| (r.filter)(&*ctx)) else {
      event!(Level::TRACE, path = %ctx.path(), "No route matched, passing through.");
      return next.run(ctx);
    };
    let segment = &self.routes[index].segment;
    event!(Level::TRACE, path = %ctx.path(), route = %segment.name(), "Route selected.");
    ctx.set_slot(self.key, SelectedRoute(index));
    segment.route_request(ctx, next)
  }
}

#[async_trait]
impl Middleware for Router {
  async fn invoke(&self, ctx: &mut RequestContext, next: Next<'_>) -> StrataResult<()> {
    match self.selected(ctx)? {
      Some(segment) => segment.invoke(ctx, next).await,
      None => next.run(ctx).await,
    }
  }

  fn routing_processor(&self) -> Option<&dyn RoutingProcessor> {
    Some(self)
  }
}
