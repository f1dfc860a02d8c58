// tests/routing_tests.rs
mod common;

use common::*;
use http::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata::{
  Component, Dependency, Middleware, Next, PipelineSegment, RequestContext, RouteNext, Router, RoutingProcessor,
  StrataError,
};

fn component(kind: &'static str, middleware: impl Middleware) -> Component {
  Component::new(kind, Arc::new(middleware))
}

fn secure_public_router() -> Router {
  Router::new()
    .route("secure", |ctx: &RequestContext| ctx.path().starts_with("/secure"))
    .route("public", |_: &RequestContext| true)
}

/// Runs both phases over a single middleware, the way a pipeline does.
async fn dispatch(middleware: &Arc<dyn Middleware>, ctx: &mut RequestContext) -> strata::StrataResult<()> {
  if let Some(processor) = middleware.routing_processor() {
    processor.route_request(ctx, RouteNext::end())?;
  }
  let chain = std::slice::from_ref(middleware);
  Next::new(chain, Next::end()).run(ctx).await
}

#[tokio::test]
async fn test_first_matching_route_wins() {
  setup_tracing();
  let router = secure_public_router();
  router
    .segment("secure")
    .unwrap()
    .add(component("secure", recorder("secure")))
    .unwrap();
  router
    .segment("public")
    .unwrap()
    .add(component("public", recorder("public")))
    .unwrap();
  router.resolve_dependencies().unwrap();
  let router: Arc<dyn Middleware> = Arc::new(router);

  let mut ctx = request("/secure/x");
  dispatch(&router, &mut ctx).await.unwrap();
  assert_eq!(trail(&ctx), vec!["secure"]);
  assert!(ctx.reached_end());

  let mut ctx = request("/other");
  dispatch(&router, &mut ctx).await.unwrap();
  assert_eq!(trail(&ctx), vec!["public"]);
}

#[tokio::test]
async fn test_router_passes_through_when_nothing_matches() {
  setup_tracing();
  let router = Router::new().route("admin", |ctx: &RequestContext| ctx.path().starts_with("/admin"));
  router
    .segment("admin")
    .unwrap()
    .add(component("admin", recorder("admin")))
    .unwrap();
  router.resolve_dependencies().unwrap();

  let mut ctx = request("/home");
  RoutingProcessor::route_request(&router, &mut ctx, RouteNext::end()).unwrap();
  assert_eq!(router.selected_route(&ctx), None);

  let after: Vec<Arc<dyn Middleware>> = vec![Arc::new(recorder("after"))];
  router.invoke(&mut ctx, Next::new(&after, Next::end())).await.unwrap();
  assert_eq!(trail(&ctx), vec!["after"]);
  assert!(ctx.reached_end());
}

#[tokio::test]
async fn test_branch_chain_runs_before_rest_of_pipeline() {
  setup_tracing();
  let router = secure_public_router();
  let secure = router.segment("secure").unwrap();
  secure
    .add(component("mvc", recorder("mvc")).run_after(Dependency::on("forms")))
    .unwrap();
  secure.add(component("forms", recorder("forms"))).unwrap();
  router.resolve_dependencies().unwrap();
  assert_eq!(router.segment("secure").unwrap().chain_names().unwrap(), ["forms", "mvc"]);

  let mut ctx = request("/secure/login");
  RoutingProcessor::route_request(&router, &mut ctx, RouteNext::end()).unwrap();
  assert_eq!(router.selected_route(&ctx), Some("secure"));

  let after: Vec<Arc<dyn Middleware>> = vec![Arc::new(recorder("after"))];
  router.invoke(&mut ctx, Next::new(&after, Next::end())).await.unwrap();
  assert_eq!(trail(&ctx), vec!["forms", "mvc", "after"]);
}

#[tokio::test]
async fn test_short_circuit_stops_the_chain() {
  setup_tracing();
  let segment = PipelineSegment::new("root");
  segment.add(component("first", recorder("first"))).unwrap();
  segment
    .add(
      component(
        "deny",
        Responder {
          label: "deny",
          status: StatusCode::FORBIDDEN,
        },
      )
      .run_after(Dependency::on("first")),
    )
    .unwrap();
  segment
    .add(component("never", recorder("never")).run_after(Dependency::on("deny")))
    .unwrap();
  segment.resolve_dependencies().unwrap();

  let mut ctx = request("/");
  segment.invoke(&mut ctx, Next::end()).await.unwrap();
  assert_eq!(trail(&ctx), vec!["first", "deny"]);
  assert_eq!(ctx.response().status(), StatusCode::FORBIDDEN);
  assert!(!ctx.reached_end());
}

#[tokio::test]
async fn test_middleware_can_post_process() {
  setup_tracing();
  let segment = PipelineSegment::new("root");
  segment.add(component("outer", Wrapper { label: "outer" })).unwrap();
  segment
    .add(component("inner", recorder("inner")).run_after(Dependency::on("outer")))
    .unwrap();
  segment.resolve_dependencies().unwrap();

  let mut ctx = request("/");
  segment.invoke(&mut ctx, Next::end()).await.unwrap();
  assert_eq!(trail(&ctx), vec!["outer:before", "inner", "outer:after"]);
}

#[tokio::test]
async fn test_handler_errors_propagate() {
  setup_tracing();
  let segment = PipelineSegment::new("root");
  segment.add(component("boom", Failing { message: "boom" })).unwrap();
  segment
    .add(component("after", recorder("after")).run_after(Dependency::on("boom")))
    .unwrap();
  segment.resolve_dependencies().unwrap();

  let mut ctx = request("/");
  let err = segment.invoke(&mut ctx, Next::end()).await.unwrap_err();
  assert!(matches!(err, StrataError::Handler { .. }));
  assert!(!err.is_build_error());
  assert_eq!(trail(&ctx), vec!["failing"]);
}

#[tokio::test]
async fn test_unresolved_segment_is_not_ready() {
  setup_tracing();
  let router = secure_public_router();
  router
    .segment("public")
    .unwrap()
    .add(component("public", recorder("public")))
    .unwrap();

  let mut ctx = request("/x");
  let err = RoutingProcessor::route_request(&router, &mut ctx, RouteNext::end()).unwrap_err();
  assert!(matches!(err, StrataError::NotReady { .. }));

  let segment = PipelineSegment::new("lonely");
  let err = segment.invoke(&mut request("/"), Next::end()).await.unwrap_err();
  assert!(matches!(err, StrataError::NotReady { .. }));
  assert!(matches!(segment.chain_names(), Err(StrataError::NotReady { .. })));
}

#[tokio::test]
async fn test_resolved_segment_rejects_changes() {
  setup_tracing();
  let segment = PipelineSegment::new("root");
  segment.add(component("a", recorder("a"))).unwrap();
  segment.resolve_dependencies().unwrap();

  assert!(matches!(
    segment.add(component("b", recorder("b"))),
    Err(StrataError::AlreadyResolved { .. })
  ));
  assert!(matches!(segment.resolve_dependencies(), Err(StrataError::AlreadyResolved { .. })));
}

#[tokio::test]
async fn test_nested_routers_keep_separate_selections() {
  setup_tracing();
  let inner = Router::new()
    .route("secure", |ctx: &RequestContext| ctx.path().starts_with("/ui/secure"))
    .route("public", |_: &RequestContext| true);
  inner
    .segment("secure")
    .unwrap()
    .add(component("forms", recorder("forms")))
    .unwrap();
  inner
    .segment("public")
    .unwrap()
    .add(component("anon", recorder("anon")))
    .unwrap();
  inner.resolve_dependencies().unwrap();

  let outer = Router::new()
    .route("api", |ctx: &RequestContext| ctx.path().starts_with("/api"))
    .route("ui", |ctx: &RequestContext| ctx.path().starts_with("/ui"));
  outer
    .segment("api")
    .unwrap()
    .add(component("rest", recorder("rest")))
    .unwrap();
  let ui = outer.segment("ui").unwrap();
  ui.add(component("session", recorder("session"))).unwrap();
  ui.add(Component::new(strata::ComponentKind::ROUTER, Arc::new(inner)).run_after(Dependency::on("session")))
    .unwrap();
  outer.resolve_dependencies().unwrap();
  assert_eq!(outer.segment("ui").unwrap().chain_names().unwrap(), ["session", "router"]);
  let outer: Arc<dyn Middleware> = Arc::new(outer);

  let mut ctx = request("/ui/secure/account");
  dispatch(&outer, &mut ctx).await.unwrap();
  assert_eq!(trail(&ctx), vec!["session", "forms"]);

  let mut ctx = request("/ui/home");
  dispatch(&outer, &mut ctx).await.unwrap();
  assert_eq!(trail(&ctx), vec!["session", "anon"]);

  let mut ctx = request("/api/users");
  dispatch(&outer, &mut ctx).await.unwrap();
  assert_eq!(trail(&ctx), vec!["rest"]);
}

#[tokio::test]
async fn test_segment_keys_and_ambiguity() {
  setup_tracing();
  let segment = PipelineSegment::new("root");
  segment.add(component("id", recorder("cert")).named("Cert")).unwrap();
  segment.add(component("id", recorder("forms")).named("forms")).unwrap();
  segment
    .add(component("mvc", recorder("mvc")).run_after(Dependency::on("id").named("FORMS")))
    .unwrap();
  segment.resolve_dependencies().unwrap();
  assert_eq!(segment.chain_names().unwrap(), ["id:cert", "id:forms", "mvc"]);

  let ambiguous = PipelineSegment::new("root");
  ambiguous.add(component("id", recorder("cert")).named("cert")).unwrap();
  ambiguous.add(component("id", recorder("forms")).named("forms")).unwrap();
  ambiguous
    .add(component("mvc", recorder("mvc")).run_after(Dependency::on("id")))
    .unwrap();
  let err = ambiguous.resolve_dependencies().unwrap_err();
  assert!(matches!(err, StrataError::AmbiguousDependency { ref kind, .. } if kind == "id"));

  let unnamed = PipelineSegment::new("root");
  unnamed.add(component("audit", recorder("first"))).unwrap();
  unnamed.add(component("audit", recorder("second"))).unwrap();
  unnamed.resolve_dependencies().unwrap();
  assert_eq!(unnamed.chain_names().unwrap(), ["audit#1", "audit#2"]);

  let duplicate = PipelineSegment::new("root");
  duplicate.add(component("id", recorder("a")).named("Same")).unwrap();
  duplicate.add(component("id", recorder("b")).named("same")).unwrap();
  assert!(matches!(
    duplicate.resolve_dependencies(),
    Err(StrataError::DuplicateKey { ref key }) if key == "id:same"
  ));
}

#[tokio::test]
async fn test_upstream_components_satisfy_dependencies() {
  setup_tracing();
  let segment = PipelineSegment::new("ui");
  segment.add_upstream("session".into(), None).unwrap();
  segment
    .add(component("mvc", recorder("mvc")).run_after(Dependency::on("session")))
    .unwrap();
  segment.resolve_dependencies().unwrap();
  assert_eq!(segment.chain_names().unwrap(), ["mvc"]);
  assert_eq!(segment.upstream_used().unwrap(), ["session"]);

  // A lone upstream instance answers to any name.
  let named = PipelineSegment::new("ui");
  named.add_upstream("session".into(), None).unwrap();
  named
    .add(component("mvc", recorder("mvc")).run_after(Dependency::on("session").named("main")))
    .unwrap();
  named.resolve_dependencies().unwrap();
  assert_eq!(named.upstream_used().unwrap(), ["session"]);

  let missing = PipelineSegment::new("ui");
  missing
    .add(component("mvc", recorder("mvc")).run_after(Dependency::on("session")))
    .unwrap();
  assert!(matches!(
    missing.resolve_dependencies(),
    Err(StrataError::UnsatisfiableDependency { .. })
  ));
}

#[tokio::test]
async fn test_chain_is_shared_across_concurrent_requests() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let segment = Arc::new(PipelineSegment::new("root"));
  segment
    .add(component("count", Counting { counter: counter.clone() }))
    .unwrap();
  segment.resolve_dependencies().unwrap();

  let mut handles = Vec::new();
  for i in 0..8 {
    let segment = segment.clone();
    handles.push(tokio::spawn(async move {
      let mut ctx = request(&format!("/r/{}", i));
      segment.invoke(&mut ctx, Next::end()).await?;
      Ok::<bool, StrataError>(ctx.reached_end())
    }));
  }
  for handle in handles {
    assert!(handle.await.unwrap().unwrap());
  }
  assert_eq!(counter.load(Ordering::SeqCst), 8);
}

#[test]
fn test_features_and_slots_are_typed() {
  let mut ctx = request("/");
  let key = strata::ContextKey::new();
  let other = strata::ContextKey::new();
  assert_ne!(key, other);

  ctx.set_slot(key, 7usize);
  assert_eq!(ctx.slot::<usize>(key), Some(&7));
  assert_eq!(ctx.slot::<u32>(key), None);
  assert_eq!(ctx.slot::<usize>(other), None);

  ctx.set_feature(Trail(vec!["x".to_string()]));
  ctx.feature_mut::<Trail>().unwrap().0.push("y".to_string());
  assert_eq!(trail(&ctx), vec!["x", "y"]);
  assert_eq!(ctx.remove_feature::<Trail>(), Some(Trail(vec!["x".to_string(), "y".to_string()])));
  assert!(ctx.feature::<Trail>().is_none());
}
