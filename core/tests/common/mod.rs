// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use bytes::Bytes;
use http::{Request, StatusCode};
use strata::{async_trait, Middleware, Next, RequestContext, StrataResult};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tracing::Level;

// --- Request helpers ---

pub fn request(path: &str) -> RequestContext {
  let req = Request::builder()
    .uri(path)
    .body(Bytes::new())
    .expect("test request should build");
  RequestContext::new(req)
}

/// Labels of the middleware that ran, in order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Trail(pub Vec<String>);

pub fn push_trail(ctx: &mut RequestContext, label: &str) {
  if ctx.feature::<Trail>().is_none() {
    ctx.set_feature(Trail::default());
  }
  if let Some(trail) = ctx.feature_mut::<Trail>() {
    trail.0.push(label.to_string());
  }
}

pub fn trail(ctx: &RequestContext) -> Vec<String> {
  ctx.feature::<Trail>().map(|t| t.0.clone()).unwrap_or_default()
}

// --- Common middleware ---

/// Records its label, then passes control on.
pub struct Recorder {
  pub label: &'static str,
}

pub fn recorder(label: &'static str) -> Recorder {
  Recorder { label }
}

#[async_trait]
impl Middleware for Recorder {
  async fn invoke(&self, ctx: &mut RequestContext, next: Next<'_>) -> StrataResult<()> {
    push_trail(ctx, self.label);
    next.run(ctx).await
  }
}

/// Records its label before and after the rest of the chain.
pub struct Wrapper {
  pub label: &'static str,
}

#[async_trait]
impl Middleware for Wrapper {
  async fn invoke(&self, ctx: &mut RequestContext, next: Next<'_>) -> StrataResult<()> {
    push_trail(ctx, &format!("{}:before", self.label));
    next.run(ctx).await?;
    push_trail(ctx, &format!("{}:after", self.label));
    Ok(())
  }
}

/// Records its label, writes a response and does not pass control on.
pub struct Responder {
  pub label: &'static str,
  pub status: StatusCode,
}

#[async_trait]
impl Middleware for Responder {
  async fn invoke(&self, ctx: &mut RequestContext, _next: Next<'_>) -> StrataResult<()> {
    push_trail(ctx, self.label);
    *ctx.response_mut().status_mut() = self.status;
    *ctx.response_mut().body_mut() = Bytes::from(self.label);
    Ok(())
  }
}

/// Fails with a handler error.
pub struct Failing {
  pub message: &'static str,
}

#[async_trait]
impl Middleware for Failing {
  async fn invoke(&self, ctx: &mut RequestContext, _next: Next<'_>) -> StrataResult<()> {
    push_trail(ctx, "failing");
    Err(anyhow::anyhow!(self.message).into())
  }
}

/// Counts invocations through a shared counter.
pub struct Counting {
  pub counter: Arc<AtomicUsize>,
}

#[async_trait]
impl Middleware for Counting {
  async fn invoke(&self, ctx: &mut RequestContext, next: Next<'_>) -> StrataResult<()> {
    self.counter.fetch_add(1, Ordering::SeqCst);
    next.run(ctx).await
  }
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
