// strata/examples/routing_pipeline.rs

//! A small website: one session for everything, forms identification on the
//! secure UI route, certificate identification on the API route, and template
//! rendering shared by both UI routes.
//!
//!   session --> router --ui--> router --secure--> forms --> templates
//!                   |                 |
//!                   |                 --public--------------> templates
//!                   |
//!                   --api--> cert --> rest

use http::StatusCode;
use strata::{
  async_trait, Bytes, Dependency, Middleware, Next, PipelineBuilder, RequestContext, Router, StrataError,
  StrataResult,
};
use tracing::info;

#[derive(Debug, Default)]
struct Session {
  id: u64,
}

#[derive(Debug)]
struct Identity(String);

struct InProcessSession;

#[async_trait]
impl Middleware for InProcessSession {
  async fn invoke(&self, ctx: &mut RequestContext, next: Next<'_>) -> StrataResult<()> {
    ctx.set_feature(Session { id: 42 });
    next.run(ctx).await
  }
}

struct Identification {
  scheme: &'static str,
}

#[async_trait]
impl Middleware for Identification {
  async fn invoke(&self, ctx: &mut RequestContext, next: Next<'_>) -> StrataResult<()> {
    let session = ctx.feature::<Session>().map(|s| s.id).unwrap_or_default();
    ctx.set_feature(Identity(format!("{}-user-{}", self.scheme, session)));
    next.run(ctx).await
  }
}

struct Templates;

#[async_trait]
impl Middleware for Templates {
  async fn invoke(&self, ctx: &mut RequestContext, _next: Next<'_>) -> StrataResult<()> {
    let who = ctx
      .feature::<Identity>()
      .map(|i| i.0.clone())
      .unwrap_or_else(|| "anonymous".to_string());
    let body = format!("<h1>{}</h1><p>hello {}</p>", ctx.path(), who);
    *ctx.response_mut().body_mut() = Bytes::from(body);
    Ok(())
  }
}

struct Rest;

#[async_trait]
impl Middleware for Rest {
  async fn invoke(&self, ctx: &mut RequestContext, _next: Next<'_>) -> StrataResult<()> {
    let identity = ctx
      .feature::<Identity>()
      .ok_or_else(|| anyhow::anyhow!("REST call without an identity"))?;
    let body = format!("{{\"path\":\"{}\",\"caller\":\"{}\"}}", ctx.path(), identity.0);
    *ctx.response_mut().body_mut() = Bytes::from(body);
    Ok(())
  }
}

struct NotFound;

#[async_trait]
impl Middleware for NotFound {
  async fn invoke(&self, ctx: &mut RequestContext, next: Next<'_>) -> StrataResult<()> {
    next.run(ctx).await?;
    if ctx.reached_end() {
      *ctx.response_mut().status_mut() = StatusCode::NOT_FOUND;
    }
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<(), StrataError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Routing Pipeline Example ---");

  // Registration order does not matter; dependencies decide.
  let mut builder = PipelineBuilder::default();
  builder.register("not_found", NotFound);
  builder
    .register("identification", Identification { scheme: "forms" })
    .named("forms")
    .on_route("secure")
    .run_after(Dependency::on("session"));
  builder
    .register("identification", Identification { scheme: "cert" })
    .named("cert")
    .on_route("api");
  builder.register("session", InProcessSession);
  builder
    .register_router(
      Router::new()
        .route("ui", |ctx: &RequestContext| ctx.path().ends_with(".html"))
        .route("api", |_: &RequestContext| true),
    )
    .run_after(Dependency::on("session").optional())
    .run_after(Dependency::on("not_found").optional());
  builder
    .register_router(
      Router::new()
        .route("secure", |ctx: &RequestContext| ctx.path().starts_with("/secure"))
        .route("public", |_: &RequestContext| true),
    )
    .on_route("ui");
  builder
    .register("templates", Templates)
    .on_route("secure")
    .on_route("public")
    .run_after(Dependency::on("identification").named("forms").optional());
  builder
    .register("rest", Rest)
    .run_after(Dependency::on("identification").named("cert"));

  let pipeline = builder.build()?;
  for segment in pipeline.segment_names() {
    info!(segment, chain = ?pipeline.chain(segment)?, "Resolved chain");
  }

  for path in ["/secure/account.html", "/index.html", "/api/users"] {
    let req = http::Request::builder()
      .uri(path)
      .body(Bytes::new())
      .map_err(|e| anyhow::anyhow!(e))?;
    let mut ctx = RequestContext::new(req);
    let result = pipeline.handle(&mut ctx).await?;
    info!(
      path,
      ?result,
      status = %ctx.response().status(),
      body = %String::from_utf8_lossy(ctx.response().body()),
      "Handled"
    );
  }

  Ok(())
}
