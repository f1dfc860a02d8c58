// strata/src/pipeline/execution.rs

//! Contains `Pipeline::handle()`, which runs one request through the routing
//! phase and then the invocation phase.

use crate::core::context::RequestContext;
use crate::core::control::PipelineResult;
use crate::core::middleware::{Next, RouteNext};
use crate::error::StrataResult;
use crate::pipeline::definition::Pipeline;
use tracing::{event, instrument, Level};

impl Pipeline {
  /// Handles a request.
  ///
  /// Routers first select their branches (routing phase), then the root chain
  /// is invoked. Returns [`PipelineResult::Completed`] if the request ran off the
  /// end of the pipeline and [`PipelineResult::Stopped`] if some middleware
  /// short-circuited. Errors raised by middleware are returned as-is.
  #[instrument(
    name = "Pipeline::handle",
    skip_all,
    fields(method = %ctx.request().method(), path = %ctx.path()),
    err(Display)
  )]
  pub async fn handle(&self, ctx: &mut RequestContext) -> StrataResult<PipelineResult> {
    ctx.set_reached_end(false);

    self.root.route_request(ctx, RouteNext::end())?;
    event!(Level::TRACE, "Routing phase finished.");

    self.root.invoke(ctx, Next::end()).await?;

    let result = if ctx.reached_end() {
      PipelineResult::Completed
    } else {
      PipelineResult::Stopped
    };
    event!(Level::DEBUG, ?result, status = %ctx.response().status(), "Request handled.");
    Ok(result)
  }
}
