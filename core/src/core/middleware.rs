// strata/src/core/middleware.rs

//! The `Middleware` trait and the continuations that thread a request through
//! an ordered chain.
//!
//! A chain is a slice of middleware plus a cursor. [`Next`] hands the request
//! to the head of the slice with a continuation over the rest; when the slice
//! is used up it resumes the enclosing chain (the `tail`), and when there is no
//! enclosing chain the request has run off the end of the pipeline.
//!
//! Continuations are consumed by value, so each can run at most once. A
//! middleware that returns without running its continuation short-circuits
//! everything after it.

use crate::core::context::RequestContext;
use crate::error::StrataResult;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[async_trait]
pub trait Middleware: Send + Sync + 'static {
  /// Handles the request. Call `next.run(ctx).await` to pass control on;
  /// anything after that call runs once the rest of the chain has finished.
  async fn invoke(&self, ctx: &mut RequestContext, next: Next<'_>) -> StrataResult<()>;

  /// Middleware that picks a branch before invocation (routers) expose their
  /// routing phase here.
  fn routing_processor(&self) -> Option<&dyn RoutingProcessor> {
    None
  }
}

/// The routing phase. Runs synchronously over every participant of the chain
/// before any middleware is invoked.
pub trait RoutingProcessor: Send + Sync {
  fn route_request(&self, ctx: &mut RequestContext, next: RouteNext<'_>) -> StrataResult<()>;
}

/// Continuation of the invocation phase.
pub struct Next<'a> {
  chain: &'a [Arc<dyn Middleware>],
  tail: Option<Box<Next<'a>>>,
}

impl<'a> Next<'a> {
  /// Runs `chain`, then resumes `tail`.
  pub fn new(chain: &'a [Arc<dyn Middleware>], tail: Next<'a>) -> Self {
    Self {
      chain,
      tail: Some(Box::new(tail)),
    }
  }

  /// The end of the pipeline.
  pub fn end() -> Self {
    Self { chain: &[], tail: None }
  }

  pub fn run<'c>(self, ctx: &'c mut RequestContext) -> BoxFuture<'c, StrataResult<()>>
  where
    'a: 'c,
  {
    Box::pin(async move {
      match self.chain.split_first() {
        Some((head, rest)) => {
          let next = Next {
            chain: rest,
            tail: self.tail,
          };
          head.invoke(ctx, next).await
        }
        None => match self.tail {
          Some(tail) => tail.run(ctx).await,
          None => {
            tracing::trace!("Request reached the end of the pipeline.");
            ctx.set_reached_end(true);
            Ok(())
          }
        },
      }
    })
  }
}

/// Continuation of the routing phase.
pub struct RouteNext<'a> {
  chain: &'a [Arc<dyn Middleware>],
  tail: Option<Box<RouteNext<'a>>>,
}

impl<'a> RouteNext<'a> {
  pub fn new(chain: &'a [Arc<dyn Middleware>], tail: RouteNext<'a>) -> Self {
    Self {
      chain,
      tail: Some(Box::new(tail)),
    }
  }

  pub fn end() -> Self {
    Self { chain: &[], tail: None }
  }

  pub fn run(self, ctx: &mut RequestContext) -> StrataResult<()> {
    let mut chain = self.chain;
    while let Some((head, rest)) = chain.split_first() {
      if let Some(processor) = head.routing_processor() {
        let next = RouteNext {
          chain: rest,
          tail: self.tail,
        };
        return processor.route_request(ctx, next);
      }
      chain = rest;
    }
    match self.tail {
      Some(tail) => tail.run(ctx),
      None => Ok(()),
    }
  }
}
