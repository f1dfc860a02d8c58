// strata/src/lib.rs

//! Strata: dependency-ordered, segment-routed middleware pipelines.
//!
//! Components declare only *relative* ordering ("run after the session
//! middleware") and, optionally, the route they belong to. Routers split the
//! pipeline into alternative branches picked per request. At build time
//! Strata:
//!  - places every component in the segments where it is needed, moving
//!    shared unrestricted components up to the closest common ancestor so
//!    that one instance serves every branch below it;
//!  - orders the components of each segment so every dependency runs first,
//!    with ties broken by registration order;
//!  - fails fast on cycles, unsatisfiable dependencies and conflicting route
//!    restrictions.
//!
//! The result is an immutable [`Pipeline`] that handles requests in two
//! phases: routers select their branches, then the chain is invoked with
//! continuations ([`Next`]) that each middleware may run, skip or wrap.

/*
    Typical setup:
    1. Create a `PipelineBuilder` (optionally from `BuilderConfig::from_env()`).
    2. Declare routers with `Router::new().route(name, filter)` and register
       them with `register_router`, placing nested routers `.on_route(..)`.
    3. Register middleware with `register(kind, middleware)`, chaining
       `.named(..)`, `.run_after(Dependency::on(kind))` and `.on_route(..)`.
    4. `build()` once at startup, then share the `Pipeline` and call
       `pipeline.handle(&mut RequestContext::new(request)).await` per request.
*/

pub mod config;
pub mod core;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod routing;

// --- Re-exports for the Public API ---

pub use crate::config::BuilderConfig;
pub use crate::core::component::{Component, ComponentKind, Dependency, DependencyTarget};
pub use crate::core::context::{ContextKey, RequestContext};
pub use crate::core::control::PipelineResult;
pub use crate::core::middleware::{BoxFuture, Middleware, Next, RouteNext, RoutingProcessor};
pub use crate::error::{StrataError, StrataResult};
pub use crate::graph::{DependencyGraph, DependencyGroup, SegmentTree, Segmenter};
pub use crate::pipeline::{Pipeline, PipelineBuilder, Registration};
pub use crate::routing::{PipelineSegment, RouteFilter, Router};

// Middleware implementations need these without naming the crates themselves.
pub use async_trait::async_trait;
pub use bytes::Bytes;
pub use http;
