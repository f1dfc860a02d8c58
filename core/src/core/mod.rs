// strata/src/core/mod.rs

pub mod component;
pub mod context;
pub mod control;
pub mod middleware;

pub use component::{Component, ComponentKind, Dependency, DependencyTarget};
pub use context::{ContextKey, RequestContext};
pub use control::PipelineResult;
pub use middleware::{BoxFuture, Middleware, Next, RouteNext, RoutingProcessor};
