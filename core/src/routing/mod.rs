// strata/src/routing/mod.rs

//! Request-time structure: segments holding ordered chains, and routers that
//! pick one segment per request.

pub mod router;
pub mod segment;

pub use router::{RouteFilter, Router};
pub use segment::PipelineSegment;
