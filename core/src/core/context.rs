// strata/src/core/context.rs

//! Per-request state handed to every middleware.
//!
//! A `RequestContext` owns the request, the response being built, private
//! slots keyed by [`ContextKey`], and type-keyed features. Shared objects such
//! as routers never hold request state; they keep it here under their own key.

use bytes::Bytes;
use http::{Request, Response};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque key for a request-scoped slot. Every call to [`ContextKey::new`]
/// yields a key distinct from all others in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey(u64);

impl ContextKey {
  pub fn new() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    Self(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

impl Default for ContextKey {
  fn default() -> Self {
    Self::new()
  }
}

type AnyValue = Box<dyn Any + Send + Sync>;

pub struct RequestContext {
  request: Request<Bytes>,
  response: Response<Bytes>,
  slots: HashMap<ContextKey, AnyValue>,
  features: HashMap<TypeId, AnyValue>,
  reached_end: bool,
}

impl RequestContext {
  pub fn new(request: Request<Bytes>) -> Self {
    Self {
      request,
      response: Response::new(Bytes::new()),
      slots: HashMap::new(),
      features: HashMap::new(),
      reached_end: false,
    }
  }

  pub fn request(&self) -> &Request<Bytes> {
    &self.request
  }

  pub fn request_mut(&mut self) -> &mut Request<Bytes> {
    &mut self.request
  }

  pub fn response(&self) -> &Response<Bytes> {
    &self.response
  }

  pub fn response_mut(&mut self) -> &mut Response<Bytes> {
    &mut self.response
  }

  pub fn into_response(self) -> Response<Bytes> {
    self.response
  }

  /// Request path, for use in route filters.
  pub fn path(&self) -> &str {
    self.request.uri().path()
  }

  // --- Slots ---

  pub fn set_slot<T: Any + Send + Sync>(&mut self, key: ContextKey, value: T) {
    self.slots.insert(key, Box::new(value));
  }

  /// The value stored under `key`, if present and of type `T`.
  pub fn slot<T: Any>(&self, key: ContextKey) -> Option<&T> {
    self.slots.get(&key).and_then(|v| v.downcast_ref::<T>())
  }

  pub fn remove_slot(&mut self, key: ContextKey) -> bool {
    self.slots.remove(&key).is_some()
  }

  // --- Features ---

  /// Stores `value` as the feature of type `T`, replacing any previous one.
  pub fn set_feature<T: Any + Send + Sync>(&mut self, value: T) {
    self.features.insert(TypeId::of::<T>(), Box::new(value));
  }

  pub fn feature<T: Any>(&self) -> Option<&T> {
    self.features.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
  }

  pub fn feature_mut<T: Any>(&mut self) -> Option<&mut T> {
    self
      .features
      .get_mut(&TypeId::of::<T>())
      .and_then(|v| v.downcast_mut::<T>())
  }

  pub fn remove_feature<T: Any>(&mut self) -> Option<T> {
    self
      .features
      .remove(&TypeId::of::<T>())
      .and_then(|v| v.downcast::<T>().ok())
      .map(|boxed| *boxed)
  }

  /// True once control has run off the end of the pipeline.
  pub fn reached_end(&self) -> bool {
    self.reached_end
  }

  pub(crate) fn set_reached_end(&mut self, reached: bool) {
    self.reached_end = reached;
  }
}

impl std::fmt::Debug for RequestContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RequestContext")
      .field("method", self.request.method())
      .field("uri", self.request.uri())
      .field("status", &self.response.status())
      .field("num_slots", &self.slots.len())
      .field("num_features", &self.features.len())
      .field("reached_end", &self.reached_end)
      .finish()
  }
}
