// strata/src/core/component.rs

//! Component declarations: a middleware plus the identity and ordering
//! constraints the resolver works from.

use crate::core::middleware::Middleware;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Discriminates components by what they are. A kind registered once is a
/// singleton and is referenced by kind alone; a kind registered several times
/// is referenced by kind and instance name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentKind(Cow<'static, str>);

impl ComponentKind {
  pub const ROUTER: ComponentKind = ComponentKind(Cow::Borrowed("router"));

  pub fn new(kind: impl Into<Cow<'static, str>>) -> Self {
    Self(kind.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&'static str> for ComponentKind {
  fn from(kind: &'static str) -> Self {
    Self(Cow::Borrowed(kind))
  }
}

impl From<String> for ComponentKind {
  fn from(kind: String) -> Self {
    Self(Cow::Owned(kind))
  }
}

impl fmt::Display for ComponentKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// One acceptable predecessor: a kind, optionally narrowed to a named instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyTarget {
  pub kind: ComponentKind,
  pub name: Option<String>,
}

impl DependencyTarget {
  pub fn new(kind: impl Into<ComponentKind>) -> Self {
    Self {
      kind: kind.into(),
      name: None,
    }
  }

  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Whether `kind`/`name` identifies this target. Names compare
  /// case-insensitively; an unnamed target matches any instance of its kind.
  pub(crate) fn matches(&self, kind: &ComponentKind, name: Option<&str>) -> bool {
    if &self.kind != kind {
      return false;
    }
    match (&self.name, name) {
      (None, _) => true,
      (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
      (Some(_), None) => false,
    }
  }
}

/// A "run after" constraint: one group of alternative targets, satisfied when
/// any of them runs earlier. Optional groups are satisfied even when none of
/// the targets is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
  targets: Vec<DependencyTarget>,
  required: bool,
}

impl Dependency {
  /// Run after the component of `kind`.
  pub fn on(kind: impl Into<ComponentKind>) -> Self {
    Self {
      targets: vec![DependencyTarget::new(kind)],
      required: true,
    }
  }

  /// Run after any one of `targets`.
  pub fn any_of(targets: impl IntoIterator<Item = DependencyTarget>) -> Self {
    Self {
      targets: targets.into_iter().collect(),
      required: true,
    }
  }

  /// Narrows the most recently added target to the instance called `name`.
  pub fn named(mut self, name: impl Into<String>) -> Self {
    if let Some(last) = self.targets.last_mut() {
      last.name = Some(name.into());
    }
    self
  }

  /// Adds another alternative.
  pub fn or(mut self, kind: impl Into<ComponentKind>) -> Self {
    self.targets.push(DependencyTarget::new(kind));
    self
  }

  pub fn optional(mut self) -> Self {
    self.required = false;
    self
  }

  pub fn targets(&self) -> &[DependencyTarget] {
    &self.targets
  }

  pub fn is_required(&self) -> bool {
    self.required
  }
}

/// A middleware together with its kind, optional instance name and
/// dependencies.
#[derive(Clone)]
pub struct Component {
  middleware: Arc<dyn Middleware>,
  kind: ComponentKind,
  name: Option<String>,
  dependencies: Vec<Dependency>,
}

impl Component {
  pub fn new(kind: impl Into<ComponentKind>, middleware: Arc<dyn Middleware>) -> Self {
    Self {
      middleware,
      kind: kind.into(),
      name: None,
      dependencies: Vec::new(),
    }
  }

  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn run_after(mut self, dependency: Dependency) -> Self {
    self.dependencies.push(dependency);
    self
  }

  pub fn kind(&self) -> &ComponentKind {
    &self.kind
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn dependencies(&self) -> &[Dependency] {
    &self.dependencies
  }

  pub fn middleware(&self) -> &Arc<dyn Middleware> {
    &self.middleware
  }

  pub(crate) fn set_name(&mut self, name: String) {
    self.name = Some(name);
  }

  pub(crate) fn push_dependency(&mut self, dependency: Dependency) {
    self.dependencies.push(dependency);
  }

  /// `kind` or `kind:name`, for logs and error messages.
  pub fn label(&self) -> String {
    match &self.name {
      Some(name) => format!("{}:{}", self.kind, name),
      None => self.kind.to_string(),
    }
  }
}

/// Keys for a set of components, in input order: `kind` when the kind occurs
/// once, `kind:name` (lowercased) for named instances of a repeated kind and
/// `kind#n` for unnamed ones, counted from 1 per kind.
pub(crate) fn identities<'c>(components: impl IntoIterator<Item = &'c Component>) -> Vec<String> {
  let components: Vec<&Component> = components.into_iter().collect();
  let mut counts: HashMap<&ComponentKind, usize> = HashMap::new();
  for component in &components {
    *counts.entry(component.kind()).or_default() += 1;
  }
  let mut unnamed: HashMap<&ComponentKind, usize> = HashMap::new();
  components
    .iter()
    .map(|component| {
      let kind = component.kind();
      if counts.get(kind).copied().unwrap_or(0) <= 1 {
        return kind.to_string();
      }
      match component.name() {
        Some(name) => format!("{}:{}", kind, name.to_lowercase()),
        None => {
          let n = unnamed.entry(kind).or_default();
          *n += 1;
          format!("{}#{}", kind, n)
        }
      }
    })
    .collect()
}

/// Key a target resolves to when no visible instance matches it.
pub(crate) fn target_key(target: &DependencyTarget) -> String {
  match &target.name {
    Some(name) => format!("{}:{}", target.kind, name.to_lowercase()),
    None => target.kind.to_string(),
  }
}

impl fmt::Debug for Component {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Component")
      .field("kind", &self.kind)
      .field("name", &self.name)
      .field("dependencies", &self.dependencies)
      .finish_non_exhaustive()
  }
}
