// strata/examples/dependency_ordering.rs

//! Uses the graph and the segmenter directly, without any middleware.

use strata::{DependencyGraph, DependencyGroup, Segmenter, StrataError};
use tracing::info;

fn group(alternatives: &[&str]) -> DependencyGroup<String> {
  DependencyGroup::any_of(alternatives.iter().map(|s| s.to_string()))
}

fn main() -> Result<(), StrataError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Dependency Ordering Example ---");

  // Authorization accepts either identification scheme; rendering optionally
  // runs after authorization.
  let mut graph = DependencyGraph::new();
  graph.add("render", "render pages", vec![DependencyGroup::one("authorization").optional()])?;
  graph.add(
    "authorization",
    "check permissions",
    vec![DependencyGroup::any_of(["formsId", "certId"])],
  )?;
  graph.add("formsId", "forms identification", vec![DependencyGroup::one("session")])?;
  graph.add("session", "session store", vec![])?;
  for (key, description) in graph.into_ordered()? {
    info!(%key, description, "ordered");
  }

  // A cycle is reported with the keys involved.
  let mut cyclic = DependencyGraph::new();
  cyclic.add("a", (), vec![DependencyGroup::one("b")])?;
  cyclic.add("b", (), vec![DependencyGroup::one("a")])?;
  if let Err(err) = cyclic.ordered_keys() {
    info!(error = %err, "cycle detected as expected");
  }

  // Placement over a segment tree.
  let mut segmenter = Segmenter::new();
  segmenter.add_segment("root", ["api", "ui"])?;
  segmenter.add_segment("ui", ["secure", "public"])?;
  segmenter.add_node("session", vec![], Vec::<String>::new())?;
  segmenter.add_node("formsId", vec![group(&["session"])], ["secure"])?;
  segmenter.add_node("pages", vec![group(&["session"])], ["public"])?;
  segmenter.add_node("rest", vec![], ["api"])?;
  segmenter.resolve()?;

  for segment in ["root", "api", "ui", "secure", "public"] {
    info!(segment, nodes = ?segmenter.segment_nodes(segment)?, "placed");
  }
  Ok(())
}
