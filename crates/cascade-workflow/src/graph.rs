//! Pure scheduling functions over a workflow graph.
//!
//! All functions take the node id list and the edge endpoint pairs rather
//! than the full graph types, so the store and the engine can call them on
//! whatever representation they hold. Within a level, order follows the
//! input order of `node_ids`.

use std::collections::{HashMap, HashSet, VecDeque};

/// Partition nodes into topological levels (Kahn-style).
///
/// Level 0 contains all nodes with in-degree 0. Each subsequent level
/// contains the nodes whose remaining in-degree reaches 0 once the
/// previous level's out-edges are removed. Nodes in the same level have no
/// path between them and may execute concurrently.
///
/// On a cyclic graph the nodes on the cycle never reach in-degree 0 and
/// the partial leveling is returned silently; cycle detection is the
/// caller's responsibility (see [`has_cycle`]).
pub fn topological_levels(node_ids: &[String], edges: &[(String, String)]) -> Vec<Vec<String>> {
  let known: HashSet<&str> = node_ids.iter().map(|id| id.as_str()).collect();

  let mut in_degree: HashMap<&str, usize> = node_ids.iter().map(|id| (id.as_str(), 0)).collect();
  let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
  for (from, to) in edges {
    // Edges referencing unknown nodes are ignored.
    if !known.contains(from.as_str()) || !known.contains(to.as_str()) {
      continue;
    }
    adjacency.entry(from.as_str()).or_default().push(to.as_str());
    if let Some(degree) = in_degree.get_mut(to.as_str()) {
      *degree += 1;
    }
  }

  let mut remaining: Vec<&str> = node_ids.iter().map(|id| id.as_str()).collect();
  let mut levels = Vec::new();

  while !remaining.is_empty() {
    let level: Vec<&str> = remaining
      .iter()
      .filter(|id| in_degree.get(**id) == Some(&0))
      .copied()
      .collect();

    if level.is_empty() {
      // Remaining nodes are on a cycle; return what we have.
      break;
    }

    for id in &level {
      for downstream in adjacency.get(*id).map(|v| v.as_slice()).unwrap_or(&[]) {
        if let Some(degree) = in_degree.get_mut(downstream) {
          *degree = degree.saturating_sub(1);
        }
      }
    }

    let placed: HashSet<&str> = level.iter().copied().collect();
    remaining.retain(|id| !placed.contains(id));
    levels.push(level.into_iter().map(String::from).collect());
  }

  levels
}

/// Collect every node reachable from `start` over out-edges, inclusive of
/// `start` itself.
pub fn downstream_nodes(
  start: &str,
  node_ids: &[String],
  edges: &[(String, String)],
) -> HashSet<String> {
  let known: HashSet<&str> = node_ids.iter().map(|id| id.as_str()).collect();

  let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
  for (from, to) in edges {
    if known.contains(from.as_str()) && known.contains(to.as_str()) {
      adjacency.entry(from.as_str()).or_default().push(to.as_str());
    }
  }

  let mut visited = HashSet::new();
  let mut queue = VecDeque::new();
  if known.contains(start) {
    visited.insert(start.to_string());
    queue.push_back(start);
  }

  while let Some(current) = queue.pop_front() {
    for next in adjacency.get(current).map(|v| v.as_slice()).unwrap_or(&[]) {
      if visited.insert((*next).to_string()) {
        queue.push_back(next);
      }
    }
  }

  visited
}

/// Check for cycles with a three-color DFS.
///
/// Returns true iff a back-edge is encountered. Runs iteratively over an
/// explicit stack so arbitrarily deep graphs cannot overflow the call
/// stack; each node is pushed once to enter and once more to mark it
/// finished on the way back out.
pub fn has_cycle(node_ids: &[String], edges: &[(String, String)]) -> bool {
  #[derive(Clone, Copy, PartialEq, Eq)]
  enum Mark {
    Unvisited,
    InProgress,
    Done,
  }

  let known: HashSet<&str> = node_ids.iter().map(|id| id.as_str()).collect();

  let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
  for (from, to) in edges {
    if known.contains(from.as_str()) && known.contains(to.as_str()) {
      adjacency.entry(from.as_str()).or_default().push(to.as_str());
    }
  }

  let mut marks: HashMap<&str, Mark> = node_ids
    .iter()
    .map(|id| (id.as_str(), Mark::Unvisited))
    .collect();

  for start in node_ids {
    if marks.get(start.as_str()) != Some(&Mark::Unvisited) {
      continue;
    }

    // (node, leaving): leaving entries close a node's subtree.
    let mut stack: Vec<(&str, bool)> = vec![(start.as_str(), false)];
    while let Some((node, leaving)) = stack.pop() {
      if leaving {
        marks.insert(node, Mark::Done);
        continue;
      }
      if marks.get(node) == Some(&Mark::Done) {
        continue;
      }

      marks.insert(node, Mark::InProgress);
      stack.push((node, true));

      for next in adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[]) {
        match marks.get(next) {
          // An in-progress neighbor is on the current path.
          Some(Mark::InProgress) => return true,
          Some(Mark::Unvisited) => stack.push((*next, false)),
          _ => {}
        }
      }
    }
  }

  false
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  fn pairs(edges: &[(&str, &str)]) -> Vec<(String, String)> {
    edges
      .iter()
      .map(|(a, b)| (a.to_string(), b.to_string()))
      .collect()
  }

  #[test]
  fn levels_partition_a_chain() {
    let levels = topological_levels(&ids(&["a", "b", "c"]), &pairs(&[("a", "b"), ("b", "c")]));
    assert_eq!(levels, vec![vec!["a"], vec!["b"], vec!["c"]]);
  }

  #[test]
  fn levels_group_independent_nodes() {
    let levels = topological_levels(
      &ids(&["a", "b", "c", "d"]),
      &pairs(&[("a", "c"), ("b", "c"), ("c", "d")]),
    );
    assert_eq!(levels, vec![vec!["a", "b"], vec!["c"], vec!["d"]]);
  }

  #[test]
  fn levels_are_deterministic_in_input_order() {
    let levels = topological_levels(&ids(&["z", "m", "a"]), &[]);
    assert_eq!(levels, vec![vec!["z", "m", "a"]]);
  }

  #[test]
  fn every_edge_crosses_level_boundaries_forward() {
    let node_ids = ids(&["a", "b", "c", "d", "e"]);
    let edges = pairs(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d"), ("d", "e")]);
    let levels = topological_levels(&node_ids, &edges);

    let level_of: HashMap<&str, usize> = levels
      .iter()
      .enumerate()
      .flat_map(|(i, level)| level.iter().map(move |id| (id.as_str(), i)))
      .collect();

    // Partition covers all nodes.
    assert_eq!(level_of.len(), node_ids.len());
    for (from, to) in &edges {
      assert!(level_of[from.as_str()] < level_of[to.as_str()]);
    }
  }

  #[test]
  fn cyclic_graph_yields_partial_levels() {
    let levels = topological_levels(
      &ids(&["a", "b", "c"]),
      &pairs(&[("a", "b"), ("b", "c"), ("c", "b")]),
    );
    assert_eq!(levels, vec![vec!["a"]]);
  }

  #[test]
  fn downstream_is_inclusive_of_start() {
    let set = downstream_nodes(
      "b",
      &ids(&["a", "b", "c", "d"]),
      &pairs(&[("a", "b"), ("b", "c"), ("c", "d")]),
    );
    assert_eq!(set.len(), 3);
    assert!(set.contains("b") && set.contains("c") && set.contains("d"));
    assert!(!set.contains("a"));
  }

  #[test]
  fn downstream_follows_branches() {
    let set = downstream_nodes(
      "a",
      &ids(&["a", "b", "c", "d"]),
      &pairs(&[("a", "b"), ("a", "c"), ("c", "d")]),
    );
    assert_eq!(set.len(), 4);
  }

  #[test]
  fn detects_cycle() {
    assert!(has_cycle(
      &ids(&["a", "b", "c"]),
      &pairs(&[("a", "b"), ("b", "c"), ("c", "a")]),
    ));
  }

  #[test]
  fn detects_self_loop() {
    assert!(has_cycle(&ids(&["a"]), &pairs(&[("a", "a")])));
  }

  #[test]
  fn acyclic_graph_has_no_cycle() {
    assert!(!has_cycle(
      &ids(&["a", "b", "c", "d"]),
      &pairs(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]),
    ));
  }
}
