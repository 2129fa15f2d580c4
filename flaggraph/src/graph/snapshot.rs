//! In-memory snapshot of the flag dependency graph.
//!
//! A snapshot built with [`DependencyGraph::from_flags`] mirrors whatever the
//! store holds, including damage such as cycles or edges to flags that no
//! longer exist, so that integrity checks can report it. Each flag keeps its
//! in-graph prerequisites in ascending order; edges to unknown flags are
//! set aside as dangling.

use super::DependencyLookup;
use crate::core::{Flag, FlagId, FlagStatus};
use crate::storage::{Result as StorageResult, StorageError};
use async_trait::async_trait;
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use std::collections::HashMap;

/// A directed graph of flags and their depends-on edges
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use flaggraph::graph::DependencyGraph;
/// use flaggraph::{Flag, FlagId, FlagStatus};
///
/// let now = Utc::now();
/// let flag = |id: i64, name: &str, status, deps: Vec<i64>| {
///     let deps = deps.into_iter().map(FlagId::new).collect();
///     Flag::new(FlagId::new(id), name, status, deps, now, now)
/// };
///
/// let graph = DependencyGraph::from_flags(vec![
///     flag(1, "auth", FlagStatus::Disabled, vec![]),
///     flag(2, "checkout", FlagStatus::Enabled, vec![1]),
///     flag(3, "payment", FlagStatus::Disabled, vec![2, 7]),
/// ]);
///
/// assert!(graph.find_cycle().is_none());
/// assert_eq!(graph.dangling_edges(), &[(FlagId::new(3), FlagId::new(7))]);
/// assert_eq!(
///     graph.unsatisfied_enabled(),
///     vec![(FlagId::new(2), FlagId::new(1))]
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Flags whose dependencies hold only in-graph prerequisites, ascending
    flags: HashMap<FlagId, Flag>,
    /// Insertion order for deterministic iteration
    insertion_order: Vec<FlagId>,
    /// Edges whose prerequisite is not in the graph, as (flag, dependency)
    dangling: Vec<(FlagId, FlagId)>,
}

impl DependencyGraph {
    /// Builds a snapshot from flag records as returned by a store.
    ///
    /// Every declared edge is kept as-is, without cycle checks. Edges that
    /// point at unknown flags are remembered in [`Self::dangling_edges`].
    /// A repeated id keeps its first record.
    pub fn from_flags(flags: impl IntoIterator<Item = Flag>) -> Self {
        let mut graph = Self::default();
        for flag in flags {
            let id = flag.id();
            if graph.flags.contains_key(&id) {
                continue;
            }
            graph.insertion_order.push(id);
            graph.flags.insert(id, flag);
        }

        for id in &graph.insertion_order {
            let Some(flag) = graph.flags.get(id) else {
                continue;
            };
            let mut known = Vec::with_capacity(flag.dependencies().len());
            for dep in flag.dependencies() {
                if graph.flags.contains_key(dep) {
                    known.push(*dep);
                } else {
                    graph.dangling.push((*id, *dep));
                }
            }
            known.sort();
            known.dedup();
            if let Some(flag) = graph.flags.remove(id) {
                graph.flags.insert(*id, flag.with_dependencies(known));
            }
        }

        graph
    }

    /// Returns the number of flags in the graph
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Returns true if the graph has no flags
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Returns the flag with its in-graph dependencies, ascending
    pub fn flag(&self, id: FlagId) -> Option<&Flag> {
        self.flags.get(&id)
    }

    fn prerequisites(&self, id: FlagId) -> &[FlagId] {
        self.flags
            .get(&id)
            .map(|flag| flag.dependencies())
            .unwrap_or_default()
    }

    /// Edges whose prerequisite is missing from the graph, as (flag, dependency)
    pub fn dangling_edges(&self) -> &[(FlagId, FlagId)] {
        &self.dangling
    }

    /// Enabled flags with a disabled direct dependency, as (flag, dependency)
    pub fn unsatisfied_enabled(&self) -> Vec<(FlagId, FlagId)> {
        let mut violations = Vec::new();
        for id in &self.insertion_order {
            let Some(flag) = self.flags.get(id) else {
                continue;
            };
            if flag.status() != FlagStatus::Enabled {
                continue;
            }
            for dep in flag.dependencies() {
                if self.flags.get(dep).map(|d| d.status()) == Some(FlagStatus::Disabled) {
                    violations.push((*id, *dep));
                }
            }
        }
        violations
    }

    /// Finds one cycle and returns it as a depends-on path that starts and
    /// ends with the same flag.
    ///
    /// Uses three-color marking with an explicit stack, so arbitrarily long
    /// chains do not exhaust the call stack:
    /// - White (not visited): not in `marks`
    /// - Gray (visiting): `Mark::Visiting`, currently on the stack
    /// - Black (visited): `Mark::Done`
    pub fn find_cycle(&self) -> Option<Vec<FlagId>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<FlagId, Mark> = HashMap::new();

        for &start in &self.insertion_order {
            if marks.contains_key(&start) {
                continue;
            }

            // (node, index of the next prerequisite to explore)
            let mut stack: Vec<(FlagId, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::Visiting);

            while let Some(&(node, index)) = stack.last() {
                let Some(next) = self.prerequisites(node).get(index).copied() else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    continue;
                };

                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                match marks.get(&next) {
                    Some(Mark::Visiting) => {
                        // Back edge found - cycle detected
                        let pos = stack.iter().position(|(id, _)| *id == next).unwrap_or(0);
                        let mut path: Vec<FlagId> = stack[pos..].iter().map(|(id, _)| *id).collect();
                        path.push(next);
                        return Some(path);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::Visiting);
                        stack.push((next, 0));
                    }
                }
            }
        }

        None
    }

    /// Generates a DOT representation of the graph for visualization.
    ///
    /// Nodes are labelled `name (status)`; edges point from a prerequisite to
    /// the flag that requires it. Dangling edges are left out.
    ///
    /// ```ignore
    /// std::fs::write("flags.dot", graph.to_dot())?;
    /// // Then render: dot -Tpng flags.dot -o flags.png
    /// ```
    pub fn to_dot(&self) -> String {
        let mut graph = DiGraph::<String, ()>::new();
        let mut node_indices = HashMap::new();

        for id in &self.insertion_order {
            if let Some(flag) = self.flags.get(id) {
                let label = format!("{} ({})", flag.name(), flag.status());
                node_indices.insert(*id, graph.add_node(label));
            }
        }

        for id in &self.insertion_order {
            let Some(&target_idx) = node_indices.get(id) else {
                continue;
            };
            for dep in self.prerequisites(*id) {
                if let Some(&source_idx) = node_indices.get(dep) {
                    graph.add_edge(source_idx, target_idx, ());
                }
            }
        }

        format!("{:?}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}

#[async_trait]
impl DependencyLookup for DependencyGraph {
    async fn prerequisites_of(&mut self, id: FlagId) -> StorageResult<Vec<FlagId>> {
        Ok(self.prerequisites(id).to_vec())
    }

    async fn lookup_flag(&mut self, id: FlagId) -> StorageResult<Flag> {
        self.flag(id).cloned().ok_or(StorageError::FlagNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn flag(id: i64, status: FlagStatus, deps: &[i64]) -> Flag {
        let now = Utc::now();
        Flag::new(
            FlagId::new(id),
            format!("flag_{}", id),
            status,
            deps.iter().copied().map(FlagId::new).collect(),
            now,
            now,
        )
    }

    fn ids(raw: &[i64]) -> Vec<FlagId> {
        raw.iter().copied().map(FlagId::new).collect()
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::default();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
        assert!(graph.find_cycle().is_none());
        assert!(graph.unsatisfied_enabled().is_empty());
    }

    #[test]
    fn test_prerequisites_sorted_and_first_record_wins() {
        let graph = DependencyGraph::from_flags(vec![
            flag(1, FlagStatus::Disabled, &[]),
            flag(2, FlagStatus::Disabled, &[]),
            flag(3, FlagStatus::Disabled, &[2, 1, 2]),
            flag(3, FlagStatus::Enabled, &[]),
        ]);

        assert_eq!(graph.len(), 3);
        let checkout = graph.flag(FlagId::new(3)).unwrap();
        assert_eq!(checkout.status(), FlagStatus::Disabled);
        assert_eq!(checkout.dependencies(), &ids(&[1, 2])[..]);
    }

    #[test]
    fn test_snapshot_keeps_damage_for_reporting() {
        let graph = DependencyGraph::from_flags(vec![
            flag(1, FlagStatus::Disabled, &[3]),
            flag(2, FlagStatus::Disabled, &[1]),
            flag(3, FlagStatus::Disabled, &[2]),
            flag(4, FlagStatus::Enabled, &[1, 99]),
        ]);

        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert_eq!(graph.dangling_edges(), &[(FlagId::new(4), FlagId::new(99))]);
        assert_eq!(graph.unsatisfied_enabled(), vec![(FlagId::new(4), FlagId::new(1))]);
    }

    #[test]
    fn test_diamond_is_acyclic_and_satisfied() {
        let graph = DependencyGraph::from_flags(vec![
            flag(4, FlagStatus::Enabled, &[2, 3]),
            flag(3, FlagStatus::Enabled, &[1]),
            flag(2, FlagStatus::Enabled, &[1]),
            flag(1, FlagStatus::Enabled, &[]),
        ]);

        assert!(graph.find_cycle().is_none());
        assert!(graph.unsatisfied_enabled().is_empty());
        assert!(graph.dangling_edges().is_empty());
    }

    #[test]
    fn test_long_chain_cycle_found_without_recursion() {
        let n = 10_000;
        let flags: Vec<Flag> = (1..=n)
            .map(|id| {
                let previous = if id == 1 { n } else { id - 1 };
                flag(id, FlagStatus::Disabled, &[previous])
            })
            .collect();

        let graph = DependencyGraph::from_flags(flags);
        assert_eq!(graph.find_cycle().map(|path| path.len()), Some(n as usize + 1));
    }

    #[tokio::test]
    async fn test_lookup_over_snapshot() {
        let mut graph = DependencyGraph::from_flags(vec![
            flag(1, FlagStatus::Enabled, &[]),
            flag(2, FlagStatus::Disabled, &[1, 9]),
        ]);

        assert_eq!(graph.prerequisites_of(FlagId::new(2)).await.unwrap(), ids(&[1]));
        assert!(graph.prerequisites_of(FlagId::new(9)).await.unwrap().is_empty());
        assert!(matches!(
            graph.lookup_flag(FlagId::new(9)).await,
            Err(StorageError::FlagNotFound(_))
        ));
    }

    #[test]
    fn test_dot_export_labels_and_edges() {
        let graph = DependencyGraph::from_flags(vec![
            flag(1, FlagStatus::Enabled, &[]),
            flag(2, FlagStatus::Disabled, &[1, 9]),
        ]);

        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("flag_1 (enabled)"));
        assert!(dot.contains("flag_2 (disabled)"));
        assert!(dot.contains("0 -> 1"));
        assert_eq!(dot.matches("->").count(), 1);
    }
}
