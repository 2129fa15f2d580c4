use super::outcome::IntegrityViolation;
use crate::graph::DependencyGraph;

/// Lists every broken invariant in `graph`: at most one cycle, then dangling
/// edges, then enabled flags with a disabled direct dependency.
pub(super) fn inspect(graph: &DependencyGraph) -> Vec<IntegrityViolation> {
    let mut violations = Vec::new();

    if let Some(path) = graph.find_cycle() {
        violations.push(IntegrityViolation::Cycle { path });
    }

    violations.extend(
        graph
            .dangling_edges()
            .iter()
            .map(|(flag, dependency)| IntegrityViolation::DanglingDependency {
                flag: *flag,
                dependency: *dependency,
            }),
    );

    violations.extend(graph.unsatisfied_enabled().into_iter().map(|(flag, dependency)| {
        IntegrityViolation::EnabledWithDisabledDependency { flag, dependency }
    }));

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Flag, FlagId, FlagStatus};
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

    #[test]
    fn test_healthy_graph_has_no_violations() {
        let graph = DependencyGraph::from_flags(vec![
            flag(1, FlagStatus::Enabled, &[]),
            flag(2, FlagStatus::Enabled, &[1]),
            flag(3, FlagStatus::Disabled, &[2]),
        ]);
        assert!(inspect(&graph).is_empty());
    }

    #[test]
    fn test_reports_each_kind() {
        let graph = DependencyGraph::from_flags(vec![
            flag(1, FlagStatus::Disabled, &[2]),
            flag(2, FlagStatus::Disabled, &[1]),
            flag(3, FlagStatus::Enabled, &[1, 42]),
        ]);

        let violations = inspect(&graph);
        assert_eq!(violations.len(), 3);
        assert!(matches!(violations[0], IntegrityViolation::Cycle { .. }));
        assert_eq!(
            violations[1],
            IntegrityViolation::DanglingDependency {
                flag: FlagId::new(3),
                dependency: FlagId::new(42)
            }
        );
        assert_eq!(
            violations[2],
            IntegrityViolation::EnabledWithDisabledDependency {
                flag: FlagId::new(3),
                dependency: FlagId::new(1)
            }
        );
    }
}
