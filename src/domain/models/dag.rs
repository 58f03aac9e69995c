//! Dependency graph over [`PhaseDefinition`]s.
//!
//! Grounded on the teacher's `TaskDag` (cycle detection via DFS,
//! Kahn's-algorithm topological sort, wave/level partitioning) but adapted
//! to string phase ids and to the spec's two extra requirements: a
//! deterministic tie-break on phase id, and a per-unit ready-set that
//! merges a unit's own completed set with the job's global-completed set.

use std::collections::{HashMap, HashSet, VecDeque};

use super::phase::PhaseDefinition;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DagError {
    #[error("unknown dependency '{dependency}' referenced by phase '{phase}'")]
    UnknownDependency { phase: String, dependency: String },

    #[error("cycle detected, involving phase '{0}'")]
    CycleDetected(String),

    #[error("phase '{0}' is unreachable from any root phase")]
    Unreachable(String),

    #[error("duplicate phase id '{0}'")]
    DuplicatePhase(String),
}

/// A validated, immutable dependency graph over a workflow's phases.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    phases: HashMap<String, PhaseDefinition>,
    /// phase_id -> phases that depend on it (reverse edges).
    dependents: HashMap<String, Vec<String>>,
    /// Deterministic phase-id order used to break ties everywhere.
    sorted_ids: Vec<String>,
}

impl DependencyGraph {
    /// Build and validate a graph from a flat phase list (spec §4.1).
    pub fn build(phases: Vec<PhaseDefinition>) -> Result<Self, DagError> {
        let mut by_id: HashMap<String, PhaseDefinition> = HashMap::new();
        for phase in phases {
            if by_id.insert(phase.id.clone(), phase.clone()).is_some() {
                return Err(DagError::DuplicatePhase(phase.id));
            }
        }

        for phase in by_id.values() {
            for dep in &phase.depends_on {
                if !by_id.contains_key(dep) {
                    return Err(DagError::UnknownDependency { phase: phase.id.clone(), dependency: dep.clone() });
                }
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for phase in by_id.values() {
            for dep in &phase.depends_on {
                dependents.entry(dep.clone()).or_default().push(phase.id.clone());
            }
        }
        for list in dependents.values_mut() {
            list.sort();
        }

        let mut sorted_ids: Vec<String> = by_id.keys().cloned().collect();
        sorted_ids.sort();

        let graph = Self { phases: by_id, dependents, sorted_ids };
        graph.check_cycles()?;
        graph.check_reachable()?;
        Ok(graph)
    }

    pub fn phase(&self, id: &str) -> Option<&PhaseDefinition> {
        self.phases.get(id)
    }

    pub fn phases(&self) -> impl Iterator<Item = &PhaseDefinition> {
        self.sorted_ids.iter().map(move |id| &self.phases[id])
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn roots(&self) -> Vec<&str> {
        self.sorted_ids
            .iter()
            .filter(|id| self.phases[*id].depends_on.is_empty())
            .map(String::as_str)
            .collect()
    }

    fn check_cycles(&self) -> Result<(), DagError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks: HashMap<&str, Mark> =
            self.sorted_ids.iter().map(|id| (id.as_str(), Mark::Unvisited)).collect();

        fn visit<'a>(
            id: &'a str,
            phases: &'a HashMap<String, PhaseDefinition>,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Result<(), DagError> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => return Err(DagError::CycleDetected(id.to_string())),
                _ => {}
            }
            marks.insert(id, Mark::InProgress);
            stack.push(id);
            for dep in &phases[id].depends_on {
                visit(dep.as_str(), phases, marks, stack)?;
            }
            stack.pop();
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let mut stack = Vec::new();
        for id in &self.sorted_ids {
            visit(id.as_str(), &self.phases, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    fn check_reachable(&self) -> Result<(), DagError> {
        let roots: HashSet<&str> = self.roots().into_iter().collect();
        if roots.is_empty() && !self.phases.is_empty() {
            // A non-empty, cycle-free graph always has at least one root;
            // check_cycles() would already have failed otherwise.
            return Ok(());
        }
        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = roots.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(deps) = self.dependents.get(id) {
                for dep in deps {
                    queue.push_back(dep.as_str());
                }
            }
        }
        for id in &self.sorted_ids {
            if !reached.contains(id.as_str()) {
                return Err(DagError::Unreachable(id.clone()));
            }
        }
        Ok(())
    }

    /// Deterministic topological order, ties broken by phase id.
    pub fn topological_sort(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> =
            self.sorted_ids.iter().map(|id| (id.as_str(), self.phases[id].depends_on.len())).collect();
        let mut ready: Vec<&str> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| *id).collect();
        ready.sort();
        let mut queue: VecDeque<&str> = ready.into();
        let mut order = Vec::with_capacity(self.phases.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            if let Some(deps) = self.dependents.get(id) {
                let mut newly_ready = Vec::new();
                for dep in deps {
                    let degree = in_degree.get_mut(dep.as_str()).expect("dependent in graph");
                    *degree -= 1;
                    if *degree == 0 {
                        newly_ready.push(dep.as_str());
                    }
                }
                newly_ready.sort();
                for id in newly_ready {
                    queue.push_back(id);
                }
            }
        }

        order
    }

    /// Partition phases into levels: level 0 = roots, level N = 1 + max
    /// level of dependencies.
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut level_of: HashMap<String, usize> = HashMap::new();
        for id in self.topological_sort() {
            let level =
                self.phases[&id].depends_on.iter().map(|dep| level_of[dep] + 1).max().unwrap_or(0);
            level_of.insert(id, level);
        }

        let max_level = level_of.values().copied().max().unwrap_or(0);
        let mut levels = vec![Vec::new(); max_level + 1];
        let mut ids: Vec<&String> = level_of.keys().collect();
        ids.sort();
        for id in ids {
            levels[level_of[id]].push(id.clone());
        }
        levels
    }

    /// The set of phase ids ready to run given a completed set (spec §4.1):
    /// every dependency satisfied, not itself already completed.
    pub fn ready_set(&self, completed: &HashSet<String>) -> Vec<String> {
        let mut ready: Vec<String> = self
            .sorted_ids
            .iter()
            .filter(|id| !completed.contains(id.as_str()))
            .filter(|id| self.phases[id.as_str()].depends_on.iter().all(|dep| completed.contains(dep)))
            .cloned()
            .collect();
        ready.sort();
        ready
    }

    /// Per-unit ready set: a per-unit phase is ready iff every dependency —
    /// whether itself per-unit or global — is satisfied for this unit,
    /// where a global dependency is satisfied once it's in `global_completed`
    /// and a per-unit dependency is satisfied once it's in `unit_completed`.
    pub fn ready_set_for_unit(&self, unit_completed: &HashSet<String>, global_completed: &HashSet<String>) -> Vec<String> {
        let mut ready: Vec<String> = self
            .sorted_ids
            .iter()
            .filter(|id| self.phases[id.as_str()].per_unit)
            .filter(|id| !unit_completed.contains(id.as_str()))
            .filter(|id| {
                self.phases[id.as_str()].depends_on.iter().all(|dep| {
                    let dep_phase = &self.phases[dep.as_str()];
                    if dep_phase.per_unit {
                        unit_completed.contains(dep)
                    } else {
                        global_completed.contains(dep)
                    }
                })
            })
            .cloned()
            .collect();
        ready.sort();
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::phase::PhaseDefinition as P;

    fn phase(id: &str, deps: &[&str]) -> P {
        P::builder(id, id).depends_on(deps.iter().map(|s| s.to_string())).build()
    }

    #[test]
    fn builds_simple_chain() {
        let graph = DependencyGraph::build(vec![phase("a", &[]), phase("b", &["a"]), phase("c", &["b"])]).unwrap();
        assert_eq!(graph.topological_sort(), vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_unknown_dependency() {
        let err = DependencyGraph::build(vec![phase("a", &["ghost"])]).unwrap_err();
        assert_eq!(err, DagError::UnknownDependency { phase: "a".into(), dependency: "ghost".into() });
    }

    #[test]
    fn rejects_cycle() {
        let err = DependencyGraph::build(vec![phase("a", &["b"]), phase("b", &["a"])]).unwrap_err();
        assert!(matches!(err, DagError::CycleDetected(_)));
    }

    #[test]
    fn levels_partition_by_longest_dependency_chain() {
        let graph =
            DependencyGraph::build(vec![phase("a", &[]), phase("b", &[]), phase("c", &["a", "b"]), phase("d", &["c"])])
                .unwrap();
        let levels = graph.levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(levels[1], vec!["c".to_string()]);
        assert_eq!(levels[2], vec!["d".to_string()]);
    }

    #[test]
    fn ready_set_respects_completed() {
        let graph = DependencyGraph::build(vec![phase("a", &[]), phase("b", &["a"]), phase("c", &["a"])]).unwrap();
        let completed = HashSet::new();
        assert_eq!(graph.ready_set(&completed), vec!["a".to_string()]);

        let mut completed = HashSet::new();
        completed.insert("a".to_string());
        assert_eq!(graph.ready_set(&completed), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn per_unit_ready_set_mixes_global_and_unit_completion() {
        let mut validate = phase("validate", &[]);
        validate.per_unit = false;
        let mut assign = phase("assign", &["validate"]);
        assign.per_unit = true;
        let graph = DependencyGraph::build(vec![validate, assign]).unwrap();

        let unit_completed = HashSet::new();
        let mut global_completed = HashSet::new();
        assert_eq!(graph.ready_set_for_unit(&unit_completed, &global_completed), Vec::<String>::new());

        global_completed.insert("validate".to_string());
        assert_eq!(graph.ready_set_for_unit(&unit_completed, &global_completed), vec!["assign".to_string()]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::domain::models::phase::PhaseDefinition as P;
    use proptest::prelude::*;

    /// Generates a random acyclic phase list of 2..=`max_nodes` phases:
    /// phase `i` depends on 0 to 3 of the most recently generated phases, so
    /// every dependency edge points strictly backward and the graph is
    /// correct-by-construction.
    fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<P>> {
        (2..=max_nodes).prop_flat_map(|n| {
            proptest::collection::vec(0usize..4, n).prop_map(move |dep_counts| {
                (0..n)
                    .map(|i| {
                        let id = format!("p{i}");
                        let k = dep_counts[i].min(i);
                        let deps: Vec<String> = (i.saturating_sub(k)..i).map(|d| format!("p{d}")).collect();
                        P::builder(id.as_str(), id.as_str()).depends_on(deps).build()
                    })
                    .collect::<Vec<_>>()
            })
        })
    }

    proptest! {
        #[test]
        fn topological_sort_respects_every_dependency(phases in dag_strategy(15)) {
            let graph = DependencyGraph::build(phases).unwrap();
            let order = graph.topological_sort();
            let position: HashMap<&str, usize> = order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
            for id in &order {
                for dep in &graph.phase(id).unwrap().depends_on {
                    prop_assert!(position[dep.as_str()] < position[id.as_str()]);
                }
            }
        }

        #[test]
        fn ready_set_never_returns_a_phase_with_an_unmet_dependency(phases in dag_strategy(15)) {
            let graph = DependencyGraph::build(phases).unwrap();
            for id in graph.ready_set(&HashSet::new()) {
                prop_assert!(graph.phase(&id).unwrap().depends_on.is_empty());
            }
        }

        #[test]
        fn driving_ready_set_to_exhaustion_completes_every_phase(phases in dag_strategy(15)) {
            let graph = DependencyGraph::build(phases).unwrap();
            let total = graph.len();
            let mut completed = HashSet::new();
            for _ in 0..total {
                let ready = graph.ready_set(&completed);
                prop_assert!(!ready.is_empty(), "a non-terminal graph must always have something ready");
                completed.insert(ready[0].clone());
            }
            prop_assert_eq!(completed.len(), total);
        }
    }
}
