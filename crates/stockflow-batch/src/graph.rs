use crate::errors::BatchError;
use crate::task::TaskRegistry;
use std::collections::{BTreeMap, BTreeSet};

/// The two execution phases derived from the registry's dependency graph.
///
/// Tasks that something else depends on run one at a time, in topological
/// order; tasks nothing depends on are leaves and run concurrently afterwards.
/// Both lists keep topological order with registration order as tie-break, so
/// the plan for a given registry never varies between runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub sequential: Vec<String>,
    pub parallel: Vec<String>,
}

impl ExecutionPlan {
    /// Validates the graph and partitions it. Unknown dependencies and cycles
    /// are configuration errors; the run must not start.
    pub fn resolve(registry: &TaskRegistry) -> Result<Self, BatchError> {
        let names = registry.names();
        let mut dependencies: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut has_dependents: BTreeSet<&str> = BTreeSet::new();

        for name in names {
            let task = registry
                .get(name)
                .ok_or_else(|| BatchError::UnknownTask(name.clone()))?;
            for dependency in task.dependencies() {
                if registry.get(dependency).is_none() {
                    return Err(BatchError::UnknownDependency {
                        task: name.clone(),
                        dependency: dependency.to_string(),
                    });
                }
                has_dependents.insert(dependency);
            }
            dependencies.insert(name.as_str(), task.dependencies().to_vec());
        }

        // Kahn's algorithm, picking the first ready task in registration
        // order each round.
        let mut ordered: Vec<&str> = Vec::with_capacity(names.len());
        let mut done: BTreeSet<&str> = BTreeSet::new();
        while ordered.len() < names.len() {
            let next = names.iter().map(String::as_str).find(|name| {
                !done.contains(name)
                    && dependencies[name].iter().all(|dep| done.contains(dep))
            });
            match next {
                Some(name) => {
                    ordered.push(name);
                    done.insert(name);
                }
                None => {
                    let stuck: Vec<&str> = names
                        .iter()
                        .map(String::as_str)
                        .filter(|name| !done.contains(name))
                        .collect();
                    return Err(BatchError::CyclicDependency(stuck.join(", ")));
                }
            }
        }

        let (parallel, sequential) = ordered
            .into_iter()
            .map(str::to_string)
            .partition(|name| !has_dependents.contains(name.as_str()));
        Ok(Self {
            sequential,
            parallel,
        })
    }

    /// Every task `name` depends on, directly or transitively. Used to decide
    /// whether a failed step blocks the parallel phase.
    pub fn transitive_dependencies(registry: &TaskRegistry, name: &str) -> BTreeSet<String> {
        let mut closure = BTreeSet::new();
        let mut pending: Vec<&str> = match registry.get(name) {
            Some(task) => task.dependencies().to_vec(),
            None => Vec::new(),
        };
        while let Some(dependency) = pending.pop() {
            if closure.insert(dependency.to_string()) {
                if let Some(task) = registry.get(dependency) {
                    pending.extend(task.dependencies());
                }
            }
        }
        closure
    }
}
