//! Task graph validation for dependency management.
//!
//! The workflow keeps its tasks in a flat registry; this module builds a
//! petgraph view over that registry once, at construction, to reject unknown
//! references and cycles and to fix a topological order. The scheduler never
//! runs on a graph that has not passed through [`TaskGraph::build`].

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Flat registry of tasks keyed by id.
pub type TaskMap = BTreeMap<TaskId, Task>;

/// Why one task waits on another.
///
/// An edge `a -> b` means `b` cannot complete (or start) until `a` has
/// completed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// `b` lists `a` as a dependency.
    Dependency,
    /// `a` is a subtask of aggregation task `b`.
    Subtask,
    /// `b` is a descendant of a task that depends on `a`.
    Inherited,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Dependency => write!(f, "dependency"),
            EdgeKind::Subtask => write!(f, "subtask"),
            EdgeKind::Inherited => write!(f, "inherited"),
        }
    }
}

/// Dependencies of `id` including those inherited from every ancestor.
///
/// Duplicates are removed; declared order is kept, own dependencies first.
/// Assumes the parent chain is acyclic, which [`TaskGraph::build`] checks.
pub fn effective_dependencies(tasks: &TaskMap, id: &TaskId) -> Vec<TaskId> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    let mut current = tasks.get(id);
    while let Some(task) = current {
        for dep in &task.dependencies {
            if seen.insert(*dep) {
                result.push(*dep);
            }
        }
        current = task.parent.as_ref().and_then(|p| tasks.get(p));
    }
    result
}

/// Validated, immutable view of the task graph.
pub struct TaskGraph {
    graph: DiGraph<TaskId, EdgeKind>,
    index: HashMap<TaskId, NodeIndex>,
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Validate the registry and build the graph.
    ///
    /// # Errors
    /// - [`Error::UnknownTask`] if a dependency or subtask id is not registered
    /// - [`Error::Configuration`] if the subtask hierarchy is inconsistent
    /// - [`Error::CyclicDependency`] if dependencies and subtasking form a cycle
    pub fn build(tasks: &TaskMap) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::with_capacity(tasks.len());
        for id in tasks.keys() {
            index.insert(*id, graph.add_node(*id));
        }

        let mut owner: HashMap<TaskId, TaskId> = HashMap::new();
        for task in tasks.values() {
            let to = index[&task.id];
            for dep in &task.dependencies {
                let from = index.get(dep).ok_or_else(|| Error::UnknownTask {
                    id: dep.to_string(),
                    referenced_by: describe(task),
                })?;
                graph.update_edge(*from, to, EdgeKind::Dependency);
            }
            for child_id in &task.subtasks {
                let child = tasks.get(child_id).ok_or_else(|| Error::UnknownTask {
                    id: child_id.to_string(),
                    referenced_by: describe(task),
                })?;
                if child.parent != Some(task.id) {
                    return Err(Error::Configuration(format!(
                        "subtask {} of {} does not point back to its parent",
                        describe(child),
                        describe(task)
                    )));
                }
                if let Some(previous) = owner.insert(*child_id, task.id) {
                    return Err(Error::Configuration(format!(
                        "subtask {} is owned by both {} and {}",
                        describe(child),
                        previous,
                        task.id
                    )));
                }
                graph.update_edge(index[child_id], to, EdgeKind::Subtask);
            }
            if let Some(parent) = &task.parent {
                let listed = tasks
                    .get(parent)
                    .map(|p| p.subtasks.contains(&task.id))
                    .unwrap_or(false);
                if !listed {
                    return Err(Error::Configuration(format!(
                        "task {} names parent {} which does not list it as a subtask",
                        describe(task),
                        parent
                    )));
                }
            }
        }

        // The parent chain must be acyclic before inherited edges can be walked.
        check_acyclic(&graph, tasks)?;

        for task in tasks.values() {
            if task.parent.is_none() {
                continue;
            }
            let to = index[&task.id];
            let own: HashSet<&TaskId> = task.dependencies.iter().collect();
            for dep in effective_dependencies(tasks, &task.id) {
                if !own.contains(&dep) {
                    graph.update_edge(index[&dep], to, EdgeKind::Inherited);
                }
            }
        }

        let order = check_acyclic(&graph, tasks)?;
        Ok(Self {
            graph,
            index,
            order,
        })
    }

    /// Tasks in an order where every task follows everything it waits on.
    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    /// Tasks that list `id` as a direct dependency.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .filter(|e| *e.weight() == EdgeKind::Dependency)
            .map(|e| self.graph[e.target()])
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

fn check_acyclic(graph: &DiGraph<TaskId, EdgeKind>, tasks: &TaskMap) -> Result<Vec<TaskId>> {
    let sorted = toposort(graph, None).map_err(|cycle| {
        let id = graph[cycle.node_id()];
        Error::CyclicDependency {
            task: tasks.get(&id).map(describe).unwrap_or_else(|| id.to_string()),
        }
    })?;
    Ok(sorted.into_iter().map(|n| graph[n]).collect())
}

fn describe(task: &Task) -> String {
    format!("'{}' ({})", task.name, task.id.short())
}
