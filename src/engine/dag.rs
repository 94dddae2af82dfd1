// ABOUTME: DAG construction and scheduling primitives for workflow steps
// ABOUTME: Handles cycle detection, topological ordering and the ready frontier

use indexmap::IndexMap;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashSet, VecDeque};

use super::error::{ExecutionError, Result};
use crate::definition::Definition;

/// Dependency graph over the steps of one definition.
///
/// Nodes are step ids; an edge runs from a dependency to its dependent.
/// Node order follows definition order, which keeps topological sorting
/// and the ready frontier stable across calls.
pub struct Dag {
    graph: Graph<String, ()>,
    node_indices: IndexMap<String, NodeIndex>,
    dependencies: IndexMap<String, Vec<String>>,
}

impl Dag {
    /// Build the graph from a definition. Duplicate step ids and unknown
    /// dependency ids are rejected here; cycles are reported separately by
    /// [`Dag::detect_cycle`] so that callers can surface the cycle path.
    pub fn build(definition: &Definition) -> Result<Self> {
        let mut graph = Graph::new();
        let mut node_indices: IndexMap<String, NodeIndex> = IndexMap::new();
        let mut dependencies: IndexMap<String, Vec<String>> = IndexMap::new();

        for step in &definition.steps {
            if node_indices.contains_key(&step.id) {
                return Err(ExecutionError::Validation {
                    issues: vec![format!("duplicate step id '{}'", step.id)],
                });
            }
            let idx = graph.add_node(step.id.clone());
            node_indices.insert(step.id.clone(), idx);
            dependencies.insert(step.id.clone(), step.dependencies.clone());
        }

        for step in &definition.steps {
            let step_idx = node_indices[&step.id];
            for dep in &step.dependencies {
                match node_indices.get(dep) {
                    Some(&dep_idx) => {
                        graph.add_edge(dep_idx, step_idx, ());
                    }
                    None => {
                        return Err(ExecutionError::Validation {
                            issues: vec![format!(
                                "step '{}' depends on unknown step '{}'",
                                step.id, dep
                            )],
                        });
                    }
                }
            }
        }

        Ok(Self {
            graph,
            node_indices,
            dependencies,
        })
    }

    pub fn len(&self) -> usize {
        self.node_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_indices.is_empty()
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.node_indices.contains_key(step_id)
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.node_indices.keys().cloned().collect()
    }

    pub fn dependencies(&self, step_id: &str) -> &[String] {
        self.dependencies
            .get(step_id)
            .map(|deps| deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn in_degree(&self, step_id: &str) -> usize {
        self.node_indices
            .get(step_id)
            .map(|&idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
            .unwrap_or(0)
    }

    pub fn out_degree(&self, step_id: &str) -> usize {
        self.node_indices
            .get(step_id)
            .map(|&idx| self.graph.neighbors_directed(idx, Direction::Outgoing).count())
            .unwrap_or(0)
    }

    /// Kahn's algorithm. Returns the visit order and the set of nodes the
    /// drain never reached (non-empty exactly when the graph has a cycle).
    fn kahn(&self) -> (Vec<String>, Vec<String>) {
        let mut in_degrees: IndexMap<NodeIndex, usize> = self
            .node_indices
            .values()
            .map(|&idx| {
                (
                    idx,
                    self.graph.neighbors_directed(idx, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut queue: VecDeque<NodeIndex> = in_degrees
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&idx, _)| idx)
            .collect();

        let mut order = Vec::with_capacity(self.node_indices.len());
        while let Some(idx) = queue.pop_front() {
            order.push(self.graph[idx].clone());
            for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let deg = in_degrees.get_mut(&succ).expect("successor not indexed");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(succ);
                }
            }
        }

        let visited: HashSet<&String> = order.iter().collect();
        let unvisited = self
            .node_indices
            .keys()
            .filter(|id| !visited.contains(id))
            .cloned()
            .collect();

        (order, unvisited)
    }

    /// Returns one representative cycle path, or `None` for an acyclic
    /// graph. The path starts and ends on the same step id.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let (_, unvisited) = self.kahn();
        if unvisited.is_empty() {
            return None;
        }

        // An unvisited node never reached in-degree zero, so it always has
        // an unvisited predecessor; walking predecessors must revisit one.
        let unvisited_set: HashSet<&String> = unvisited.iter().collect();
        let mut path: Vec<String> = Vec::new();
        let mut positions: IndexMap<String, usize> = IndexMap::new();
        let mut current = unvisited[0].clone();

        loop {
            if let Some(&start) = positions.get(&current) {
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(current);
                // The walk ran against edge direction; flip it so the path
                // reads dependency-first.
                cycle.reverse();
                return Some(cycle);
            }
            positions.insert(current.clone(), path.len());
            path.push(current.clone());

            let idx = self.node_indices[&current];
            current = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|n| {
                    let id = &self.graph[n];
                    unvisited_set.contains(id).then(|| id.clone())
                })
                .next()
                .expect("unvisited node without unvisited predecessor");
        }
    }

    /// Full topological ordering, failing with the cycle path when one
    /// exists. Ordering among independent steps follows definition order.
    pub fn topo_sort(&self) -> Result<Vec<String>> {
        let (order, unvisited) = self.kahn();
        if unvisited.is_empty() {
            Ok(order)
        } else {
            Err(ExecutionError::CyclicDependency {
                cycle: self.detect_cycle().unwrap_or(unvisited),
            })
        }
    }

    /// Steps not yet completed whose dependencies all are.
    pub fn ready_steps(&self, completed: &HashSet<String>) -> Vec<String> {
        self.node_indices
            .keys()
            .filter(|id| {
                !completed.contains(*id)
                    && self.dependencies(id).iter().all(|dep| completed.contains(dep))
            })
            .cloned()
            .collect()
    }
}
