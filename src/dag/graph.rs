// src/dag/graph.rs

//! Internal dependency graph.
//!
//! A thin layer over a petgraph [`DiGraph`] keyed by task id. Acyclicity is
//! enforced at edge insertion: an edge `ancestor -> descendant` is rejected
//! when a path `descendant -> ancestor` already exists, so the graph never
//! holds a cycle and downstream queries can assume a valid topological
//! order. All query output is sorted by id for deterministic scheduling.

use std::collections::BTreeMap;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::errors::DagError;

#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    graph: DiGraph<String, ()>,
    indices: BTreeMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn add_vertex(&mut self, id: &str) -> Result<(), DagError> {
        if self.indices.contains_key(id) {
            return Err(DagError::TaskIdDuplicate {
                task_id: id.to_string(),
            });
        }
        let idx = self.graph.add_node(id.to_string());
        self.indices.insert(id.to_string(), idx);
        Ok(())
    }

    pub fn add_edge(&mut self, ancestor: &str, descendant: &str) -> Result<(), DagError> {
        if ancestor == descendant {
            return Err(DagError::AncestorDescendantSame {
                ancestor: ancestor.to_string(),
                descendant: descendant.to_string(),
            });
        }
        let (a, d) = match (self.indices.get(ancestor), self.indices.get(descendant)) {
            (Some(&a), Some(&d)) => (a, d),
            _ => {
                return Err(DagError::Unknown {
                    source: format!(
                        "edge endpoint not in DAG: `{ancestor}` -> `{descendant}`"
                    )
                    .into(),
                })
            }
        };
        if self.graph.find_edge(a, d).is_some() {
            return Err(DagError::DependencyDuplicate {
                ancestor: ancestor.to_string(),
                descendant: descendant.to_string(),
            });
        }
        // A path descendant -> ancestor means this edge would close a cycle.
        if has_path_connecting(&self.graph, d, a, None) {
            return Err(DagError::CycleDetected {
                start: ancestor.to_string(),
                end: descendant.to_string(),
            });
        }
        self.graph.add_edge(a, d, ());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.indices.contains_key(id)
    }

    pub fn is_edge(&self, ancestor: &str, descendant: &str) -> bool {
        match (self.indices.get(ancestor), self.indices.get(descendant)) {
            (Some(&a), Some(&d)) => self.graph.find_edge(a, d).is_some(),
            _ => false,
        }
    }

    /// All ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.indices.keys().cloned().collect()
    }

    /// Ids with no incoming edge, sorted.
    pub fn roots(&self) -> Vec<String> {
        self.indices
            .iter()
            .filter(|(_, &idx)| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Direct parents of `id`, sorted. Unknown ids yield an empty list.
    pub fn parents(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct children of `id`, sorted. Unknown ids yield an empty list.
    pub fn children(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, dir: Direction) -> Vec<String> {
        let Some(&idx) = self.indices.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<String> = self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out
    }

    /// Transitive ancestors of `id` in topological order.
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        self.reachable(id, Direction::Incoming)
    }

    /// Transitive descendants of `id` in topological order.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        self.reachable(id, Direction::Outgoing)
    }

    fn reachable(&self, id: &str, dir: Direction) -> Vec<String> {
        let Some(&start) = self.indices.get(id) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.graph.node_count()];
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for next in self.graph.neighbors_directed(idx, dir) {
                if !seen[next.index()] {
                    seen[next.index()] = true;
                    stack.push(next);
                }
            }
        }
        seen[start.index()] = false;

        // The graph is acyclic by construction, so toposort cannot fail.
        let order = toposort(&self.graph, None).unwrap_or_default();
        order
            .into_iter()
            .filter(|idx| seen[idx.index()])
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    #[cfg(test)]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
