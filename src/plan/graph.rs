//! Action dependency graph.
//!
//! Backed by a `petgraph` directed graph where an edge `A → B` means "A
//! depends on B" (B must execute first). Cycle detection is a DFS that
//! reports the offending path; ordering is Kahn's algorithm with the ready
//! set sorted by action id so re-running Plan on the same inputs yields an
//! identical order.

use petgraph::graph::DiGraph;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Action {action} depends on non-existent action {dependency}")]
    MissingDependency { action: String, dependency: String },
    #[error("Circular dependency detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashSet<String>,
    /// `action → dependencies` in insertion order.
    edges: BTreeMap<String, Vec<String>>,
}

/// `dependency_graph.json` shape.
#[derive(Debug, Serialize)]
pub struct GraphDocument {
    pub nodes: Vec<String>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, action_id: &str) {
        if self.nodes.insert(action_id.to_string()) {
            self.edges.entry(action_id.to_string()).or_default();
        }
    }

    /// Record that `action_id` depends on `depends_on`.
    pub fn add_dependency(&mut self, action_id: &str, depends_on: &str) {
        self.add_node(action_id);
        self.edges
            .entry(action_id.to_string())
            .or_default()
            .push(depends_on.to_string());
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Verify every dependency exists and the graph is acyclic.
    ///
    /// Acyclicity is checked on a petgraph view first; only when a cycle
    /// exists does the DFS run again to extract the offending path for the
    /// error message.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (action, deps) in &self.edges {
            for dep in deps {
                if !self.nodes.contains(dep) {
                    return Err(GraphError::MissingDependency {
                        action: action.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut graph: DiGraph<&str, ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        let mut indices = HashMap::with_capacity(self.nodes.len());
        for id in self.edges.keys() {
            indices.insert(id.as_str(), graph.add_node(id.as_str()));
        }
        for (action, deps) in &self.edges {
            for dep in deps {
                graph.add_edge(indices[action.as_str()], indices[dep.as_str()], ());
            }
        }
        if !petgraph::algo::is_cyclic_directed(&graph) {
            return Ok(());
        }
        self.find_cycle()
    }

    /// DFS cycle check reporting the cycle path when one exists.
    fn find_cycle(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = self
            .edges
            .keys()
            .map(|id| (id.as_str(), Mark::Unvisited))
            .collect();

        fn visit<'a>(
            node: &'a str,
            edges: &'a BTreeMap<String, Vec<String>>,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            marks.insert(node, Mark::InProgress);
            path.push(node.to_string());

            if let Some(deps) = edges.get(node) {
                for dep in deps {
                    match marks.get(dep.as_str()).copied().unwrap_or(Mark::Done) {
                        Mark::InProgress => {
                            let start = path.iter().position(|p| p == dep).unwrap_or(0);
                            let mut cycle = path[start..].to_vec();
                            cycle.push(dep.clone());
                            return Some(cycle);
                        }
                        Mark::Unvisited => {
                            if let Some(cycle) = visit(dep, edges, marks, path) {
                                return Some(cycle);
                            }
                        }
                        Mark::Done => {}
                    }
                }
            }

            path.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let ids: Vec<&str> = self.edges.keys().map(|s| s.as_str()).collect();
        for id in ids {
            if marks[id] == Mark::Unvisited {
                let mut path = Vec::new();
                if let Some(cycle) = visit(id, &self.edges, &mut marks, &mut path) {
                    return Err(GraphError::Cycle { path: cycle });
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm. The ready set is re-sorted by id at every step so
    /// the order is stable across runs for identical inputs.
    pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
        self.validate()?;

        let mut in_degree: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();

        // Reverse adjacency: dependency → dependents.
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (action, deps) in &self.edges {
            for dep in deps {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(action.as_str());
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort_unstable();

        let mut order = Vec::with_capacity(self.edges.len());
        while let Some(&next) = ready.first() {
            ready.remove(0);
            order.push(next.to_string());

            if let Some(children) = dependents.get(next) {
                for &child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            let pos = ready.binary_search(&child).unwrap_or_else(|p| p);
                            ready.insert(pos, child);
                        }
                    }
                }
            }
        }

        Ok(order)
    }

    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            nodes: self.edges.keys().cloned().collect(),
            edges: self
                .edges
                .iter()
                .flat_map(|(from, deps)| {
                    deps.iter().map(move |to| GraphEdge {
                        from: from.clone(),
                        to: to.clone(),
                    })
                })
                .collect(),
        }
    }
}
