//! Inheritance Graph
//!
//! Multi-root, multi-parent DAG over prototype identifiers, backed by a
//! petgraph `StableDiGraph` so node indices stay valid across removals.
//! Edges point from parent to child; the edge weight is the parent's position
//! in the child's declared parent list, which keeps multi-parent order stable.
//!
//! Every mutation is validated before anything is committed, so a failed
//! `add` or `remove` leaves the graph exactly as it was.

pub mod walk;

pub use walk::{ancestors_breadth_first, resolution_order, with_descendants};

use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

use crate::error::{PrototypeError, Result};

/// Parent/child relations between the prototypes of one kind
#[derive(Debug, Clone, Default)]
pub struct InheritanceGraph {
    /// Parent -> child edges, weighted by declared parent position
    graph: StableDiGraph<String, usize>,

    /// Node index lookup: id -> NodeIndex
    indices: HashMap<String, NodeIndex>,
}

impl InheritanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.indices.contains_key(id)
    }

    /// All registered ids, sorted
    pub fn nodes(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.indices.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Register `id` as a root, dropping any parent edges it had
    pub fn add_root(&mut self, id: &str) -> Result<()> {
        self.add(id, &[])
    }

    /// Register `id` with the given parents (declared order).
    ///
    /// Fails without touching the graph if `id` lists itself or if any parent
    /// already descends from `id`. Unknown parents become implicit roots.
    /// Re-adding an existing node replaces its parent edges.
    pub fn add(&mut self, id: &str, parents: &[String]) -> Result<()> {
        if parents.iter().any(|p| p == id) {
            return Err(PrototypeError::SelfParent(id.to_string()));
        }

        if let Some(&idx) = self.indices.get(id) {
            for parent in parents {
                let Some(&parent_idx) = self.indices.get(parent) else {
                    continue;
                };
                if has_path_connecting(&self.graph, idx, parent_idx, None) {
                    return Err(PrototypeError::Cycle {
                        id: id.to_string(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        let idx = self.ensure_node(id);
        let stale: Vec<EdgeIndex> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }

        let mut seen = HashSet::new();
        for (position, parent) in parents.iter().enumerate() {
            if !seen.insert(parent.as_str()) {
                continue;
            }
            let parent_idx = self.ensure_node(parent);
            self.graph.add_edge(parent_idx, idx, position);
        }

        Ok(())
    }

    /// Remove `id`.
    ///
    /// Without `force` this fails while `id` has children. With `force` each
    /// child keeps its remaining parents, or becomes a root if none are left.
    pub fn remove(&mut self, id: &str, force: bool) -> Result<()> {
        let &idx = self
            .indices
            .get(id)
            .ok_or_else(|| PrototypeError::UnknownNode(id.to_string()))?;

        let children = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .count();
        if children > 0 && !force {
            return Err(PrototypeError::HasChildren {
                id: id.to_string(),
                children,
            });
        }

        self.graph.remove_node(idx);
        self.indices.remove(id);
        Ok(())
    }

    /// Declared parents of `id`, in declared order
    pub fn parents(&self, id: &str) -> Vec<&str> {
        let Some(&idx) = self.indices.get(id) else {
            return Vec::new();
        };

        let mut edges: Vec<(usize, NodeIndex)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (*e.weight(), e.source()))
            .collect();
        edges.sort_by_key(|(position, _)| *position);

        edges
            .into_iter()
            .map(|(_, parent)| self.graph[parent].as_str())
            .collect()
    }

    /// Direct children of `id`, sorted
    pub fn children(&self, id: &str) -> Vec<&str> {
        let Some(&idx) = self.indices.get(id) else {
            return Vec::new();
        };

        let mut children: Vec<&str> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|child| self.graph[child].as_str())
            .collect();
        children.sort_unstable();
        children.dedup();
        children
    }

    pub fn parent_count(&self, id: &str) -> usize {
        self.indices
            .get(id)
            .map(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count())
            .unwrap_or(0)
    }

    pub fn is_root(&self, id: &str) -> bool {
        self.contains(id) && self.parent_count(id) == 0
    }

    /// Nodes without parents, sorted
    pub fn root_nodes(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .indices
            .iter()
            .filter(|(_, &idx)| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|(id, _)| id.as_str())
            .collect();
        roots.sort_unstable();
        roots
    }

    /// All parent -> child edges, sorted
    pub fn edges(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<(&str, &str)> = self
            .graph
            .edge_references()
            .map(|e| (self.graph[e.source()].as_str(), self.graph[e.target()].as_str()))
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Export the graph to GraphViz DOT format
    pub fn to_dot(&self, name: &str) -> String {
        let mut output = String::new();

        output.push_str(&format!("digraph \"{}\" {{\n", dot_escape(name)));
        output.push_str("  rankdir=BT;\n");
        output.push_str("  node [shape=box, style=\"rounded\", fontname=\"Helvetica\", fontsize=10];\n");
        output.push('\n');

        for id in self.nodes() {
            let shape = if self.is_root(id) { ", penwidth=2" } else { "" };
            let id = dot_escape(id);
            output.push_str(&format!("  \"{}\" [label=\"{}\"{}];\n", id, id, shape));
        }

        output.push('\n');

        // Child points at parent, reading as "inherits from"
        for (parent, child) in self.edges() {
            output.push_str(&format!("  \"{}\" -> \"{}\";\n", dot_escape(child), dot_escape(parent)));
        }

        output.push_str("}\n");
        output
    }

    fn ensure_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.indices.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.indices.insert(id.to_string(), idx);
        idx
    }
}

/// Escape an identifier for use inside a quoted DOT string
fn dot_escape(id: &str) -> String {
    id.replace('\\', "\\\\").replace('"', "\\\"")
}
