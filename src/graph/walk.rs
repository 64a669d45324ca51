//! Graph traversals used during resolution and queries

use std::collections::{BTreeSet, HashSet, VecDeque};

use super::InheritanceGraph;

/// Order `targets` so every node comes after all of its parents that are
/// also targets.
///
/// Memoized depth-first walk; each target is emitted exactly once. Ties are
/// broken by id so the order is deterministic.
pub fn resolution_order(graph: &InheritanceGraph, targets: &BTreeSet<String>) -> Vec<String> {
    fn visit<'a>(
        graph: &'a InheritanceGraph,
        id: &'a str,
        targets: &BTreeSet<String>,
        done: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) {
        if !done.insert(id) {
            return;
        }
        for parent in graph.parents(id) {
            if targets.contains(parent) {
                visit(graph, parent, targets, done, order);
            }
        }
        order.push(id.to_string());
    }

    let mut done = HashSet::new();
    let mut order = Vec::with_capacity(targets.len());
    for id in targets {
        visit(graph, id.as_str(), targets, &mut done, &mut order);
    }
    order
}

/// `ids` plus every node that transitively inherits from one of them
pub fn with_descendants<'a, I>(graph: &InheritanceGraph, ids: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut result = BTreeSet::new();
    let mut queue: VecDeque<String> = ids.into_iter().cloned().collect();

    while let Some(id) = queue.pop_front() {
        if !result.insert(id.clone()) {
            continue;
        }
        for child in graph.children(&id) {
            if !result.contains(child) {
                queue.push_back(child.to_string());
            }
        }
    }

    result
}

/// Every ancestor of `id`, nearest first, each listed once
pub fn ancestors_breadth_first(graph: &InheritanceGraph, id: &str) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut result = Vec::new();
    let mut queue: VecDeque<&str> = graph.parents(id).into_iter().collect();

    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        result.push(current.to_string());
        queue.extend(graph.parents(current));
    }

    result
}
