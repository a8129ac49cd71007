//! Dependency resolution for extension startup ordering.
//!
//! Builds the dependency graph from each extension's declared dependencies
//! and orders it with Kahn's in-degree reduction. Ties are broken by
//! registration order so the same input always yields the same order.
//!
//! Resolution fails before any extension is touched when:
//! - two extensions share a name,
//! - a dependency names an extension nobody provides,
//! - the graph has a cycle (the error names every node left unresolved).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::{ExtensionError, MissingDependency, Result};

/// One extension as seen by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveNode {
    pub name: String,
    pub dependencies: Vec<String>,
}

impl ResolveNode {
    pub fn new<I, S>(name: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }
}

/// Compute an initialization order where every extension follows all of its
/// dependencies. `nodes` must be in registration order.
pub fn resolve_order(nodes: &[ResolveNode]) -> Result<Vec<String>> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if index.insert(node.name.as_str(), i).is_some() {
            return Err(ExtensionError::AlreadyRegistered(node.name.clone()));
        }
    }

    let missing: Vec<MissingDependency> = nodes
        .iter()
        .flat_map(|node| {
            node.dependencies
                .iter()
                .filter(|dep| !index.contains_key(dep.as_str()))
                .map(|dep| MissingDependency {
                    extension: node.name.clone(),
                    dependency: dep.clone(),
                })
        })
        .collect();
    if !missing.is_empty() {
        return Err(ExtensionError::MissingDependencies(missing));
    }

    // in_degree[i] = number of distinct dependencies of node i not yet placed.
    // dependents[j] = nodes that wait on node j.
    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        let unique: HashSet<&str> = node.dependencies.iter().map(String::as_str).collect();
        for dep in unique {
            let j = index[dep];
            in_degree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(nodes[i].name.clone());
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() < nodes.len() {
        let unresolved: Vec<String> = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, node)| node.name.clone())
            .collect();
        return Err(ExtensionError::DependencyCycle(unresolved));
    }

    Ok(order)
}
