//! DAG resolution.
//!
//! Kahn's algorithm over model-to-model edges; `source:` tokens and
//! external relations contribute nothing. Ties inside a tier break
//! lexicographically by qualified name so tier contents are deterministic.

use std::collections::{BTreeMap, BTreeSet};

use lakegate_core::{LakegateError, LakegateResult};

/// A dependency graph over qualified model names.
#[derive(Debug, Default, Clone)]
pub struct ModelDag {
    /// Edges dependency -> dependents.
    downstream: BTreeMap<String, BTreeSet<String>>,
    /// Edges dependent -> dependencies.
    upstream: BTreeMap<String, BTreeSet<String>>,
    nodes: BTreeSet<String>,
}

impl ModelDag {
    /// Build a graph from `(qualified_name, depends_on)` pairs. Dependencies
    /// that are not nodes themselves (sources, external relations) are
    /// dropped. Self-dependencies fail immediately.
    pub fn build<'a, I>(models: I) -> LakegateResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut dag = Self::default();
        let mut edges: Vec<(String, String)> = Vec::new();

        for (name, deps) in models {
            dag.nodes.insert(name.to_owned());
            for dep in deps {
                edges.push((dep.clone(), name.to_owned()));
            }
        }

        for (dep, dependent) in edges {
            if !dag.nodes.contains(&dep) {
                continue;
            }
            if dep == dependent {
                return Err(LakegateError::validation(format!(
                    "model '{dependent}' depends on itself"
                )));
            }
            dag.downstream
                .entry(dep.clone())
                .or_default()
                .insert(dependent.clone());
            dag.upstream.entry(dependent).or_default().insert(dep);
        }

        Ok(dag)
    }

    /// Topological tiers. Tier 0 holds the roots; every tier's members have
    /// all dependencies in earlier tiers. Cycles are a validation error.
    pub fn tiers(&self) -> LakegateResult<Vec<Vec<String>>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| {
                (
                    n.as_str(),
                    self.upstream.get(n).map(BTreeSet::len).unwrap_or(0),
                )
            })
            .collect();

        let mut tiers = Vec::new();
        let mut remaining = self.nodes.len();

        // BTreeMap iteration keeps each tier lexicographically sorted.
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();

        while !ready.is_empty() {
            let tier: Vec<String> = ready.iter().map(|n| (*n).to_owned()).collect();
            let mut next: BTreeSet<&str> = BTreeSet::new();

            for node in &ready {
                if let Some(dependents) = self.downstream.get(*node) {
                    for dependent in dependents {
                        let degree = in_degree
                            .get_mut(dependent.as_str())
                            .expect("dependent is a node");
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(dependent.as_str());
                        }
                    }
                }
            }

            remaining -= tier.len();
            tiers.push(tier);
            ready = next.into_iter().collect();
        }

        if remaining > 0 {
            let stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(n, _)| *n)
                .collect();
            return Err(LakegateError::validation(format!(
                "dependency cycle involving: {}",
                stuck.join(", ")
            )));
        }

        Ok(tiers)
    }

    /// The node set.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Transitive dependencies (upstream closure), excluding the start node.
    pub fn upstream_of(&self, name: &str) -> BTreeSet<String> {
        self.closure(name, &self.upstream)
    }

    /// Transitive dependents (downstream closure), excluding the start node.
    pub fn downstream_of(&self, name: &str) -> BTreeSet<String> {
        self.closure(name, &self.downstream)
    }

    fn closure(&self, name: &str, edges: &BTreeMap<String, BTreeSet<String>>) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut work = vec![name.to_owned()];
        while let Some(current) = work.pop() {
            if let Some(nexts) = edges.get(&current) {
                for next in nexts {
                    if result.insert(next.clone()) {
                        work.push(next.clone());
                    }
                }
            }
        }
        result
    }
}
