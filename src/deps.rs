//! Deployment ordering inferred from references.
//!
//! A resource depends on every resource it names through `Ref`,
//! `Fn::GetAtt` or `DependsOn`. The provisioning engine creates independent
//! resources in parallel and serializes dependent ones; this module rebuilds
//! that ordering from a template so it can be inspected and checked.

use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet};

use crate::template::Template;

/// A resource dependency graph.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    /// Map from logical ID to the resources it depends on
    edges: BTreeMap<String, Vec<String>>,
    /// References that name neither a resource nor a parameter
    dangling: Vec<(String, String)>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph of a template's resources.
    ///
    /// Parameter references are inputs, not dependencies, and are dropped.
    pub fn from_template(template: &Template) -> Self {
        let mut graph = Self::new();
        for (id, resource) in &template.resources {
            let mut deps = Vec::new();
            for target in resource.references() {
                if template.resources.contains_key(&target) {
                    deps.push(target);
                } else if !template.parameters.contains_key(&target) {
                    graph.dangling.push((id.clone(), target));
                }
            }
            graph.add_resource(id.clone(), deps);
        }
        graph
    }

    pub fn add_resource(&mut self, id: String, deps: Vec<String>) {
        self.edges.insert(id, deps);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Direct dependencies of a resource.
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(from, missing_target)` pairs for references to undeclared IDs.
    pub fn dangling_references(&self) -> &[(String, String)] {
        &self.dangling
    }

    /// True if `id` transitively depends on `target`.
    pub fn depends_on(&self, id: &str, target: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            for dep in self.dependencies(node) {
                if dep == target {
                    return true;
                }
                if seen.insert(dep.as_str()) {
                    stack.push(dep);
                }
            }
        }
        false
    }

    /// Every resource in dependency order (dependencies before dependents).
    ///
    /// This is the waves laid end to end, so the order is stable across runs.
    pub fn deployment_order(&self) -> Result<Vec<String>> {
        Ok(self.deployment_waves()?.into_iter().flatten().collect())
    }

    /// Dependency order restricted to `targets` and what they need.
    pub fn topological_sort(&self, targets: &[String]) -> Result<Vec<String>> {
        let mut needed: BTreeSet<&str> = BTreeSet::new();
        let mut pending: Vec<&str> = Vec::new();
        for target in targets {
            if !self.edges.contains_key(target) {
                bail!("Resource not found: {}", target);
            }
            pending.push(target.as_str());
        }
        while let Some(id) = pending.pop() {
            if needed.insert(id) {
                pending.extend(
                    self.dependencies(id)
                        .iter()
                        .map(String::as_str)
                        .filter(|dep| self.contains(dep)),
                );
            }
        }

        let waves = self.layer(&needed)?;
        Ok(waves.into_iter().flatten().collect())
    }

    /// Group resources into waves that can be created in parallel.
    ///
    /// Wave `n` holds the resources whose deepest dependency sits in wave `n - 1`.
    /// Each wave is sorted by logical ID.
    pub fn deployment_waves(&self) -> Result<Vec<Vec<String>>> {
        let all: BTreeSet<&str> = self.edges.keys().map(String::as_str).collect();
        self.layer(&all)
    }

    /// Kahn's algorithm over `nodes`, peeling off one wave of
    /// dependency-free resources at a time.
    fn layer(&self, nodes: &BTreeSet<&str>) -> Result<Vec<Vec<String>>> {
        // Unmet dependency count per node, and who is waiting on each node.
        let mut unmet: BTreeMap<&str, usize> = BTreeMap::new();
        let mut waiting: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for &id in nodes {
            let deps: BTreeSet<&str> = self
                .dependencies(id)
                .iter()
                .map(String::as_str)
                .filter(|dep| nodes.contains(dep))
                .collect();
            unmet.insert(id, deps.len());
            for dep in deps {
                waiting.entry(dep).or_default().push(id);
            }
        }

        let mut ready: BTreeSet<&str> = unmet
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut waves: Vec<Vec<String>> = Vec::new();
        while !ready.is_empty() {
            let mut next = BTreeSet::new();
            for &id in &ready {
                unmet.remove(id);
                for &dependent in waiting.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                    if let Some(count) = unmet.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            next.insert(dependent);
                        }
                    }
                }
            }
            waves.push(ready.iter().map(|id| id.to_string()).collect());
            ready = next;
        }

        if !unmet.is_empty() {
            let (from, to) = self.cycle_edge(&unmet);
            bail!("Dependency cycle detected: {} -> {}", from, to);
        }
        Ok(waves)
    }

    /// An edge on a cycle among the nodes Kahn's algorithm could not place.
    ///
    /// Every such node still waits on another one, so following unplaced
    /// dependencies from any of them must revisit a node.
    fn cycle_edge<'a>(&'a self, unplaced: &BTreeMap<&'a str, usize>) -> (&'a str, &'a str) {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut node = unplaced.keys().next().copied().unwrap_or_default();
        loop {
            seen.insert(node);
            let Some(dep) = self
                .dependencies(node)
                .iter()
                .map(String::as_str)
                .find(|dep| unplaced.contains_key(dep))
            else {
                return (node, node);
            };
            if seen.contains(dep) {
                return (node, dep);
            }
            node = dep;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Resource;
    use serde_json::json;

    fn graph(edges: &[(&str, &[&str])]) -> DepGraph {
        let mut graph = DepGraph::new();
        for (id, deps) in edges {
            graph.add_resource(id.to_string(), deps.iter().map(|d| d.to_string()).collect());
        }
        graph
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_empty_graph() {
        let graph = DepGraph::new();
        assert!(graph.is_empty());
        assert!(graph.deployment_order().unwrap().is_empty());
    }

    #[test]
    fn test_linear_deps() {
        // grant -> instance -> sg -> vpc
        let graph = graph(&[
            ("Grant", &["Instance"]),
            ("Instance", &["Sg"]),
            ("Sg", &["Vpc"]),
            ("Vpc", &[]),
        ]);
        let order = graph.deployment_order().unwrap();
        assert_eq!(order, vec!["Vpc", "Sg", "Instance", "Grant"]);
    }

    #[test]
    fn test_diamond_deps() {
        let graph = graph(&[
            ("Instance", &["Sg", "Subnet"]),
            ("Sg", &["Vpc"]),
            ("Subnet", &["Vpc"]),
            ("Vpc", &[]),
        ]);
        let order = graph.deployment_order().unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "Vpc") < position(&order, "Sg"));
        assert!(position(&order, "Vpc") < position(&order, "Subnet"));
        assert!(position(&order, "Subnet") < position(&order, "Instance"));
    }

    #[test]
    fn test_cycle_detection() {
        // a -> b -> c -> a (cycle)
        let graph = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let err = graph.deployment_order().unwrap_err().to_string();
        assert!(err.contains("cycle"));
        assert!(["a -> b", "b -> c", "c -> a"].iter().any(|edge| err.contains(edge)), "{}", err);
    }

    #[test]
    fn test_self_cycle() {
        let graph = graph(&[("a", &["a"])]);
        let err = graph.deployment_order().unwrap_err().to_string();
        assert!(err.contains("Dependency cycle detected: a -> a"), "{}", err);
    }

    #[test]
    fn test_cycle_beside_acyclic_part() {
        let graph = graph(&[
            ("Vpc", &[]),
            ("Sg", &["Vpc"]),
            ("x", &["y"]),
            ("y", &["x", "Vpc"]),
        ]);
        assert!(graph.deployment_waves().is_err());
        // Targets outside the cycle still sort.
        let order = graph.topological_sort(&["Sg".to_string()]).unwrap();
        assert_eq!(order, vec!["Vpc", "Sg"]);
    }

    #[test]
    fn test_topological_sort_limits_to_targets() {
        let graph = graph(&[
            ("Grant", &["Instance", "Volume"]),
            ("Instance", &["Sg"]),
            ("Sg", &[]),
            ("Volume", &[]),
            ("Bucket", &[]),
        ]);
        let order = graph.topological_sort(&["Instance".to_string()]).unwrap();
        assert_eq!(order, vec!["Sg", "Instance"]);
    }

    #[test]
    fn test_missing_target() {
        let graph = graph(&[("a", &[])]);
        let err = graph.topological_sort(&["nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_transitive_depends_on() {
        let graph = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[]), ("d", &[])]);
        assert!(graph.depends_on("a", "c"));
        assert!(!graph.depends_on("c", "a"));
        assert!(!graph.depends_on("a", "d"));
    }

    #[test]
    fn test_waves() {
        let graph = graph(&[
            ("Bucket", &[]),
            ("Vpc", &[]),
            ("Sg", &["Vpc"]),
            ("Instance", &["Sg"]),
            ("Policy", &["Instance"]),
        ]);
        let waves = graph.deployment_waves().unwrap();
        assert_eq!(
            waves,
            vec![
                vec!["Bucket".to_string(), "Vpc".to_string()],
                vec!["Sg".to_string()],
                vec!["Instance".to_string()],
                vec!["Policy".to_string()],
            ]
        );
    }

    #[test]
    fn test_from_template_separates_parameters_and_dangling() {
        let mut template = Template::default();
        template.parameters.insert(
            "ImageParam".into(),
            crate::template::Parameter {
                kind: "String".into(),
                default: None,
                description: None,
            },
        );
        template.resources.insert(
            "Instance".into(),
            Resource::new("AWS::EC2::Instance")
                .with("ImageId", json!({ "Ref": "ImageParam" }))
                .with("SubnetId", json!({ "Ref": "Subnet" }))
                .with("SecurityGroupIds", json!([{ "Fn::GetAtt": ["Ghost", "GroupId"] }])),
        );
        template
            .resources
            .insert("Subnet".into(), Resource::new("AWS::EC2::Subnet"));

        let graph = DepGraph::from_template(&template);
        assert_eq!(graph.dependencies("Instance"), ["Subnet".to_string()]);
        assert_eq!(
            graph.dangling_references(),
            [("Instance".to_string(), "Ghost".to_string())]
        );
    }
}
