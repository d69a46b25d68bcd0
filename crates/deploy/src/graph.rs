//! Dependency ordering over named nodes.
//!
//! Ordering is a Kahn topological sort. Among nodes that are ready at the same time the one
//! declared first wins, so the output only differs from the input where a dependency forces
//! it to.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    error::{DeployError, Result},
    resource::ResourceSpec,
    stack::Stack,
};

/// Something with a unique name and explicit dependencies on other nodes by name.
pub trait Node {
    fn name(&self) -> &str;
    fn dependencies(&self) -> &[String];
}

impl Node for Stack {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

impl Node for ResourceSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

/// Index-based dependency graph borrowed from a slice of nodes.
pub struct DependencyGraph<'a, T: Node> {
    nodes: &'a [T],
    /// `dependencies[i]` are the indices node `i` depends on, in declaration order.
    dependencies: Vec<Vec<usize>>,
    /// `dependents[i]` are the indices depending on node `i`.
    dependents: Vec<Vec<usize>>,
}

impl<'a, T: Node> DependencyGraph<'a, T> {
    /// Build the graph, rejecting duplicate names and dependencies on unknown nodes.
    pub fn new(nodes: &'a [T]) -> Result<Self> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.name(), i).is_some() {
                return Err(DeployError::DuplicateName {
                    what: "node",
                    name: node.name().to_string(),
                });
            }
        }

        let mut dependencies = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for dep in node.dependencies() {
                let &j = index
                    .get(dep.as_str())
                    .ok_or_else(|| DeployError::UnknownDependency {
                        from: node.name().to_string(),
                        to: dep.clone(),
                    })?;
                if !dependencies[i].contains(&j) {
                    dependencies[i].push(j);
                    dependents[j].push(i);
                }
            }
        }

        Ok(Self {
            nodes,
            dependencies,
            dependents,
        })
    }

    /// Indices of the nodes in a valid creation order.
    pub fn order(&self) -> Result<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut ordered = Vec::with_capacity(self.nodes.len());

        while let Some(i) = ready.pop_first() {
            ordered.push(i);
            for &dependent in &self.dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if ordered.len() != self.nodes.len() {
            let remaining: HashSet<usize> = (0..self.nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .collect();
            return Err(DeployError::CyclicDependency {
                members: self.find_cycle(&remaining),
            });
        }

        Ok(ordered)
    }

    /// Walk unresolved dependencies from the first blocked node until a node repeats.
    ///
    /// Every blocked node has at least one blocked dependency, so the walk always closes.
    fn find_cycle(&self, remaining: &HashSet<usize>) -> Vec<String> {
        let Some(&start) = remaining.iter().min() else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(&next) = self.dependencies[current]
                .iter()
                .find(|d| remaining.contains(d))
            else {
                break;
            };

            if let Some(pos) = path.iter().position(|&p| p == next) {
                path.drain(..pos);
                path.push(next);
                break;
            }

            path.push(next);
            current = next;
        }

        path.into_iter()
            .map(|i| self.nodes[i].name().to_string())
            .collect()
    }

    /// Indices of every node that transitively depends on one of `roots`, roots included.
    pub fn dependents_of(&self, roots: &[usize]) -> BTreeSet<usize> {
        Self::closure(roots, &self.dependents)
    }

    /// Indices of every node one of `roots` transitively depends on, roots included.
    pub fn dependencies_of(&self, roots: &[usize]) -> BTreeSet<usize> {
        Self::closure(roots, &self.dependencies)
    }

    fn closure(roots: &[usize], edges: &[Vec<usize>]) -> BTreeSet<usize> {
        let mut seen: BTreeSet<usize> = roots.iter().copied().collect();
        let mut stack: Vec<usize> = roots.to_vec();
        while let Some(i) = stack.pop() {
            for &j in &edges[i] {
                if seen.insert(j) {
                    stack.push(j);
                }
            }
        }
        seen
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name() == name)
    }
}

/// Order nodes so every node comes after its dependencies.
pub fn order<T: Node>(nodes: Vec<T>) -> Result<Vec<T>> {
    let ordered = DependencyGraph::new(&nodes)?.order()?;

    let mut slots: Vec<Option<T>> = nodes.into_iter().map(Some).collect();
    Ok(ordered
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct N(String, Vec<String>);

    impl Node for N {
        fn name(&self) -> &str {
            &self.0
        }
        fn dependencies(&self) -> &[String] {
            &self.1
        }
    }

    fn n(name: &str, deps: &[&str]) -> N {
        N(name.to_string(), deps.iter().map(|d| d.to_string()).collect())
    }

    fn names(nodes: &[N]) -> Vec<&str> {
        nodes.iter().map(|n| n.0.as_str()).collect()
    }

    #[test]
    fn test_dependency_comes_first_regardless_of_declaration() {
        let ordered = order(vec![n("app", &["network"]), n("network", &[])]).unwrap();
        assert_eq!(names(&ordered), vec!["network", "app"]);

        let ordered = order(vec![n("network", &[]), n("app", &["network"])]).unwrap();
        assert_eq!(names(&ordered), vec!["network", "app"]);
    }

    #[test]
    fn test_independent_nodes_keep_declaration_order() {
        let ordered = order(vec![
            n("service", &["cluster", "secret"]),
            n("secret", &[]),
            n("zone", &[]),
            n("cluster", &["vpc"]),
            n("vpc", &[]),
        ])
        .unwrap();
        assert_eq!(
            names(&ordered),
            vec!["secret", "zone", "vpc", "cluster", "service"]
        );
    }

    #[test]
    fn test_two_node_cycle_is_reported() {
        let err = order(vec![n("a", &["b"]), n("b", &["a"])]).unwrap_err();
        let DeployError::CyclicDependency { members } = err else {
            panic!("expected a cycle error");
        };
        assert_eq!(members, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_cycle_behind_a_tail_names_only_the_cycle() {
        let err = order(vec![
            n("root", &[]),
            n("tail", &["x"]),
            n("x", &["y", "root"]),
            n("y", &["z"]),
            n("z", &["x"]),
        ])
        .unwrap_err();
        let DeployError::CyclicDependency { members } = err else {
            panic!("expected a cycle error");
        };
        assert_eq!(members, vec!["x", "y", "z", "x"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = order(vec![n("a", &["a"])]).unwrap_err();
        assert!(matches!(err, DeployError::CyclicDependency { members } if members == vec!["a", "a"]));
    }

    #[test]
    fn test_unknown_and_duplicate_names() {
        assert!(matches!(
            order(vec![n("a", &["ghost"])]),
            Err(DeployError::UnknownDependency { from, to }) if from == "a" && to == "ghost"
        ));
        assert!(matches!(
            order(vec![n("a", &[]), n("a", &[])]),
            Err(DeployError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_closures() {
        let nodes = vec![
            n("net", &[]),
            n("dns", &[]),
            n("app", &["net", "dns"]),
            n("jobs", &["app"]),
        ];
        let graph = DependencyGraph::new(&nodes).unwrap();
        let net = graph.position("net").unwrap();
        let app = graph.position("app").unwrap();

        assert_eq!(
            graph.dependents_of(&[net]).into_iter().collect::<Vec<_>>(),
            vec![0, 2, 3]
        );
        assert_eq!(
            graph.dependencies_of(&[app]).into_iter().collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
