//! Validation and ordering of a whole deployment.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    error::{DeployError, Result},
    graph::{self, DependencyGraph},
    stack::Stack,
};

/// Stacks selected for one apply or destroy run, in execution order.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Stacks to act on, in the order they must be processed.
    pub stacks: Vec<Stack>,
    /// Untargeted stacks the selected ones depend on. Their outputs are read from the
    /// provider instead of being applied.
    pub external: Vec<String>,
}

impl Plan {
    pub fn stack_names(&self) -> Vec<&str> {
        self.stacks.iter().map(|s| s.name.as_str()).collect()
    }
}

/// A validated deployment: stacks in creation order, resources ordered within each stack.
#[derive(Debug, Clone)]
pub struct StackComposer {
    stacks: Vec<Stack>,
}

impl StackComposer {
    /// Validate and order `stacks`.
    ///
    /// Fails on duplicate stack, resource or output names, on dependencies that name
    /// nothing, on cycles, and on imports of outputs no dependency stack exports.
    pub fn new(stacks: Vec<Stack>) -> Result<Self> {
        let order = Self::validate(&stacks)?;

        let mut slots: Vec<Option<Stack>> = stacks.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(slots.len());
        for i in order {
            let Some(mut stack) = slots[i].take() else {
                continue;
            };
            stack.resources = graph::order(std::mem::take(&mut stack.resources))?;
            ordered.push(stack);
        }

        tracing::debug!(
            stacks = ?ordered.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "Stacks ordered"
        );

        Ok(Self { stacks: ordered })
    }

    /// Check names, dependencies and imports; return the creation order as indices.
    fn validate(stacks: &[Stack]) -> Result<Vec<usize>> {
        let mut stack_names = HashSet::new();
        let mut resource_names = HashSet::new();
        let mut producers: HashMap<&str, &str> = HashMap::new();

        for stack in stacks {
            if !stack_names.insert(stack.name.as_str()) {
                return Err(DeployError::DuplicateName {
                    what: "stack",
                    name: stack.name.clone(),
                });
            }
            for resource in &stack.resources {
                if !resource_names.insert(resource.name.as_str()) {
                    return Err(DeployError::DuplicateName {
                        what: "resource",
                        name: resource.name.clone(),
                    });
                }
            }
            for output in &stack.outputs {
                if stack.get(&output.resource).is_none() {
                    return Err(DeployError::UnknownDependency {
                        from: output.name.clone(),
                        to: output.resource.clone(),
                    });
                }
                if producers
                    .insert(output.name.as_str(), stack.name.as_str())
                    .is_some()
                {
                    return Err(DeployError::DuplicateOutput {
                        name: output.name.clone(),
                    });
                }
            }
        }

        let graph = DependencyGraph::new(stacks)?;
        let order = graph.order()?;

        for (i, stack) in stacks.iter().enumerate() {
            let upstream = graph.dependencies_of(&[i]);
            for import in stack.imported_outputs() {
                let produced_upstream = producers
                    .get(import)
                    .and_then(|producer| graph.position(producer))
                    .is_some_and(|p| p != i && upstream.contains(&p));
                if !produced_upstream {
                    return Err(DeployError::UndefinedOutput {
                        stack: stack.name.clone(),
                        output: import.to_string(),
                    });
                }
            }
        }

        Ok(order)
    }

    /// All stacks in creation order.
    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    pub fn get(&self, name: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.name == name)
    }

    /// All stacks in teardown order.
    pub fn teardown_order(&self) -> Vec<&Stack> {
        self.stacks.iter().rev().collect()
    }

    /// The stacks to apply for `targets`; every stack when `targets` is empty.
    ///
    /// Dependencies of the targets that are not targeted themselves are listed in
    /// [`Plan::external`].
    pub fn apply_plan(&self, targets: &[String]) -> Result<Plan> {
        if targets.is_empty() {
            return Ok(Plan {
                stacks: self.stacks.clone(),
                external: Vec::new(),
            });
        }

        let graph = DependencyGraph::new(&self.stacks)?;
        let roots = self.positions(&graph, targets)?;
        let selected: BTreeSet<usize> = roots.iter().copied().collect();
        let external = graph
            .dependencies_of(&roots)
            .difference(&selected)
            .map(|&i| self.stacks[i].name.clone())
            .collect();

        Ok(Plan {
            stacks: selected.iter().map(|&i| self.stacks[i].clone()).collect(),
            external,
        })
    }

    /// The stacks to destroy for `targets`, dependents first; every stack when empty.
    ///
    /// A stack cannot outlive what it depends on, so every transitive dependent of a
    /// target is destroyed with it.
    pub fn destroy_plan(&self, targets: &[String]) -> Result<Plan> {
        let selected: BTreeSet<usize> = if targets.is_empty() {
            (0..self.stacks.len()).collect()
        } else {
            let graph = DependencyGraph::new(&self.stacks)?;
            let roots = self.positions(&graph, targets)?;
            graph.dependents_of(&roots)
        };

        Ok(Plan {
            stacks: selected
                .iter()
                .rev()
                .map(|&i| self.stacks[i].clone())
                .collect(),
            external: Vec::new(),
        })
    }

    fn positions(&self, graph: &DependencyGraph<'_, Stack>, targets: &[String]) -> Result<Vec<usize>> {
        targets
            .iter()
            .map(|t| {
                graph.position(t).ok_or_else(|| DeployError::UnknownDependency {
                    from: "target".to_string(),
                    to: t.clone(),
                })
            })
            .collect()
    }
}
