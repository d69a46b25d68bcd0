//! Ordered application of stacks through a [`Provider`].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    composer::Plan,
    error::{DeployError, Result},
    provider::{Provider, StackOutputs},
    stack::Stack,
    template::StackTemplate,
};

/// Lifecycle of one stack during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StackState {
    Pending,
    Applying,
    Applied,
    Destroying,
    Destroyed,
    Failed,
}

/// Outputs produced during a run, grouped by stack.
///
/// Output names are unique across the deployment; an output is written once and never
/// replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentOutputs {
    stacks: BTreeMap<String, StackOutputs>,
}

impl DeploymentOutputs {
    /// The value of an output, whichever stack produced it.
    pub fn get(&self, output: &str) -> Option<&str> {
        self.stacks
            .values()
            .find_map(|outputs| outputs.get(output))
            .map(String::as_str)
    }

    pub fn stack(&self, stack: &str) -> Option<&StackOutputs> {
        self.stacks.get(stack)
    }

    /// Record an output, failing if any stack already produced one with the same name.
    pub fn insert(&mut self, stack: &str, output: &str, value: String) -> Result<()> {
        if self.get(output).is_some() {
            return Err(DeployError::DuplicateOutput {
                name: output.to_string(),
            });
        }

        self.stacks
            .entry(stack.to_string())
            .or_default()
            .insert(output.to_string(), value);
        Ok(())
    }

    /// `(stack, output, value)` for every output.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.stacks.iter().flat_map(|(stack, outputs)| {
            outputs
                .iter()
                .map(move |(name, value)| (stack.as_str(), name.as_str(), value.as_str()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.values().all(BTreeMap::is_empty)
    }
}

/// The final state of one stack of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackReport {
    pub stack: String,
    pub state: StackState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Applies and destroys stacks one at a time, threading outputs between them.
pub struct Provisioner<P> {
    provider: P,
    reports: Vec<StackReport>,
}

impl<P: Provider> Provisioner<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            reports: Vec::new(),
        }
    }

    /// Final state of every stack of the last run, in run order.
    pub fn reports(&self) -> &[StackReport] {
        &self.reports
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn into_provider(self) -> P {
        self.provider
    }

    fn set_state(&mut self, index: usize, state: StackState) {
        let report = &mut self.reports[index];
        report.state = state;
        tracing::info!(stack = %report.stack, %state, "Stack state changed");
    }

    fn fail(&mut self, index: usize, err: DeployError) -> DeployError {
        self.reports[index].error = Some(err.to_string());
        self.set_state(index, StackState::Failed);
        err
    }

    fn start(&mut self, stacks: &[Stack]) {
        self.reports = stacks
            .iter()
            .map(|s| StackReport {
                stack: s.name.clone(),
                state: StackState::Pending,
                error: None,
            })
            .collect();
    }

    /// Apply a plan: read the outputs of its external stacks, then apply its stacks.
    pub async fn apply_plan(&mut self, plan: &Plan) -> Result<DeploymentOutputs> {
        let mut seed = DeploymentOutputs::default();

        for stack in &plan.external {
            let outputs = self
                .provider
                .describe_outputs(stack)
                .await
                .map_err(|e| DeployError::provisioning(stack, e))?
                .ok_or_else(|| DeployError::ProvisioningFailure {
                    stack: stack.clone(),
                    reason: "stack has not been applied yet".to_string(),
                })?;

            tracing::debug!(stack = %stack, outputs = outputs.len(), "Outputs of external stack read");
            for (name, value) in outputs {
                seed.insert(stack, &name, value)?;
            }
        }

        self.apply(&plan.stacks, seed).await
    }

    /// Apply `stacks` in order, starting from the outputs in `outputs`.
    ///
    /// The first failure halts the run; stacks applied before it stay applied.
    pub async fn apply(
        &mut self,
        stacks: &[Stack],
        mut outputs: DeploymentOutputs,
    ) -> Result<DeploymentOutputs> {
        self.start(stacks);

        for (index, stack) in stacks.iter().enumerate() {
            let template = match StackTemplate::render(stack, |name| outputs.get(name)) {
                Ok(template) => template,
                Err(e) => return Err(self.fail(index, e)),
            };

            self.set_state(index, StackState::Applying);
            tracing::debug!(
                stack = %stack.name,
                provider = self.provider.name(),
                resources = template.resources.len(),
                "Submitting stack"
            );

            let mut produced = match self.provider.apply_stack(&template).await {
                Ok(produced) => produced,
                Err(e) => return Err(self.fail(index, DeployError::provisioning(&stack.name, e))),
            };

            for output in &stack.outputs {
                let Some(value) = produced.remove(&output.name) else {
                    let err = DeployError::ProvisioningFailure {
                        stack: stack.name.clone(),
                        reason: format!("provider did not report output '{}'", output.name),
                    };
                    return Err(self.fail(index, err));
                };
                if let Err(e) = outputs.insert(&stack.name, &output.name, value) {
                    return Err(self.fail(index, e));
                }
            }
            if !produced.is_empty() {
                tracing::debug!(
                    stack = %stack.name,
                    ignored = ?produced.keys().collect::<Vec<_>>(),
                    "Ignoring undeclared outputs"
                );
            }

            self.set_state(index, StackState::Applied);
        }

        Ok(outputs)
    }

    /// Destroy `stacks` in the given order, which must already put dependents first.
    pub async fn destroy(&mut self, stacks: &[Stack]) -> Result<()> {
        self.start(stacks);

        for (index, stack) in stacks.iter().enumerate() {
            self.set_state(index, StackState::Destroying);

            if let Err(e) = self.provider.destroy_stack(&stack.name).await {
                return Err(self.fail(index, DeployError::provisioning(&stack.name, e)));
            }

            self.set_state(index, StackState::Destroyed);
        }

        Ok(())
    }
}
