//! Adapters to the systems that actually create resources.

use std::{collections::BTreeMap, future::Future};

use anyhow::Result;

use crate::template::StackTemplate;

mod docker;
mod http;
mod synth;

pub use docker::{DockerImage, DockerProvider, DockerProviderConfig};
pub use http::{HttpProvider, HttpProviderConfig, StackStatus, StatusResponse};
pub use synth::{SynthProvider, placeholder};

/// Output values reported by a provider for one stack, by output name.
pub type StackOutputs = BTreeMap<String, String>;

/// A remote system able to apply and destroy whole stacks.
///
/// Every call blocks until the provider reports a terminal state. Errors carry the
/// provider's diagnostic and are surfaced unchanged.
pub trait Provider: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Create or update a stack and wait until it is stable.
    ///
    /// Returns the value of every output the template declares.
    fn apply_stack(
        &mut self,
        template: &StackTemplate,
    ) -> impl Future<Output = Result<StackOutputs>> + Send;

    /// Tear a stack down. Destroying a stack that does not exist succeeds.
    fn destroy_stack(&mut self, stack: &str) -> impl Future<Output = Result<()>> + Send;

    /// The outputs of a previously applied stack, `None` if it was never applied.
    fn describe_outputs(
        &mut self,
        stack: &str,
    ) -> impl Future<Output = Result<Option<StackOutputs>>> + Send;
}

impl<P: Provider> Provider for &mut P {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn apply_stack(
        &mut self,
        template: &StackTemplate,
    ) -> impl Future<Output = Result<StackOutputs>> + Send {
        (**self).apply_stack(template)
    }

    fn destroy_stack(&mut self, stack: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).destroy_stack(stack)
    }

    fn describe_outputs(
        &mut self,
        stack: &str,
    ) -> impl Future<Output = Result<Option<StackOutputs>>> + Send {
        (**self).describe_outputs(stack)
    }
}

/// Selects a provider implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ProviderKind {
    /// Remote provisioning API over HTTP.
    Http,
    /// Local containers through the Docker daemon.
    Docker,
    /// Write rendered templates to disk.
    #[default]
    Synth,
}

/// Any of the built-in providers, chosen at runtime.
pub enum AnyProvider {
    Http(HttpProvider),
    Docker(DockerProvider),
    Synth(SynthProvider),
}

impl Provider for AnyProvider {
    fn name(&self) -> &'static str {
        match self {
            Self::Http(p) => p.name(),
            Self::Docker(p) => p.name(),
            Self::Synth(p) => p.name(),
        }
    }

    async fn apply_stack(&mut self, template: &StackTemplate) -> Result<StackOutputs> {
        match self {
            Self::Http(p) => p.apply_stack(template).await,
            Self::Docker(p) => p.apply_stack(template).await,
            Self::Synth(p) => p.apply_stack(template).await,
        }
    }

    async fn destroy_stack(&mut self, stack: &str) -> Result<()> {
        match self {
            Self::Http(p) => p.destroy_stack(stack).await,
            Self::Docker(p) => p.destroy_stack(stack).await,
            Self::Synth(p) => p.destroy_stack(stack).await,
        }
    }

    async fn describe_outputs(&mut self, stack: &str) -> Result<Option<StackOutputs>> {
        match self {
            Self::Http(p) => p.describe_outputs(stack).await,
            Self::Docker(p) => p.describe_outputs(stack).await,
            Self::Synth(p) => p.describe_outputs(stack).await,
        }
    }
}
