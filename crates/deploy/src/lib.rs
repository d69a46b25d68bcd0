//! stackup-deploy - Declarative stack composition and provisioning.
//!
//! This crate resolves layered configuration for a named environment, builds the shared
//! network stack and the load-balanced application stack from it, orders them by their
//! dependencies, and applies them through a provider while threading outputs from one
//! stack into the next.

pub mod builder;
pub mod composer;
pub mod config;
mod deployer;
mod error;
pub mod graph;
pub mod provider;
pub mod provisioner;
pub mod resource;
pub mod stack;
mod state;
pub mod template;

pub use builder::{StackSet, StackSetBuilder, StepAdjustment, build_stacks};
pub use composer::{Plan, StackComposer};
pub use config::{
    CONTEXT_FILENAME, ConfigResolver, ConfigSchema, ConfigSource, ContextSource, EnvSource,
    NamedEnvironment, ResolvedConfig,
};
pub use deployer::{DeployReport, Deployer, Validated};
pub use error::{DeployError, Result};
pub use provider::{
    AnyProvider, DockerProvider, DockerProviderConfig, HttpProvider, HttpProviderConfig,
    Provider, ProviderKind, StackOutputs, SynthProvider,
};
pub use provisioner::{DeploymentOutputs, Provisioner, StackReport, StackState};
pub use resource::{Param, ResourceKind, ResourceSpec};
pub use stack::{OutputSpec, Stack};
pub use state::{ResourceHandle, StackRecord};
pub use template::{ResourceTemplate, StackTemplate};
