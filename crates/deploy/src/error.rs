//! Error taxonomy for the deployment pipeline.

use thiserror::Error;

/// Every failure the pipeline can report.
///
/// Configuration errors (`MissingConfig` through `InvalidFeature`) are always raised before
/// any provider call is made. Graph errors indicate a broken stack definition. Provisioning
/// errors carry the provider's diagnostic and halt the run.
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("missing required configuration value: {key}")]
    MissingConfig { key: String },

    #[error("invalid environment '{label}': expected one of {}", allowed.join(", "))]
    InvalidEnvironment { label: String, allowed: Vec<String> },

    #[error("invalid value '{value}' for {key}: expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },

    #[error("feature '{feature}' is partially configured: missing {}", missing.join(", "))]
    IncompleteFeature {
        feature: String,
        missing: Vec<String>,
    },

    #[error("feature '{feature}' is misconfigured: {reason}")]
    InvalidFeature { feature: String, reason: String },

    #[error("dependency cycle detected between: {}", members.join(" -> "))]
    CyclicDependency { members: Vec<String> },

    #[error("'{from}' depends on unknown '{to}'")]
    UnknownDependency { from: String, to: String },

    #[error("duplicate {what} name: {name}")]
    DuplicateName { what: &'static str, name: String },

    #[error("duplicate output name: {name}")]
    DuplicateOutput { name: String },

    #[error("stack '{stack}' references output '{output}' which no applied stack produced")]
    UndefinedOutput { stack: String, output: String },

    #[error("provisioning of stack '{stack}' failed: {reason}")]
    ProvisioningFailure { stack: String, reason: String },

    #[error("failed to load configuration context: {0}")]
    Context(String),
}

impl DeployError {
    /// Whether the error is a user-fixable configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::MissingConfig { .. }
                | Self::InvalidEnvironment { .. }
                | Self::InvalidValue { .. }
                | Self::IncompleteFeature { .. }
                | Self::InvalidFeature { .. }
                | Self::Context(_)
        )
    }

    pub(crate) fn provisioning(stack: &str, err: anyhow::Error) -> Self {
        Self::ProvisioningFailure {
            stack: stack.to_string(),
            reason: format!("{:#}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
