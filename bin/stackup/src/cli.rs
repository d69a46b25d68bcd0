use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use stackup_deploy::ProviderKind;
use tracing::level_filters::LevelFilter;
use url::Url;

/// The default directory for rendered templates and provider state.
pub const DEFAULT_OUTDIR: &str = "stackup.out";

#[derive(Parser)]
#[command(name = "stackup")]
#[command(
    author,
    version,
    about = "Compose and provision a network stack and a load-balanced container service"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "STACKUP_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the context file holding per-environment configuration.
    ///
    /// Defaults to ./Stackup.toml when it exists.
    #[arg(long, global = true, env = "STACKUP_CONTEXT")]
    pub context: Option<PathBuf>,

    /// Let context file values take precedence over environment variables.
    #[arg(long, global = true, env = "STACKUP_CONTEXT_FIRST")]
    pub context_first: bool,

    /// Allowed environment labels, overriding the context file's list.
    #[arg(long, global = true, env = "STACKUP_ENVIRONMENTS", value_delimiter = ',')]
    pub environments: Option<Vec<String>>,

    /// The provider applying the stacks.
    #[arg(long, global = true, env = "STACKUP_PROVIDER", default_value_t = ProviderKind::Synth)]
    pub provider: ProviderKind,

    /// Base URL of the provisioning API, required by the http provider.
    #[arg(long, global = true, env = "STACKUP_ENDPOINT")]
    pub endpoint: Option<Url>,

    /// Bearer token for the provisioning API.
    #[arg(long, global = true, env = "STACKUP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Seconds between two status polls of the provisioning API.
    #[arg(long, global = true, env = "STACKUP_POLL_INTERVAL", default_value_t = 5)]
    pub poll_interval: u64,

    /// Status polls before giving up on a stack.
    #[arg(long, global = true, env = "STACKUP_MAX_POLLS", default_value_t = 720)]
    pub max_polls: usize,

    /// Directory for rendered templates and local provider state.
    #[arg(long, global = true, env = "STACKUP_OUTDIR", default_value = DEFAULT_OUTDIR)]
    pub outdir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// The named environment to work on.
#[derive(Debug, Clone, Args)]
pub struct EnvArgs {
    /// Label of the named environment (e.g. dev, staging, prod).
    #[arg(short, long = "env", env = "STACKUP_ENV")]
    pub environment: String,
}

#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    #[command(flatten)]
    pub env: EnvArgs,

    /// Only act on these stacks. Defaults to every stack.
    #[arg(short, long = "stack")]
    pub stacks: Vec<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Apply the stacks in dependency order and print their outputs.
    Deploy(TargetArgs),

    /// Destroy the stacks, dependents first.
    Destroy(TargetArgs),

    /// Write the rendered stack templates to the output directory.
    Synth(EnvArgs),

    /// Resolve configuration and check the stacks without provisioning anything.
    Validate(EnvArgs),

    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
