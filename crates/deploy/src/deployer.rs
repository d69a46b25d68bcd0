//! The deployment pipeline: resolve, build, compose, then apply or destroy.

use std::path::{Path, PathBuf};

use crate::{
    builder::build_stacks,
    composer::{Plan, StackComposer},
    config::{
        CONTEXT_FILENAME, ConfigResolver, ConfigSchema, ContextSource, EnvSource,
        NamedEnvironment, ResolvedConfig,
    },
    error::{DeployError, Result},
    provider::{Provider, SynthProvider},
    provisioner::{DeploymentOutputs, Provisioner, StackReport},
};

/// A resolved configuration and the validated stacks built from it.
#[derive(Debug, Clone)]
pub struct Validated {
    pub config: ResolvedConfig,
    pub composer: StackComposer,
}

/// The result of an apply run.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub outputs: DeploymentOutputs,
    pub stacks: Vec<StackReport>,
}

/// Drives one run of the pipeline for a named environment.
///
/// Configuration is fully resolved and every stack validated before a provider is called,
/// so a configuration error never leaves anything half-applied.
#[derive(Debug, Clone)]
pub struct Deployer {
    /// Label of the named environment to deploy.
    pub environment: String,
    /// Context file; `Stackup.toml` in the working directory when unset.
    pub context: Option<PathBuf>,
    /// Let the context file take precedence over the process environment.
    pub context_first: bool,
    /// Allow-list of named environments, overriding the context file's.
    pub environments: Option<Vec<String>>,
    pub schema: ConfigSchema,
    env: EnvSource,
}

impl Deployer {
    /// A deployer reading the current process environment.
    pub fn new(environment: impl Into<String>) -> Self {
        Self::with_env(environment, EnvSource::from_process())
    }

    /// A deployer reading `env` instead of the process environment.
    pub fn with_env(environment: impl Into<String>, env: EnvSource) -> Self {
        Self {
            environment: environment.into(),
            context: None,
            context_first: false,
            environments: None,
            schema: ConfigSchema::standard(),
            env,
        }
    }

    pub fn context(mut self, path: Option<PathBuf>) -> Self {
        self.context = path;
        self
    }

    pub fn context_first(mut self, context_first: bool) -> Self {
        self.context_first = context_first;
        self
    }

    pub fn environments(mut self, environments: Option<Vec<String>>) -> Self {
        self.environments = environments;
        self
    }

    /// The context file to read, `None` when the default one does not exist.
    fn context_path(&self) -> Result<Option<PathBuf>> {
        match &self.context {
            Some(path) if !path.exists() => Err(DeployError::Context(format!(
                "context file not found: {}",
                path.display()
            ))),
            Some(path) => Ok(Some(path.clone())),
            None => {
                let path = PathBuf::from(CONTEXT_FILENAME);
                Ok(path.exists().then_some(path))
            }
        }
    }

    /// Allowed environments: explicit list, else the context file's, else the schema's.
    fn allowed_environments(&self, context: Option<&Path>) -> Result<Vec<String>> {
        if let Some(list) = &self.environments {
            return Ok(list.clone());
        }
        if let Some(path) = context
            && let Some(list) = ContextSource::allowed_environments(path)?
        {
            return Ok(list);
        }
        Ok(self.schema.allowed_environments().to_vec())
    }

    /// Resolve every configuration key for the selected environment.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let context = self.context_path()?;
        let allowed = self.allowed_environments(context.as_deref())?;
        let environment = NamedEnvironment::parse(&self.environment, &allowed)?;

        let context = context
            .map(|path| ContextSource::load(&path, &environment))
            .transpose()?;

        let mut resolver = ConfigResolver::new(environment);
        resolver = match (context, self.context_first) {
            (Some(context), true) => resolver.source(context).source(self.env.clone()),
            (Some(context), false) => resolver.source(self.env.clone()).source(context),
            (None, _) => resolver.source(self.env.clone()),
        };

        resolver.resolve_all(&self.schema)
    }

    /// Resolve, build and order the stacks without touching any provider.
    pub fn validate(&self) -> Result<Validated> {
        let config = self.resolve()?;
        let composer = StackComposer::new(build_stacks(&config)?)?;

        tracing::info!(
            environment = %config.environment(),
            stacks = ?composer.stacks().iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "Deployment validated"
        );

        Ok(Validated { config, composer })
    }

    /// Apply `targets` (every stack when empty) through `provider`.
    pub async fn deploy<P: Provider>(&self, provider: P, targets: &[String]) -> Result<DeployReport> {
        let Validated { composer, .. } = self.validate()?;
        let plan = composer.apply_plan(targets)?;

        tracing::info!(
            provider = provider.name(),
            stacks = ?plan.stack_names(),
            external = ?plan.external,
            "Starting deployment"
        );

        run_apply(Provisioner::new(provider), &plan).await
    }

    /// Destroy `targets` and everything depending on them (every stack when empty).
    pub async fn destroy<P: Provider>(&self, provider: P, targets: &[String]) -> Result<Vec<StackReport>> {
        let Validated { composer, .. } = self.validate()?;
        let plan = composer.destroy_plan(targets)?;

        tracing::info!(
            provider = provider.name(),
            stacks = ?plan.stack_names(),
            "Starting teardown"
        );

        let mut provisioner = Provisioner::new(provider);
        provisioner.destroy(&plan.stacks).await?;
        Ok(provisioner.reports().to_vec())
    }

    /// Write every rendered stack template under `outdir`.
    pub async fn synth(&self, outdir: &Path) -> Result<Vec<PathBuf>> {
        let Validated { composer, .. } = self.validate()?;
        let plan = composer.apply_plan(&[])?;
        let provider = SynthProvider::new(outdir);
        let paths = plan
            .stacks
            .iter()
            .map(|s| provider.template_path(&s.name))
            .collect();

        run_apply(Provisioner::new(provider), &plan).await?;

        tracing::info!(outdir = %outdir.display(), "Templates written");
        Ok(paths)
    }
}

async fn run_apply<P: Provider>(mut provisioner: Provisioner<P>, plan: &Plan) -> Result<DeployReport> {
    let result = provisioner.apply_plan(plan).await;

    for report in provisioner.reports() {
        tracing::debug!(stack = %report.stack, state = %report.state, "Final stack state");
    }

    Ok(DeployReport {
        outputs: result?,
        stacks: provisioner.reports().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;
    use crate::{config::keys, provisioner::tests::MemoryProvider};

    fn env() -> EnvSource {
        EnvSource::from_vars([
            (keys::STACK_NAME_PREFIX, "acme-dev"),
            (keys::IMAGE, "repo/app:1.0"),
            (keys::PORT, "8080"),
            (keys::COST_CENTER, "1234"),
        ])
    }

    #[test]
    fn test_unknown_environment() {
        let err = Deployer::with_env("qa", env()).validate().unwrap_err();
        assert!(matches!(err, DeployError::InvalidEnvironment { label, .. } if label == "qa"));

        let deployer = Deployer::with_env("qa", env()).environments(Some(vec!["qa".to_string()]));
        assert!(deployer.validate().is_ok());
    }

    #[test]
    fn test_explicit_context_must_exist() {
        let deployer =
            Deployer::with_env("dev", env()).context(Some(PathBuf::from("/nonexistent/ctx.toml")));
        assert!(matches!(deployer.validate(), Err(DeployError::Context(_))));
    }

    #[test]
    fn test_context_precedence() {
        let dir = TempDir::new("stackup-deployer").unwrap();
        let path = dir.path().join("Stackup.toml");
        std::fs::write(
            &path,
            "[default]\nenvironments = [\"dev\", \"qa\"]\n\n[qa]\nPORT = 9090\nSTACK_NAME_PREFIX = \"acme-qa\"\n",
        )
        .unwrap();

        let deployer = Deployer::with_env("qa", env()).context(Some(path.clone()));
        let config = deployer.resolve().unwrap();
        assert_eq!(config.int(keys::PORT), Some(8080));
        assert_eq!(config.origin(keys::PORT), Some("environment"));

        let config = deployer.context_first(true).resolve().unwrap();
        assert_eq!(config.int(keys::PORT), Some(9090));
        assert_eq!(config.string(keys::STACK_NAME_PREFIX), Some("acme-qa"));
        assert_eq!(config.origin(keys::PORT), Some("context[qa]"));
    }

    #[test]
    fn test_missing_required_key_fails_validation() {
        let err = Deployer::with_env("dev", EnvSource::from_vars([(keys::PORT, "8080")]))
            .validate()
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_deploy_and_destroy() {
        let deployer = Deployer::with_env("dev", env());

        let report = deployer
            .deploy(MemoryProvider::default(), &[])
            .await
            .unwrap();
        assert_eq!(report.stacks.len(), 2);
        assert_eq!(
            report.outputs.get("acme-dev-common-VpcId"),
            Some("acme-dev-common-vpc.vpc_id")
        );

        let reports = deployer
            .destroy(MemoryProvider::default(), &["acme-dev-common".to_string()])
            .await
            .unwrap();
        let order: Vec<&str> = reports.iter().map(|r| r.stack.as_str()).collect();
        assert_eq!(order, vec!["acme-dev-DockerFargateStack", "acme-dev-common"]);
    }

    #[tokio::test]
    async fn test_synth_writes_every_stack() {
        let dir = TempDir::new("stackup-deployer").unwrap();
        let paths = Deployer::with_env("dev", env())
            .synth(dir.path())
            .await
            .unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.exists()));
        assert!(dir.path().join("acme-dev-common.template.json").exists());
    }
}
