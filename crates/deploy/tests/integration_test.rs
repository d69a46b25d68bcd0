//! End-to-end tests for stackup-deploy.
//!
//! These run the whole pipeline (resolve, build, compose, provision) against an in-memory
//! provider and the synth provider, so they need neither Docker nor a provisioning API.
//! Run with: cargo test --test integration_test

use std::collections::BTreeMap;

use anyhow::Result;
use stackup_deploy::{
    DeployError, Deployer, EnvSource, Provider, ResourceKind, ResourceSpec, Stack, StackComposer,
    StackOutputs, StackState, StackTemplate, config::keys,
};
use tempdir::TempDir;

const NETWORK: &str = "acme-dev-common";
const APPLICATION: &str = "acme-dev-DockerFargateStack";

/// Provider recording every call and applying a stack only when its template changed.
#[derive(Debug, Default)]
struct RecordingProvider {
    stacks: BTreeMap<String, (String, StackOutputs)>,
    calls: Vec<String>,
}

impl Provider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn apply_stack(&mut self, template: &StackTemplate) -> Result<StackOutputs> {
        let hash = template.compute_hash();
        if let Some((applied, outputs)) = self.stacks.get(&template.name)
            && *applied == hash
        {
            self.calls.push(format!("unchanged:{}", template.name));
            return Ok(outputs.clone());
        }

        self.calls.push(format!("apply:{}", template.name));
        let outputs: StackOutputs = template
            .outputs
            .iter()
            .map(|o| (o.name.clone(), format!("{}/{}", o.resource, o.attribute)))
            .collect();
        self.stacks
            .insert(template.name.clone(), (hash, outputs.clone()));
        Ok(outputs)
    }

    async fn destroy_stack(&mut self, stack: &str) -> Result<()> {
        self.calls.push(format!("destroy:{}", stack));
        self.stacks.remove(stack);
        Ok(())
    }

    async fn describe_outputs(&mut self, stack: &str) -> Result<Option<StackOutputs>> {
        Ok(self.stacks.get(stack).map(|(_, outputs)| outputs.clone()))
    }
}

fn env(extra: &[(&str, &str)]) -> EnvSource {
    let mut vars = vec![
        (keys::STACK_NAME_PREFIX, "acme-dev"),
        (keys::IMAGE, "repo/app:1.0"),
        (keys::PORT, "8080"),
        (keys::COST_CENTER, "1234"),
    ];
    vars.extend_from_slice(extra);
    EnvSource::from_vars(vars)
}

#[tokio::test]
async fn test_deploy_autoscaled_service() {
    let deployer = Deployer::with_env(
        "dev",
        env(&[
            (keys::DESIRED_COUNT, "2"),
            (keys::AUTOSCALING_MIN, "1"),
            (keys::AUTOSCALING_MAX, "4"),
        ]),
    );

    let mut provider = RecordingProvider::default();
    let report = deployer.deploy(&mut provider, &[]).await.unwrap();

    assert_eq!(
        provider.calls,
        vec![format!("apply:{NETWORK}"), format!("apply:{APPLICATION}")]
    );
    assert!(report.stacks.iter().all(|s| s.state == StackState::Applied));
    assert_eq!(
        report.outputs.get("acme-dev-common-VpcId"),
        Some("acme-dev-common-vpc/vpc_id")
    );
    assert_eq!(
        report.outputs.get("acme-dev-ServiceUrl"),
        Some("acme-dev-Service/service_url")
    );
}

#[tokio::test]
async fn test_redeploy_is_idempotent() {
    let deployer = Deployer::with_env("dev", env(&[]));
    let mut provider = RecordingProvider::default();

    let first = deployer.deploy(&mut provider, &[]).await.unwrap();
    let second = deployer.deploy(&mut provider, &[]).await.unwrap();

    assert_eq!(first.outputs.get("acme-dev-ServiceUrl"), second.outputs.get("acme-dev-ServiceUrl"));
    assert_eq!(
        &provider.calls[2..],
        &[format!("unchanged:{NETWORK}"), format!("unchanged:{APPLICATION}")]
    );
}

#[tokio::test]
async fn test_targeted_deploy_reads_network_outputs() {
    let deployer = Deployer::with_env("dev", env(&[]));
    let mut provider = RecordingProvider::default();

    // The network stack has not been applied yet.
    let err = deployer
        .deploy(&mut provider, &[APPLICATION.to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::ProvisioningFailure { stack, .. } if stack == NETWORK));
    assert!(provider.calls.is_empty());

    deployer
        .deploy(&mut provider, &[NETWORK.to_string()])
        .await
        .unwrap();
    deployer
        .deploy(&mut provider, &[APPLICATION.to_string()])
        .await
        .unwrap();
    assert_eq!(
        provider.calls,
        vec![format!("apply:{NETWORK}"), format!("apply:{APPLICATION}")]
    );
}

#[tokio::test]
async fn test_destroy_network_tears_down_dependents_first() {
    let deployer = Deployer::with_env("dev", env(&[]));
    let mut provider = RecordingProvider::default();
    deployer.deploy(&mut provider, &[]).await.unwrap();

    let reports = deployer
        .destroy(&mut provider, &[NETWORK.to_string()])
        .await
        .unwrap();

    assert_eq!(
        &provider.calls[2..],
        &[format!("destroy:{APPLICATION}"), format!("destroy:{NETWORK}")]
    );
    assert!(reports.iter().all(|r| r.state == StackState::Destroyed));
    assert!(provider.stacks.is_empty());
}

#[tokio::test]
async fn test_configuration_errors_never_reach_provider() {
    let mut provider = RecordingProvider::default();

    let err = Deployer::with_env("dev", env(&[(keys::STICKY_SESSIONS, "true")]))
        .deploy(&mut provider, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::IncompleteFeature { ref feature, .. } if feature == "sticky-sessions"));

    let err = Deployer::with_env("dev", EnvSource::from_vars([(keys::PORT, "8080")]))
        .deploy(&mut provider, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::MissingConfig { .. }));

    let err = Deployer::with_env("qa", env(&[]))
        .deploy(&mut provider, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::InvalidEnvironment { .. }));

    assert!(provider.calls.is_empty());
}

#[tokio::test]
async fn test_synth_threads_placeholders() {
    let dir = TempDir::new("stackup-synth").unwrap();
    let paths = Deployer::with_env("dev", env(&[]))
        .synth(dir.path())
        .await
        .unwrap();
    assert_eq!(paths.len(), 2);

    let content = std::fs::read_to_string(dir.path().join(format!("{APPLICATION}.template.json")))
        .unwrap();
    let template: StackTemplate = serde_json::from_str(&content).unwrap();

    let cluster = template.resource("acme-dev-Cluster").unwrap();
    assert_eq!(
        cluster.str_property("vpc"),
        Some("${acme-dev-common.acme-dev-common-VpcId}")
    );
    assert_eq!(template.depends_on, vec![NETWORK.to_string()]);
    assert_eq!(
        template
            .resources
            .iter()
            .filter(|r| r.kind == ResourceKind::LoadBalancedService)
            .count(),
        1
    );
}

#[test]
fn test_cyclic_stacks_are_rejected() {
    let a = Stack::new("a")
        .depends_on("b")
        .resource(ResourceSpec::builder(ResourceKind::Network, "a-vpc").build());
    let b = Stack::new("b")
        .depends_on("a")
        .resource(ResourceSpec::builder(ResourceKind::Network, "b-vpc").build());

    let err = StackComposer::new(vec![a, b]).unwrap_err();
    assert!(matches!(err, DeployError::CyclicDependency { .. }));
}
