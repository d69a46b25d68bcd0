//! Turns a resolved configuration into the network and application stacks.
//!
//! Every name is derived from the stack prefix, so the same configuration always yields
//! the same stacks. Optional features are validated here, before anything is provisioned.

use std::collections::BTreeMap;

use crate::{
    config::{ResolvedConfig, features, keys},
    error::{DeployError, Result},
    resource::{ResourceKind, ResourceSpec},
    stack::Stack,
};

/// Parameter names of the emitted resources.
pub mod params {
    pub const CIDR: &str = "cidr";
    pub const MAX_AZS: &str = "max_azs";
    pub const VPC: &str = "vpc";
    pub const CONTAINER_INSIGHTS: &str = "container_insights";
    pub const SECRET_NAME: &str = "secret_name";
    pub const ZONE_NAME: &str = "zone_name";
    pub const ZONE_ID: &str = "zone_id";
    pub const CERTIFICATE_ARN: &str = "certificate_arn";
    pub const DOMAIN_NAME: &str = "domain_name";
    pub const DOMAIN_ZONE: &str = "domain_zone";
    pub const CLUSTER: &str = "cluster";
    pub const IMAGE: &str = "image";
    pub const CONTAINER_PORT: &str = "container_port";
    pub const CPU: &str = "cpu";
    pub const MEMORY_LIMIT_MIB: &str = "memory_limit_mib";
    pub const DESIRED_COUNT: &str = "desired_count";
    pub const PUBLIC_LOAD_BALANCER: &str = "public_load_balancer";
    pub const PROTOCOL: &str = "protocol";
    pub const SSL_POLICY: &str = "ssl_policy";
    pub const CERTIFICATE: &str = "certificate";
    pub const REDIRECT_HTTP: &str = "redirect_http";
    pub const HEALTH_CHECK_INTERVAL_SECS: &str = "health_check_interval_secs";
    pub const HEALTH_CHECK_TIMEOUT_SECS: &str = "health_check_timeout_secs";
    pub const ENVIRONMENT: &str = "environment";
    pub const SECRET: &str = "secret";
    pub const SECRET_ENV_VAR: &str = "secret_env_var";
    pub const STICKY_COOKIE_DURATION_SECS: &str = "sticky_cookie_duration_secs";
    pub const SERVICE: &str = "service";
    pub const MIN_CAPACITY: &str = "min_capacity";
    pub const MAX_CAPACITY: &str = "max_capacity";
    pub const CPU_TARGET_PERCENT: &str = "cpu_target_percent";
    pub const MEMORY_TARGET_PERCENT: &str = "memory_target_percent";
    pub const CUSTOM_METRIC: &str = "custom_metric";
    pub const STEP_ADJUSTMENTS: &str = "step_adjustments";
}

/// Attributes providers report for the emitted resources.
pub mod attributes {
    pub const VPC_ID: &str = "vpc_id";
    pub const CLUSTER_ARN: &str = "cluster_arn";
    pub const SECRET_ARN: &str = "secret_arn";
    pub const ZONE_ID: &str = "zone_id";
    pub const CERTIFICATE_ARN: &str = "certificate_arn";
    pub const SERVICE_NAME: &str = "service_name";
    pub const LOAD_BALANCER_DNS_NAME: &str = "load_balancer_dns_name";
    pub const SERVICE_URL: &str = "service_url";
}

/// Suffix of the application stack name.
pub const APPLICATION_STACK_SUFFIX: &str = "-DockerFargateStack";

/// Suffix of the default network stack name.
pub const NETWORK_STACK_SUFFIX: &str = "-common";

/// The environment variable pointing the container at its secret.
pub const SECRETS_ENV_VAR: &str = "SECRETS_MANAGER_SECRETS";

/// TLS policy of HTTPS listeners: forward secrecy ciphers, TLS 1.2 only.
pub const SSL_POLICY: &str = "FORWARD_SECRECY_TLS12_RES";

/// Tag carrying the cost center on every resource.
pub const COST_CENTER_TAG: &str = "CostCenter";

/// The two stacks of a deployment.
#[derive(Debug, Clone)]
pub struct StackSet {
    pub network: Stack,
    pub application: Stack,
}

impl StackSet {
    /// Both stacks, network first.
    pub fn into_stacks(self) -> Vec<Stack> {
        vec![self.network, self.application]
    }
}

/// Load-balancer listener protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DnsBinding {
    host_name: String,
    zone_name: String,
    zone_id: String,
}

/// One step of a step-scaling policy.
///
/// Capacity changes by `change` tasks while the metric sits in `[lower, upper)`, relative
/// to the metric target. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepAdjustment {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub change: i64,
}

impl StepAdjustment {
    /// Parse `lower:upper:change`, where either bound may be left empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().split(':');
        let (lower, upper, change) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let bound = |s: &str| match s.trim() {
            "" => Some(None),
            s => s.parse::<i64>().ok().map(Some),
        };
        let step = Self {
            lower: bound(lower)?,
            upper: bound(upper)?,
            change: change.trim().parse().ok()?,
        };

        match (step.lower, step.upper) {
            (Some(lower), Some(upper)) if lower >= upper => None,
            _ if step.change == 0 => None,
            _ => Some(step),
        }
    }

    fn to_json(self) -> serde_json::Value {
        serde_json::json!({
            "lower": self.lower,
            "upper": self.upper,
            "change": self.change,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CustomMetric {
    name: String,
    target: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Autoscaling {
    min: i64,
    max: i64,
    cpu_target: i64,
    memory_target: i64,
    metric: Option<CustomMetric>,
    steps: Vec<StepAdjustment>,
}

/// Builds the [`StackSet`] for one resolved configuration.
#[derive(Debug)]
pub struct StackSetBuilder<'a> {
    config: &'a ResolvedConfig,
    prefix: String,
    network_stack: String,
}

impl<'a> StackSetBuilder<'a> {
    pub fn new(config: &'a ResolvedConfig) -> Result<Self> {
        let prefix = config.require_string(keys::STACK_NAME_PREFIX)?.to_string();
        let network_stack = config
            .string(keys::NETWORK_STACK_NAME)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}{}", prefix, NETWORK_STACK_SUFFIX));

        Ok(Self {
            config,
            prefix,
            network_stack,
        })
    }

    fn name(&self, suffix: &str) -> String {
        format!("{}-{}", self.prefix, suffix)
    }

    pub fn network_stack_name(&self) -> &str {
        &self.network_stack
    }

    pub fn application_stack_name(&self) -> String {
        format!("{}{}", self.prefix, APPLICATION_STACK_SUFFIX)
    }

    /// Name of the output exporting the network ID.
    pub fn vpc_output(&self) -> String {
        format!("{}-VpcId", self.network_stack)
    }

    /// `CostCenter` merged with the configured tag map. Explicit tags win.
    fn tags(&self) -> Result<BTreeMap<String, String>> {
        let mut tags = BTreeMap::from([(
            COST_CENTER_TAG.to_string(),
            self.config.require_string(keys::COST_CENTER)?.to_string(),
        )]);
        if let Some(extra) = self.config.tags(keys::TAGS) {
            tags.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(tags)
    }

    fn dns(&self) -> Result<Option<DnsBinding>> {
        if !self.config.feature(features::DNS)? {
            return Ok(None);
        }

        Ok(Some(DnsBinding {
            host_name: self.config.require_string(keys::HOST_NAME)?.to_string(),
            zone_name: self.config.require_string(keys::HOSTED_ZONE_NAME)?.to_string(),
            zone_id: self.config.require_string(keys::HOSTED_ZONE_ID)?.to_string(),
        }))
    }

    fn autoscaling(&self) -> Result<Option<Autoscaling>> {
        let enabled = self.config.feature(features::AUTOSCALING)?;
        let metric = self.custom_metric()?;
        let steps = self.steps(metric.as_ref())?;

        if !enabled {
            if metric.is_some() || !steps.is_empty() {
                return Err(DeployError::IncompleteFeature {
                    feature: features::AUTOSCALING.to_string(),
                    missing: vec![
                        keys::AUTOSCALING_MIN.to_string(),
                        keys::AUTOSCALING_MAX.to_string(),
                    ],
                });
            }
            return Ok(None);
        }

        let min = self.config.require_int(keys::AUTOSCALING_MIN)?;
        let max = self.config.require_int(keys::AUTOSCALING_MAX)?;
        if min < 1 || min > max {
            return Err(DeployError::InvalidFeature {
                feature: features::AUTOSCALING.to_string(),
                reason: format!("expected 1 <= min <= max, got min {} and max {}", min, max),
            });
        }

        Ok(Some(Autoscaling {
            min,
            max,
            cpu_target: self.percent(keys::CPU_TARGET_PERCENT)?,
            memory_target: self.percent(keys::MEMORY_TARGET_PERCENT)?,
            metric,
            steps,
        }))
    }

    fn custom_metric(&self) -> Result<Option<CustomMetric>> {
        if !self.config.feature(features::SCALING_METRIC)? {
            return Ok(None);
        }

        Ok(Some(CustomMetric {
            name: self.config.require_string(keys::SCALING_METRIC_NAME)?.to_string(),
            target: self.positive(keys::SCALING_METRIC_TARGET)?,
        }))
    }

    /// Step adjustments, sorted by lower bound. They scale on the custom metric.
    fn steps(&self, metric: Option<&CustomMetric>) -> Result<Vec<StepAdjustment>> {
        let Some(raw) = self.config.string(keys::SCALING_STEPS) else {
            return Ok(Vec::new());
        };
        if metric.is_none() {
            return Err(DeployError::IncompleteFeature {
                feature: features::SCALING_METRIC.to_string(),
                missing: vec![
                    keys::SCALING_METRIC_NAME.to_string(),
                    keys::SCALING_METRIC_TARGET.to_string(),
                ],
            });
        }

        let mut steps = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                StepAdjustment::parse(s).ok_or_else(|| DeployError::InvalidValue {
                    key: keys::SCALING_STEPS.to_string(),
                    value: s.to_string(),
                    expected: "lower:upper:change with lower < upper and a non-zero change"
                        .to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        steps.sort_by_key(|step| step.lower.unwrap_or(i64::MIN));
        for pair in steps.windows(2) {
            if pair[0].upper.unwrap_or(i64::MAX) > pair[1].lower.unwrap_or(i64::MIN) {
                return Err(DeployError::InvalidFeature {
                    feature: features::SCALING_METRIC.to_string(),
                    reason: format!("step intervals overlap: {:?} and {:?}", pair[0], pair[1]),
                });
            }
        }

        Ok(steps)
    }

    /// The cookie duration when sticky sessions are on.
    fn stickiness(&self) -> Result<Option<i64>> {
        if !self.config.bool(keys::STICKY_SESSIONS).unwrap_or(false) {
            if self.config.is_set(keys::STICKY_COOKIE_DURATION_SECS) {
                return Err(DeployError::IncompleteFeature {
                    feature: "sticky-sessions".to_string(),
                    missing: vec![keys::STICKY_SESSIONS.to_string()],
                });
            }
            return Ok(None);
        }

        match self.config.int(keys::STICKY_COOKIE_DURATION_SECS) {
            Some(secs) if secs > 0 => Ok(Some(secs)),
            Some(secs) => Err(invalid(keys::STICKY_COOKIE_DURATION_SECS, secs, "a positive duration")),
            None => Err(DeployError::IncompleteFeature {
                feature: "sticky-sessions".to_string(),
                missing: vec![keys::STICKY_COOKIE_DURATION_SECS.to_string()],
            }),
        }
    }

    fn port(&self) -> Result<i64> {
        let port = self.config.require_int(keys::PORT)?;
        if !(1..=65535).contains(&port) {
            return Err(invalid(keys::PORT, port, "a port in 1..=65535"));
        }
        Ok(port)
    }

    fn percent(&self, key: &str) -> Result<i64> {
        let value = self.config.require_int(key)?;
        if !(1..=100).contains(&value) {
            return Err(invalid(key, value, "a percentage in 1..=100"));
        }
        Ok(value)
    }

    fn positive(&self, key: &str) -> Result<i64> {
        let value = self.config.require_int(key)?;
        if value < 1 {
            return Err(invalid(key, value, "a positive integer"));
        }
        Ok(value)
    }

    /// The shared network stack: one network spanning `MAX_AZS` zones.
    pub fn network(&self) -> Result<Stack> {
        let vpc = format!("{}-vpc", self.network_stack);

        Ok(Stack::new(&self.network_stack)
            .tags(self.tags()?)
            .resource(
                ResourceSpec::builder(ResourceKind::Network, &vpc)
                    .set(params::CIDR, self.config.require_string(keys::VPC_CIDR)?)
                    .set(params::MAX_AZS, self.positive(keys::MAX_AZS)?)
                    .build(),
            )
            .output(self.vpc_output(), vpc, attributes::VPC_ID))
    }

    /// The application stack: cluster, secret, optional DNS and certificate, the
    /// load-balanced service and its optional scaling policy.
    pub fn application(&self) -> Result<Stack> {
        let port = self.port()?;
        let dns = self.dns()?;
        let autoscaling = self.autoscaling()?;
        let sticky_cookie = self.stickiness()?;
        let certificate_arn = self.config.string(keys::CERTIFICATE_ARN);

        let protocol = if dns.is_some() || certificate_arn.is_some() {
            Protocol::Https
        } else {
            Protocol::Http
        };

        let redirect_http = self.config.bool(keys::REDIRECT_HTTP).unwrap_or(false);
        if redirect_http && protocol == Protocol::Http {
            return Err(DeployError::InvalidFeature {
                feature: keys::REDIRECT_HTTP.to_string(),
                reason: "redirecting to HTTPS needs a certificate or a DNS binding".to_string(),
            });
        }

        let cluster = self.name("Cluster");
        let secret = self.name("Secret");
        let zone = self.name("Zone");
        let certificate = self.name("Certificate");
        let service = self.name("Service");

        let mut stack = Stack::new(self.application_stack_name())
            .depends_on(&self.network_stack)
            .tags(self.tags()?)
            .resource(
                ResourceSpec::builder(ResourceKind::Cluster, &cluster)
                    .import(params::VPC, self.vpc_output())
                    .set(params::CONTAINER_INSIGHTS, true)
                    .build(),
            )
            .resource(
                ResourceSpec::builder(ResourceKind::Secret, &secret)
                    .set(
                        params::SECRET_NAME,
                        self.config.string(keys::SECRET_NAME).unwrap_or(&self.prefix),
                    )
                    .build(),
            );

        if let Some(dns) = &dns {
            stack = stack.resource(
                ResourceSpec::builder(ResourceKind::DnsZoneReference, &zone)
                    .set(params::ZONE_NAME, dns.zone_name.as_str())
                    .set(params::ZONE_ID, dns.zone_id.as_str())
                    .build(),
            );
        }

        if protocol == Protocol::Https {
            let spec = ResourceSpec::builder(ResourceKind::Certificate, &certificate);
            let spec = match (certificate_arn, &dns) {
                (Some(arn), _) => spec.set(params::CERTIFICATE_ARN, arn),
                (None, Some(dns)) => spec
                    .set(params::DOMAIN_NAME, dns.host_name.as_str())
                    .reference(params::DOMAIN_ZONE, &zone, attributes::ZONE_ID),
                (None, None) => spec,
            };
            stack = stack.resource(spec.build());
        }

        let mut environment = serde_json::Map::new();
        if let Some(value) = self.config.string(keys::CONTAINER_ENV) {
            environment.insert(
                self.config.require_string(keys::CONTAINER_ENV_NAME)?.to_string(),
                value.into(),
            );
        }

        let mut spec = ResourceSpec::builder(ResourceKind::LoadBalancedService, &service)
            .reference(params::CLUSTER, &cluster, attributes::CLUSTER_ARN)
            .set(params::IMAGE, self.config.require_string(keys::IMAGE)?)
            .set(params::CONTAINER_PORT, port)
            .set(params::CPU, self.positive(keys::CPU)?)
            .set(params::MEMORY_LIMIT_MIB, self.positive(keys::MEMORY_LIMIT_MIB)?)
            .set(params::DESIRED_COUNT, self.positive(keys::DESIRED_COUNT)?)
            .set(params::PUBLIC_LOAD_BALANCER, true)
            .set(params::PROTOCOL, protocol.to_string())
            .set(
                params::HEALTH_CHECK_INTERVAL_SECS,
                self.positive(keys::HEALTH_CHECK_INTERVAL_SECS)?,
            )
            .set(
                params::HEALTH_CHECK_TIMEOUT_SECS,
                self.positive(keys::HEALTH_CHECK_TIMEOUT_SECS)?,
            )
            .set(params::ENVIRONMENT, environment)
            .reference(params::SECRET, &secret, attributes::SECRET_ARN)
            .set(params::SECRET_ENV_VAR, SECRETS_ENV_VAR)
            .set_opt(params::STICKY_COOKIE_DURATION_SECS, sticky_cookie);

        if protocol == Protocol::Https {
            spec = spec
                .set(params::SSL_POLICY, SSL_POLICY)
                .reference(params::CERTIFICATE, &certificate, attributes::CERTIFICATE_ARN)
                .set(params::REDIRECT_HTTP, redirect_http);
        }
        if let Some(dns) = &dns {
            spec = spec
                .set(params::DOMAIN_NAME, dns.host_name.as_str())
                .reference(params::DOMAIN_ZONE, &zone, attributes::ZONE_ID);
        }

        stack = stack.resource(spec.build());

        if let Some(scaling) = autoscaling {
            let mut spec =
                ResourceSpec::builder(ResourceKind::AutoscalingPolicy, self.name("Scaling"))
                    .reference(params::SERVICE, &service, attributes::SERVICE_NAME)
                    .set(params::MIN_CAPACITY, scaling.min)
                    .set(params::MAX_CAPACITY, scaling.max)
                    .set(params::CPU_TARGET_PERCENT, scaling.cpu_target)
                    .set(params::MEMORY_TARGET_PERCENT, scaling.memory_target)
                    .set_opt(
                        params::CUSTOM_METRIC,
                        scaling
                            .metric
                            .map(|m| serde_json::json!({ "name": m.name, "target": m.target })),
                    );
            if !scaling.steps.is_empty() {
                spec = spec.set(
                    params::STEP_ADJUSTMENTS,
                    scaling
                        .steps
                        .into_iter()
                        .map(StepAdjustment::to_json)
                        .collect::<Vec<_>>(),
                );
            }
            stack = stack.resource(spec.build());
        }

        Ok(stack
            .output(
                self.name("LoadBalancerDns"),
                &service,
                attributes::LOAD_BALANCER_DNS_NAME,
            )
            .output(self.name("ServiceUrl"), &service, attributes::SERVICE_URL))
    }

    /// Build both stacks.
    pub fn build(&self) -> Result<StackSet> {
        let network = self.network()?;
        let application = self.application()?;

        tracing::debug!(
            network = %network.name,
            application = %application.name,
            resources = network.resources.len() + application.resources.len(),
            "Stacks built"
        );

        Ok(StackSet {
            network,
            application,
        })
    }
}

/// Build the network and application stacks for `config`.
pub fn build_stacks(config: &ResolvedConfig) -> Result<Vec<Stack>> {
    Ok(StackSetBuilder::new(config)?.build()?.into_stacks())
}

fn invalid(key: &str, value: i64, expected: &str) -> DeployError {
    DeployError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ConfigResolver, ConfigSchema, EnvSource, NamedEnvironment},
        resource::Param,
    };

    fn resolve(vars: &[(&str, &str)]) -> ResolvedConfig {
        let mut all = vec![
            (keys::STACK_NAME_PREFIX, "acme-dev"),
            (keys::IMAGE, "repo/app:1.0"),
            (keys::PORT, "8080"),
            (keys::COST_CENTER, "1234"),
        ];
        all.extend_from_slice(vars);

        let schema = ConfigSchema::standard();
        let env = NamedEnvironment::parse("dev", schema.allowed_environments()).unwrap();
        ConfigResolver::new(env)
            .source(EnvSource::from_vars(all))
            .resolve_all(&schema)
            .unwrap()
    }

    fn resource_names(stack: &Stack) -> Vec<&str> {
        stack.resources.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_minimal_configuration() {
        let set = StackSetBuilder::new(&resolve(&[])).unwrap().build().unwrap();

        assert_eq!(set.network.name, "acme-dev-common");
        assert_eq!(resource_names(&set.network), vec!["acme-dev-common-vpc"]);
        assert_eq!(set.network.outputs[0].name, "acme-dev-common-VpcId");

        let app = &set.application;
        assert_eq!(app.name, "acme-dev-DockerFargateStack");
        assert_eq!(app.depends_on, vec!["acme-dev-common".to_string()]);
        assert_eq!(
            resource_names(app),
            vec!["acme-dev-Cluster", "acme-dev-Secret", "acme-dev-Service"]
        );
        assert_eq!(app.imported_outputs(), vec!["acme-dev-common-VpcId"]);

        let service = app.get("acme-dev-Service").unwrap();
        assert_eq!(service.literal(params::PROTOCOL), Some(&serde_json::json!("HTTP")));
        assert_eq!(service.literal(params::DESIRED_COUNT), Some(&serde_json::json!(1)));
        assert_eq!(
            service.literal(params::HEALTH_CHECK_INTERVAL_SECS),
            Some(&serde_json::json!(120))
        );
        assert!(service.param(params::SSL_POLICY).is_none());
        assert_eq!(service.literal(params::ENVIRONMENT), Some(&serde_json::json!({})));

        let secret = app.get("acme-dev-Secret").unwrap();
        assert_eq!(secret.literal(params::SECRET_NAME), Some(&serde_json::json!("acme-dev")));
    }

    #[test]
    fn test_autoscaling_scenario() {
        let config = resolve(&[
            (keys::DESIRED_COUNT, "2"),
            (keys::AUTOSCALING_MIN, "1"),
            (keys::AUTOSCALING_MAX, "4"),
        ]);
        let app = StackSetBuilder::new(&config).unwrap().application().unwrap();

        let service = app.get("acme-dev-Service").unwrap();
        assert_eq!(service.kind, ResourceKind::LoadBalancedService);
        assert_eq!(service.literal(params::DESIRED_COUNT), Some(&serde_json::json!(2)));

        let scaling = app.get("acme-dev-Scaling").unwrap();
        assert_eq!(scaling.kind, ResourceKind::AutoscalingPolicy);
        assert_eq!(scaling.literal(params::MIN_CAPACITY), Some(&serde_json::json!(1)));
        assert_eq!(scaling.literal(params::MAX_CAPACITY), Some(&serde_json::json!(4)));
        assert_eq!(scaling.literal(params::CPU_TARGET_PERCENT), Some(&serde_json::json!(50)));
        assert_eq!(scaling.depends_on, vec!["acme-dev-Service".to_string()]);
    }

    #[test]
    fn test_dns_binding_enables_https() {
        let config = resolve(&[
            (keys::HOST_NAME, "app.example.com"),
            (keys::HOSTED_ZONE_NAME, "example.com"),
            (keys::HOSTED_ZONE_ID, "Z123"),
            (keys::REDIRECT_HTTP, "true"),
        ]);
        let app = StackSetBuilder::new(&config).unwrap().application().unwrap();

        assert_eq!(
            resource_names(&app),
            vec![
                "acme-dev-Cluster",
                "acme-dev-Secret",
                "acme-dev-Zone",
                "acme-dev-Certificate",
                "acme-dev-Service"
            ]
        );

        let service = app.get("acme-dev-Service").unwrap();
        assert_eq!(service.literal(params::PROTOCOL), Some(&serde_json::json!("HTTPS")));
        assert_eq!(service.literal(params::SSL_POLICY), Some(&serde_json::json!(SSL_POLICY)));
        assert_eq!(service.literal(params::REDIRECT_HTTP), Some(&serde_json::json!(true)));
        assert_eq!(
            service.param(params::DOMAIN_ZONE),
            Some(&Param::attribute("acme-dev-Zone", attributes::ZONE_ID))
        );
        assert!(service.depends_on.contains(&"acme-dev-Certificate".to_string()));

        let certificate = app.get("acme-dev-Certificate").unwrap();
        assert_eq!(
            certificate.literal(params::DOMAIN_NAME),
            Some(&serde_json::json!("app.example.com"))
        );
    }

    #[test]
    fn test_existing_certificate() {
        let config = resolve(&[(keys::CERTIFICATE_ARN, "arn:aws:acm:cert/1")]);
        let app = StackSetBuilder::new(&config).unwrap().application().unwrap();

        let certificate = app.get("acme-dev-Certificate").unwrap();
        assert_eq!(
            certificate.literal(params::CERTIFICATE_ARN),
            Some(&serde_json::json!("arn:aws:acm:cert/1"))
        );
        assert!(app.get("acme-dev-Zone").is_none());
    }

    #[test]
    fn test_sticky_sessions_need_duration() {
        let config = resolve(&[(keys::STICKY_SESSIONS, "true")]);
        let err = StackSetBuilder::new(&config).unwrap().build().unwrap_err();
        assert!(matches!(
            err,
            DeployError::IncompleteFeature { missing, .. }
                if missing == vec![keys::STICKY_COOKIE_DURATION_SECS.to_string()]
        ));

        // A duration without stickiness turned on is just as incomplete.
        let config = resolve(&[(keys::STICKY_COOKIE_DURATION_SECS, "3600")]);
        let err = build_stacks(&config).unwrap_err();
        assert!(matches!(
            err,
            DeployError::IncompleteFeature { feature, missing }
                if feature == "sticky-sessions" && missing == vec![keys::STICKY_SESSIONS.to_string()]
        ));

        let config = resolve(&[
            (keys::STICKY_SESSIONS, "false"),
            (keys::STICKY_COOKIE_DURATION_SECS, "3600"),
        ]);
        assert!(build_stacks(&config).is_err());

        let config = resolve(&[
            (keys::STICKY_SESSIONS, "true"),
            (keys::STICKY_COOKIE_DURATION_SECS, "3600"),
        ]);
        let app = StackSetBuilder::new(&config).unwrap().application().unwrap();
        let service = app.get("acme-dev-Service").unwrap();
        assert_eq!(
            service.literal(params::STICKY_COOKIE_DURATION_SECS),
            Some(&serde_json::json!(3600))
        );
    }

    #[test]
    fn test_partial_feature_groups_fail() {
        let config = resolve(&[(keys::HOST_NAME, "app.example.com")]);
        assert!(matches!(
            build_stacks(&config),
            Err(DeployError::IncompleteFeature { feature, .. }) if feature == features::DNS
        ));

        let config = resolve(&[(keys::AUTOSCALING_MAX, "4")]);
        assert!(matches!(
            build_stacks(&config),
            Err(DeployError::IncompleteFeature { feature, .. }) if feature == features::AUTOSCALING
        ));

        let config = resolve(&[
            (keys::AUTOSCALING_MIN, "1"),
            (keys::AUTOSCALING_MAX, "4"),
            (keys::SCALING_METRIC_NAME, "RequestCountPerTarget"),
        ]);
        assert!(matches!(
            build_stacks(&config),
            Err(DeployError::IncompleteFeature { feature, missing })
                if feature == features::SCALING_METRIC
                    && missing == vec![keys::SCALING_METRIC_TARGET.to_string()]
        ));
    }

    #[test]
    fn test_custom_metric_with_step_adjustments() {
        let config = resolve(&[
            (keys::AUTOSCALING_MIN, "1"),
            (keys::AUTOSCALING_MAX, "4"),
            (keys::SCALING_METRIC_NAME, "RequestCountPerTarget"),
            (keys::SCALING_METRIC_TARGET, "1000"),
            (keys::SCALING_STEPS, "100::2, 0:100:1, :-200:-1"),
        ]);
        let app = StackSetBuilder::new(&config).unwrap().application().unwrap();

        let scaling = app.get("acme-dev-Scaling").unwrap();
        assert_eq!(
            scaling.literal(params::CUSTOM_METRIC),
            Some(&serde_json::json!({ "name": "RequestCountPerTarget", "target": 1000 }))
        );
        assert_eq!(
            scaling.literal(params::STEP_ADJUSTMENTS),
            Some(&serde_json::json!([
                { "lower": null, "upper": -200, "change": -1 },
                { "lower": 0, "upper": 100, "change": 1 },
                { "lower": 100, "upper": null, "change": 2 },
            ]))
        );
        assert_eq!(scaling.literal(params::CPU_TARGET_PERCENT), Some(&serde_json::json!(50)));
    }

    #[test]
    fn test_scaling_metric_needs_autoscaling() {
        let config = resolve(&[
            (keys::SCALING_METRIC_NAME, "RequestCountPerTarget"),
            (keys::SCALING_METRIC_TARGET, "1000"),
        ]);
        assert!(matches!(
            build_stacks(&config),
            Err(DeployError::IncompleteFeature { feature, .. }) if feature == features::AUTOSCALING
        ));

        // Steps scale on the custom metric.
        let config = resolve(&[
            (keys::AUTOSCALING_MIN, "1"),
            (keys::AUTOSCALING_MAX, "4"),
            (keys::SCALING_STEPS, "0:100:1"),
        ]);
        assert!(matches!(
            build_stacks(&config),
            Err(DeployError::IncompleteFeature { feature, .. }) if feature == features::SCALING_METRIC
        ));
    }

    #[test]
    fn test_invalid_step_adjustments() {
        let with_steps = |steps| {
            resolve(&[
                (keys::AUTOSCALING_MIN, "1"),
                (keys::AUTOSCALING_MAX, "4"),
                (keys::SCALING_METRIC_NAME, "RequestCountPerTarget"),
                (keys::SCALING_METRIC_TARGET, "1000"),
                (keys::SCALING_STEPS, steps),
            ])
        };

        for steps in ["100:0:1", "0:100:0", "0:100", "a:100:1", "0:100:1:2"] {
            assert!(
                matches!(
                    build_stacks(&with_steps(steps)),
                    Err(DeployError::InvalidValue { key, .. }) if key == keys::SCALING_STEPS
                ),
                "expected {} to be rejected",
                steps
            );
        }

        assert!(matches!(
            build_stacks(&with_steps("0:100:1,50::2")),
            Err(DeployError::InvalidFeature { feature, .. }) if feature == features::SCALING_METRIC
        ));
    }

    #[test]
    fn test_step_adjustment_parsing() {
        assert_eq!(
            StepAdjustment::parse(" :0:-1 "),
            Some(StepAdjustment {
                lower: None,
                upper: Some(0),
                change: -1
            })
        );
        assert_eq!(StepAdjustment::parse("::1").map(|s| s.change), Some(1));
        assert_eq!(StepAdjustment::parse("5:5:1"), None);
    }

    #[test]
    fn test_value_validation() {
        let config = resolve(&[(keys::AUTOSCALING_MIN, "5"), (keys::AUTOSCALING_MAX, "2")]);
        assert!(matches!(
            build_stacks(&config),
            Err(DeployError::InvalidFeature { .. })
        ));

        let config = resolve(&[(keys::REDIRECT_HTTP, "true")]);
        assert!(matches!(
            build_stacks(&config),
            Err(DeployError::InvalidFeature { .. })
        ));

        let config = resolve(&[(keys::PORT, "70000")]);
        assert!(matches!(
            build_stacks(&config),
            Err(DeployError::InvalidValue { key, .. }) if key == keys::PORT
        ));

        let config = resolve(&[(keys::CPU_TARGET_PERCENT, "0"), (keys::AUTOSCALING_MIN, "1"), (keys::AUTOSCALING_MAX, "2")]);
        assert!(matches!(
            build_stacks(&config),
            Err(DeployError::InvalidValue { key, .. }) if key == keys::CPU_TARGET_PERCENT
        ));
    }

    #[test]
    fn test_tags_and_container_env() {
        let config = resolve(&[
            (keys::TAGS, "team=web,tier=2"),
            (keys::CONTAINER_ENV, "dev"),
            (keys::CONTAINER_ENV_NAME, "R_CONFIG_ACTIVE"),
            (keys::NETWORK_STACK_NAME, "dca-common"),
        ]);
        let set = StackSetBuilder::new(&config).unwrap().build().unwrap();

        assert_eq!(set.network.name, "dca-common");
        assert_eq!(set.application.depends_on, vec!["dca-common".to_string()]);
        for stack in [&set.network, &set.application] {
            assert_eq!(stack.tags.get(COST_CENTER_TAG).map(String::as_str), Some("1234"));
            assert_eq!(stack.tags.get("team").map(String::as_str), Some("web"));
        }

        let service = set.application.get("acme-dev-Service").unwrap();
        assert_eq!(
            service.literal(params::ENVIRONMENT),
            Some(&serde_json::json!({ "R_CONFIG_ACTIVE": "dev" }))
        );
    }
}
