//! Local provider running stacks as Docker networks and containers.
//!
//! Networks become bridge networks, load-balanced services become `desired_count`
//! replicas of their image with the container port published on the host. Kinds with no
//! local counterpart (certificates, DNS zones, autoscaling) are skipped with a warning.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
        StopContainerOptions,
    },
    image::CreateImageOptions,
    errors::Error as DockerError,
    network::CreateNetworkOptions,
    secret::{HostConfig, Ipam, IpamConfig, PortBinding},
};
use derive_more::Deref;
use futures::StreamExt;
use url::Url;

use super::{Provider, StackOutputs};
use crate::{
    builder::{attributes, params},
    resource::ResourceKind,
    state::{ResourceHandle, StackRecord},
    template::{ResourceTemplate, StackTemplate, parse_attribute_ref},
};

/// A Docker image reference with image name and tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DockerImage {
    /// The image name (e.g., "ghcr.io/acme/app").
    pub image: String,
    /// The image tag (e.g., "latest" or "v1.0.0").
    pub tag: String,
}

impl DockerImage {
    /// Split `repo/app:1.0` into name and tag; a missing tag means `latest`.
    pub fn parse(reference: &str) -> Self {
        let name_start = reference.rfind('/').map_or(0, |i| i + 1);
        match reference[name_start..].rfind(':') {
            Some(i) => Self {
                image: reference[..name_start + i].to_string(),
                tag: reference[name_start + i + 1..].to_string(),
            },
            None => Self {
                image: reference.to_string(),
                tag: "latest".to_string(),
            },
        }
    }

    /// Get the full image reference (image:tag).
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Configuration for the Docker provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerProviderConfig {
    /// Directory holding one state file per applied stack.
    pub state_dir: PathBuf,
}

/// Docker client wrapper applying stacks locally.
#[derive(Deref)]
pub struct DockerProvider {
    #[deref]
    docker: Docker,

    pub config: DockerProviderConfig,
}

/// Attribute values produced so far while applying a stack.
type Attributes = HashMap<(String, String), String>;

impl DockerProvider {
    const STOP_CONTAINER_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect to the local Docker daemon.
    pub fn new(config: DockerProviderConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;

        Ok(Self { docker, config })
    }

    pub async fn pull_image(&self, image: &DockerImage) -> Result<()> {
        let full_image = image.full_name();

        // Check if image is already available locally
        if self.docker.inspect_image(&full_image).await.is_ok() {
            tracing::debug!(image = %full_image, "Image already available locally, skipping pull");
            return Ok(());
        }

        tracing::debug!(image = %full_image, "Image not found locally, pulling...");

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.image.clone(),
                tag: image.tag.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await
            && let Some(status) = result
                .map_err(|e| anyhow::anyhow!("Failed to pull image '{}': {}", full_image, e))?
                .status
        {
            tracing::trace!(status, "Image pull");
        }

        Ok(())
    }

    /// Create a bridge network, on `subnet` when given.
    async fn create_network(&self, network_name: &str, subnet: Option<&str>) -> Result<String> {
        tracing::info!(network = network_name, subnet, "Creating Docker network");

        let response = self
            .docker
            .create_network(network_options(network_name, subnet))
            .await
            .context("Failed to create Docker network")?;

        // Use the network ID from the response, or fall back to the network name
        let network_id = (!response.id.is_empty())
            .then(|| response.id)
            .unwrap_or(network_name.to_string());

        tracing::trace!(network_id, "Docker network created");

        Ok(network_id)
    }

    /// Create and start one replica of a service.
    async fn start_replica(
        &self,
        container_name: &str,
        image: &DockerImage,
        container_port: u16,
        host_port: u16,
        network: Option<&str>,
        env: Vec<String>,
    ) -> Result<String> {
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::from([(
            format!("{}/tcp", container_port),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        )]);

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: network.map(str::to_string),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.full_name()),
            env: (!env.is_empty()).then_some(env),
            exposed_ports: Some(HashMap::from([(
                format!("{}/tcp", container_port),
                HashMap::new(),
            )])),
            host_config: Some(host_config),
            ..Default::default()
        };

        tracing::trace!(container_name, "Creating container");
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name,
                    ..Default::default()
                }),
                config,
            )
            .await
            .context("Failed to create container")?;

        let container_id = container.id;
        tracing::trace!(container_id, container_name, "Starting container");

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start container")?;

        Ok(container_id)
    }

    async fn stop_and_remove_container(&self, container_id: &str) {
        tracing::trace!(container_id, "Stopping and removing container");

        // Errors mean the container is already stopped or gone.
        self.docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: Self::STOP_CONTAINER_TIMEOUT.as_secs() as i64,
                }),
            )
            .await
            .ok();

        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .ok();

        tracing::trace!(container_id, "Container stopped and removed");
    }

    /// Remove everything a record points to, containers before networks.
    async fn remove_handles(&self, handles: &[ResourceHandle]) -> Result<()> {
        for handle in handles {
            if let ResourceHandle::Container { id, .. } = handle {
                self.stop_and_remove_container(id).await;
            }
        }

        for handle in handles {
            if let ResourceHandle::Network { resource, id } = handle {
                tracing::trace!(network_id = %id, "Removing network");
                match self.docker.remove_network(id).await {
                    Ok(()) => {}
                    Err(e) if is_not_found(&e) => {
                        tracing::debug!(network_id = %id, "Network already removed");
                    }
                    Err(e) => {
                        return Err(e)
                            .with_context(|| format!("Failed to remove network of {}", resource));
                    }
                }
            }
        }

        Ok(())
    }

    async fn apply_service(
        &self,
        template: &StackTemplate,
        resource: &ResourceTemplate,
        attrs: &mut Attributes,
        handles: &mut Vec<ResourceHandle>,
    ) -> Result<()> {
        let image = DockerImage::parse(
            resource
                .str_property(params::IMAGE)
                .context("Service has no image")?,
        );
        let container_port = port(resource, params::CONTAINER_PORT)?;
        let desired_count = resource.int_property(params::DESIRED_COUNT).unwrap_or(1).max(1);

        let network = resource
            .properties
            .get(params::CLUSTER)
            .and_then(parse_attribute_ref)
            .and_then(|(cluster, _)| template.resource(cluster))
            .and_then(|cluster| cluster.str_property(params::VPC));

        if resource.str_property(params::PROTOCOL) == Some("HTTPS") {
            tracing::warn!(
                resource = %resource.name,
                "TLS termination is not available locally, serving plain HTTP"
            );
        }

        let env = container_env(resource, attrs);

        self.pull_image(&image).await?;

        for replica in 0..desired_count {
            let (name, host_port) = replica_binding(&resource.name, container_port, replica)?;
            let id = self
                .start_replica(&name, &image, container_port, host_port, network, env.clone())
                .await
                .with_context(|| format!("Failed to start replica {}", name))?;

            tracing::info!(container = %name, host_port, "Replica started");
            handles.push(ResourceHandle::Container {
                resource: resource.name.clone(),
                id,
            });
        }

        let url = Url::parse(&format!("http://localhost:{}/", container_port))
            .context("Failed to build service URL")?;
        set_attr(attrs, &resource.name, attributes::SERVICE_NAME, &resource.name);
        set_attr(attrs, &resource.name, attributes::LOAD_BALANCER_DNS_NAME, "localhost");
        set_attr(attrs, &resource.name, attributes::SERVICE_URL, url.as_str());

        Ok(())
    }

    async fn apply_template(
        &self,
        template: &StackTemplate,
    ) -> Result<(StackOutputs, Vec<ResourceHandle>)> {
        let mut attrs = Attributes::new();
        let mut handles = Vec::new();

        for resource in &template.resources {
            let result = match resource.kind {
                ResourceKind::Network => {
                    let subnet = resource.str_property(params::CIDR);
                    self.create_network(&resource.name, subnet).await.map(|id| {
                        set_attr(&mut attrs, &resource.name, attributes::VPC_ID, &id);
                        handles.push(ResourceHandle::Network {
                            resource: resource.name.clone(),
                            id,
                        });
                    })
                }
                ResourceKind::Cluster => {
                    let arn = format!("docker:{}", resource.name);
                    set_attr(&mut attrs, &resource.name, attributes::CLUSTER_ARN, &arn);
                    Ok(())
                }
                ResourceKind::Secret => {
                    let name = resource
                        .str_property(params::SECRET_NAME)
                        .unwrap_or(&resource.name)
                        .to_string();
                    set_attr(&mut attrs, &resource.name, attributes::SECRET_ARN, &name);
                    Ok(())
                }
                ResourceKind::LoadBalancedService => {
                    self.apply_service(template, resource, &mut attrs, &mut handles)
                        .await
                }
                ResourceKind::Certificate
                | ResourceKind::DnsZoneReference
                | ResourceKind::AutoscalingPolicy => {
                    tracing::warn!(
                        resource = %resource.name,
                        kind = %resource.kind,
                        "No local equivalent, skipping"
                    );
                    Ok(())
                }
            };

            if let Err(e) = result {
                // Leave nothing half-created behind.
                if let Err(cleanup) = self.remove_handles(&handles).await {
                    tracing::error!(error = ?cleanup, "Failed to clean up after failed apply");
                }
                return Err(e.context(format!("Failed to apply resource {}", resource.name)));
            }
        }

        let outputs = template
            .outputs
            .iter()
            .map(|output| {
                attrs
                    .get(&(output.resource.clone(), output.attribute.clone()))
                    .map(|value| (output.name.clone(), value.clone()))
                    .with_context(|| {
                        format!(
                            "Resource {} has no local attribute {}",
                            output.resource, output.attribute
                        )
                    })
            })
            .collect::<Result<StackOutputs>>()?;

        Ok((outputs, handles))
    }
}

fn network_options(name: &str, subnet: Option<&str>) -> CreateNetworkOptions<String> {
    CreateNetworkOptions {
        name: name.to_string(),
        check_duplicate: true,
        driver: "bridge".to_string(),
        ipam: Ipam {
            config: subnet.map(|subnet| {
                vec![IpamConfig {
                    subnet: Some(subnet.to_string()),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Whether the daemon reported the object as missing.
fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Delete a stack record. A missing record is fine.
fn discard_record(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context(format!("Failed to remove stack record {}", path.display())),
    }
}

fn set_attr(attrs: &mut Attributes, resource: &str, attribute: &str, value: &str) {
    attrs.insert((resource.to_string(), attribute.to_string()), value.to_string());
}

fn port(resource: &ResourceTemplate, name: &str) -> Result<u16> {
    let value = resource
        .int_property(name)
        .with_context(|| format!("{} has no {}", resource.name, name))?;
    u16::try_from(value).with_context(|| format!("{} is not a valid port", value))
}

/// `KEY=value` pairs for a service container: its environment plus the secret name.
fn container_env(resource: &ResourceTemplate, attrs: &Attributes) -> Vec<String> {
    let mut env: BTreeMap<String, String> = resource
        .properties
        .get(params::ENVIRONMENT)
        .and_then(|v| v.as_object())
        .map(|vars| {
            vars.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let secret = resource
        .properties
        .get(params::SECRET)
        .and_then(parse_attribute_ref)
        .and_then(|(r, a)| attrs.get(&(r.to_string(), a.to_string())));
    if let (Some(var), Some(secret)) = (resource.str_property(params::SECRET_ENV_VAR), secret) {
        env.insert(var.to_string(), secret.clone());
    }

    env.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect()
}

impl Provider for DockerProvider {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn apply_stack(&mut self, template: &StackTemplate) -> Result<StackOutputs> {
        let path = StackRecord::path(&self.config.state_dir, &template.name);
        let hash = template.compute_hash();

        if let Some(record) = StackRecord::load_from_file(&path)? {
            if record.matches(&hash) {
                tracing::info!(stack = %template.name, "Stack unchanged, nothing to apply");
                return Ok(record.outputs);
            }

            tracing::info!(stack = %template.name, "Stack changed, replacing");
            self.remove_handles(&record.handles).await?;
            // A failed apply below must not leave a record pointing at removed resources.
            discard_record(&path)?;
        }

        let (outputs, handles) = self.apply_template(template).await?;

        let mut record = StackRecord::new(&template.name, hash, outputs.clone());
        record.handles = handles;
        record.save_to_file(&path)?;

        Ok(outputs)
    }

    async fn destroy_stack(&mut self, stack: &str) -> Result<()> {
        let path = StackRecord::path(&self.config.state_dir, stack);
        let Some(record) = StackRecord::load_from_file(&path)? else {
            tracing::debug!(stack, "No local state, nothing to destroy");
            return Ok(());
        };

        self.remove_handles(&record.handles).await?;
        discard_record(&path)
    }

    async fn describe_outputs(&mut self, stack: &str) -> Result<Option<StackOutputs>> {
        let path = StackRecord::path(&self.config.state_dir, stack);
        Ok(StackRecord::load_from_file(&path)?.map(|record| record.outputs))
    }
}

/// Container name and host port of one service replica.
fn replica_binding(service: &str, container_port: u16, replica: i64) -> Result<(String, u16)> {
    let host_port = u16::try_from(i64::from(container_port) + replica)
        .context("Replica host port out of range")?;
    Ok((format!("{}-{}", service, replica), host_port))
}
