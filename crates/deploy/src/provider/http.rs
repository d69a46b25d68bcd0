//! Provider backed by a remote provisioning API.
//!
//! The API accepts a rendered [`StackTemplate`] with `PUT {endpoint}/stacks/{name}` and
//! reports progress through `GET {endpoint}/stacks/{name}`:
//!
//! ```json
//! { "status": "IN_PROGRESS", "outputs": {}, "reason": null, "revision": "9f2c..." }
//! ```
//!
//! Every `PUT` carries the template hash in the `X-Stackup-Revision` header. When the API
//! echoes it back as `revision`, a terminal status only counts once it refers to the
//! submitted revision. An API that omits `revision` must switch the stack out of `STABLE`
//! before answering the `PUT`, otherwise the first poll may return the previous outputs.
//!
//! `DELETE {endpoint}/stacks/{name}` starts a teardown, finished once the stack answers 404.

use std::time::Duration;

use anyhow::{Context, Result};
use backon::{ConstantBuilder, Retryable};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{Provider, StackOutputs};
use crate::template::StackTemplate;

/// Default timeout for a single API request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between status polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of polls before giving up on a stack (one hour at the default interval).
const DEFAULT_MAX_POLLS: usize = 720;

/// Header carrying the hash of the submitted template.
pub const REVISION_HEADER: &str = "X-Stackup-Revision";

/// Lifecycle status reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    Pending,
    InProgress,
    Stable,
    Failed,
}

impl StackStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stable | Self::Failed)
    }
}

/// Body of a status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: StackStatus,
    #[serde(default)]
    pub outputs: StackOutputs,
    #[serde(default)]
    pub reason: Option<String>,
    /// Hash of the template this status refers to, when the API tracks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl StatusResponse {
    /// Whether this status is the final word on the template with hash `revision`.
    pub fn settles(&self, revision: &str) -> bool {
        self.status.is_terminal() && self.revision.as_deref().is_none_or(|r| r == revision)
    }
}

/// Returned by a poll while the stack has not reached a terminal status.
#[derive(Debug, thiserror::Error)]
#[error("stack '{stack}' is still {status}")]
struct StillInProgress {
    stack: String,
    status: StackStatus,
}

/// Configuration for the HTTP provider.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Base URL of the provisioning API.
    pub endpoint: Url,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    pub poll_interval: Duration,
    pub max_polls: usize,
    pub request_timeout: Duration,
}

impl HttpProviderConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_polls(mut self, max_polls: usize) -> Self {
        self.max_polls = max_polls;
        self
    }
}

/// Talks to the provisioning API, one stack at a time.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    pub fn new(mut config: HttpProviderConfig) -> Result<Self> {
        // `Url::join` replaces the last segment unless the base ends with a slash.
        if !config.endpoint.path().ends_with('/') {
            let path = format!("{}/", config.endpoint.path());
            config.endpoint.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// The URL of a stack resource.
    pub fn stack_url(&self, stack: &str) -> Result<Url> {
        self.config
            .endpoint
            .join(&format!("stacks/{}", stack))
            .context("Failed to build stack URL")
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.request(method, url);
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Fetch the current status of a stack, `None` on 404.
    async fn status(&self, stack: &str) -> Result<Option<StatusResponse>> {
        let response = self
            .request(reqwest::Method::GET, self.stack_url(stack)?)
            .send()
            .await
            .with_context(|| format!("Failed to query status of stack {}", stack))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response
            .error_for_status()
            .with_context(|| format!("Status request for stack {} was rejected", stack))?;

        let status = response
            .json()
            .await
            .with_context(|| format!("Failed to parse status of stack {}", stack))?;

        Ok(Some(status))
    }

    /// Poll until `done` accepts the latest status, or the poll budget runs out.
    async fn wait_for<F>(&self, stack: &str, done: F) -> Result<Option<StatusResponse>>
    where
        F: Fn(Option<&StatusResponse>) -> bool + Send + Sync,
    {
        let this = &*self;
        let done = &done;
        let poll = move || async move {
            let status = this.status(stack).await?;
            if done(status.as_ref()) {
                return Ok(status);
            }

            Err(anyhow::Error::new(StillInProgress {
                stack: stack.to_string(),
                status: status.map_or(StackStatus::Pending, |s| s.status),
            }))
        };

        let result = poll
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.config.poll_interval)
                    .with_max_times(self.config.max_polls),
            )
            .sleep(tokio::time::sleep)
            .when(|e: &anyhow::Error| e.is::<StillInProgress>())
            .notify(|e: &anyhow::Error, _| tracing::trace!(stack, status = %e, "Polling"))
            .await;

        match result {
            Err(e) if e.is::<StillInProgress>() => Err(e.context(format!(
                "Gave up after {} polls",
                self.config.max_polls
            ))),
            other => other,
        }
    }
}

/// Turn a terminal status into the stack's outputs.
fn outputs_of(stack: &str, status: Option<StatusResponse>) -> Result<StackOutputs> {
    let Some(status) = status else {
        anyhow::bail!("Stack {} disappeared while being applied", stack);
    };

    match status.status {
        StackStatus::Stable => Ok(status.outputs),
        StackStatus::Failed => anyhow::bail!(
            "{}",
            status.reason.as_deref().unwrap_or("provider reported FAILED without a reason")
        ),
        other => anyhow::bail!("Stack {} ended in non-terminal status {}", stack, other),
    }
}

impl Provider for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn apply_stack(&mut self, template: &StackTemplate) -> Result<StackOutputs> {
        let stack = template.name.as_str();
        let revision = template.compute_hash();

        self.request(reqwest::Method::PUT, self.stack_url(stack)?)
            .header(REVISION_HEADER, &revision)
            .json(template)
            .send()
            .await
            .with_context(|| format!("Failed to submit stack {}", stack))?
            .error_for_status()
            .with_context(|| format!("Stack {} was rejected", stack))?;

        tracing::debug!(stack, revision = %revision, endpoint = %self.config.endpoint, "Stack submitted");

        let status = self
            .wait_for(stack, |s| s.is_some_and(|s| s.settles(&revision)))
            .await?;

        outputs_of(stack, status)
    }

    async fn destroy_stack(&mut self, stack: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, self.stack_url(stack)?)
            .send()
            .await
            .with_context(|| format!("Failed to request deletion of stack {}", stack))?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(stack, "Stack already absent");
            return Ok(());
        }
        response
            .error_for_status()
            .with_context(|| format!("Deletion of stack {} was rejected", stack))?;

        let status = self
            .wait_for(stack, |s| {
                s.is_none_or(|s| s.status == StackStatus::Failed)
            })
            .await?;

        if let Some(status) = status {
            anyhow::bail!(
                "{}",
                status.reason.as_deref().unwrap_or("provider reported FAILED during deletion")
            );
        }

        Ok(())
    }

    async fn describe_outputs(&mut self, stack: &str) -> Result<Option<StackOutputs>> {
        match self.status(stack).await? {
            None => Ok(None),
            Some(status) if status.status == StackStatus::Stable => Ok(Some(status.outputs)),
            Some(status) => anyhow::bail!("Stack {} is {}", stack, status.status),
        }
    }
}
