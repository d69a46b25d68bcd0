//! Records of applied stacks, kept next to the deployment artifacts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::provider::StackOutputs;

/// What a provider needs to remember about one applied stack.
///
/// Saved as `{outdir}/{stack}.state.json` after a successful apply and used to skip
/// re-applying a stack whose template did not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRecord {
    pub stack: String,
    /// SHA-256 of the applied template.
    pub template_hash: String,
    /// RFC 3339 timestamp of the apply.
    pub applied_at: String,
    /// Version of stackup that applied the stack.
    pub stackup_version: String,
    pub outputs: StackOutputs,
    /// Provider handles of what was created, e.g. container and network IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handles: Vec<ResourceHandle>,
}

/// A provider-side object backing a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceHandle {
    Network { resource: String, id: String },
    Container { resource: String, id: String },
}

impl StackRecord {
    pub fn new(stack: impl Into<String>, template_hash: String, outputs: StackOutputs) -> Self {
        Self {
            stack: stack.into(),
            template_hash,
            applied_at: chrono::Utc::now().to_rfc3339(),
            stackup_version: env!("CARGO_PKG_VERSION").to_string(),
            outputs,
            handles: Vec::new(),
        }
    }

    pub fn path(dir: &Path, stack: &str) -> PathBuf {
        dir.join(format!("{}.state.json", stack))
    }

    /// Save this record to a file.
    ///
    /// The file is written as formatted JSON for human readability.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create state directory {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize stack record")?;

        std::fs::write(path, json)
            .context(format!("Failed to write stack record to {}", path.display()))?;

        Ok(())
    }

    /// Load a record, `None` if the file does not exist.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read stack record from {}", path.display()))?;

        let record: Self =
            serde_json::from_str(&content).context("Failed to parse stack record JSON")?;

        Ok(Some(record))
    }

    /// Whether this record was produced by applying a template with `hash`.
    pub fn matches(&self, hash: &str) -> bool {
        self.template_hash == hash
    }
}
