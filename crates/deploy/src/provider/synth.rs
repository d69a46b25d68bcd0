//! Offline provider writing rendered templates to disk.

use std::path::PathBuf;

use anyhow::{Context, Result};

use super::{Provider, StackOutputs};
use crate::template::StackTemplate;

/// The placeholder token standing in for an output that was never really produced.
pub fn placeholder(stack: &str, output: &str) -> String {
    format!("${{{}.{}}}", stack, output)
}

/// Writes `{outdir}/{stack}.template.json` for every applied stack.
///
/// Outputs come back as [`placeholder`] tokens, so downstream stacks render with
/// references instead of values.
#[derive(Debug, Clone)]
pub struct SynthProvider {
    outdir: PathBuf,
}

impl SynthProvider {
    pub fn new(outdir: impl Into<PathBuf>) -> Self {
        Self {
            outdir: outdir.into(),
        }
    }

    pub fn template_path(&self, stack: &str) -> PathBuf {
        self.outdir.join(format!("{}.template.json", stack))
    }
}

impl Provider for SynthProvider {
    fn name(&self) -> &'static str {
        "synth"
    }

    async fn apply_stack(&mut self, template: &StackTemplate) -> Result<StackOutputs> {
        tokio::fs::create_dir_all(&self.outdir)
            .await
            .context(format!("Failed to create output directory {}", self.outdir.display()))?;

        let path = self.template_path(&template.name);
        let json = serde_json::to_string_pretty(template).context("Failed to serialize template")?;
        tokio::fs::write(&path, json)
            .await
            .context(format!("Failed to write template to {}", path.display()))?;

        tracing::debug!(stack = %template.name, path = %path.display(), "Template written");

        Ok(template
            .outputs
            .iter()
            .map(|o| (o.name.clone(), placeholder(&template.name, &o.name)))
            .collect())
    }

    async fn destroy_stack(&mut self, stack: &str) -> Result<()> {
        let path = self.template_path(stack);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_file(&path)
                .await
                .context(format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    async fn describe_outputs(&mut self, stack: &str) -> Result<Option<StackOutputs>> {
        let path = self.template_path(stack);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .context(format!("Failed to read {}", path.display()))?;
        let template: StackTemplate =
            serde_json::from_str(&content).context("Failed to parse stack template")?;

        Ok(Some(
            template
                .outputs
                .iter()
                .map(|o| (o.name.clone(), placeholder(stack, &o.name)))
                .collect(),
        ))
    }
}
