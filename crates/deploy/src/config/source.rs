//! Configuration sources: the process environment and the named-environment context file.

use std::{collections::BTreeMap, path::Path};

use figment::{
    Figment,
    providers::{Format, Toml},
};
use serde::Deserialize;

use crate::error::{DeployError, Result};

/// The default name of the context file.
pub const CONTEXT_FILENAME: &str = "Stackup.toml";

/// Context entry overriding the allow-list of named environments.
const ENVIRONMENTS_ENTRY: &str = "environments";

/// A raw value as found in a source, before type checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Scalar(String),
    Table(BTreeMap<String, String>),
}

impl RawValue {
    /// Whether the value counts as absent.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Scalar(s) => s.trim().is_empty(),
            Self::Table(t) => t.is_empty(),
        }
    }
}

/// The kind of layer a source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SourceLayer {
    /// Explicitly set process environment variables.
    Environment,
    /// The named-environment context map.
    Context,
}

/// A place configuration values can be looked up in.
pub trait ConfigSource: Send + Sync {
    /// Human-readable name of the source, used in logs and reports.
    fn name(&self) -> &str;

    fn layer(&self) -> SourceLayer;

    /// Look up a single key. Empty values may be returned; the resolver skips them.
    fn lookup(&self, key: &str) -> Option<RawValue>;
}

/// A deployment-target label, checked against an allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedEnvironment(String);

impl NamedEnvironment {
    /// Validate `label` against the allowed environments.
    pub fn parse(label: &str, allowed: &[String]) -> Result<Self> {
        let label = label.trim();
        if label.is_empty() || !allowed.iter().any(|a| a == label) {
            return Err(DeployError::InvalidEnvironment {
                label: label.to_string(),
                allowed: allowed.to_vec(),
            });
        }
        Ok(Self(label.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NamedEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Values taken from environment variables.
///
/// The variables are captured once when the source is built so the resolver never sees the
/// environment change under it.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: Option<String>,
    vars: BTreeMap<String, String>,
}

impl EnvSource {
    /// Snapshot the current process environment.
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build a source from explicit variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: None,
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Only read variables named `{prefix}{KEY}`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

impl ConfigSource for EnvSource {
    fn name(&self) -> &str {
        "environment"
    }

    fn layer(&self) -> SourceLayer {
        SourceLayer::Environment
    }

    fn lookup(&self, key: &str) -> Option<RawValue> {
        let var = match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        };
        self.vars.get(&var).cloned().map(RawValue::Scalar)
    }
}

/// Values from one named-environment layer of the context file.
///
/// The file holds one table per environment plus an optional `[default]` table whose
/// values apply to every environment:
///
/// ```toml
/// [default]
/// COST_CENTER = "1234"
///
/// [dev]
/// STACK_NAME_PREFIX = "acme-dev"
/// PORT = 8080
/// TAGS = { team = "web" }
/// ```
#[derive(Debug, Clone)]
pub struct ContextSource {
    label: String,
    values: BTreeMap<String, RawValue>,
}

impl ContextSource {
    /// Load the layer for `environment` from a TOML context file.
    pub fn load(path: &Path, environment: &NamedEnvironment) -> Result<Self> {
        if !path.exists() {
            return Err(DeployError::Context(format!(
                "context file not found: {}",
                path.display()
            )));
        }

        let figment = Figment::from(Toml::file(path).nested());
        let source = Self::from_figment(figment, environment)?;

        tracing::debug!(
            path = %path.display(),
            environment = %environment,
            keys = source.values.len(),
            "Context layer loaded"
        );

        Ok(source)
    }

    /// Parse the layer for `environment` from TOML text.
    pub fn from_toml_str(content: &str, environment: &NamedEnvironment) -> Result<Self> {
        Self::from_figment(Figment::from(Toml::string(content).nested()), environment)
    }

    /// Build a layer from explicit scalar values.
    pub fn from_values<I, K, V>(environment: &NamedEnvironment, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            label: format!("context[{}]", environment),
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), RawValue::Scalar(v.into())))
                .collect(),
        }
    }

    /// The `environments` allow-list of a context file, if it declares one.
    ///
    /// The list lives in the `[default]` table since it applies before any environment
    /// is selected.
    pub fn allowed_environments(path: &Path) -> Result<Option<Vec<String>>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::environments_from_figment(Figment::from(Toml::file(path).nested()))
    }

    /// Same as [`Self::allowed_environments`] for TOML text.
    pub fn allowed_environments_from_str(content: &str) -> Result<Option<Vec<String>>> {
        Self::environments_from_figment(Figment::from(Toml::string(content).nested()))
    }

    fn environments_from_figment(figment: Figment) -> Result<Option<Vec<String>>> {
        #[derive(Deserialize)]
        struct Environments {
            environments: Option<Vec<String>>,
        }

        let list: Environments = figment
            .select(figment::Profile::Default)
            .extract()
            .map_err(|e| DeployError::Context(e.to_string()))?;

        Ok(list.environments)
    }

    fn from_figment(figment: Figment, environment: &NamedEnvironment) -> Result<Self> {
        let table: BTreeMap<String, toml::Value> = figment
            .select(environment.as_str())
            .extract()
            .map_err(|e| DeployError::Context(e.to_string()))?;

        let mut values = BTreeMap::new();
        for (key, value) in table {
            if key == ENVIRONMENTS_ENTRY {
                continue;
            }
            let raw = match value {
                toml::Value::Table(entries) => RawValue::Table(
                    entries
                        .into_iter()
                        .map(|(k, v)| Ok((k, scalar_to_string(&key, v)?)))
                        .collect::<Result<_>>()?,
                ),
                other => RawValue::Scalar(scalar_to_string(&key, other)?),
            };
            values.insert(key, raw);
        }

        Ok(Self {
            label: format!("context[{}]", environment),
            values,
        })
    }

    /// Every key present in this layer.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

fn scalar_to_string(key: &str, value: toml::Value) -> Result<String> {
    match value {
        toml::Value::String(s) => Ok(s),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(d) => Ok(d.to_string()),
        other => Err(DeployError::InvalidValue {
            key: key.to_string(),
            value: other.to_string(),
            expected: "a scalar".to_string(),
        }),
    }
}

impl ConfigSource for ContextSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn layer(&self) -> SourceLayer {
        SourceLayer::Context
    }

    fn lookup(&self, key: &str) -> Option<RawValue> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["dev".to_string(), "prod".to_string()]
    }

    #[test]
    fn test_named_environment_allow_list() {
        assert_eq!(NamedEnvironment::parse("dev", &allowed()).unwrap().as_str(), "dev");
        assert!(matches!(
            NamedEnvironment::parse("qa", &allowed()),
            Err(DeployError::InvalidEnvironment { label, .. }) if label == "qa"
        ));
        assert!(NamedEnvironment::parse("", &allowed()).is_err());
    }

    #[test]
    fn test_env_source_prefix() {
        let source = EnvSource::from_vars([("APP_PORT", "8080"), ("PORT", "9090")]);
        assert_eq!(source.lookup("PORT"), Some(RawValue::Scalar("9090".to_string())));

        let source = source.with_prefix("APP_");
        assert_eq!(source.lookup("PORT"), Some(RawValue::Scalar("8080".to_string())));
        assert_eq!(source.lookup("MISSING"), None);
    }

    #[test]
    fn test_context_layer_merges_default_table() {
        let content = r#"
            [default]
            COST_CENTER = "1234"
            PORT = 80

            [dev]
            STACK_NAME_PREFIX = "acme-dev"
            PORT = 8080
            STICKY_SESSIONS = true
            TAGS = { team = "web", tier = 2 }

            [prod]
            STACK_NAME_PREFIX = "acme-prod"
        "#;
        let dev = NamedEnvironment::parse("dev", &allowed()).unwrap();
        let source = ContextSource::from_toml_str(content, &dev).unwrap();

        assert_eq!(source.lookup("PORT"), Some(RawValue::Scalar("8080".to_string())));
        assert_eq!(
            source.lookup("COST_CENTER"),
            Some(RawValue::Scalar("1234".to_string()))
        );
        assert_eq!(
            source.lookup("STICKY_SESSIONS"),
            Some(RawValue::Scalar("true".to_string()))
        );
        let Some(RawValue::Table(tags)) = source.lookup("TAGS") else {
            panic!("expected a tag table");
        };
        assert_eq!(tags.get("tier").map(String::as_str), Some("2"));
        assert_eq!(source.name(), "context[dev]");

        let prod = NamedEnvironment::parse("prod", &allowed()).unwrap();
        let source = ContextSource::from_toml_str(content, &prod).unwrap();
        assert_eq!(source.lookup("PORT"), Some(RawValue::Scalar("80".to_string())));
        assert_eq!(source.lookup("STICKY_SESSIONS"), None);
    }

    #[test]
    fn test_context_rejects_nested_arrays() {
        let content = r#"
            [dev]
            PORT = [1, 2]
        "#;
        let dev = NamedEnvironment::parse("dev", &allowed()).unwrap();
        assert!(matches!(
            ContextSource::from_toml_str(content, &dev),
            Err(DeployError::InvalidValue { key, .. }) if key == "PORT"
        ));
    }

    #[test]
    fn test_environments_allow_list_from_default_table() {
        let content = r#"
            [default]
            environments = ["dev", "qa"]
            COST_CENTER = "1234"

            [qa]
            PORT = 8080
        "#;
        assert_eq!(
            ContextSource::allowed_environments_from_str(content).unwrap(),
            Some(vec!["dev".to_string(), "qa".to_string()])
        );

        let qa = NamedEnvironment::parse("qa", &["qa".to_string()]).unwrap();
        let source = ContextSource::from_toml_str(content, &qa).unwrap();
        assert!(source.lookup("environments").is_none());
        assert_eq!(source.lookup("PORT"), Some(RawValue::Scalar("8080".to_string())));

        assert_eq!(
            ContextSource::allowed_environments_from_str("[dev]\nPORT = 1\n").unwrap(),
            None
        );
    }

    #[test]
    fn test_missing_context_file() {
        let dev = NamedEnvironment::parse("dev", &allowed()).unwrap();
        let err = ContextSource::load(Path::new("/nonexistent/Stackup.toml"), &dev).unwrap_err();
        assert!(matches!(err, DeployError::Context(_)));
    }
}
