//! Layered, fail-fast resolution of configuration keys.

use std::collections::BTreeMap;

use crate::error::{DeployError, Result};

use super::{
    schema::{ConfigKey, ConfigSchema, ConfigValue, ValueType},
    source::{ConfigSource, NamedEnvironment, RawValue},
};

/// Resolve a single key against `sources`, consulted in order; the first non-empty value wins.
///
/// A key with its own [`SourcePrecedence`](super::schema::SourcePrecedence) consults the
/// sources of its preferred layer first, keeping the given order within each layer.
///
/// Returns `Ok(None)` for an optional key without value or default, and
/// [`DeployError::MissingConfig`] for a required key without value.
pub fn resolve(key: &ConfigKey, sources: &[&dyn ConfigSource]) -> Result<Option<ConfigValue>> {
    Ok(resolve_with_origin(key, sources)?.map(|(value, _)| value))
}

fn resolve_with_origin(
    key: &ConfigKey,
    sources: &[&dyn ConfigSource],
) -> Result<Option<(ConfigValue, String)>> {
    let mut sources = sources.to_vec();
    if let Some(precedence) = key.precedence {
        let preferred = precedence.preferred();
        sources.sort_by_key(|source| source.layer() != preferred);
    }

    for source in sources {
        for name in key.names() {
            let Some(raw) = source.lookup(name) else {
                continue;
            };
            if raw.is_empty() {
                tracing::trace!(key = %key.name, name, source = source.name(), "Ignoring empty value");
                continue;
            }

            let value = match raw {
                RawValue::Scalar(s) => key.value_type.parse(&key.name, &s)?,
                RawValue::Table(table) if key.value_type == ValueType::TagMap => {
                    ConfigValue::Tags(table)
                }
                RawValue::Table(_) => {
                    return Err(DeployError::InvalidValue {
                        key: key.name.clone(),
                        value: "<table>".to_string(),
                        expected: key.value_type.to_string(),
                    });
                }
            };

            tracing::trace!(key = %key.name, name, source = source.name(), "Resolved configuration key");
            return Ok(Some((value, source.name().to_string())));
        }
    }

    if key.required {
        return Err(DeployError::MissingConfig {
            key: key.name.clone(),
        });
    }

    match &key.default {
        Some(default) => Ok(Some((
            key.value_type.parse(&key.name, default)?,
            "default".to_string(),
        ))),
        None => Ok(None),
    }
}

/// Resolves a whole schema against an ordered list of sources.
pub struct ConfigResolver {
    environment: NamedEnvironment,
    sources: Vec<Box<dyn ConfigSource>>,
}

impl ConfigResolver {
    pub fn new(environment: NamedEnvironment) -> Self {
        Self {
            environment,
            sources: Vec::new(),
        }
    }

    /// Append a source. Sources added first take precedence.
    pub fn source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn environment(&self) -> &NamedEnvironment {
        &self.environment
    }

    /// Resolve a single key against this resolver's sources.
    pub fn resolve(&self, key: &ConfigKey) -> Result<Option<ConfigValue>> {
        resolve(key, &self.source_refs())
    }

    /// Resolve every key of the schema, failing on the first invalid or missing one.
    pub fn resolve_all(&self, schema: &ConfigSchema) -> Result<ResolvedConfig> {
        let sources = self.source_refs();
        let mut values = BTreeMap::new();
        let mut origins = BTreeMap::new();

        for key in schema.keys() {
            if let Some((value, origin)) = resolve_with_origin(key, &sources)? {
                origins.insert(key.name.clone(), origin);
                values.insert(key.name.clone(), value);
            }
        }

        tracing::info!(
            environment = %self.environment,
            resolved = values.len(),
            sources = ?sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Configuration resolved"
        );

        Ok(ResolvedConfig {
            environment: self.environment.clone(),
            schema: schema.clone(),
            values,
            origins,
        })
    }

    fn source_refs(&self) -> Vec<&dyn ConfigSource> {
        self.sources.iter().map(|s| s.as_ref()).collect()
    }
}

/// The validated result of resolving a schema.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    environment: NamedEnvironment,
    schema: ConfigSchema,
    values: BTreeMap<String, ConfigValue>,
    origins: BTreeMap<String, String>,
}

impl ResolvedConfig {
    pub fn environment(&self) -> &NamedEnvironment {
        &self.environment
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The name of the source that supplied `key`, or `default`.
    pub fn origin(&self, key: &str) -> Option<&str> {
        self.origins.get(key).map(String::as_str)
    }

    /// Every resolved value with its origin, in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ConfigValue, &str)> {
        self.values.iter().map(|(k, v)| {
            let origin = self.origins.get(k).map(String::as_str).unwrap_or("default");
            (k.as_str(), v, origin)
        })
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ConfigValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(ConfigValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(ConfigValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn tags(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        match self.values.get(key) {
            Some(ConfigValue::Tags(t)) => Some(t),
            _ => None,
        }
    }

    pub fn require_string(&self, key: &str) -> Result<&str> {
        self.string(key).ok_or_else(|| missing(key))
    }

    pub fn require_int(&self, key: &str) -> Result<i64> {
        self.int(key).ok_or_else(|| missing(key))
    }

    /// Whether a feature group is enabled.
    ///
    /// All keys of the group set enables it, none set disables it, anything in between is
    /// a [`DeployError::IncompleteFeature`].
    pub fn feature(&self, name: &str) -> Result<bool> {
        let Some(group) = self.schema.feature_group(name) else {
            return Ok(false);
        };

        let missing: Vec<String> = group
            .keys
            .iter()
            .filter(|k| !self.is_set(k))
            .cloned()
            .collect();

        match missing.len() {
            0 => Ok(true),
            n if n == group.keys.len() => Ok(false),
            _ => Err(DeployError::IncompleteFeature {
                feature: group.name.clone(),
                missing,
            }),
        }
    }
}

fn missing(key: &str) -> DeployError {
    DeployError::MissingConfig {
        key: key.to_string(),
    }
}
