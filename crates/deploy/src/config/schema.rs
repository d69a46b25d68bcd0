//! The configuration schema: every key the pipeline knows about.

use std::{collections::BTreeMap, net::Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

use super::source::SourceLayer;

/// Names of the keys in the standard schema.
pub mod keys {
    pub const STACK_NAME_PREFIX: &str = "STACK_NAME_PREFIX";
    pub const IMAGE: &str = "IMAGE_PATH_AND_TAG";
    pub const PORT: &str = "PORT";
    pub const COST_CENTER: &str = "COST_CENTER";
    pub const NETWORK_STACK_NAME: &str = "NETWORK_STACK_NAME";
    pub const VPC_CIDR: &str = "VPC_CIDR";
    pub const MAX_AZS: &str = "MAX_AZS";
    pub const DESIRED_COUNT: &str = "DESIRED_COUNT";
    pub const CPU: &str = "CPU";
    pub const MEMORY_LIMIT_MIB: &str = "MEMORY_LIMIT_MIB";
    pub const HEALTH_CHECK_INTERVAL_SECS: &str = "HEALTH_CHECK_INTERVAL_SECS";
    pub const HEALTH_CHECK_TIMEOUT_SECS: &str = "HEALTH_CHECK_TIMEOUT_SECS";
    pub const CONTAINER_ENV: &str = "CONTAINER_ENV";
    pub const CONTAINER_ENV_NAME: &str = "CONTAINER_ENV_NAME";
    pub const SECRET_NAME: &str = "SECRET_NAME";
    pub const HOST_NAME: &str = "HOST_NAME";
    pub const HOSTED_ZONE_NAME: &str = "HOSTED_ZONE_NAME";
    pub const HOSTED_ZONE_ID: &str = "HOSTED_ZONE_ID";
    pub const CERTIFICATE_ARN: &str = "CERTIFICATE_ARN";
    pub const REDIRECT_HTTP: &str = "REDIRECT_HTTP";
    pub const AUTOSCALING_MIN: &str = "AUTOSCALING_MIN";
    pub const AUTOSCALING_MAX: &str = "AUTOSCALING_MAX";
    pub const CPU_TARGET_PERCENT: &str = "CPU_TARGET_PERCENT";
    pub const MEMORY_TARGET_PERCENT: &str = "MEMORY_TARGET_PERCENT";
    pub const STICKY_SESSIONS: &str = "STICKY_SESSIONS";
    pub const SCALING_METRIC_NAME: &str = "SCALING_METRIC_NAME";
    pub const SCALING_METRIC_TARGET: &str = "SCALING_METRIC_TARGET";
    pub const SCALING_STEPS: &str = "SCALING_STEPS";
    pub const STICKY_COOKIE_DURATION_SECS: &str = "STICKY_COOKIE_DURATION_SECS";
    pub const TAGS: &str = "TAGS";
}

/// Feature group names of the standard schema.
pub mod features {
    pub const DNS: &str = "dns";
    pub const AUTOSCALING: &str = "autoscaling";
    pub const SCALING_METRIC: &str = "scaling-metric";
}

/// Named environments accepted when none are configured.
pub const DEFAULT_ENVIRONMENTS: [&str; 3] = ["dev", "staging", "prod"];

/// The type a configuration value must parse as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ValueType {
    String,
    Int,
    Bool,
    /// An IPv4 CIDR block such as `10.0.0.0/16`.
    Cidr,
    /// A map of tag names to values, written `key=value,key2=value2` in scalar form.
    TagMap,
}

/// A resolved, type-checked configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i64),
    Bool(bool),
    String(String),
    Tags(BTreeMap<String, String>),
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Tags(tags) => {
                let joined = tags
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "{}", joined)
            }
        }
    }
}

impl ValueType {
    /// Parse a raw scalar into a value of this type.
    pub fn parse(&self, key: &str, raw: &str) -> Result<ConfigValue> {
        let invalid = || DeployError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            expected: self.to_string(),
        };

        let raw = raw.trim();
        match self {
            Self::String => Ok(ConfigValue::String(raw.to_string())),
            Self::Int => raw.parse::<i64>().map(ConfigValue::Int).map_err(|_| invalid()),
            Self::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(ConfigValue::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(ConfigValue::Bool(false)),
                _ => Err(invalid()),
            },
            Self::Cidr => {
                let (addr, len) = raw.split_once('/').ok_or_else(invalid)?;
                addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
                match len.parse::<u8>() {
                    Ok(len) if len <= 32 => Ok(ConfigValue::String(raw.to_string())),
                    _ => Err(invalid()),
                }
            }
            Self::TagMap => {
                let mut tags = BTreeMap::new();
                for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
                    let (k, v) = pair.split_once('=').ok_or_else(invalid)?;
                    let k = k.trim();
                    if k.is_empty() {
                        return Err(invalid());
                    }
                    tags.insert(k.to_string(), v.trim().to_string());
                }
                Ok(ConfigValue::Tags(tags))
            }
        }
    }
}

/// Which layer wins for a key found in several sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SourcePrecedence {
    EnvironmentFirst,
    ContextFirst,
}

impl SourcePrecedence {
    /// The layer consulted first.
    pub fn preferred(&self) -> SourceLayer {
        match self {
            Self::EnvironmentFirst => SourceLayer::Environment,
            Self::ContextFirst => SourceLayer::Context,
        }
    }
}

/// One configuration key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigKey {
    /// The primary name of the key.
    pub name: String,
    /// Alternative names, consulted after the primary name within each source.
    pub aliases: Vec<String>,
    /// Whether the key must resolve to a non-empty value.
    pub required: bool,
    /// The type the value must parse as.
    pub value_type: ValueType,
    /// Raw default used when an optional key is absent from every source.
    pub default: Option<String>,
    /// Layer order for this key. `None` follows the resolver's source order.
    pub precedence: Option<SourcePrecedence>,
}

impl ConfigKey {
    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            required: true,
            value_type,
            default: None,
            precedence: None,
        }
    }

    pub fn optional(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            required: false,
            ..Self::required(name, value_type)
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn precedence(mut self, precedence: SourcePrecedence) -> Self {
        self.precedence = Some(precedence);
        self
    }

    /// The primary name followed by every alias.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// A set of keys that must be configured together or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGroup {
    pub name: String,
    pub keys: Vec<String>,
}

/// The explicit configuration schema passed through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSchema {
    keys: Vec<ConfigKey>,
    features: Vec<FeatureGroup>,
    environments: Vec<String>,
}

impl ConfigSchema {
    /// An empty schema accepting the default named environments.
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            features: Vec::new(),
            environments: DEFAULT_ENVIRONMENTS.iter().map(|e| e.to_string()).collect(),
        }
    }

    pub fn key(mut self, key: ConfigKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn feature(mut self, name: impl Into<String>, keys: &[&str]) -> Self {
        self.features.push(FeatureGroup {
            name: name.into(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        });
        self
    }

    /// Replace the allow-list of named environments.
    pub fn environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environments = environments.into_iter().map(Into::into).collect();
        self
    }

    pub fn keys(&self) -> &[ConfigKey] {
        &self.keys
    }

    pub fn features(&self) -> &[FeatureGroup] {
        &self.features
    }

    pub fn allowed_environments(&self) -> &[String] {
        &self.environments
    }

    pub fn get(&self, name: &str) -> Option<&ConfigKey> {
        self.keys.iter().find(|k| k.name == name)
    }

    pub fn feature_group(&self, name: &str) -> Option<&FeatureGroup> {
        self.features.iter().find(|f| f.name == name)
    }

    /// The schema of the network + load-balanced container service deployment.
    ///
    /// Required keys are the union of what every known preset needs. Defaults that differ
    /// between presets are plain optional keys so operators pick them per environment.
    pub fn standard() -> Self {
        use ValueType::*;
        use keys::*;

        Self::new()
            .key(ConfigKey::required(STACK_NAME_PREFIX, String))
            .key(ConfigKey::required(IMAGE, String).alias("DOCKER_IMAGE"))
            .key(ConfigKey::required(PORT, Int))
            .key(ConfigKey::required(COST_CENTER, String).precedence(SourcePrecedence::ContextFirst))
            .key(ConfigKey::optional(NETWORK_STACK_NAME, String))
            .key(
                ConfigKey::optional(VPC_CIDR, Cidr)
                    .default_value("10.0.0.0/16")
                    .precedence(SourcePrecedence::ContextFirst),
            )
            .key(ConfigKey::optional(MAX_AZS, Int).default_value("2"))
            .key(ConfigKey::optional(DESIRED_COUNT, Int).default_value("1"))
            .key(ConfigKey::optional(CPU, Int).default_value("256"))
            .key(ConfigKey::optional(MEMORY_LIMIT_MIB, Int).default_value("1024"))
            .key(ConfigKey::optional(HEALTH_CHECK_INTERVAL_SECS, Int).default_value("120"))
            .key(ConfigKey::optional(HEALTH_CHECK_TIMEOUT_SECS, Int).default_value("60"))
            .key(ConfigKey::optional(CONTAINER_ENV, String).alias("R_CONFIG_ACTIVE"))
            .key(ConfigKey::optional(CONTAINER_ENV_NAME, String).default_value("ENV"))
            .key(ConfigKey::optional(SECRET_NAME, String))
            .key(ConfigKey::optional(HOST_NAME, String))
            .key(ConfigKey::optional(HOSTED_ZONE_NAME, String))
            .key(ConfigKey::optional(HOSTED_ZONE_ID, String))
            .key(ConfigKey::optional(CERTIFICATE_ARN, String))
            .key(ConfigKey::optional(REDIRECT_HTTP, Bool).default_value("false"))
            .key(ConfigKey::optional(AUTOSCALING_MIN, Int))
            .key(ConfigKey::optional(AUTOSCALING_MAX, Int))
            .key(ConfigKey::optional(CPU_TARGET_PERCENT, Int).default_value("50"))
            .key(ConfigKey::optional(MEMORY_TARGET_PERCENT, Int).default_value("50"))
            .key(ConfigKey::optional(SCALING_METRIC_NAME, String))
            .key(ConfigKey::optional(SCALING_METRIC_TARGET, Int))
            .key(ConfigKey::optional(SCALING_STEPS, String))
            .key(ConfigKey::optional(STICKY_SESSIONS, Bool).default_value("false"))
            .key(ConfigKey::optional(STICKY_COOKIE_DURATION_SECS, Int))
            .key(ConfigKey::optional(TAGS, TagMap))
            .feature(features::DNS, &[HOST_NAME, HOSTED_ZONE_NAME, HOSTED_ZONE_ID])
            .feature(features::AUTOSCALING, &[AUTOSCALING_MIN, AUTOSCALING_MAX])
            .feature(features::SCALING_METRIC, &[SCALING_METRIC_NAME, SCALING_METRIC_TARGET])
    }
}

impl Default for ConfigSchema {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_and_bool() {
        assert_eq!(ValueType::Int.parse("PORT", "8080").unwrap(), ConfigValue::Int(8080));
        assert!(ValueType::Int.parse("PORT", "eighty").is_err());
        assert_eq!(ValueType::Bool.parse("X", "Yes").unwrap(), ConfigValue::Bool(true));
        assert_eq!(ValueType::Bool.parse("X", "0").unwrap(), ConfigValue::Bool(false));
        assert!(ValueType::Bool.parse("X", "maybe").is_err());
    }

    #[test]
    fn test_parse_cidr() {
        assert!(ValueType::Cidr.parse("VPC_CIDR", "10.0.0.0/16").is_ok());
        assert!(ValueType::Cidr.parse("VPC_CIDR", "10.0.0.0").is_err());
        assert!(ValueType::Cidr.parse("VPC_CIDR", "10.0.0.0/33").is_err());
        assert!(ValueType::Cidr.parse("VPC_CIDR", "300.0.0.0/8").is_err());
    }

    #[test]
    fn test_parse_tag_map() {
        let value = ValueType::TagMap
            .parse("TAGS", "team=web, owner = ops,")
            .unwrap();
        let ConfigValue::Tags(tags) = value else {
            panic!("expected tags");
        };
        assert_eq!(tags.get("team").map(String::as_str), Some("web"));
        assert_eq!(tags.get("owner").map(String::as_str), Some("ops"));
        assert!(ValueType::TagMap.parse("TAGS", "novalue").is_err());
        assert!(ValueType::TagMap.parse("TAGS", "=x").is_err());
    }

    #[test]
    fn test_invalid_value_names_expected_type() {
        let err = ValueType::Cidr.parse("VPC_CIDR", "nope").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value 'nope' for VPC_CIDR: expected cidr"
        );
    }

    #[test]
    fn test_standard_schema_required_keys() {
        let schema = ConfigSchema::standard();
        let required: Vec<&str> = schema
            .keys()
            .iter()
            .filter(|k| k.required)
            .map(|k| k.name.as_str())
            .collect();
        assert_eq!(
            required,
            vec![keys::STACK_NAME_PREFIX, keys::IMAGE, keys::PORT, keys::COST_CENTER]
        );
        let image = schema.get(keys::IMAGE).unwrap();
        assert_eq!(image.names().collect::<Vec<_>>(), vec!["IMAGE_PATH_AND_TAG", "DOCKER_IMAGE"]);
        assert!(schema.feature_group(features::DNS).is_some());
        assert_eq!(
            schema.get(keys::COST_CENTER).unwrap().precedence,
            Some(SourcePrecedence::ContextFirst)
        );
        assert_eq!(schema.get(keys::PORT).unwrap().precedence, None);
        assert_eq!(schema.allowed_environments(), &["dev", "staging", "prod"]);
    }
}
