//! Declarative descriptions of single provisionable resources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The kinds of resources the builder emits.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Cluster,
    Secret,
    Certificate,
    LoadBalancedService,
    AutoscalingPolicy,
    DnsZoneReference,
}

/// A parameter value of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    /// A concrete value.
    Literal(serde_json::Value),
    /// The value of a named output exported by another stack.
    Output(String),
    /// An attribute of another resource of the same stack, resolved by the provider.
    Attribute { resource: String, attribute: String },
}

impl Param {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self::Output(name.into())
    }

    pub fn attribute(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Attribute {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

/// Description of one resource to provision.
///
/// Built once per run, never mutated after [`ResourceSpecBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub name: String,
    pub params: BTreeMap<String, Param>,
    /// Names of resources of the same stack this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceSpec {
    pub fn builder(kind: ResourceKind, name: impl Into<String>) -> ResourceSpecBuilder {
        ResourceSpecBuilder {
            spec: ResourceSpec {
                kind,
                name: name.into(),
                params: BTreeMap::new(),
                depends_on: Vec::new(),
            },
        }
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    /// The literal value of a parameter, if it is one.
    pub fn literal(&self, name: &str) -> Option<&serde_json::Value> {
        match self.params.get(name) {
            Some(Param::Literal(v)) => Some(v),
            _ => None,
        }
    }

    /// Names of the stack outputs this resource imports.
    pub fn output_refs(&self) -> impl Iterator<Item = &str> {
        self.params.values().filter_map(|p| match p {
            Param::Output(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Builder for a [`ResourceSpec`].
#[derive(Debug, Clone)]
pub struct ResourceSpecBuilder {
    spec: ResourceSpec,
}

impl ResourceSpecBuilder {
    /// Set a literal parameter.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.spec.params.insert(name.into(), Param::literal(value));
        self
    }

    /// Set a literal parameter when a value is present.
    pub fn set_opt<V: Into<serde_json::Value>>(
        self,
        name: impl Into<String>,
        value: Option<V>,
    ) -> Self {
        match value {
            Some(value) => self.set(name, value),
            None => self,
        }
    }

    /// Import an output of another stack.
    pub fn import(mut self, name: impl Into<String>, output: impl Into<String>) -> Self {
        self.spec.params.insert(name.into(), Param::output(output));
        self
    }

    /// Reference an attribute of another resource of the same stack and depend on it.
    pub fn reference(
        mut self,
        name: impl Into<String>,
        resource: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        let resource = resource.into();
        self = self.depends_on(resource.clone());
        self.spec
            .params
            .insert(name.into(), Param::attribute(resource, attribute));
        self
    }

    pub fn depends_on(mut self, resource: impl Into<String>) -> Self {
        let resource = resource.into();
        if !self.spec.depends_on.contains(&resource) {
            self.spec.depends_on.push(resource);
        }
        self
    }

    pub fn build(self) -> ResourceSpec {
        self.spec
    }
}
