//! Rendering of stacks into provider-ready templates.
//!
//! A template is what a provider receives: every imported output replaced by its value,
//! stack tags copied onto each resource, same-stack references left symbolic for the
//! provider to resolve.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::{DeployError, Result},
    resource::{Param, ResourceKind},
    stack::{OutputSpec, Stack},
};

/// One resource of a rendered stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl ResourceTemplate {
    pub fn str_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_str())
    }

    pub fn int_property(&self, name: &str) -> Option<i64> {
        self.properties.get(name).and_then(|v| v.as_i64())
    }

    pub fn bool_property(&self, name: &str) -> Option<bool> {
        self.properties.get(name).and_then(|v| v.as_bool())
    }
}

/// A stack rendered for submission, resources in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTemplate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub resources: Vec<ResourceTemplate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
}

/// The JSON form of a same-stack attribute reference inside a template.
pub fn attribute_ref(resource: &str, attribute: &str) -> serde_json::Value {
    serde_json::json!({ "ref": { "resource": resource, "attribute": attribute } })
}

/// Decode a value produced by [`attribute_ref`].
pub fn parse_attribute_ref(value: &serde_json::Value) -> Option<(&str, &str)> {
    let reference = value.get("ref")?;
    Some((
        reference.get("resource")?.as_str()?,
        reference.get("attribute")?.as_str()?,
    ))
}

impl StackTemplate {
    /// Render `stack`, looking imported outputs up through `lookup`.
    ///
    /// Fails with [`DeployError::UndefinedOutput`] on the first import `lookup` cannot
    /// answer, so a stack is never submitted with a dangling reference.
    pub fn render<'a, F>(stack: &Stack, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let mut resources = Vec::with_capacity(stack.resources.len());

        for resource in &stack.resources {
            let mut properties = BTreeMap::new();
            for (name, param) in &resource.params {
                let value = match param {
                    Param::Literal(value) => value.clone(),
                    Param::Output(output) => {
                        let value = lookup(output).ok_or_else(|| DeployError::UndefinedOutput {
                            stack: stack.name.clone(),
                            output: output.clone(),
                        })?;
                        serde_json::Value::String(value.to_string())
                    }
                    Param::Attribute {
                        resource,
                        attribute,
                    } => attribute_ref(resource, attribute),
                };
                properties.insert(name.clone(), value);
            }

            resources.push(ResourceTemplate {
                name: resource.name.clone(),
                kind: resource.kind,
                depends_on: resource.depends_on.clone(),
                properties,
                tags: stack.tags.clone(),
            });
        }

        Ok(Self {
            name: stack.name.clone(),
            depends_on: stack.depends_on.clone(),
            tags: stack.tags.clone(),
            resources,
            outputs: stack.outputs.clone(),
        })
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceTemplate> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceTemplate> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    /// SHA-256 of the template, hex encoded.
    ///
    /// Equal templates always hash equal: every map in a template is ordered, so the JSON
    /// serialization is stable.
    pub fn compute_hash(&self) -> String {
        let json =
            serde_json::to_string(self).expect("StackTemplate serialization should never fail");

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}
