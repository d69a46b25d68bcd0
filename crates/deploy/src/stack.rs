//! Stacks: named groups of resources sharing a lifecycle.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::ResourceSpec;

/// A value exported by a stack for other stacks to import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Export name, unique across the deployment.
    pub name: String,
    /// The resource producing the value.
    pub resource: String,
    /// The attribute of the resource to export.
    pub attribute: String,
}

/// A named collection of resources created, updated and destroyed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub resources: Vec<ResourceSpec>,
    /// Stacks that must be applied before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Tags applied to every resource of the stack.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            depends_on: Vec::new(),
            tags: BTreeMap::new(),
            outputs: Vec::new(),
        }
    }

    pub fn resource(mut self, resource: ResourceSpec) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn depends_on(mut self, stack: impl Into<String>) -> Self {
        self.depends_on.push(stack.into());
        self
    }

    pub fn tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn output(
        mut self,
        name: impl Into<String>,
        resource: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        self.outputs.push(OutputSpec {
            name: name.into(),
            resource: resource.into(),
            attribute: attribute.into(),
        });
        self
    }

    pub fn get(&self, resource: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.name == resource)
    }

    /// Names of the outputs of other stacks imported by any resource of this stack.
    pub fn imported_outputs(&self) -> Vec<&str> {
        let mut imports: Vec<&str> = Vec::new();
        for name in self.resources.iter().flat_map(|r| r.output_refs()) {
            if !imports.contains(&name) {
                imports.push(name);
            }
        }
        imports
    }
}
