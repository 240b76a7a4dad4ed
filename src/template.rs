//! Rendered template model.
//!
//! This is the only thing the provisioning engine sees. Maps are `BTreeMap`s
//! and JSON objects keep sorted keys, so rendering the same stack twice yields
//! byte-identical output.
//!
//! ## Format
//!
//! ```json
//! {
//!   "Parameters": { "<id>": { "Type": "...", "Default": "..." } },
//!   "Resources": {
//!     "<id>": {
//!       "Type": "AWS::EC2::Instance",
//!       "Properties": { ... },
//!       "DependsOn": ["<id>"],
//!       "Metadata": { ... },
//!       "CreationPolicy": { ... },
//!       "DeletionPolicy": "Retain"
//!     }
//!   },
//!   "Outputs": { "<name>": { "Value": ..., "Description": "..." } }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::token;

/// A complete provisioning template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion", default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

/// A deploy-time input, used for values looked up when the stack is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "BTreeSet::is_empty"
    )]
    pub depends_on: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_policy: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
}

/// A value exported from the stack after deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `DependsOn` may be a single string or a list.
fn one_or_many<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => BTreeSet::from([id]),
        OneOrMany::Many(ids) => ids.into_iter().collect(),
    })
}

impl Resource {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            properties: Map::new(),
            depends_on: BTreeSet::new(),
            metadata: None,
            creation_policy: None,
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Set a property, builder style.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    /// Set a property only when a value is present.
    pub fn with_opt(self, key: &str, value: Option<Value>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.depends_on.insert(id.to_string());
        self
    }

    /// Keep the physical resource when it is removed from the stack.
    pub fn retained(mut self) -> Self {
        self.deletion_policy = Some("Retain".to_string());
        self.update_replace_policy = Some("Retain".to_string());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Logical IDs this resource needs to exist before it can be created.
    pub fn references(&self) -> BTreeSet<String> {
        let mut refs = self.depends_on.clone();
        for value in self.properties.values() {
            refs.extend(token::references(value));
        }
        if let Some(metadata) = &self.metadata {
            refs.extend(token::references(metadata));
        }
        refs
    }
}

impl Template {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Read a template from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse template: {}", path.display()))
    }

    /// Write the template as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut content = self.to_json_pretty().context("Failed to serialize template")?;
        content.push('\n');
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write template: {}", path.display()))
    }

    /// All resources of the given type, in logical-ID order.
    pub fn resources_of_type<'a>(
        &'a self,
        kind: &str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> {
        self.resources.iter().filter(move |(_, r)| r.kind == kind)
    }

    pub fn count_of_type(&self, kind: &str) -> usize {
        self.resources_of_type(kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_depends_on_accepts_string_or_list() {
        let template = Template::from_json(
            r#"{
                "Resources": {
                    "A": { "Type": "AWS::S3::Bucket", "DependsOn": "B" },
                    "B": { "Type": "AWS::S3::Bucket", "DependsOn": ["C", "D"] },
                    "C": { "Type": "AWS::S3::Bucket" },
                    "D": { "Type": "AWS::S3::Bucket" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(template.resources["A"].depends_on, BTreeSet::from(["B".to_string()]));
        assert_eq!(template.resources["B"].depends_on.len(), 2);
        assert!(template.resources["C"].depends_on.is_empty());
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let mut template = Template::default();
        template
            .resources
            .insert("Bucket".into(), Resource::new("AWS::S3::Bucket").retained());
        let json: Value = serde_json::from_str(&template.to_json_pretty().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "Resources": {
                    "Bucket": {
                        "Type": "AWS::S3::Bucket",
                        "DeletionPolicy": "Retain",
                        "UpdateReplacePolicy": "Retain"
                    }
                }
            })
        );
    }

    #[test]
    fn test_references_include_depends_on_and_metadata() {
        let resource = Resource::new("AWS::EC2::Instance")
            .with("SubnetId", json!({ "Ref": "Subnet1" }))
            .depends_on("Role1");
        let mut resource = resource;
        resource.metadata = Some(json!({ "x": { "Fn::GetAtt": ["Bucket1", "Arn"] } }));
        let refs: Vec<_> = resource.references().into_iter().collect();
        assert_eq!(refs, vec!["Bucket1", "Role1", "Subnet1"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out/template.json");
        let mut template = Template::default();
        template.resources.insert(
            "Vol".into(),
            Resource::new("AWS::EC2::Volume").with("Size", json!(30)),
        );
        template.save(&path).unwrap();
        assert_eq!(Template::load(&path).unwrap(), template);
    }
}
