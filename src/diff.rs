//! Desired-vs-deployed template diff.
//!
//! The provisioning engine computes the real change set; this is a preview of
//! it built from the two templates alone. Property changes that the engine can
//! only apply by recreating the physical resource are flagged as replacements,
//! since those lose instance state or volume data.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::template::{Resource, Template};

/// Properties whose update forces the engine to create a new physical resource.
const REPLACEMENT_PROPERTIES: &[(&str, &[&str])] = &[
    ("AWS::S3::Bucket", &["BucketName"]),
    ("AWS::EC2::VPC", &["CidrBlock", "InstanceTenancy"]),
    ("AWS::EC2::Subnet", &["AvailabilityZone", "CidrBlock", "VpcId"]),
    ("AWS::EC2::SecurityGroup", &["GroupDescription", "GroupName", "VpcId"]),
    ("AWS::EC2::NatGateway", &["AllocationId", "SubnetId"]),
    (
        "AWS::EC2::Instance",
        &["AvailabilityZone", "ImageId", "KeyName", "SubnetId", "Tenancy"],
    ),
    ("AWS::EC2::Volume", &["AvailabilityZone", "Encrypted", "SnapshotId"]),
    ("AWS::IAM::Role", &["Path", "RoleName"]),
];

/// Whether changing `property` on a resource of type `kind` replaces it.
pub fn requires_replacement(kind: &str, property: &str) -> bool {
    REPLACEMENT_PROPERTIES
        .iter()
        .find(|(k, _)| *k == kind)
        .is_some_and(|(_, props)| props.contains(&property))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Added,
    Removed,
    Modified,
}

impl Change {
    /// `+`, `-` or `~`
    pub fn marker(&self) -> char {
        match self {
            Self::Added => '+',
            Self::Removed => '-',
            Self::Modified => '~',
        }
    }
}

/// One changed property or resource attribute (`Metadata`, `DependsOn`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDiff {
    pub name: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub replacement: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDiff {
    pub kind: String,
    pub change: Change,
    /// Empty for added and removed resources.
    pub properties: Vec<PropertyDiff>,
    pub replacement: bool,
}

/// Every difference between two templates, keyed by logical ID or name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateDiff {
    pub resources: BTreeMap<String, ResourceDiff>,
    pub parameters: BTreeMap<String, Change>,
    pub outputs: BTreeMap<String, Change>,
}

impl TemplateDiff {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.parameters.is_empty() && self.outputs.is_empty()
    }

    /// Logical IDs of resources that would be recreated.
    pub fn replacements(&self) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, d)| d.change == Change::Modified && d.replacement)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Compare the deployed template with the one about to be deployed.
pub fn diff(deployed: &Template, desired: &Template) -> TemplateDiff {
    let mut result = TemplateDiff::default();

    for id in union(deployed.resources.keys(), desired.resources.keys()) {
        let change = match (deployed.resources.get(id), desired.resources.get(id)) {
            (None, Some(new)) => Some(ResourceDiff {
                kind: new.kind.clone(),
                change: Change::Added,
                properties: Vec::new(),
                replacement: false,
            }),
            (Some(old), None) => Some(ResourceDiff {
                kind: old.kind.clone(),
                change: Change::Removed,
                properties: Vec::new(),
                replacement: false,
            }),
            (Some(old), Some(new)) => diff_resource(old, new),
            (None, None) => None,
        };
        if let Some(change) = change {
            result.resources.insert(id.clone(), change);
        }
    }

    result.parameters = diff_entries(&deployed.parameters, &desired.parameters);
    result.outputs = diff_entries(&deployed.outputs, &desired.outputs);
    result
}

fn diff_resource(old: &Resource, new: &Resource) -> Option<ResourceDiff> {
    if old == new {
        return None;
    }
    if old.kind != new.kind {
        return Some(ResourceDiff {
            kind: new.kind.clone(),
            change: Change::Modified,
            properties: vec![PropertyDiff {
                name: "Type".to_string(),
                before: Some(Value::String(old.kind.clone())),
                after: Some(Value::String(new.kind.clone())),
                replacement: true,
            }],
            replacement: true,
        });
    }

    let mut properties = Vec::new();
    for key in union(old.properties.keys(), new.properties.keys()) {
        let (before, after) = (old.properties.get(key), new.properties.get(key));
        if before != after {
            properties.push(PropertyDiff {
                name: key.clone(),
                before: before.cloned(),
                after: after.cloned(),
                replacement: requires_replacement(&new.kind, key),
            });
        }
    }

    let (old_attrs, new_attrs) = (attributes(old), attributes(new));
    for key in union(old_attrs.keys(), new_attrs.keys()) {
        let (before, after) = (old_attrs.get(key), new_attrs.get(key));
        if before != after {
            properties.push(PropertyDiff {
                name: key.clone(),
                before: before.cloned(),
                after: after.cloned(),
                replacement: false,
            });
        }
    }

    let replacement = properties.iter().any(|p| p.replacement);
    Some(ResourceDiff {
        kind: new.kind.clone(),
        change: Change::Modified,
        properties,
        replacement,
    })
}

/// Everything but `Type` and `Properties`, as rendered.
fn attributes(resource: &Resource) -> Map<String, Value> {
    match serde_json::to_value(resource) {
        Ok(Value::Object(mut map)) => {
            map.remove("Type");
            map.remove("Properties");
            map
        }
        _ => Map::new(),
    }
}

fn diff_entries<T: PartialEq>(
    old: &BTreeMap<String, T>,
    new: &BTreeMap<String, T>,
) -> BTreeMap<String, Change> {
    union(old.keys(), new.keys())
        .into_iter()
        .filter_map(|key| {
            let change = match (old.get(key), new.get(key)) {
                (None, Some(_)) => Change::Added,
                (Some(_), None) => Change::Removed,
                (Some(a), Some(b)) if a != b => Change::Modified,
                _ => return None,
            };
            Some((key.clone(), change))
        })
        .collect()
}

fn union<'a>(
    a: impl Iterator<Item = &'a String>,
    b: impl Iterator<Item = &'a String>,
) -> BTreeSet<&'a String> {
    a.chain(b).collect()
}
