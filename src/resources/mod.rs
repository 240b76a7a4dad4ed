//! Typed resource declarations.
//!
//! Each constructor takes the stack, a construct id and a props struct, adds
//! one or more template resources, and returns a small handle carrying the
//! logical IDs other declarations need to reference it.

pub mod ec2;
pub mod iam;
pub mod s3;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::template::Resource;

/// What happens to the physical resource when it leaves the stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    #[default]
    Retain,
    Destroy,
}

impl RemovalPolicy {
    pub(crate) fn apply(self, resource: Resource) -> Resource {
        match self {
            Self::Retain => resource.retained(),
            Self::Destroy => {
                let mut resource = resource;
                resource.deletion_policy = Some("Delete".to_string());
                resource.update_replace_policy = Some("Delete".to_string());
                resource
            }
        }
    }
}

/// `[{ "Key": "Name", "Value": name }]`
pub(crate) fn name_tags(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}
