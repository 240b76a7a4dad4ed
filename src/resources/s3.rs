//! Object storage.

use serde_json::{Value, json};

use super::RemovalPolicy;
use crate::error::StackResult;
use crate::stack::Stack;
use crate::template::Resource;
use crate::token;

#[derive(Debug, Clone, Default)]
pub struct BucketProps {
    /// Fixed physical name; the provisioning engine generates one when unset.
    pub bucket_name: Option<String>,
    pub versioned: bool,
    pub removal_policy: RemovalPolicy,
}

/// Handle to a declared bucket.
#[derive(Debug, Clone)]
pub struct Bucket {
    id: String,
}

impl Bucket {
    pub fn new(stack: &mut Stack, id: &str, props: BucketProps) -> StackResult<Self> {
        let resource = Resource::new("AWS::S3::Bucket")
            .with_opt("BucketName", props.bucket_name.map(|n| json!(n)))
            .with_opt(
                "VersioningConfiguration",
                props.versioned.then(|| json!({ "Status": "Enabled" })),
            );
        let resource = props.removal_policy.apply(resource);
        let id = stack.add_resource(&[id, "Resource"], resource)?;
        Ok(Self { id })
    }

    pub fn logical_id(&self) -> &str {
        &self.id
    }

    pub fn bucket_name(&self) -> Value {
        token::reference(&self.id)
    }

    pub fn arn(&self) -> Value {
        token::get_att(&self.id, "Arn")
    }
}
