//! Block storage volumes and attach grants.

use serde_json::{Value, json};

use super::instance::Instance;
use crate::error::{StackError, StackResult};
use crate::resources::RemovalPolicy;
use crate::resources::iam::{Grant, PolicyStatement, Role};
use crate::resources::name_tags;
use crate::stack::Stack;
use crate::template::Resource;
use crate::token;

#[derive(Debug, Clone)]
pub struct VolumeProps {
    /// Must match the zone of any instance the volume is attached to.
    pub availability_zone: Value,
    pub size_gib: u32,
    pub volume_name: Option<String>,
    pub volume_type: Option<String>,
    pub encrypted: bool,
    pub removal_policy: RemovalPolicy,
}

impl VolumeProps {
    pub fn new(availability_zone: Value, size_gib: u32) -> Self {
        Self {
            availability_zone,
            size_gib,
            volume_name: None,
            volume_type: None,
            encrypted: false,
            removal_policy: RemovalPolicy::Retain,
        }
    }
}

/// Handle to a declared volume.
#[derive(Debug, Clone)]
pub struct Volume {
    id: String,
    availability_zone: Value,
}

impl Volume {
    pub fn new(stack: &mut Stack, id: &str, props: VolumeProps) -> StackResult<Self> {
        if props.size_gib == 0 {
            return Err(StackError::InvalidValue {
                field: "size_gib".to_string(),
                value: "0".to_string(),
            });
        }
        if props.availability_zone.as_str() == Some("") {
            return Err(StackError::InvalidValue {
                field: "availability_zone".to_string(),
                value: String::new(),
            });
        }

        let resource = Resource::new("AWS::EC2::Volume")
            .with("AvailabilityZone", props.availability_zone.clone())
            .with("Encrypted", json!(props.encrypted))
            .with("Size", json!(props.size_gib))
            .with_opt("Tags", props.volume_name.as_deref().map(name_tags))
            .with_opt("VolumeType", props.volume_type.map(|t| json!(t)));
        let resource = props.removal_policy.apply(resource);
        let id = stack.add_resource(&[id, "Resource"], resource)?;

        Ok(Self {
            id,
            availability_zone: props.availability_zone,
        })
    }

    pub fn logical_id(&self) -> &str {
        &self.id
    }

    pub fn volume_id(&self) -> Value {
        token::reference(&self.id)
    }

    pub fn availability_zone(&self) -> &Value {
        &self.availability_zone
    }

    pub fn arn(&self, stack: &Stack) -> Value {
        stack.format_arn("ec2", "volume", self.volume_id())
    }

    /// Allow `grantee` to attach this volume to the given instances.
    ///
    /// Only the permission is declared; attaching happens out of band.
    pub fn grant_attach_volume(
        &self,
        stack: &mut Stack,
        grantee: &Role,
        instances: &[&Instance],
    ) -> StackResult<Grant> {
        let view: &Stack = stack;
        let mut resources: Vec<Value> = instances.iter().map(|i| i.arn(view)).collect();
        resources.push(self.arn(view));

        let statement = PolicyStatement::allow(&["ec2:AttachVolume"], resources);
        let policy_id = grantee.add_to_policy(stack, statement.clone())?;
        Ok(Grant {
            policy_id,
            grantee: grantee.logical_id().to_string(),
            statement,
        })
    }
}
