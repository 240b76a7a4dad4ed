//! Compute instances.
//!
//! Besides the `AWS::EC2::Instance` itself, each instance declares a role
//! trusted by the compute service and an instance profile wrapping it. An
//! instance with an init config additionally carries:
//!
//! - the `AWS::CloudFormation::Init` metadata,
//! - user data that runs `cfn-init` for the selected config sets and then
//!   `cfn-signal` with its exit code,
//! - a creation policy that fails the deployment if no success signal arrives
//!   within the init timeout,
//! - role permissions to read its own metadata and send the signal.

use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

use super::init::{CloudFormationInit, InitOptions};
use super::machine_image::MachineImage;
use super::security_group::SecurityGroup;
use super::vpc::{SubnetType, Vpc};
use crate::error::{StackError, StackResult};
use crate::resources::iam::{PolicyStatement, Principal, Role, RoleProps};
use crate::resources::name_tags;
use crate::stack::Stack;
use crate::template::Resource;
use crate::token;

/// An instance type such as `t2.medium`: class, generation and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceType(String);

impl InstanceType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InstanceType {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StackError::InvalidValue {
            field: "instance_type".to_string(),
            value: s.to_string(),
        };
        let (family, size) = s.split_once('.').ok_or_else(invalid)?;
        let family_ok = family.starts_with(|c: char| c.is_ascii_lowercase())
            && family.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        let size_ok = !size.is_empty() && size.chars().all(|c| c.is_ascii_alphanumeric());
        if !family_ok || !size_ok {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct InstanceProps<'a> {
    pub instance_type: InstanceType,
    pub machine_image: MachineImage,
    pub vpc: &'a Vpc,
    pub subnet_type: SubnetType,
    pub security_group: &'a SecurityGroup,
    pub key_name: Option<String>,
    pub init: Option<CloudFormationInit>,
    pub init_options: InitOptions,
}

/// Handle to a declared instance.
#[derive(Debug, Clone)]
pub struct Instance {
    id: String,
    role: Role,
    profile_id: String,
    subnet_id: String,
    availability_zone: Value,
}

impl Instance {
    pub fn new(stack: &mut Stack, id: &str, props: InstanceProps<'_>) -> StackResult<Self> {
        let display = stack.display_path(&[id]);
        let instance_id = stack.logical_id(&[id, "Resource"]);

        let role = Role::at_path(
            stack,
            &[id, "InstanceRole"],
            RoleProps {
                assumed_by: Principal::Service("ec2.amazonaws.com".to_string()),
                description: None,
                name_tag: Some(display.clone()),
            },
        )?;
        let profile_id = stack.add_resource(
            &[id, "InstanceProfile"],
            Resource::new("AWS::IAM::InstanceProfile").with("Roles", json!([role.role_name()])),
        )?;

        // First subnet of the requested type; its zone is the instance's zone.
        let subnet = props
            .vpc
            .select_subnets(props.subnet_type)?
            .first()
            .cloned()
            .ok_or_else(|| StackError::NoSubnets(props.subnet_type.label().to_lowercase()))?;

        let image_id = props.machine_image.image_id(stack)?;
        let mut resource = Resource::new("AWS::EC2::Instance")
            .with("AvailabilityZone", subnet.availability_zone.clone())
            .with("IamInstanceProfile", token::reference(&profile_id))
            .with("ImageId", image_id)
            .with("InstanceType", json!(props.instance_type.as_str()))
            .with_opt("KeyName", props.key_name.map(|k| json!(k)))
            .with("SecurityGroupIds", json!([props.security_group.group_id()]))
            .with("SubnetId", subnet.subnet_id())
            .with("Tags", name_tags(&display))
            .depends_on(role.logical_id());

        match &props.init {
            Some(init) => {
                init.check_options(&props.init_options)?;
                resource.metadata = Some(json!({ "AWS::CloudFormation::Init": init.render() }));
                resource.creation_policy = Some(json!({
                    "ResourceSignal": {
                        "Count": 1,
                        "Timeout": props.init_options.timeout_iso8601()
                    }
                }));
                let user_data = bootstrap_user_data(stack, &instance_id, init, &props.init_options);
                resource = resource.with("UserData", user_data);

                let stack_id = stack.stack_id();
                let policy_id = role.add_to_policy(
                    stack,
                    PolicyStatement::allow(
                        &["cloudformation:DescribeStackResource", "cloudformation:SignalResource"],
                        vec![stack_id],
                    ),
                )?;
                // cfn-signal needs the policy in place before the instance boots.
                resource.depends_on.insert(policy_id);
            }
            None => {
                resource = resource.with("UserData", token::base64(json!("#!/bin/bash")));
            }
        }

        let id = stack.add_resource(&[id, "Resource"], resource)?;
        Ok(Self {
            id,
            role,
            profile_id,
            subnet_id: subnet.id,
            availability_zone: subnet.availability_zone,
        })
    }

    pub fn logical_id(&self) -> &str {
        &self.id
    }

    pub fn instance_id(&self) -> Value {
        token::reference(&self.id)
    }

    pub fn public_ip(&self) -> Value {
        token::get_att(&self.id, "PublicIp")
    }

    pub fn arn(&self, stack: &Stack) -> Value {
        stack.format_arn("ec2", "instance", self.instance_id())
    }

    /// The role the instance runs as.
    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn subnet_id(&self) -> &str {
        &self.subnet_id
    }

    pub fn availability_zone(&self) -> &Value {
        &self.availability_zone
    }
}

/// `#!/bin/bash` script running cfn-init then cfn-signal, base64 encoded.
fn bootstrap_user_data(
    stack: &Stack,
    instance_id: &str,
    init: &CloudFormationInit,
    options: &InitOptions,
) -> Value {
    let region = stack.region();
    let stack_name = json!(stack.name());
    let sets = options.config_sets.join(",");
    let signal_code = if options.ignore_failures { "0" } else { "$?" };

    let mut parts = vec![
        json!(format!(
            "#!/bin/bash\n# fingerprint: {}\n(\n  set +e\n  /opt/aws/bin/cfn-init -v --region ",
            init.fingerprint()
        )),
        region.clone(),
        json!(" --stack "),
        stack_name.clone(),
        json!(format!(" --resource {} -c {}\n", instance_id, sets)),
        json!(format!("  /opt/aws/bin/cfn-signal -e {} --region ", signal_code)),
        region,
        json!(" --stack "),
        stack_name,
        json!(format!(" --resource {}\n", instance_id)),
    ];
    if options.print_log {
        parts.push(json!("  cat /var/log/cfn-init.log >&2\n"));
    }
    parts.push(json!(")"));

    token::base64(token::join("", parts))
}
