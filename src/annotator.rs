//! The COCO Annotator stack.
//!
//! One bucket, one network with a firewall, one instance bootstrapped with
//! packages and a generated `/etc/stack.json`, and a data volume that an
//! account-root role may attach to the instance. [`StackConfig`] selects
//! between the base and extended deployments.

use serde_json::json;
use std::time::Duration;

use crate::config::StackConfig;
use crate::error::{StackError, StackResult};
use crate::resources::ec2::{
    CloudFormationInit, InitConfig, InitFile, InitGroup, InitOptions, InitPackage, InitUser,
    Instance, InstanceProps, InstanceType, MachineImage, Peer, Port, SecurityGroup,
    SecurityGroupProps, SubnetType, Volume, VolumeProps, Vpc, VpcProps,
};
use crate::resources::iam::{Grant, Principal, Role, RoleProps};
use crate::resources::s3::{Bucket, BucketProps};
use crate::stack::{Environment, Stack};
use crate::template::Template;
use crate::token::Pseudo;

/// Config that installs OS packages; runs before [`APP_CONFIG`].
pub const PACKAGE_CONFIG: &str = "yumPreinstall";
pub const APP_CONFIG: &str = "config";

const STACK_FILE: &str = "/etc/stack.json";

/// Handles to everything the definition declared.
#[derive(Debug, Clone)]
pub struct AnnotatorStack {
    pub stack: Stack,
    pub bucket: Bucket,
    pub vpc: Vpc,
    pub security_group: SecurityGroup,
    pub instance: Instance,
    pub role: Role,
    pub volume: Volume,
    pub grant: Grant,
}

/// Declare the stack.
pub fn define(config: &StackConfig) -> StackResult<AnnotatorStack> {
    let env = Environment::new(config.account.clone(), config.region.clone());
    let mut stack = Stack::new(&config.stack_name, env);
    stack.set_description("COCO Annotator: annotation server, data volume and bucket");

    let bucket = Bucket::new(
        &mut stack,
        "coco-annotator-bucket",
        BucketProps {
            bucket_name: config.bucket_name.clone(),
            versioned: false,
            removal_policy: config.bucket_removal_policy,
        },
    )?;

    let vpc = Vpc::new(
        &mut stack,
        "coco-annotator-vpc",
        VpcProps {
            max_azs: config.max_azs,
            ..VpcProps::default()
        },
    )?;
    let security_group = SecurityGroup::new(
        &mut stack,
        "coco-annotator-sg",
        &vpc,
        SecurityGroupProps {
            description: "Allow ssh access to ec2 instances, allow internet access".to_string(),
            allow_all_outbound: true,
        },
    )?;
    for port in &config.ingress_ports {
        security_group.add_ingress_rule(
            &mut stack,
            Peer::any_ipv4(),
            Port::tcp(*port),
            &ingress_description(*port),
        )?;
    }

    let init = bootstrap(&stack, config)?;
    let timeout = bootstrap_timeout(config.bootstrap_timeout_minutes)?;
    let instance = Instance::new(
        &mut stack,
        "Instance",
        InstanceProps {
            instance_type: config.instance_type.parse::<InstanceType>()?,
            machine_image: MachineImage::LatestAmazonLinux(config.image_generation),
            vpc: &vpc,
            subnet_type: config.subnet,
            security_group: &security_group,
            key_name: config.key_name.clone(),
            init: Some(init),
            init_options: InitOptions {
                timeout,
                ..InitOptions::default()
            },
        },
    )?;

    let role = Role::new(
        &mut stack,
        "coco-annotator-role",
        RoleProps {
            assumed_by: Principal::AccountRoot,
            description: None,
            name_tag: None,
        },
    )?;

    // The volume must live in the instance's zone to be attachable.
    let zone = match &config.availability_zone {
        Some(zone) => json!(zone),
        None => instance.availability_zone().clone(),
    };
    let volume = Volume::new(&mut stack, "Volume", VolumeProps::new(zone, config.volume_size_gib))?;
    let grant = volume.grant_attach_volume(&mut stack, &role, &[&instance])?;

    stack.add_output("BucketName", bucket.bucket_name(), "Name of the data bucket")?;
    stack.add_output("InstanceId", instance.instance_id(), "Annotator instance")?;
    stack.add_output("VolumeId", volume.volume_id(), "Data volume to attach to the instance")?;
    if config.subnet == SubnetType::Public {
        stack.add_output("InstancePublicIp", instance.public_ip(), "Public address of the annotator")?;
    }

    Ok(AnnotatorStack {
        stack,
        bucket,
        vpc,
        security_group,
        instance,
        role,
        volume,
        grant,
    })
}

/// Declare the stack and render its template.
pub fn synth(config: &StackConfig) -> StackResult<Template> {
    Ok(define(config)?.stack.synth())
}

fn ingress_description(port: u16) -> String {
    match port {
        22 => "allow ssh access from the world".to_string(),
        80 => "allow http access from the world".to_string(),
        443 => "allow https access from the world".to_string(),
        other => format!("allow tcp/{} access from the world", other),
    }
}

fn bootstrap_timeout(minutes: u64) -> StackResult<Duration> {
    minutes
        .checked_mul(60)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| StackError::InvalidValue {
            field: "bootstrap_timeout_minutes".to_string(),
            value: minutes.to_string(),
        })
}

/// Packages first, then the application config.
fn bootstrap(stack: &Stack, config: &StackConfig) -> StackResult<CloudFormationInit> {
    let packages = InitConfig::new(
        config
            .yum_packages
            .iter()
            .map(|name| InitPackage::yum(name).into())
            .collect(),
    );

    let mut app = InitConfig::new(vec![
        InitFile::from_object(
            STACK_FILE,
            [
                ("stack_id", stack.stack_id()),
                ("stack_name", Pseudo::StackName.token()),
                ("region", stack.region()),
            ],
        )
        .into(),
        InitGroup::from_name("my-group").into(),
        InitUser::from_name("my-user").into(),
    ]);
    for url in &config.rpm_urls {
        app.add(InitPackage::rpm(url));
    }

    CloudFormationInit::from_config_sets(
        [(CloudFormationInit::DEFAULT_SET, vec![PACKAGE_CONFIG, APP_CONFIG])],
        [(PACKAGE_CONFIG, packages), (APP_CONFIG, app)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Variant;
    use serde_json::Value;

    #[test]
    fn test_base_declares_single_ssh_rule() {
        let defined = define(&StackConfig::preset(Variant::Base)).unwrap();
        let sg = defined.stack.resource(defined.security_group.logical_id()).unwrap();
        assert_eq!(
            sg.property("SecurityGroupIngress"),
            Some(&json!([{
                "CidrIp": "0.0.0.0/0",
                "Description": "allow ssh access from the world",
                "FromPort": 22,
                "IpProtocol": "tcp",
                "ToPort": 22
            }]))
        );
    }

    #[test]
    fn test_volume_follows_instance_zone() {
        let mut config = StackConfig::preset(Variant::Base);
        config.region = Some("eu-central-1".into());
        let defined = define(&config).unwrap();
        assert_eq!(defined.volume.availability_zone(), &json!("eu-central-1a"));
        assert_eq!(defined.volume.availability_zone(), defined.instance.availability_zone());
    }

    #[test]
    fn test_explicit_volume_zone() {
        let mut config = StackConfig::preset(Variant::Base);
        config.availability_zone = Some("us-east-1c".into());
        let defined = define(&config).unwrap();
        assert_eq!(defined.volume.availability_zone(), &json!("us-east-1c"));
    }

    #[test]
    fn test_stack_file_contents() {
        let defined = define(&StackConfig::default()).unwrap();
        let instance = defined.stack.resource(defined.instance.logical_id()).unwrap();
        let init = &instance.metadata.as_ref().unwrap()["AWS::CloudFormation::Init"];
        assert_eq!(
            init[APP_CONFIG]["files"][STACK_FILE]["content"],
            json!({
                "region": { "Ref": "AWS::Region" },
                "stack_id": { "Ref": "AWS::StackId" },
                "stack_name": { "Ref": "AWS::StackName" }
            })
        );
        assert_eq!(init[PACKAGE_CONFIG]["packages"]["yum"]["git"], json!([]));
        assert!(init[APP_CONFIG]["packages"]["rpm"].as_object().is_some_and(|rpms| rpms.len() == 1));
        assert!(init[APP_CONFIG]["users"]["my-user"].is_object());
        assert!(init[APP_CONFIG]["groups"]["my-group"].is_object());
    }

    #[test]
    fn test_unrepresentable_timeout_fails_definition() {
        let config =
            StackConfig::from_toml_str(None, "bootstrap_timeout_minutes = 9000000000000000000").unwrap();
        assert!(matches!(
            synth(&config),
            Err(StackError::InvalidValue { field, .. }) if field == "bootstrap_timeout_minutes"
        ));

        let mut config = StackConfig::default();
        config.bootstrap_timeout_minutes = 0;
        assert!(define(&config).is_err());
    }

    #[test]
    fn test_invalid_instance_type_fails_definition() {
        let mut config = StackConfig::default();
        config.instance_type = "medium".into();
        assert!(define(&config).is_err());
    }

    #[test]
    fn test_public_ip_output_only_when_public() {
        let base = synth(&StackConfig::preset(Variant::Base)).unwrap();
        let extended = synth(&StackConfig::preset(Variant::Extended)).unwrap();
        assert!(!base.outputs.contains_key("InstancePublicIp"));
        assert_eq!(
            extended.outputs["InstancePublicIp"].value,
            json!({ "Fn::GetAtt": [extended_instance_id(&extended), "PublicIp"] })
        );
    }

    fn extended_instance_id(template: &Template) -> String {
        template
            .resources_of_type("AWS::EC2::Instance")
            .map(|(id, _)| id.clone())
            .next()
            .unwrap_or_default()
    }

    #[test]
    fn test_grant_names_instance_and_volume() {
        let defined = define(&StackConfig::default()).unwrap();
        let resources: Vec<&Value> = defined.grant.statement.resources.iter().collect();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0], &defined.instance.arn(&defined.stack));
        assert_eq!(resources[1], &defined.volume.arn(&defined.stack));
        assert_eq!(defined.grant.grantee, defined.role.logical_id());
    }
}
