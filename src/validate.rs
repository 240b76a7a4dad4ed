//! Structural checks over a rendered template.
//!
//! The provisioning engine rejects most mistakes only at deploy time, after
//! part of the stack may already exist. These checks run on the template alone
//! and catch the contract violations that matter for this stack: wrong
//! resource counts, unexpected firewall rules, an instance outside the network,
//! a volume in another zone, an over-broad trust policy, and references to
//! resources that were never declared.
//!
//! Findings are data. Callers decide what to do with them; the CLI exits
//! non-zero when any finding is an error.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::deps::DepGraph;
use crate::resources::ec2::SubnetType;
use crate::template::{Resource, Template};
use crate::token;

/// Resource types the stack declares exactly once.
const SINGLETONS: &[(&str, &str)] = &[
    ("AWS::S3::Bucket", "bucket"),
    ("AWS::EC2::VPC", "network"),
    ("AWS::EC2::SecurityGroup", "security group"),
    ("AWS::EC2::Instance", "instance"),
    ("AWS::EC2::Volume", "volume"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// One violated property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Stable kebab-case code, e.g. `volume-zone`.
    pub code: &'static str,
    pub severity: Severity,
    /// Logical ID of the offending resource, if there is one.
    pub resource: Option<String>,
    pub message: String,
}

impl Finding {
    fn error(code: &'static str, resource: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            resource: resource.map(str::to_string),
            message: message.into(),
        }
    }

    fn warning(code: &'static str, resource: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            resource: resource.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{} [{}]: {}", self.code, resource, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// What the template is expected to declare. `None` skips the check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectations {
    /// Exact set of TCP ports open to inbound traffic.
    pub ingress_ports: Option<BTreeSet<u16>>,
    /// Region the volume zone must belong to.
    pub region: Option<String>,
    /// Kind of subnet the instance must sit in.
    pub subnet_type: Option<SubnetType>,
    pub key_name: Option<String>,
    /// Account whose root a role may trust. `None` means the deploying
    /// account, left as the `AWS::AccountId` pseudo parameter.
    pub account: Option<String>,
}

pub fn has_errors(findings: &[Finding]) -> bool {
    findings.iter().any(|f| f.severity == Severity::Error)
}

/// Run every check and return the findings, errors first.
pub fn validate(template: &Template, expect: &Expectations) -> Vec<Finding> {
    let mut findings = Vec::new();
    check_resource_counts(template, &mut findings);
    check_ingress_rules(template, expect, &mut findings);
    check_instance_subnet(template, expect, &mut findings);
    check_volume_zone(template, expect, &mut findings);
    check_trust_policies(template, expect, &mut findings);
    check_dangling_refs(template, &mut findings);
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));
    findings
}

fn check_resource_counts(template: &Template, findings: &mut Vec<Finding>) {
    for (kind, label) in SINGLETONS {
        let count = template.count_of_type(kind);
        if count != 1 {
            findings.push(Finding::error(
                "resource-count",
                None,
                format!("expected exactly one {} ({}), found {}", label, kind, count),
            ));
        }
    }
}

fn check_ingress_rules(template: &Template, expect: &Expectations, findings: &mut Vec<Finding>) {
    for (id, sg) in template.resources_of_type("AWS::EC2::SecurityGroup") {
        let rules = sg
            .property("SecurityGroupIngress")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut ports = BTreeSet::new();
        for rule in rules {
            let protocol = rule.get("IpProtocol").and_then(Value::as_str);
            let from = rule.get("FromPort").and_then(Value::as_u64);
            let to = rule.get("ToPort").and_then(Value::as_u64);
            match (protocol, from, to) {
                (Some("tcp"), Some(from), Some(to)) if from == to => {
                    if let Ok(port) = u16::try_from(from) {
                        ports.insert(port);
                    }
                }
                _ => findings.push(Finding::warning(
                    "ingress-rules",
                    Some(id),
                    format!("rule is not a single TCP port: {}", rule),
                )),
            }
            if rule.get("CidrIp").and_then(Value::as_str).is_none() {
                findings.push(Finding::warning(
                    "ingress-rules",
                    Some(id),
                    "rule has no IPv4 source range",
                ));
            }
        }

        if let Some(expected) = &expect.ingress_ports {
            if &ports != expected {
                findings.push(Finding::error(
                    "ingress-rules",
                    Some(id),
                    format!("open ports {:?}, expected {:?}", ports, expected),
                ));
            }
        }
    }
}

fn check_instance_subnet(template: &Template, expect: &Expectations, findings: &mut Vec<Finding>) {
    for (id, instance) in template.resources_of_type("AWS::EC2::Instance") {
        let Some(subnet_id) = ref_target(instance.property("SubnetId")) else {
            findings.push(Finding::error(
                "instance-subnet",
                Some(id),
                "SubnetId does not reference a declared subnet",
            ));
            continue;
        };
        let Some(subnet) = template
            .resources
            .get(subnet_id)
            .filter(|r| r.kind == "AWS::EC2::Subnet")
        else {
            findings.push(Finding::error(
                "instance-subnet",
                Some(id),
                format!("SubnetId names {}, which is not a subnet in this template", subnet_id),
            ));
            continue;
        };

        let in_network = ref_target(subnet.property("VpcId"))
            .and_then(|vpc| template.resources.get(vpc))
            .is_some_and(|vpc| vpc.kind == "AWS::EC2::VPC");
        if !in_network {
            findings.push(Finding::error(
                "instance-subnet",
                Some(id),
                format!("subnet {} does not belong to a declared network", subnet_id),
            ));
        }

        if let Some(kind) = expect.subnet_type {
            let public = subnet
                .property("MapPublicIpOnLaunch")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if public != (kind == SubnetType::Public) {
                findings.push(Finding::error(
                    "instance-subnet",
                    Some(id),
                    format!("expected a {} subnet, {} is not", kind.label().to_lowercase(), subnet_id),
                ));
            }
        }

        if let Some(key) = &expect.key_name {
            let actual = instance.property("KeyName").and_then(Value::as_str);
            if actual != Some(key.as_str()) {
                findings.push(Finding::error(
                    "instance-subnet",
                    Some(id),
                    format!("expected key pair '{}', found {:?}", key, actual),
                ));
            }
        }
    }
}

fn check_volume_zone(template: &Template, expect: &Expectations, findings: &mut Vec<Finding>) {
    let instance_zones: Vec<&Value> = template
        .resources_of_type("AWS::EC2::Instance")
        .filter_map(|(_, i)| i.property("AvailabilityZone"))
        .collect();

    for (id, volume) in template.resources_of_type("AWS::EC2::Volume") {
        let Some(zone) = volume.property("AvailabilityZone") else {
            findings.push(Finding::error("volume-zone", Some(id), "no AvailabilityZone"));
            continue;
        };

        match zone.as_str() {
            Some("") => {
                findings.push(Finding::error("volume-zone", Some(id), "AvailabilityZone is empty"));
                continue;
            }
            Some(literal) => {
                if let Some(region) = &expect.region {
                    let suffix = literal.strip_prefix(region.as_str());
                    if !suffix.is_some_and(|s| s.len() == 1 && s.chars().all(|c| c.is_ascii_lowercase())) {
                        findings.push(Finding::error(
                            "volume-zone",
                            Some(id),
                            format!("zone '{}' is not a zone of region {}", literal, region),
                        ));
                    }
                }
            }
            None if !token::is_unresolved(zone) => {
                findings.push(Finding::error(
                    "volume-zone",
                    Some(id),
                    format!("AvailabilityZone is neither a string nor a token: {}", zone),
                ));
                continue;
            }
            None => {}
        }

        if !instance_zones.is_empty() && !instance_zones.contains(&zone) {
            findings.push(Finding::error(
                "volume-zone",
                Some(id),
                format!("zone {} matches no instance zone, so it cannot be attached", zone),
            ));
        }
    }
}

fn check_trust_policies(template: &Template, expect: &Expectations, findings: &mut Vec<Finding>) {
    let account = expect.account.as_deref().unwrap_or(ACCOUNT_PLACEHOLDER);
    for (id, role) in template.resources_of_type("AWS::IAM::Role") {
        for principal in trusted_principals(role) {
            if let Some(aws) = principal.get("AWS") {
                let values = match aws {
                    Value::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for value in values {
                    if !is_account_root(value, account) {
                        findings.push(Finding::error(
                            "trust-policy",
                            Some(id),
                            format!("role trusts {} instead of the account root", value),
                        ));
                    }
                }
            } else if principal.as_str() == Some("*") {
                findings.push(Finding::error("trust-policy", Some(id), "role trusts everyone"));
            }
        }
    }
}

fn check_dangling_refs(template: &Template, findings: &mut Vec<Finding>) {
    for (from, target) in DepGraph::from_template(template).dangling_references() {
        findings.push(Finding::error(
            "dangling-ref",
            Some(from),
            format!("references undeclared resource {}", target),
        ));
    }
    for (name, output) in &template.outputs {
        for target in token::references(&output.value) {
            if !template.resources.contains_key(&target) && !template.parameters.contains_key(&target) {
                findings.push(Finding::error(
                    "dangling-ref",
                    None,
                    format!("output {} references undeclared resource {}", name, target),
                ));
            }
        }
    }
}

/// Target of a plain `{ "Ref": id }`.
fn ref_target(value: Option<&Value>) -> Option<&str> {
    value?.get("Ref")?.as_str()
}

fn trusted_principals(role: &Resource) -> Vec<&Value> {
    role.property("AssumeRolePolicyDocument")
        .and_then(|doc| doc.get("Statement"))
        .and_then(Value::as_array)
        .map(|statements| statements.iter().filter_map(|s| s.get("Principal")).collect())
        .unwrap_or_default()
}

/// How [`flatten`] renders `{ "Ref": "AWS::AccountId" }`.
const ACCOUNT_PLACEHOLDER: &str = "{AWSAccountId}";

/// `arn:<partition>:iam::<account>:root` for exactly `account`, literal or
/// assembled with `Fn::Join`.
fn is_account_root(value: &Value, account: &str) -> bool {
    let Some(flat) = flatten(value) else {
        return false;
    };
    let parts: Vec<&str> = flat.split(':').collect();
    matches!(
        parts.as_slice(),
        ["arn", partition, "iam", "", found, "root"]
            if !partition.is_empty() && *found != "*" && *found == account
    )
}

/// Render a string or join as text, each pseudo parameter becoming a
/// colon-free placeholder such as `{AWSAccountId}`.
fn flatten(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("Ref") {
                return target
                    .starts_with("AWS::")
                    .then(|| format!("{{{}}}", target.replace("::", "")));
            }
            let args = map.get("Fn::Join")?.as_array()?;
            let separator = args.first()?.as_str()?;
            let parts = args.get(1)?.as_array()?;
            let flat: Option<Vec<String>> = parts.iter().map(flatten).collect();
            Some(flat?.join(separator))
        }
        _ => None,
    }
}
