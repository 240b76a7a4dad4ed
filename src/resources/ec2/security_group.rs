//! Stateful firewall attached to the network and its instances.
//!
//! Rules are only ever added. Adding a rule that is already present (same
//! peer, protocol and port range) leaves the group unchanged.

use serde_json::{Value, json};

use super::vpc::Vpc;
use crate::cidr::Ipv4Cidr;
use crate::error::{StackError, StackResult};
use crate::stack::Stack;
use crate::template::Resource;
use crate::token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::All => "-1",
        }
    }
}

/// A protocol and port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub protocol: Protocol,
    pub from: Option<u16>,
    pub to: Option<u16>,
}

impl Port {
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from: Some(port),
            to: Some(port),
        }
    }

    pub fn udp(port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            from: Some(port),
            to: Some(port),
        }
    }

    pub fn tcp_range(from: u16, to: u16) -> StackResult<Self> {
        if from > to {
            return Err(StackError::InvalidPortRange { from, to });
        }
        Ok(Self {
            protocol: Protocol::Tcp,
            from: Some(from),
            to: Some(to),
        })
    }

    pub fn all_traffic() -> Self {
        Self {
            protocol: Protocol::All,
            from: None,
            to: None,
        }
    }
}

/// Where traffic comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    AnyIpv4,
    Ipv4(Ipv4Cidr),
}

impl Peer {
    pub fn any_ipv4() -> Self {
        Self::AnyIpv4
    }

    pub fn cidr(&self) -> String {
        match self {
            Self::AnyIpv4 => "0.0.0.0/0".to_string(),
            Self::Ipv4(block) => block.to_string(),
        }
    }
}

fn render_rule(peer: &Peer, port: &Port, description: &str) -> Value {
    let mut rule = json!({
        "CidrIp": peer.cidr(),
        "Description": description,
        "IpProtocol": port.protocol.as_str()
    });
    if let (Some(from), Some(to)) = (port.from, port.to) {
        rule["FromPort"] = json!(from);
        rule["ToPort"] = json!(to);
    }
    rule
}

/// Identity of a rule, ignoring its description.
fn same_rule(a: &Value, b: &Value) -> bool {
    ["CidrIp", "IpProtocol", "FromPort", "ToPort"]
        .iter()
        .all(|key| a.get(key) == b.get(key))
}

#[derive(Debug, Clone)]
pub struct SecurityGroupProps {
    pub description: String,
    pub allow_all_outbound: bool,
}

/// Handle to a declared security group.
#[derive(Debug, Clone)]
pub struct SecurityGroup {
    id: String,
}

impl SecurityGroup {
    pub fn new(stack: &mut Stack, id: &str, vpc: &Vpc, props: SecurityGroupProps) -> StackResult<Self> {
        let egress = if props.allow_all_outbound {
            render_rule(
                &Peer::AnyIpv4,
                &Port::all_traffic(),
                "Allow all outbound traffic by default",
            )
        } else {
            // A rule matching nothing, so the engine drops its implicit allow-all.
            json!({
                "CidrIp": "255.255.255.255/32",
                "Description": "Disallow all traffic",
                "FromPort": 252,
                "IpProtocol": "icmp",
                "ToPort": 86
            })
        };

        let resource = Resource::new("AWS::EC2::SecurityGroup")
            .with("GroupDescription", json!(props.description))
            .with("SecurityGroupEgress", json!([egress]))
            .with("SecurityGroupIngress", json!([]))
            .with("VpcId", vpc.vpc_id());
        let id = stack.add_resource(&[id, "Resource"], resource)?;
        Ok(Self { id })
    }

    pub fn logical_id(&self) -> &str {
        &self.id
    }

    pub fn group_id(&self) -> Value {
        token::get_att(&self.id, "GroupId")
    }

    /// Allow inbound traffic. Returns false if an identical rule already existed.
    pub fn add_ingress_rule(
        &self,
        stack: &mut Stack,
        peer: Peer,
        port: Port,
        description: &str,
    ) -> StackResult<bool> {
        let rule = render_rule(&peer, &port, description);
        let rules = stack
            .resource_mut(&self.id)
            .and_then(|sg| sg.properties.get_mut("SecurityGroupIngress"))
            .and_then(Value::as_array_mut)
            .ok_or_else(|| StackError::InvalidValue {
                field: "SecurityGroupIngress".to_string(),
                value: self.id.clone(),
            })?;

        if rules.iter().any(|existing| same_rule(existing, &rule)) {
            return Ok(false);
        }
        rules.push(rule);
        Ok(true)
    }
}
