//! Virtual network with public and private subnets per availability zone.
//!
//! Layout for the default `10.0.0.0/16` over two zones:
//!
//! ```text
//! PublicSubnet1   10.0.0.0/18    zone 1   route 0.0.0.0/0 -> internet gateway
//! PublicSubnet2   10.0.64.0/18   zone 2   route 0.0.0.0/0 -> internet gateway
//! PrivateSubnet1  10.0.128.0/18  zone 1   route 0.0.0.0/0 -> NAT in PublicSubnet1
//! PrivateSubnet2  10.0.192.0/18  zone 2   route 0.0.0.0/0 -> NAT in PublicSubnet2
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cidr::Ipv4Cidr;
use crate::error::{StackError, StackResult};
use crate::resources::name_tags;
use crate::stack::Stack;
use crate::template::Resource;
use crate::token;

pub const DEFAULT_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_MAX_AZS: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetType {
    Public,
    #[default]
    Private,
}

impl SubnetType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Private => "Private",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VpcProps {
    pub cidr: Ipv4Cidr,
    pub max_azs: usize,
    /// NAT gateways for private subnets; one per zone when unset.
    pub nat_gateways: Option<usize>,
}

impl Default for VpcProps {
    fn default() -> Self {
        Self {
            cidr: Ipv4Cidr::DEFAULT_VPC,
            max_azs: DEFAULT_MAX_AZS,
            nat_gateways: None,
        }
    }
}

/// One declared subnet.
#[derive(Debug, Clone)]
pub struct Subnet {
    pub id: String,
    pub kind: SubnetType,
    pub cidr: Ipv4Cidr,
    pub availability_zone: Value,
    pub route_table_id: String,
}

impl Subnet {
    pub fn subnet_id(&self) -> Value {
        token::reference(&self.id)
    }
}

/// Handle to a declared network.
#[derive(Debug, Clone)]
pub struct Vpc {
    id: String,
    cidr: Ipv4Cidr,
    public_subnets: Vec<Subnet>,
    private_subnets: Vec<Subnet>,
    internet_gateway_id: String,
}

impl Vpc {
    pub fn new(stack: &mut Stack, id: &str, props: VpcProps) -> StackResult<Self> {
        if props.max_azs == 0 {
            return Err(StackError::InvalidValue {
                field: "max_azs".to_string(),
                value: "0".to_string(),
            });
        }

        let vpc_id = stack.add_resource(
            &[id, "Resource"],
            Resource::new("AWS::EC2::VPC")
                .with("CidrBlock", json!(props.cidr.to_string()))
                .with("EnableDnsHostnames", json!(true))
                .with("EnableDnsSupport", json!(true))
                .with("InstanceTenancy", json!("default"))
                .with("Tags", name_tags(&stack.display_path(&[id]))),
        )?;

        let igw_id = stack.add_resource(
            &[id, "IGW"],
            Resource::new("AWS::EC2::InternetGateway")
                .with("Tags", name_tags(&stack.display_path(&[id]))),
        )?;
        let attachment_id = stack.add_resource(
            &[id, "VPCGW"],
            Resource::new("AWS::EC2::VPCGatewayAttachment")
                .with("InternetGatewayId", token::reference(&igw_id))
                .with("VpcId", token::reference(&vpc_id)),
        )?;

        let blocks = props.cidr.split_evenly(props.max_azs * 2)?;
        let (public_blocks, private_blocks) = blocks.split_at(props.max_azs);

        let mut vpc = Self {
            id: vpc_id,
            cidr: props.cidr,
            public_subnets: Vec::new(),
            private_subnets: Vec::new(),
            internet_gateway_id: igw_id,
        };

        let nat_count = props.nat_gateways.unwrap_or(props.max_azs).min(props.max_azs);
        let mut nat_ids = Vec::new();
        for (i, block) in public_blocks.iter().enumerate() {
            let name = format!("PublicSubnet{}", i + 1);
            let subnet = vpc.add_subnet(stack, id, &name, SubnetType::Public, *block, i)?;
            stack.add_resource(
                &[id, &name, "DefaultRoute"],
                Resource::new("AWS::EC2::Route")
                    .with("DestinationCidrBlock", json!("0.0.0.0/0"))
                    .with("GatewayId", token::reference(&vpc.internet_gateway_id))
                    .with("RouteTableId", token::reference(&subnet.route_table_id))
                    .depends_on(&attachment_id),
            )?;

            if i < nat_count {
                let tags = name_tags(&stack.display_path(&[id, &name]));
                let eip_id = stack.add_resource(
                    &[id, &name, "EIP"],
                    Resource::new("AWS::EC2::EIP")
                        .with("Domain", json!("vpc"))
                        .with("Tags", tags.clone()),
                )?;
                let nat_id = stack.add_resource(
                    &[id, &name, "NATGateway"],
                    Resource::new("AWS::EC2::NatGateway")
                        .with("AllocationId", token::get_att(&eip_id, "AllocationId"))
                        .with("SubnetId", subnet.subnet_id())
                        .with("Tags", tags),
                )?;
                nat_ids.push(nat_id);
            }
            vpc.public_subnets.push(subnet);
        }

        for (i, block) in private_blocks.iter().enumerate() {
            let name = format!("PrivateSubnet{}", i + 1);
            let subnet = vpc.add_subnet(stack, id, &name, SubnetType::Private, *block, i)?;
            if let Some(nat_id) = nat_ids.get(i % nat_ids.len().max(1)) {
                stack.add_resource(
                    &[id, &name, "DefaultRoute"],
                    Resource::new("AWS::EC2::Route")
                        .with("DestinationCidrBlock", json!("0.0.0.0/0"))
                        .with("NatGatewayId", token::reference(nat_id))
                        .with("RouteTableId", token::reference(&subnet.route_table_id)),
                )?;
            }
            vpc.private_subnets.push(subnet);
        }

        Ok(vpc)
    }

    fn add_subnet(
        &self,
        stack: &mut Stack,
        vpc_name: &str,
        name: &str,
        kind: SubnetType,
        block: Ipv4Cidr,
        zone_index: usize,
    ) -> StackResult<Subnet> {
        let availability_zone = stack.env().availability_zone(zone_index);
        let display = stack.display_path(&[vpc_name, name]);

        let subnet_id = stack.add_resource(
            &[vpc_name, name, "Subnet"],
            Resource::new("AWS::EC2::Subnet")
                .with("AvailabilityZone", availability_zone.clone())
                .with("CidrBlock", json!(block.to_string()))
                .with("MapPublicIpOnLaunch", json!(kind == SubnetType::Public))
                .with(
                    "Tags",
                    json!([
                        { "Key": "Name", "Value": display },
                        { "Key": "subnet-name", "Value": kind.label() },
                        { "Key": "subnet-type", "Value": kind.label() }
                    ]),
                )
                .with("VpcId", self.vpc_id()),
        )?;
        let route_table_id = stack.add_resource(
            &[vpc_name, name, "RouteTable"],
            Resource::new("AWS::EC2::RouteTable")
                .with("Tags", name_tags(&display))
                .with("VpcId", self.vpc_id()),
        )?;
        stack.add_resource(
            &[vpc_name, name, "RouteTableAssociation"],
            Resource::new("AWS::EC2::SubnetRouteTableAssociation")
                .with("RouteTableId", token::reference(&route_table_id))
                .with("SubnetId", token::reference(&subnet_id)),
        )?;

        Ok(Subnet {
            id: subnet_id,
            kind,
            cidr: block,
            availability_zone,
            route_table_id,
        })
    }

    pub fn logical_id(&self) -> &str {
        &self.id
    }

    pub fn vpc_id(&self) -> Value {
        token::reference(&self.id)
    }

    pub fn cidr(&self) -> Ipv4Cidr {
        self.cidr
    }

    /// Subnets of one type, ordered by zone.
    pub fn select_subnets(&self, kind: SubnetType) -> StackResult<&[Subnet]> {
        let subnets = match kind {
            SubnetType::Public => &self.public_subnets,
            SubnetType::Private => &self.private_subnets,
        };
        if subnets.is_empty() {
            return Err(StackError::NoSubnets(kind.label().to_lowercase()));
        }
        Ok(subnets)
    }
}
