//! Virtual network of an environment.

use crate::{
    template::{availability_zones, cidr, get_att, reference, select, tags, Resource, Template},
    Settings,
};
use serde_json::json;

pub const VPC: &str = "Vpc";
pub const INTERNET_GATEWAY: &str = "InternetGateway";
pub const GATEWAY_ATTACHMENT: &str = "VpcGatewayAttachment";
pub const PUBLIC_ROUTE_TABLE: &str = "PublicRouteTable";
pub const PUBLIC_DEFAULT_ROUTE: &str = "PublicDefaultRoute";
pub const PRIVATE_ROUTE_TABLE: &str = "PrivateRouteTable";

/// Host bits of every subnet (a /24 each).
const SUBNET_BITS: u8 = 8;

/// Logical IDs of the declared network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Network {
    pub vpc: String,
    pub public_subnets: Vec<String>,
    pub private_subnets: Vec<String>,
}

pub fn public_subnet(zone: usize) -> String {
    format!("PublicSubnet{}", zone + 1)
}

pub fn private_subnet(zone: usize) -> String {
    format!("PrivateSubnet{}", zone + 1)
}

/// Declares the VPC, one public and one private subnet per zone, the internet gateway, and
/// the route tables. Only the public route table gets a default route.
pub fn declare(template: &mut Template, prefix: &str, settings: &Settings) -> Network {
    let environment = settings.environment.name();
    let zones = settings.availability_zones as usize;

    let vpc = template.add(Resource::new(
        VPC,
        "AWS::EC2::VPC",
        json!({
            "CidrBlock": settings.vpc_cidr,
            "EnableDnsSupport": true,
            "EnableDnsHostnames": true,
            "Tags": tags(&format!("{prefix}-vpc"), environment),
        }),
    ));
    let gateway = template.add(Resource::new(
        INTERNET_GATEWAY,
        "AWS::EC2::InternetGateway",
        json!({ "Tags": tags(&format!("{prefix}-igw"), environment) }),
    ));
    let attachment = template.add(Resource::new(
        GATEWAY_ATTACHMENT,
        "AWS::EC2::VPCGatewayAttachment",
        json!({
            "VpcId": reference(&vpc),
            "InternetGatewayId": reference(&gateway),
        }),
    ));

    let public_table = template.add(Resource::new(
        PUBLIC_ROUTE_TABLE,
        "AWS::EC2::RouteTable",
        json!({
            "VpcId": reference(&vpc),
            "Tags": tags(&format!("{prefix}-public"), environment),
        }),
    ));
    template.add(
        Resource::new(
            PUBLIC_DEFAULT_ROUTE,
            "AWS::EC2::Route",
            json!({
                "RouteTableId": reference(&public_table),
                "DestinationCidrBlock": "0.0.0.0/0",
                "GatewayId": reference(&gateway),
            }),
        )
        .depends_on(&attachment),
    );
    let private_table = template.add(Resource::new(
        PRIVATE_ROUTE_TABLE,
        "AWS::EC2::RouteTable",
        json!({
            "VpcId": reference(&vpc),
            "Tags": tags(&format!("{prefix}-private"), environment),
        }),
    ));

    // Public subnets take the first blocks, private subnets the next ones.
    let blocks = || cidr(get_att(&vpc, "CidrBlock"), zones * 2, SUBNET_BITS);
    let mut public_subnets = Vec::with_capacity(zones);
    let mut private_subnets = Vec::with_capacity(zones);
    for zone in 0..zones {
        let subnet = template.add(Resource::new(
            &public_subnet(zone),
            "AWS::EC2::Subnet",
            json!({
                "VpcId": reference(&vpc),
                "CidrBlock": select(zone, blocks()),
                "AvailabilityZone": select(zone, availability_zones()),
                "MapPublicIpOnLaunch": true,
                "Tags": tags(&format!("{prefix}-public-{}", zone + 1), environment),
            }),
        ));
        template.add(Resource::new(
            &format!("{subnet}RouteTableAssociation"),
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({
                "SubnetId": reference(&subnet),
                "RouteTableId": reference(&public_table),
            }),
        ));
        public_subnets.push(subnet);
    }
    for zone in 0..zones {
        let subnet = template.add(Resource::new(
            &private_subnet(zone),
            "AWS::EC2::Subnet",
            json!({
                "VpcId": reference(&vpc),
                "CidrBlock": select(zones + zone, blocks()),
                "AvailabilityZone": select(zone, availability_zones()),
                "MapPublicIpOnLaunch": false,
                "Tags": tags(&format!("{prefix}-private-{}", zone + 1), environment),
            }),
        ));
        template.add(Resource::new(
            &format!("{subnet}RouteTableAssociation"),
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({
                "SubnetId": reference(&subnet),
                "RouteTableId": reference(&private_table),
            }),
        ));
        private_subnets.push(subnet);
    }

    Network {
        vpc,
        public_subnets,
        private_subnets,
    }
}
