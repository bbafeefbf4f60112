//! VPC with public/private subnet tiers and NAT egress.
//!
//! The address space is split evenly into one public and one private subnet
//! per availability zone. Public subnets route through an internet gateway;
//! private subnets route through NAT gateways placed in the first public
//! subnets (one NAT by default, shared by every private subnet).

use std::net::Ipv4Addr;

use tracing::info;

use cvat_core::config::NetworkConfig;
use cvat_core::{ConstructPath, Expr, Resource, Result, SynthError, Template};

/// One subnet of the VPC.
#[derive(Debug, Clone)]
pub struct Subnet {
    pub subnet_id: Expr,
    pub availability_zone: Expr,
    pub cidr: String,
    pub route_table_id: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubnetTier {
    Public,
    Private,
}

impl SubnetTier {
    fn label(&self) -> &'static str {
        match self {
            SubnetTier::Public => "Public",
            SubnetTier::Private => "Private",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Vpc {
    pub path: ConstructPath,
    pub vpc_id: Expr,
    pub cidr: String,
    pub public_subnets: Vec<Subnet>,
    pub private_subnets: Vec<Subnet>,
    /// Logical ids of the NAT gateways.
    pub nat_gateways: Vec<String>,
}

impl Vpc {
    pub fn new(template: &mut Template, path: ConstructPath, config: &NetworkConfig) -> Result<Self> {
        let azs = config.max_azs as usize;
        let cidrs = split_cidr(&config.cidr, azs * 2)?;

        let vpc = template.add_resource(
            &path,
            Resource::new("AWS::EC2::VPC")
                .prop("CidrBlock", config.cidr.as_str())
                .prop("EnableDnsHostnames", true)
                .prop("EnableDnsSupport", true)
                .prop("InstanceTenancy", "default")
                .prop("Tags", name_tag(&path)),
        )?;
        let vpc_id = Expr::reference(&vpc);

        let igw = template.add_resource(&path.child("IGW"), Resource::new("AWS::EC2::InternetGateway"))?;
        let attachment = template.add_resource(
            &path.child("VPCGW"),
            Resource::new("AWS::EC2::VPCGatewayAttachment")
                .prop("VpcId", vpc_id.clone())
                .prop("InternetGatewayId", Expr::reference(&igw)),
        )?;

        let mut this = Vpc {
            path: path.clone(),
            vpc_id,
            cidr: config.cidr.clone(),
            public_subnets: Vec::with_capacity(azs),
            private_subnets: Vec::with_capacity(azs),
            nat_gateways: Vec::new(),
        };

        for az in 0..azs {
            let subnet = this.add_subnet(template, SubnetTier::Public, az, &cidrs[az])?;
            let route = template.add_resource(
                &path.child(format!("PublicSubnet{}", az + 1)).child("DefaultRoute"),
                Resource::new("AWS::EC2::Route")
                    .prop("RouteTableId", subnet.route_table_id.clone())
                    .prop("DestinationCidrBlock", "0.0.0.0/0")
                    .prop("GatewayId", Expr::reference(&igw))
                    .depends_on(&attachment),
            )?;
            if az < config.nat_gateways as usize {
                let nat = this.add_nat_gateway(template, az, &subnet, &route)?;
                this.nat_gateways.push(nat);
            }
            this.public_subnets.push(subnet);
        }

        for az in 0..azs {
            let subnet = this.add_subnet(template, SubnetTier::Private, az, &cidrs[azs + az])?;
            if !this.nat_gateways.is_empty() {
                let nat = &this.nat_gateways[az % this.nat_gateways.len()];
                template.add_resource(
                    &path.child(format!("PrivateSubnet{}", az + 1)).child("DefaultRoute"),
                    Resource::new("AWS::EC2::Route")
                        .prop("RouteTableId", subnet.route_table_id.clone())
                        .prop("DestinationCidrBlock", "0.0.0.0/0")
                        .prop("NatGatewayId", Expr::reference(nat)),
                )?;
            }
            this.private_subnets.push(subnet);
        }

        info!(
            cidr = %config.cidr,
            azs,
            nat_gateways = this.nat_gateways.len(),
            "network synthesized"
        );
        Ok(this)
    }

    pub fn public_subnet_ids(&self) -> Vec<Expr> {
        self.public_subnets.iter().map(|s| s.subnet_id.clone()).collect()
    }

    pub fn private_subnet_ids(&self) -> Vec<Expr> {
        self.private_subnets.iter().map(|s| s.subnet_id.clone()).collect()
    }

    fn add_subnet(
        &self,
        template: &mut Template,
        tier: SubnetTier,
        az: usize,
        cidr: &str,
    ) -> Result<Subnet> {
        let scope = self.path.child(format!("{}Subnet{}", tier.label(), az + 1));
        let availability_zone = Expr::select(az, Expr::AvailabilityZones);

        let subnet = template.add_resource(
            &scope.child("Subnet"),
            Resource::new("AWS::EC2::Subnet")
                .prop("VpcId", self.vpc_id.clone())
                .prop("AvailabilityZone", availability_zone.clone())
                .prop("CidrBlock", cidr)
                .prop("MapPublicIpOnLaunch", tier == SubnetTier::Public)
                .prop(
                    "Tags",
                    Expr::list([
                        tag("Name", scope.to_string()),
                        tag("cvat:subnet-type", tier.label()),
                    ]),
                ),
        )?;
        let route_table = template.add_resource(
            &scope.child("RouteTable"),
            Resource::new("AWS::EC2::RouteTable")
                .prop("VpcId", self.vpc_id.clone())
                .prop("Tags", name_tag(&scope)),
        )?;
        template.add_resource(
            &scope.child("RouteTableAssociation"),
            Resource::new("AWS::EC2::SubnetRouteTableAssociation")
                .prop("RouteTableId", Expr::reference(&route_table))
                .prop("SubnetId", Expr::reference(&subnet)),
        )?;

        Ok(Subnet {
            subnet_id: Expr::reference(subnet),
            availability_zone,
            cidr: cidr.to_string(),
            route_table_id: Expr::reference(route_table),
        })
    }

    fn add_nat_gateway(
        &self,
        template: &mut Template,
        az: usize,
        subnet: &Subnet,
        default_route: &str,
    ) -> Result<String> {
        let scope = self.path.child(format!("PublicSubnet{}", az + 1));
        let eip = template.add_resource(
            &scope.child("EIP"),
            Resource::new("AWS::EC2::EIP").prop("Domain", "vpc"),
        )?;
        template.add_resource(
            &scope.child("NATGateway"),
            Resource::new("AWS::EC2::NatGateway")
                .prop("SubnetId", subnet.subnet_id.clone())
                .prop("AllocationId", Expr::att(eip, "AllocationId"))
                .prop("Tags", name_tag(&scope))
                .depends_on(default_route),
        )
    }
}

fn tag(key: &str, value: impl Into<Expr>) -> Expr {
    Expr::map([("Key", Expr::str(key)), ("Value", value.into())])
}

fn name_tag(path: &ConstructPath) -> Expr {
    Expr::list([tag("Name", path.to_string())])
}

/// Split `cidr` into `count` equal subnets (rounded up to a power of two),
/// returned in address order.
pub fn split_cidr(cidr: &str, count: usize) -> Result<Vec<String>> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| SynthError::InvalidCidr(cidr.to_string()))?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| SynthError::InvalidCidr(cidr.to_string()))?;
    let prefix: u8 = prefix.parse().map_err(|_| SynthError::InvalidCidr(cidr.to_string()))?;
    if prefix > 32 {
        return Err(SynthError::InvalidCidr(cidr.to_string()));
    }
    let base = u32::from(addr);
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    if base & !mask != 0 {
        // host bits set, e.g. 10.0.0.1/16
        return Err(SynthError::InvalidCidr(cidr.to_string()));
    }

    let bits = count.max(1).next_power_of_two().trailing_zeros() as u8;
    let sub_prefix = prefix + bits;
    // AWS subnets cannot be smaller than /28.
    if sub_prefix > 28 {
        return Err(SynthError::SubnetLayout {
            cidr: cidr.to_string(),
            subnets: count,
            prefix: sub_prefix,
        });
    }
    let size = 1u64 << (32 - sub_prefix);
    Ok((0..count as u64)
        .map(|i| {
            let start = Ipv4Addr::from((base as u64 + i * size) as u32);
            format!("{start}/{sub_prefix}")
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_default_vpc() {
        let subnets = split_cidr("10.0.0.0/16", 4).unwrap();
        assert_eq!(
            subnets,
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
    }

    #[test]
    fn split_rounds_up_to_power_of_two() {
        let subnets = split_cidr("10.0.0.0/16", 6).unwrap();
        assert_eq!(subnets.len(), 6);
        assert_eq!(subnets[1], "10.0.32.0/19");
        assert_eq!(subnets[5], "10.0.160.0/19");
    }

    #[test]
    fn split_rejects_bad_input() {
        assert!(matches!(split_cidr("10.0.0.0", 4), Err(SynthError::InvalidCidr(_))));
        assert!(matches!(split_cidr("10.0.0.1/16", 4), Err(SynthError::InvalidCidr(_))));
        assert!(matches!(split_cidr("300.0.0.0/16", 4), Err(SynthError::InvalidCidr(_))));
        assert!(matches!(split_cidr("10.0.0.0/27", 4), Err(SynthError::SubnetLayout { .. })));
    }

    #[test]
    fn vpc_with_single_nat() {
        let mut t = Template::new();
        let vpc = Vpc::new(&mut t, ConstructPath::root("T").child("VPC"), &NetworkConfig::default()).unwrap();
        assert_eq!(vpc.public_subnets.len(), 2);
        assert_eq!(vpc.private_subnets.len(), 2);
        assert_eq!(vpc.nat_gateways.len(), 1);
        assert_eq!(t.resources_of_type("AWS::EC2::NatGateway").count(), 1);
        assert_eq!(t.resources_of_type("AWS::EC2::EIP").count(), 1);
        // two public + two private default routes
        assert_eq!(t.resources_of_type("AWS::EC2::Route").count(), 4);
        let private_routes: Vec<_> = t
            .resources_of_type("AWS::EC2::Route")
            .filter(|(_, r)| r.properties.contains_key("NatGatewayId"))
            .collect();
        assert_eq!(private_routes.len(), 2);
        for (_, r) in private_routes {
            assert_eq!(r.properties["NatGatewayId"], Expr::reference(&vpc.nat_gateways[0]));
        }
        t.validate().unwrap();
    }

    #[test]
    fn vpc_without_nat_has_isolated_private_subnets() {
        let mut t = Template::new();
        let config = NetworkConfig {
            nat_gateways: 0,
            ..NetworkConfig::default()
        };
        Vpc::new(&mut t, ConstructPath::root("T").child("VPC"), &config).unwrap();
        assert_eq!(t.resources_of_type("AWS::EC2::NatGateway").count(), 0);
        assert_eq!(t.resources_of_type("AWS::EC2::Route").count(), 2);
    }
}
