//! ElastiCache Redis in the private subnets.
//!
//! A plain cache cluster without TLS or an auth token: the CVAT server image
//! connects over `redis://` with an empty password.

use tracing::info;

use cvat_core::config::CacheConfig;
use cvat_core::{ConstructPath, Expr, Resource, Result, Template};

use crate::connections::{Connections, SecurityGroup};
use crate::endpoint::Endpoint;
use crate::network::Vpc;

const REDIS_PORT: u16 = 6379;

#[derive(Debug, Clone)]
pub struct RedisCluster {
    pub path: ConstructPath,
    pub cluster_id: String,
    pub node_count: u32,
    pub connections: Connections,
    pub endpoint: Endpoint,
}

impl RedisCluster {
    pub fn new(
        template: &mut Template,
        path: ConstructPath,
        config: &CacheConfig,
        node_count: u32,
        vpc: &Vpc,
    ) -> Result<Self> {
        let security_group = SecurityGroup::new(template, path.child("SecurityGroup"), &vpc.vpc_id)?;
        let subnets = template.add_resource(
            &path.child("Subnets"),
            Resource::new("AWS::ElastiCache::SubnetGroup")
                .prop("Description", format!("Subnets for {}/Cluster", path))
                .prop("SubnetIds", Expr::List(vpc.private_subnet_ids())),
        )?;

        let cluster_id = template.add_resource(
            &path.child("Cluster"),
            Resource::new("AWS::ElastiCache::CacheCluster")
                .prop("Engine", "redis")
                .prop("EngineVersion", config.engine_version.as_str())
                .prop("CacheNodeType", config.node_type.as_str())
                .prop("NumCacheNodes", node_count)
                .prop("Port", REDIS_PORT)
                .prop("CacheSubnetGroupName", Expr::reference(&subnets))
                .prop("VpcSecurityGroupIds", Expr::list([security_group.group_id()])),
        )?;
        let endpoint = Endpoint::new(
            Expr::att(&cluster_id, "RedisEndpoint.Address"),
            Expr::att(&cluster_id, "RedisEndpoint.Port"),
        );

        info!(
            node_type = %config.node_type,
            nodes = node_count,
            "cache synthesized"
        );

        Ok(Self {
            path,
            cluster_id,
            node_count,
            connections: Connections::new(security_group, Some(endpoint.port.clone())),
            endpoint,
        })
    }
}
