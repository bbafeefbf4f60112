//! Aurora PostgreSQL Serverless v2 cluster.
//!
//! Capacity scales between a minimum and maximum number of Aurora capacity
//! units instead of a fixed instance size. The writer is `Instance1`; a
//! multi-AZ deployment adds one reader that scales with the writer.

use std::collections::BTreeMap;

use tracing::info;

use cvat_core::config::DatabaseConfig;
use cvat_core::{ConstructPath, Expr, RemovalPolicy, Resource, Result, SynthError, Template};

use crate::connections::{Connections, SecurityGroup};
use crate::endpoint::Endpoint;
use crate::network::Vpc;
use crate::secrets::{GeneratedSecretProps, Secret, generated_secret};

const ENGINE: &str = "aurora-postgresql";
const INSTANCE_CLASS: &str = "db.serverless";
const MAX_ACU: f64 = 128.0;
const MIN_ACU: f64 = 0.5;

/// Validated Serverless v2 scaling range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingRange {
    pub min_capacity: f64,
    pub max_capacity: f64,
}

impl ScalingRange {
    pub fn new(min_capacity: f64, max_capacity: f64) -> Result<Self> {
        let err = |reason| SynthError::InvalidCapacity {
            min: min_capacity,
            max: max_capacity,
            reason,
        };
        let half_steps = |v: f64| (v * 2.0).fract() == 0.0;
        if !half_steps(min_capacity) || !half_steps(max_capacity) {
            return Err(err("capacity must be a multiple of 0.5"));
        }
        if min_capacity < MIN_ACU {
            return Err(err("minimum capacity is 0.5"));
        }
        if max_capacity > MAX_ACU {
            return Err(err("maximum capacity is 128"));
        }
        if min_capacity > max_capacity {
            return Err(err("minimum exceeds maximum"));
        }
        Ok(Self {
            min_capacity,
            max_capacity,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerlessCluster {
    pub path: ConstructPath,
    pub cluster_id: String,
    pub writer_id: String,
    pub reader_ids: Vec<String>,
    /// Credentials, with host and port attached after cluster creation.
    pub secret: Secret,
    pub connections: Connections,
    pub endpoint: Endpoint,
    pub scaling: ScalingRange,
}

impl ServerlessCluster {
    pub fn new(
        template: &mut Template,
        path: ConstructPath,
        config: &DatabaseConfig,
        multi_az: bool,
        vpc: &Vpc,
    ) -> Result<Self> {
        let scaling = ScalingRange::new(config.min_capacity, config.max_capacity)?;

        let subnets = template.add_resource(
            &path.child("Subnets"),
            Resource::new("AWS::RDS::DBSubnetGroup")
                .prop("DBSubnetGroupDescription", format!("Subnets for {} database", path.id()))
                .prop("SubnetIds", Expr::List(vpc.private_subnet_ids())),
        )?;
        let security_group = SecurityGroup::new(template, path.child("SecurityGroup"), &vpc.vpc_id)?;

        let mut fields = BTreeMap::new();
        fields.insert("username", config.username.as_str());
        fields.insert("dbname", config.database_name.as_str());
        let generated = generated_secret(
            template,
            path.child("Secret"),
            GeneratedSecretProps {
                description: "Generated by the CVAT stack for the database cluster",
                fields,
                ..Default::default()
            },
        )?;

        let cluster_id = template.add_resource(
            &path,
            Resource::new("AWS::RDS::DBCluster")
                .prop("Engine", ENGINE)
                .prop("EngineVersion", config.engine_version.as_str())
                .prop(
                    "DBClusterParameterGroupName",
                    format!("default.{ENGINE}{}", config.major_version()),
                )
                .prop("DBSubnetGroupName", Expr::reference(&subnets))
                .prop("VpcSecurityGroupIds", Expr::list([security_group.group_id()]))
                .prop("MasterUsername", generated.dynamic_reference("username"))
                .prop("MasterUserPassword", generated.dynamic_reference("password"))
                .prop("DatabaseName", config.database_name.as_str())
                .prop("StorageEncrypted", true)
                .prop("CopyTagsToSnapshot", true)
                .prop(
                    "ServerlessV2ScalingConfiguration",
                    Expr::map([
                        ("MinCapacity", Expr::Num(scaling.min_capacity)),
                        ("MaxCapacity", Expr::Num(scaling.max_capacity)),
                    ]),
                )
                .removal_policy(RemovalPolicy::Delete),
        )?;

        let attachment = template.add_resource(
            &path.child("Secret").child("Attachment"),
            Resource::new("AWS::SecretsManager::SecretTargetAttachment")
                .prop("SecretId", generated.arn())
                .prop("TargetId", Expr::reference(&cluster_id))
                .prop("TargetType", "AWS::RDS::DBCluster"),
        )?;

        let instance = |tier: i64| {
            Resource::new("AWS::RDS::DBInstance")
                .prop("DBClusterIdentifier", Expr::reference(&cluster_id))
                .prop("DBInstanceClass", INSTANCE_CLASS)
                .prop("Engine", ENGINE)
                .prop("DBSubnetGroupName", Expr::reference(&subnets))
                .prop("PromotionTier", Expr::Int(tier))
                .prop("PubliclyAccessible", false)
                .removal_policy(RemovalPolicy::Delete)
        };

        let writer_id = template.add_resource(&path.child("Instance1"), instance(0))?;
        let mut reader_ids = Vec::new();
        if multi_az {
            // Tier 1 readers scale with the writer so a failover lands on
            // an instance of the same size.
            reader_ids.push(template.add_resource(&path.child("Instance2"), instance(1))?);
        }

        let endpoint = Endpoint::new(
            Expr::att(&cluster_id, "Endpoint.Address"),
            Expr::att(&cluster_id, "Endpoint.Port"),
        );
        let connections = Connections::new(security_group, Some(endpoint.port.clone()));

        info!(
            engine_version = %config.engine_version,
            min_acu = scaling.min_capacity,
            max_acu = scaling.max_capacity,
            readers = reader_ids.len(),
            "database synthesized"
        );

        Ok(Self {
            path,
            cluster_id,
            writer_id,
            reader_ids,
            secret: Secret { logical_id: attachment },
            connections,
            endpoint,
            scaling,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvat_core::config::NetworkConfig;

    fn synth(config: &DatabaseConfig, multi_az: bool) -> (Template, ServerlessCluster) {
        let mut t = Template::new();
        let root = ConstructPath::root("T");
        let vpc = Vpc::new(&mut t, root.child("VPC"), &NetworkConfig::default()).unwrap();
        let db = ServerlessCluster::new(&mut t, root.child("Database"), config, multi_az, &vpc).unwrap();
        (t, db)
    }

    #[test]
    fn scaling_range_validation() {
        assert!(ScalingRange::new(0.5, 8.0).is_ok());
        assert!(ScalingRange::new(0.5, 32.0).is_ok());
        assert!(ScalingRange::new(0.25, 8.0).is_err());
        assert!(ScalingRange::new(0.0, 8.0).is_err());
        assert!(ScalingRange::new(4.0, 2.0).is_err());
        assert!(ScalingRange::new(1.0, 256.0).is_err());
    }

    #[test]
    fn single_az_has_only_writer() {
        let (t, db) = synth(&DatabaseConfig::default(), false);
        assert!(db.reader_ids.is_empty());
        assert_eq!(t.resources_of_type("AWS::RDS::DBInstance").count(), 1);
        let cluster = t.resource(&db.cluster_id).unwrap();
        assert_eq!(
            cluster.property("ServerlessV2ScalingConfiguration.MaxCapacity"),
            Some(&Expr::Num(8.0))
        );
        assert_eq!(cluster.removal_policy, Some(RemovalPolicy::Delete));
        t.validate().unwrap();
    }

    #[test]
    fn multi_az_adds_reader() {
        let (t, db) = synth(&DatabaseConfig::default(), true);
        assert_eq!(db.reader_ids.len(), 1);
        let reader = t.resource(&db.reader_ids[0]).unwrap();
        assert_eq!(reader.properties["PromotionTier"], Expr::Int(1));
        assert_eq!(reader.properties["DBInstanceClass"], Expr::str("db.serverless"));
    }

    #[test]
    fn credentials_are_never_literal() {
        let (t, db) = synth(&DatabaseConfig::default(), false);
        let cluster = t.resource(&db.cluster_id).unwrap();
        assert!(cluster.properties["MasterUserPassword"].is_deferred());
        assert!(cluster.properties["MasterUsername"].is_deferred());
    }

    #[test]
    fn invalid_capacity_fails_synthesis() {
        let config = DatabaseConfig {
            min_capacity: 16.0,
            max_capacity: 8.0,
            ..DatabaseConfig::default()
        };
        let mut t = Template::new();
        let root = ConstructPath::root("T");
        let vpc = Vpc::new(&mut t, root.child("VPC"), &NetworkConfig::default()).unwrap();
        let err = ServerlessCluster::new(&mut t, root.child("Database"), &config, false, &vpc).unwrap_err();
        assert!(matches!(err, SynthError::InvalidCapacity { .. }));
    }
}
