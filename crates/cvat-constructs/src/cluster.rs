//! ECS cluster with Fargate capacity providers and a private DNS namespace
//! for service discovery.

use cvat_core::{ConstructPath, Expr, Resource, Result, Template};

use crate::network::Vpc;

#[derive(Debug, Clone)]
pub struct Cluster {
    pub path: ConstructPath,
    pub logical_id: String,
    pub namespace_id: String,
    pub namespace_name: String,
    pub vpc: Vpc,
}

impl Cluster {
    pub fn new(template: &mut Template, path: ConstructPath, vpc: &Vpc, namespace_name: &str) -> Result<Self> {
        let logical_id = template.add_resource(
            &path,
            Resource::new("AWS::ECS::Cluster").prop(
                "ClusterSettings",
                Expr::list([Expr::map([
                    ("Name", Expr::str("containerInsights")),
                    ("Value", Expr::str("disabled")),
                ])]),
            ),
        )?;
        template.add_resource(
            &path.child("CapacityProviders"),
            Resource::new("AWS::ECS::ClusterCapacityProviderAssociations")
                .prop("Cluster", Expr::reference(&logical_id))
                .prop("CapacityProviders", Expr::list(["FARGATE", "FARGATE_SPOT"]))
                .prop("DefaultCapacityProviderStrategy", Expr::List(Vec::new())),
        )?;
        let namespace_id = template.add_resource(
            &path.child("DefaultServiceDiscoveryNamespace"),
            Resource::new("AWS::ServiceDiscovery::PrivateDnsNamespace")
                .prop("Name", namespace_name)
                .prop("Vpc", vpc.vpc_id.clone()),
        )?;

        Ok(Self {
            path,
            logical_id,
            namespace_id,
            namespace_name: namespace_name.to_string(),
            vpc: vpc.clone(),
        })
    }

    /// Cluster name (`Ref` of the cluster).
    pub fn cluster_name(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    pub fn namespace(&self) -> Expr {
        Expr::att(&self.namespace_id, "Id")
    }

    /// Fully-qualified discovery name for a service.
    pub fn dns_name(&self, service_name: &str) -> String {
        format!("{service_name}.{}", self.namespace_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvat_core::config::NetworkConfig;

    #[test]
    fn cluster_resources() {
        let mut t = Template::new();
        let root = ConstructPath::root("T");
        let vpc = Vpc::new(&mut t, root.child("VPC"), &NetworkConfig::default()).unwrap();
        let cluster = Cluster::new(&mut t, root.child("Cluster"), &vpc, "cvat.internal").unwrap();
        assert_eq!(cluster.dns_name("opa"), "opa.cvat.internal");
        assert_eq!(t.resources_of_type("AWS::ServiceDiscovery::PrivateDnsNamespace").count(), 1);
        let assoc = t
            .resources_of_type("AWS::ECS::ClusterCapacityProviderAssociations")
            .next()
            .unwrap()
            .1;
        assert_eq!(assoc.property("CapacityProviders.1").and_then(Expr::as_str), Some("FARGATE_SPOT"));
        t.validate().unwrap();
    }
}
