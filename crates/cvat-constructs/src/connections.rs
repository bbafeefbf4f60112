//! Security groups and the permissions between them.
//!
//! Nothing can reach a backend unless a rule was added here. Rules are
//! emitted as standalone ingress resources on the target group, named after
//! the source group and port, so granting the same access twice (workers
//! sharing the server's group all mount the filesystem) yields one rule.

use tracing::debug;

use cvat_core::{ConstructPath, Expr, Resource, Result, Template};

#[derive(Debug, Clone)]
pub struct SecurityGroup {
    pub path: ConstructPath,
    pub logical_id: String,
}

impl SecurityGroup {
    /// Create a security group that allows all outbound traffic.
    pub fn new(template: &mut Template, path: ConstructPath, vpc_id: &Expr) -> Result<Self> {
        let logical_id = template.add_resource(
            &path,
            Resource::new("AWS::EC2::SecurityGroup")
                .prop("GroupDescription", path.to_string())
                .prop(
                    "SecurityGroupEgress",
                    Expr::list([Expr::map([
                        ("CidrIp", Expr::str("0.0.0.0/0")),
                        ("Description", Expr::str("Allow all outbound traffic by default")),
                        ("IpProtocol", Expr::str("-1")),
                    ])]),
                )
                .prop("VpcId", vpc_id.clone()),
        )?;
        Ok(Self { path, logical_id })
    }

    pub fn group_id(&self) -> Expr {
        Expr::att(&self.logical_id, "GroupId")
    }

    /// Open a TCP port to any IPv4 address.
    pub fn allow_from_anywhere(&self, template: &mut Template, port: u16, description: &str) -> Result<()> {
        template.resource_mut(&self.logical_id)?.push_property(
            "SecurityGroupIngress",
            Expr::map([
                ("CidrIp", Expr::str("0.0.0.0/0")),
                ("Description", Expr::str(description)),
                ("FromPort", Expr::from(port)),
                ("IpProtocol", Expr::str("tcp")),
                ("ToPort", Expr::from(port)),
            ]),
        );
        Ok(())
    }
}

/// The network side of a construct: its security group and the port
/// peers should use to reach it.
#[derive(Debug, Clone)]
pub struct Connections {
    pub security_group: SecurityGroup,
    /// `None` for constructs nobody connects to (workers).
    pub default_port: Option<Expr>,
}

impl Connections {
    pub fn new(security_group: SecurityGroup, default_port: Option<Expr>) -> Self {
        Self {
            security_group,
            default_port,
        }
    }

    /// Allow this construct to reach `other` on its default port.
    ///
    /// Returns the logical id of the ingress rule. A rule that already
    /// exists is reused, not duplicated.
    pub fn allow_to_default_port(
        &self,
        template: &mut Template,
        other: &Connections,
        description: &str,
    ) -> Result<Option<String>> {
        let Some(port) = &other.default_port else {
            debug!(
                target_group = %other.security_group.path,
                "target has no default port, nothing to allow"
            );
            return Ok(None);
        };
        let port_label = match port {
            Expr::Int(n) => n.to_string(),
            _ => "{IndirectPort}".to_string(),
        };
        let path = other
            .security_group
            .path
            .child(format!("from {}:{}", self.security_group.logical_id, port_label));
        let id = path.logical_id();
        if template.contains(&id) {
            return Ok(Some(id));
        }
        let id = template.add_resource(
            &path,
            Resource::new("AWS::EC2::SecurityGroupIngress")
                .prop("IpProtocol", "tcp")
                .prop("Description", description)
                .prop("FromPort", port.clone())
                .prop("ToPort", port.clone())
                .prop("GroupId", other.security_group.group_id())
                .prop("SourceSecurityGroupId", self.security_group.group_id()),
        )?;
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Template, Connections, Connections) {
        let mut t = Template::new();
        let root = ConstructPath::root("T");
        let vpc = Expr::reference("Vpc");
        let a = SecurityGroup::new(&mut t, root.child("A").child("SecurityGroup"), &vpc).unwrap();
        let b = SecurityGroup::new(&mut t, root.child("B").child("SecurityGroup"), &vpc).unwrap();
        (t, Connections::new(a, None), Connections::new(b, Some(Expr::Int(5432))))
    }

    #[test]
    fn allow_emits_ingress_rule() {
        let (mut t, a, b) = setup();
        let id = a.allow_to_default_port(&mut t, &b, "db").unwrap().unwrap();
        let rule = t.resource(&id).unwrap();
        assert_eq!(rule.resource_type, "AWS::EC2::SecurityGroupIngress");
        assert_eq!(rule.properties["FromPort"], Expr::Int(5432));
        assert_eq!(rule.properties["GroupId"], b.security_group.group_id());
        assert_eq!(rule.properties["SourceSecurityGroupId"], a.security_group.group_id());
    }

    #[test]
    fn repeated_allow_is_idempotent() {
        let (mut t, a, b) = setup();
        let first = a.allow_to_default_port(&mut t, &b, "db").unwrap();
        let second = a.allow_to_default_port(&mut t, &b, "db").unwrap();
        assert_eq!(first, second);
        assert_eq!(t.resources_of_type("AWS::EC2::SecurityGroupIngress").count(), 1);
    }

    #[test]
    fn no_default_port_means_no_rule() {
        let (mut t, a, b) = setup();
        assert_eq!(b.allow_to_default_port(&mut t, &a, "x").unwrap(), None);
    }

    #[test]
    fn deferred_port_is_kept_as_expression() {
        let (mut t, a, mut b) = setup();
        b.default_port = Some(Expr::att("Db", "Endpoint.Port"));
        let id = a.allow_to_default_port(&mut t, &b, "db").unwrap().unwrap();
        assert_eq!(t.resource(&id).unwrap().properties["ToPort"], Expr::att("Db", "Endpoint.Port"));
    }

    #[test]
    fn allow_from_anywhere_adds_inline_rule() {
        let (mut t, a, _) = setup();
        a.security_group.allow_from_anywhere(&mut t, 80, "http").unwrap();
        let sg = t.resource(&a.security_group.logical_id).unwrap();
        assert_eq!(sg.property("SecurityGroupIngress.0.FromPort"), Some(&Expr::Int(80)));
    }
}
