//! Shared EFS storage with fixed-ownership access points.

use cvat_core::{ConstructPath, Expr, RemovalPolicy, Resource, Result, Template};

use crate::connections::{Connections, SecurityGroup};
use crate::network::Vpc;

const NFS_PORT: u16 = 2049;

/// POSIX identity and root directory for an access point.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPointProps<'a> {
    pub path: &'a str,
    pub uid: u32,
    pub gid: u32,
    pub permissions: &'a str,
}

impl<'a> AccessPointProps<'a> {
    /// Owned by 1000:1000 with mode 0755, the CVAT container user.
    pub fn django(path: &'a str) -> Self {
        Self {
            path,
            uid: 1000,
            gid: 1000,
            permissions: "0755",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessPoint {
    pub logical_id: String,
    pub root_path: String,
    pub file_system_id: Expr,
}

impl AccessPoint {
    pub fn access_point_id(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }
}

#[derive(Debug, Clone)]
pub struct FileSystem {
    pub path: ConstructPath,
    pub logical_id: String,
    pub connections: Connections,
}

impl FileSystem {
    /// Encrypted, elastic-throughput file system with one mount target per
    /// private subnet. Deleted with the stack.
    pub fn new(template: &mut Template, path: ConstructPath, vpc: &Vpc) -> Result<Self> {
        let logical_id = template.add_resource(
            &path,
            Resource::new("AWS::EFS::FileSystem")
                .prop("Encrypted", true)
                .prop("ThroughputMode", "elastic")
                .prop(
                    "FileSystemTags",
                    Expr::list([Expr::map([
                        ("Key", Expr::str("Name")),
                        ("Value", Expr::str(path.to_string())),
                    ])]),
                )
                .removal_policy(RemovalPolicy::Delete),
        )?;
        let security_group = SecurityGroup::new(template, path.child("EfsSecurityGroup"), &vpc.vpc_id)?;

        for (i, subnet) in vpc.private_subnets.iter().enumerate() {
            template.add_resource(
                &path.child(format!("EfsMountTarget{}", i + 1)),
                Resource::new("AWS::EFS::MountTarget")
                    .prop("FileSystemId", Expr::reference(&logical_id))
                    .prop("SecurityGroups", Expr::list([security_group.group_id()]))
                    .prop("SubnetId", subnet.subnet_id.clone()),
            )?;
        }

        Ok(Self {
            path,
            logical_id,
            connections: Connections::new(security_group, Some(Expr::from(NFS_PORT))),
        })
    }

    pub fn file_system_id(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    pub fn add_access_point(
        &self,
        template: &mut Template,
        id: &str,
        props: &AccessPointProps<'_>,
    ) -> Result<AccessPoint> {
        let logical_id = template.add_resource(
            &self.path.child(id),
            Resource::new("AWS::EFS::AccessPoint")
                .prop("FileSystemId", self.file_system_id())
                .prop(
                    "PosixUser",
                    Expr::map([
                        ("Uid", Expr::str(props.uid.to_string())),
                        ("Gid", Expr::str(props.gid.to_string())),
                    ]),
                )
                .prop(
                    "RootDirectory",
                    Expr::map([
                        ("Path", Expr::str(props.path)),
                        (
                            "CreationInfo",
                            Expr::map([
                                ("OwnerUid", Expr::str(props.uid.to_string())),
                                ("OwnerGid", Expr::str(props.gid.to_string())),
                                ("Permissions", Expr::str(props.permissions)),
                            ]),
                        ),
                    ]),
                ),
        )?;
        Ok(AccessPoint {
            logical_id,
            root_path: props.path.to_string(),
            file_system_id: self.file_system_id(),
        })
    }
}
