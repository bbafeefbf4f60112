//! Fargate services.
//!
//! Every service shares one base: a security group (own or borrowed), a
//! log group, a single-container task definition and an ECS service with
//! deployment circuit breaker rollback. Workers run on Fargate Spot and
//! accept no inbound traffic. HTTP services add a named port mapping, Cloud
//! Map registration (`<name>.cvat.internal`) and, on request, a load
//! balancer target group.

use std::collections::BTreeMap;

use tracing::{debug, info};

use cvat_core::config::{ServiceOverride, fargate_size_is_valid};
use cvat_core::{ConstructPath, CpuArchitecture, Expr, Pseudo, RemovalPolicy, Resource, Result, SynthError, Template};

use crate::cluster::Cluster;
use crate::connections::{Connections, SecurityGroup};
use crate::filesystem::{AccessPoint, FileSystem};
use crate::iam::{PolicyStatement, Role};
use crate::image::ContainerImage;
use crate::load_balancer::{HealthCheck, TargetGroup};
use crate::secrets::SecretRef;

pub use crate::endpoint::Endpoint;

const ECS_TASKS_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
const DEFAULT_CONTAINER_NAME: &str = "app";
const DEFAULT_CPU: u32 = 512;
const DEFAULT_MEMORY_MIB: u32 = 1024;
const LOG_RETENTION_DAYS: u32 = 30;
const LOG_STREAM_PREFIX: &str = "ecs";
const NOFILE_LIMIT: u32 = 65536;
const DNS_TTL_SECONDS: u32 = 10;
const DEREGISTRATION_DELAY_SECONDS: u32 = 30;
const HEALTH_CHECK_GRACE_PERIOD_SECONDS: u32 = 60;
const PORT_MAPPING_NAME: &str = "http";

// ── Container options ─────────────────────────────────────────────

/// The single container of a service's task definition.
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    pub image: ContainerImage,
    /// Defaults to `app`.
    pub container_name: Option<String>,
    pub entry_point: Vec<String>,
    pub command: Vec<Expr>,
    pub environment: BTreeMap<String, Expr>,
    pub secrets: BTreeMap<String, SecretRef>,
}

impl ContainerOptions {
    pub fn new(image: ContainerImage) -> Self {
        Self {
            image,
            container_name: None,
            entry_point: Vec::new(),
            command: Vec::new(),
            environment: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }

    /// Builder method: set the container name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    /// Builder method: override the image entry point.
    pub fn entry_point<I, S>(mut self, entry_point: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_point = entry_point.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method: set the container command.
    pub fn command<I, T>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Expr>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method: add an environment variable.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    /// Builder method: add a variable read from Secrets Manager at task start.
    pub fn secret(mut self, name: impl Into<String>, value: SecretRef) -> Self {
        self.secrets.insert(name.into(), value);
        self
    }

    fn name_or_default(&self) -> String {
        self.container_name
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string())
    }
}

// ── Service properties ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FargateServiceProps {
    /// Cloud Map name; defaults to the lowercased construct id.
    pub service_name: Option<String>,
    pub cpu: u32,
    pub memory_mib: u32,
    pub container: ContainerOptions,
    /// Reuse another service's security group instead of creating one.
    pub security_group: Option<SecurityGroup>,
    pub desired_count: Option<u32>,
    pub cpu_architecture: CpuArchitecture,
    pub enable_execute_command: bool,
}

impl FargateServiceProps {
    pub fn new(container: ContainerOptions) -> Self {
        Self {
            service_name: None,
            cpu: DEFAULT_CPU,
            memory_mib: DEFAULT_MEMORY_MIB,
            container,
            security_group: None,
            desired_count: None,
            cpu_architecture: CpuArchitecture::default(),
            enable_execute_command: false,
        }
    }

    /// Builder method: set the Cloud Map service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Builder method: set the task size.
    pub fn size(mut self, cpu: u32, memory_mib: u32) -> Self {
        self.cpu = cpu;
        self.memory_mib = memory_mib;
        self
    }

    /// Builder method: share an existing security group.
    pub fn security_group(mut self, security_group: &SecurityGroup) -> Self {
        self.security_group = Some(security_group.clone());
        self
    }

    pub fn architecture(mut self, arch: CpuArchitecture) -> Self {
        self.cpu_architecture = arch;
        self
    }

    /// Builder method: allow `aws ecs execute-command` into the tasks.
    pub fn execute_command(mut self) -> Self {
        self.enable_execute_command = true;
        self
    }

    /// Apply a per-service override from `cvat.toml`.
    pub fn with_override(mut self, over: Option<&ServiceOverride>) -> Self {
        let Some(over) = over else {
            return self;
        };
        if let Some(cpu) = over.cpu {
            self.cpu = cpu;
        }
        if let Some(memory) = over.memory_mib {
            self.memory_mib = memory;
        }
        if let Some(count) = over.desired_count {
            self.desired_count = Some(count);
        }
        if let Some(arch) = over.cpu_architecture {
            self.cpu_architecture = arch;
        }
        self
    }
}

/// An EFS access point mounted into the service's container.
#[derive(Debug, Clone)]
pub struct Volume<'a> {
    pub container_path: &'a str,
    pub access_point: &'a AccessPoint,
    pub read_only: bool,
}

// ── Base service ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FargateService {
    pub path: ConstructPath,
    pub service_name: String,
    pub service_id: String,
    pub task_definition_id: String,
    pub log_group_id: String,
    pub container_name: String,
    pub task_role: Role,
    pub execution_role: Role,
    pub connections: Connections,
    vpc_id: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capacity {
    OnDemand,
    Spot,
}

impl FargateService {
    fn build(
        template: &mut Template,
        path: ConstructPath,
        cluster: &Cluster,
        props: FargateServiceProps,
        capacity: Capacity,
    ) -> Result<Self> {
        let service_name = props
            .service_name
            .clone()
            .unwrap_or_else(|| path.id().to_lowercase());
        if !fargate_size_is_valid(props.cpu, props.memory_mib) {
            return Err(SynthError::InvalidTaskSize {
                service: service_name,
                cpu: props.cpu,
                memory_mib: props.memory_mib,
            });
        }

        let security_group = match props.security_group {
            Some(sg) => sg,
            None => SecurityGroup::new(template, path.child("SecurityGroup"), &cluster.vpc.vpc_id)?,
        };

        let log_group_id = template.add_resource(
            &path.child("Logs"),
            Resource::new("AWS::Logs::LogGroup")
                .prop("RetentionInDays", LOG_RETENTION_DAYS)
                .removal_policy(RemovalPolicy::Delete),
        )?;

        let task_def_path = path.child("TaskDef");
        let mut task_role = Role::new(template, task_def_path.child("TaskRole"), ECS_TASKS_PRINCIPAL)?;
        let mut execution_role = Role::new(template, task_def_path.child("ExecutionRole"), ECS_TASKS_PRINCIPAL)?;

        let container_name = props.container.name_or_default();
        let task_definition_id = template.add_resource(
            &task_def_path,
            Resource::new("AWS::ECS::TaskDefinition")
                .prop(
                    "ContainerDefinitions",
                    Expr::list([container_definition(&container_name, &props.container, &log_group_id)]),
                )
                .prop("Cpu", props.cpu.to_string())
                .prop("Memory", props.memory_mib.to_string())
                .prop("ExecutionRoleArn", execution_role.arn())
                .prop("Family", task_def_path.logical_id())
                .prop("NetworkMode", "awsvpc")
                .prop("RequiresCompatibilities", Expr::list(["FARGATE"]))
                .prop(
                    "RuntimePlatform",
                    Expr::map([
                        ("CpuArchitecture", Expr::str(props.cpu_architecture.as_str())),
                        ("OperatingSystemFamily", Expr::str("LINUX")),
                    ]),
                )
                .prop("TaskRoleArn", task_role.arn()),
        )?;

        execution_role.add_to_policy(
            template,
            PolicyStatement::allow(
                ["logs:CreateLogStream", "logs:PutLogEvents"],
                vec![Expr::att(&log_group_id, "Arn")],
            ),
        )?;
        if let ContainerImage::Asset(asset) = &props.container.image {
            let repository_arn = Expr::concat([
                Expr::str("arn:"),
                Expr::Pseudo(Pseudo::Partition),
                Expr::str(":ecr:"),
                Expr::Pseudo(Pseudo::Region),
                Expr::str(":"),
                Expr::Pseudo(Pseudo::AccountId),
                Expr::str(":repository/"),
                asset.repository_name(),
            ]);
            execution_role.add_to_policy(
                template,
                PolicyStatement::allow(
                    ["ecr:BatchCheckLayerAvailability", "ecr:BatchGetImage", "ecr:GetDownloadUrlForLayer"],
                    vec![repository_arn],
                ),
            )?;
            execution_role.add_to_policy(
                template,
                PolicyStatement::allow(["ecr:GetAuthorizationToken"], vec![Expr::str("*")]),
            )?;
        }
        let mut secret_arns: Vec<Expr> = Vec::new();
        for secret in props.container.secrets.values() {
            let arn = secret.secret.arn();
            if !secret_arns.contains(&arn) {
                secret_arns.push(arn);
            }
        }
        if !secret_arns.is_empty() {
            execution_role.add_to_policy(
                template,
                PolicyStatement::allow(
                    ["secretsmanager:DescribeSecret", "secretsmanager:GetSecretValue"],
                    secret_arns,
                ),
            )?;
        }
        if props.enable_execute_command {
            task_role.add_to_policy(
                template,
                PolicyStatement::allow(
                    [
                        "ssmmessages:CreateControlChannel",
                        "ssmmessages:CreateDataChannel",
                        "ssmmessages:OpenControlChannel",
                        "ssmmessages:OpenDataChannel",
                    ],
                    vec![Expr::str("*")],
                ),
            )?;
        }

        let mut service = Resource::new("AWS::ECS::Service")
            .prop("Cluster", cluster.cluster_name())
            .prop(
                "DeploymentConfiguration",
                Expr::map([
                    (
                        "DeploymentCircuitBreaker",
                        Expr::map([("Enable", Expr::Bool(true)), ("Rollback", Expr::Bool(true))]),
                    ),
                    ("MaximumPercent", Expr::Int(200)),
                    ("MinimumHealthyPercent", Expr::Int(50)),
                ]),
            )
            .prop("DesiredCount", props.desired_count.unwrap_or(1))
            .prop("EnableECSManagedTags", true)
            .prop("EnableExecuteCommand", props.enable_execute_command)
            .prop(
                "NetworkConfiguration",
                Expr::map([(
                    "AwsvpcConfiguration",
                    Expr::map([
                        ("AssignPublicIp", Expr::str("DISABLED")),
                        ("SecurityGroups", Expr::list([security_group.group_id()])),
                        ("Subnets", Expr::List(cluster.vpc.private_subnet_ids())),
                    ]),
                )]),
            )
            .prop("PropagateTags", "SERVICE")
            .prop("TaskDefinition", Expr::reference(&task_definition_id))
            .depends_on(&task_role.logical_id);
        if let Some(policy) = &task_role.default_policy {
            service = service.depends_on(policy);
        }
        service = match capacity {
            Capacity::OnDemand => service.prop("LaunchType", "FARGATE"),
            Capacity::Spot => service.prop(
                "CapacityProviderStrategy",
                Expr::list([Expr::map([
                    ("CapacityProvider", Expr::str("FARGATE_SPOT")),
                    ("Weight", Expr::Int(1)),
                ])]),
            ),
        };
        let service_id = template.add_resource(&path.child("Service"), service)?;

        info!(
            service = %service_name,
            cpu = props.cpu,
            memory_mib = props.memory_mib,
            arch = props.cpu_architecture.as_str(),
            spot = capacity == Capacity::Spot,
            "service synthesized"
        );

        Ok(Self {
            path,
            service_name,
            service_id,
            task_definition_id,
            log_group_id,
            container_name,
            task_role,
            execution_role,
            connections: Connections::new(security_group, None),
            vpc_id: cluster.vpc.vpc_id.clone(),
        })
    }

    pub fn security_group(&self) -> &SecurityGroup {
        &self.connections.security_group
    }

    /// The ECS service name, assigned at deploy time.
    pub fn service_name_attr(&self) -> Expr {
        Expr::att(&self.service_id, "Name")
    }

    /// Mount an EFS access point and allow NFS from this service to the
    /// file system.
    pub fn add_volume(
        &self,
        template: &mut Template,
        name: &str,
        volume: &Volume<'_>,
        file_system: &FileSystem,
    ) -> Result<()> {
        let task_def = template.resource_mut(&self.task_definition_id)?;
        task_def.push_property(
            "Volumes",
            Expr::map([
                (
                    "EFSVolumeConfiguration",
                    Expr::map([
                        (
                            "AuthorizationConfig",
                            Expr::map([("AccessPointId", volume.access_point.access_point_id())]),
                        ),
                        ("FilesystemId", volume.access_point.file_system_id.clone()),
                        ("RootDirectory", Expr::str("/")),
                        ("TransitEncryption", Expr::str("ENABLED")),
                    ]),
                ),
                ("Name", Expr::str(name)),
            ]),
        );
        let container = default_container_mut(task_def)
            .ok_or_else(|| SynthError::UnknownResource(format!("{}/{}", self.task_definition_id, self.container_name)))?;
        push_entry(
            container,
            "MountPoints",
            Expr::map([
                ("ContainerPath", Expr::str(volume.container_path)),
                ("ReadOnly", Expr::Bool(volume.read_only)),
                ("SourceVolume", Expr::str(name)),
            ]),
        );
        debug!(
            service = %self.service_name,
            volume = name,
            container_path = volume.container_path,
            "mounted volume"
        );
        self.connections
            .allow_to_default_port(template, &file_system.connections, "from service to EFS")?;
        Ok(())
    }

    /// Add an environment variable after the task definition was emitted,
    /// for values that only exist once a peer service is built.
    pub fn add_environment(&self, template: &mut Template, name: &str, value: impl Into<Expr>) -> Result<()> {
        let task_def = template.resource_mut(&self.task_definition_id)?;
        let container = default_container_mut(task_def)
            .ok_or_else(|| SynthError::UnknownResource(format!("{}/{}", self.task_definition_id, self.container_name)))?;
        push_entry(
            container,
            "Environment",
            Expr::map([("Name", Expr::str(name)), ("Value", value.into())]),
        );
        Ok(())
    }

    /// Make the ECS service wait for another resource.
    pub fn add_dependency(&self, template: &mut Template, logical_id: &str) -> Result<()> {
        template
            .resource_mut(&self.service_id)?
            .depends_on
            .insert(logical_id.to_string());
        Ok(())
    }
}

fn container_definition(name: &str, options: &ContainerOptions, log_group_id: &str) -> Expr {
    let mut entries: Vec<(&str, Expr)> = vec![
        ("Essential", Expr::Bool(true)),
        ("Image", options.image.image_uri()),
        (
            "LogConfiguration",
            Expr::map([
                ("LogDriver", Expr::str("awslogs")),
                (
                    "Options",
                    Expr::map([
                        ("awslogs-group", Expr::reference(log_group_id)),
                        ("awslogs-region", Expr::Pseudo(Pseudo::Region)),
                        ("awslogs-stream-prefix", Expr::str(LOG_STREAM_PREFIX)),
                    ]),
                ),
            ]),
        ),
        ("Name", Expr::str(name)),
        (
            "Ulimits",
            Expr::list([Expr::map([
                ("HardLimit", Expr::from(NOFILE_LIMIT)),
                ("Name", Expr::str("nofile")),
                ("SoftLimit", Expr::from(NOFILE_LIMIT)),
            ])]),
        ),
    ];
    if !options.entry_point.is_empty() {
        entries.push(("EntryPoint", Expr::list(options.entry_point.iter())));
    }
    if !options.command.is_empty() {
        entries.push(("Command", Expr::List(options.command.clone())));
    }
    if !options.environment.is_empty() {
        let env = options
            .environment
            .iter()
            .map(|(k, v)| Expr::map([("Name", Expr::str(k)), ("Value", v.clone())]));
        entries.push(("Environment", Expr::List(env.collect())));
    }
    if !options.secrets.is_empty() {
        let secrets = options
            .secrets
            .iter()
            .map(|(k, v)| Expr::map([("Name", Expr::str(k)), ("ValueFrom", v.value_from())]));
        entries.push(("Secrets", Expr::List(secrets.collect())));
    }
    Expr::map(entries)
}

fn default_container_mut(task_def: &mut Resource) -> Option<&mut BTreeMap<String, Expr>> {
    match task_def.properties.get_mut("ContainerDefinitions")? {
        Expr::List(items) => match items.first_mut()? {
            Expr::Map(container) => Some(container),
            _ => None,
        },
        _ => None,
    }
}

fn push_entry(map: &mut BTreeMap<String, Expr>, key: &str, item: Expr) {
    match map.get_mut(key) {
        Some(Expr::List(items)) => items.push(item),
        _ => {
            map.insert(key.to_string(), Expr::List(vec![item]));
        }
    }
}

// ── Worker service ────────────────────────────────────────────────

/// Background worker on Fargate Spot. Accepts no inbound connections.
#[derive(Debug, Clone)]
pub struct WorkerService {
    pub base: FargateService,
}

impl WorkerService {
    pub fn new(
        template: &mut Template,
        path: ConstructPath,
        cluster: &Cluster,
        props: FargateServiceProps,
    ) -> Result<Self> {
        let base = FargateService::build(template, path, cluster, props, Capacity::Spot)?;
        Ok(Self { base })
    }

    pub fn add_volume(
        &self,
        template: &mut Template,
        name: &str,
        volume: &Volume<'_>,
        file_system: &FileSystem,
    ) -> Result<()> {
        self.base.add_volume(template, name, volume, file_system)
    }
}

// ── HTTP service ──────────────────────────────────────────────────

/// Service reachable over HTTP at `<name>.<namespace>:<port>`.
#[derive(Debug, Clone)]
pub struct HttpService {
    pub base: FargateService,
    pub container_port: u16,
    pub cloud_map_service_id: String,
    pub endpoint: Endpoint,
}

impl HttpService {
    pub fn new(
        template: &mut Template,
        path: ConstructPath,
        cluster: &Cluster,
        props: FargateServiceProps,
        container_port: u16,
    ) -> Result<Self> {
        let mut base = FargateService::build(template, path.clone(), cluster, props, Capacity::OnDemand)?;

        let task_def = template.resource_mut(&base.task_definition_id)?;
        let container = default_container_mut(task_def)
            .ok_or_else(|| SynthError::UnknownResource(base.task_definition_id.clone()))?;
        push_entry(
            container,
            "PortMappings",
            Expr::map([
                ("AppProtocol", Expr::str("http")),
                ("ContainerPort", Expr::from(container_port)),
                ("Name", Expr::str(PORT_MAPPING_NAME)),
                ("Protocol", Expr::str("tcp")),
            ]),
        );

        let record = |record_type: &str| {
            Expr::map([
                ("TTL", Expr::from(DNS_TTL_SECONDS)),
                ("Type", Expr::str(record_type)),
            ])
        };
        let cloud_map_service_id = template.add_resource(
            &path.child("Service").child("CloudmapService"),
            Resource::new("AWS::ServiceDiscovery::Service")
                .prop(
                    "DnsConfig",
                    Expr::map([
                        ("DnsRecords", Expr::list([record("SRV"), record("A")])),
                        ("NamespaceId", cluster.namespace()),
                        ("RoutingPolicy", Expr::str("MULTIVALUE")),
                    ]),
                )
                .prop("HealthCheckCustomConfig", Expr::map([("FailureThreshold", Expr::Int(1))]))
                .prop("Name", base.service_name.as_str())
                .prop("NamespaceId", cluster.namespace()),
        )?;
        template.resource_mut(&base.service_id)?.push_property(
            "ServiceRegistries",
            Expr::map([
                ("ContainerName", Expr::str(&base.container_name)),
                ("ContainerPort", Expr::from(container_port)),
                ("RegistryArn", Expr::att(&cloud_map_service_id, "Arn")),
            ]),
        );

        let endpoint = Endpoint::new(cluster.dns_name(&base.service_name), container_port);
        base.connections.default_port = Some(Expr::from(container_port));
        debug!(service = %base.service_name, endpoint = ?endpoint.socket_address(), "registered in cloud map");

        Ok(Self {
            base,
            container_port,
            cloud_map_service_id,
            endpoint,
        })
    }

    pub fn connections(&self) -> &Connections {
        &self.base.connections
    }

    pub fn add_volume(
        &self,
        template: &mut Template,
        name: &str,
        volume: &Volume<'_>,
        file_system: &FileSystem,
    ) -> Result<()> {
        self.base.add_volume(template, name, volume, file_system)
    }

    /// Create the service's target group (IP targets over HTTP) and
    /// register the container in it.
    pub fn add_target_group(&self, template: &mut Template, health_check: &HealthCheck) -> Result<TargetGroup> {
        let mut resource = Resource::new("AWS::ElasticLoadBalancingV2::TargetGroup")
            .prop("Port", self.container_port)
            .prop("Protocol", "HTTP")
            .prop("TargetType", "ip")
            .prop(
                "TargetGroupAttributes",
                Expr::list([
                    Expr::map([
                        ("Key", Expr::str("deregistration_delay.timeout_seconds")),
                        ("Value", Expr::str(DEREGISTRATION_DELAY_SECONDS.to_string())),
                    ]),
                    Expr::map([
                        ("Key", Expr::str("stickiness.enabled")),
                        ("Value", Expr::str("false")),
                    ]),
                ]),
            )
            .prop("VpcId", self.base.vpc_id.clone());
        for (key, value) in health_check.properties() {
            resource = resource.prop(key, value);
        }
        let logical_id = template.add_resource(&self.base.path.child("TargetGroup"), resource)?;

        let service = template.resource_mut(&self.base.service_id)?;
        service.push_property(
            "LoadBalancers",
            Expr::map([
                ("ContainerName", Expr::str(&self.base.container_name)),
                ("ContainerPort", Expr::from(self.container_port)),
                ("TargetGroupArn", Expr::reference(&logical_id)),
            ]),
        );
        service.properties.insert(
            "HealthCheckGracePeriodSeconds".to_string(),
            Expr::from(HEALTH_CHECK_GRACE_PERIOD_SECONDS),
        );

        Ok(TargetGroup {
            logical_id,
            port: self.container_port,
            service_id: self.base.service_id.clone(),
            targets: self.base.connections.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::AccessPointProps;
    use crate::network::Vpc;
    use crate::secrets::Secret;
    use cvat_core::config::NetworkConfig;

    fn setup() -> (Template, ConstructPath, Cluster) {
        let mut t = Template::new();
        let root = ConstructPath::root("T");
        let vpc = Vpc::new(&mut t, root.child("VPC"), &NetworkConfig::default()).unwrap();
        let cluster = Cluster::new(&mut t, root.child("Cluster"), &vpc, "cvat.internal").unwrap();
        (t, root, cluster)
    }

    fn container() -> ContainerOptions {
        ContainerOptions::new(ContainerImage::from_registry("nginx:latest"))
    }

    #[test]
    fn http_service_endpoint_and_discovery() {
        let (mut t, root, cluster) = setup();
        let opa = HttpService::new(
            &mut t,
            root.child("OpenPolicyAgent"),
            &cluster,
            FargateServiceProps::new(container().name("opa")).service_name("opa"),
            8181,
        )
        .unwrap();
        assert_eq!(opa.endpoint.socket_address(), Expr::str("opa.cvat.internal:8181"));
        assert_eq!(opa.connections().default_port, Some(Expr::Int(8181)));

        let discovery = t.resource(&opa.cloud_map_service_id).unwrap();
        assert_eq!(discovery.property("DnsConfig.DnsRecords.0.Type").and_then(Expr::as_str), Some("SRV"));
        assert_eq!(discovery.property("DnsConfig.DnsRecords.1.Type").and_then(Expr::as_str), Some("A"));
        assert_eq!(discovery.property("DnsConfig.DnsRecords.1.TTL"), Some(&Expr::Int(10)));

        let task = t.resource(&opa.base.task_definition_id).unwrap();
        assert_eq!(task.property("ContainerDefinitions.0.Name").and_then(Expr::as_str), Some("opa"));
        assert_eq!(
            task.property("ContainerDefinitions.0.PortMappings.0.Name").and_then(Expr::as_str),
            Some("http")
        );
        assert_eq!(task.properties["Cpu"], Expr::str("512"));
        assert_eq!(task.properties["Memory"], Expr::str("1024"));
        t.validate().unwrap();
    }

    #[test]
    fn service_defaults() {
        let (mut t, root, cluster) = setup();
        let svc = HttpService::new(&mut t, root.child("React"), &cluster, FargateServiceProps::new(container()), 80)
            .unwrap();
        assert_eq!(svc.base.service_name, "react");
        assert_eq!(svc.base.container_name, "app");
        let service = t.resource(&svc.base.service_id).unwrap();
        assert_eq!(
            service.property("DeploymentConfiguration.DeploymentCircuitBreaker.Rollback"),
            Some(&Expr::Bool(true))
        );
        assert_eq!(service.properties["PropagateTags"], Expr::str("SERVICE"));
        assert_eq!(service.properties["LaunchType"], Expr::str("FARGATE"));
        let logs = t.resource(&svc.base.log_group_id).unwrap();
        assert_eq!(logs.properties["RetentionInDays"], Expr::Int(30));
        let task = t.resource(&svc.base.task_definition_id).unwrap();
        assert_eq!(
            task.property("ContainerDefinitions.0.Ulimits.0.SoftLimit"),
            Some(&Expr::Int(65536))
        );
        assert_eq!(
            task.property("ContainerDefinitions.0.LogConfiguration.Options.awslogs-stream-prefix")
                .and_then(Expr::as_str),
            Some("ecs")
        );
    }

    #[test]
    fn worker_runs_on_spot_with_shared_group() {
        let (mut t, root, cluster) = setup();
        let server = HttpService::new(&mut t, root.child("Server"), &cluster, FargateServiceProps::new(container()), 8080)
            .unwrap();
        let sg_count = t.resources_of_type("AWS::EC2::SecurityGroup").count();
        let worker = WorkerService::new(
            &mut t,
            root.child("WorkerImport"),
            &cluster,
            FargateServiceProps::new(container().command(["-c", "supervisord/worker.import.conf"]))
                .security_group(server.base.security_group()),
        )
        .unwrap();
        assert_eq!(t.resources_of_type("AWS::EC2::SecurityGroup").count(), sg_count);
        assert_eq!(worker.base.connections.default_port, None);
        let service = t.resource(&worker.base.service_id).unwrap();
        assert_eq!(
            service.property("CapacityProviderStrategy.0.CapacityProvider").and_then(Expr::as_str),
            Some("FARGATE_SPOT")
        );
        assert!(service.property("LaunchType").is_none());
    }

    #[test]
    fn secrets_are_granted_to_execution_role() {
        let (mut t, root, cluster) = setup();
        let secret = Secret { logical_id: "DbSecret".into() };
        let _ = t.add_resource(&root.child("DbSecret"), Resource::new("AWS::SecretsManager::Secret"));
        let svc = WorkerService::new(
            &mut t,
            root.child("Utils"),
            &cluster,
            FargateServiceProps::new(
                container()
                    .secret("CVAT_POSTGRES_USER", secret.field("username"))
                    .secret("CVAT_POSTGRES_PASSWORD", secret.field("password")),
            )
            .execute_command(),
        )
        .unwrap();
        let policy = t
            .resource(svc.base.execution_role.default_policy.as_deref().unwrap())
            .unwrap();
        let statements = policy.property("PolicyDocument.Statement").and_then(Expr::as_list).unwrap();
        // logs + secrets, the secret listed once
        assert_eq!(statements.len(), 2);
        assert_eq!(policy.property("PolicyDocument.Statement.1.Resource"), Some(&Expr::reference("DbSecret")));
        assert!(svc.base.task_role.default_policy.is_some());
        let service = t.resource(&svc.base.service_id).unwrap();
        assert_eq!(service.properties["EnableExecuteCommand"], Expr::Bool(true));
        t.validate().unwrap();
    }

    #[test]
    fn add_volume_mounts_and_grants_nfs() {
        let (mut t, root, cluster) = setup();
        let fs = FileSystem::new(&mut t, root.child("FileSystem"), &cluster.vpc).unwrap();
        let data = fs
            .add_access_point(&mut t, "DataAccessPoint", &AccessPointProps::django("/data"))
            .unwrap();
        let svc = WorkerService::new(&mut t, root.child("Utils"), &cluster, FargateServiceProps::new(container()))
            .unwrap();
        let volume = Volume {
            container_path: "/home/django/data",
            access_point: &data,
            read_only: false,
        };
        svc.add_volume(&mut t, "data", &volume, &fs).unwrap();

        let task = t.resource(&svc.base.task_definition_id).unwrap();
        assert_eq!(
            task.property("Volumes.0.EFSVolumeConfiguration.TransitEncryption").and_then(Expr::as_str),
            Some("ENABLED")
        );
        assert_eq!(
            task.property("ContainerDefinitions.0.MountPoints.0.ContainerPath").and_then(Expr::as_str),
            Some("/home/django/data")
        );
        let nfs_rules: Vec<_> = t
            .resources_of_type("AWS::EC2::SecurityGroupIngress")
            .filter(|(_, r)| r.properties["FromPort"] == Expr::Int(2049))
            .collect();
        assert_eq!(nfs_rules.len(), 1);
        t.validate().unwrap();
    }

    #[test]
    fn invalid_task_size_is_rejected() {
        let (mut t, root, cluster) = setup();
        let err = WorkerService::new(
            &mut t,
            root.child("Utils"),
            &cluster,
            FargateServiceProps::new(container()).size(256, 4096),
        )
        .unwrap_err();
        assert!(matches!(err, SynthError::InvalidTaskSize { cpu: 256, .. }));
    }

    #[test]
    fn override_applies() {
        let over = ServiceOverride {
            cpu: Some(2048),
            memory_mib: Some(4096),
            desired_count: Some(3),
            cpu_architecture: Some(CpuArchitecture::Arm64),
        };
        let props = FargateServiceProps::new(container()).with_override(Some(&over));
        assert_eq!((props.cpu, props.memory_mib, props.desired_count), (2048, 4096, Some(3)));
        assert_eq!(props.cpu_architecture, CpuArchitecture::Arm64);
    }
}
