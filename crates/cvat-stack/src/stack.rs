//! Stack composition.

use tracing::info;

use cvat_constructs::analytics::Analytics;
use cvat_constructs::cache::RedisCluster;
use cvat_constructs::cdn::Cdn;
use cvat_constructs::cluster::Cluster;
use cvat_constructs::database::ServerlessCluster;
use cvat_constructs::filesystem::{AccessPointProps, FileSystem};
use cvat_constructs::iam::PolicyStatement;
use cvat_constructs::image::{AssetManifest, ContainerImage, ImageAssetProps};
use cvat_constructs::load_balancer::{HealthCheck, LoadBalancer, RoutingTable};
use cvat_constructs::network::Vpc;
use cvat_constructs::secrets::OauthSecret;
use cvat_constructs::service::{ContainerOptions, FargateServiceProps, HttpService, WorkerService};
use cvat_core::{
    Condition, ConstructPath, CvatConfig, Environment, Expr, ResolveError, Resolver, Result, Template,
};

use crate::django::{DjangoBackends, SharedStorage, WORKERS};

pub const NAMESPACE: &str = "cvat.internal";
pub const OAUTH_DISABLED: &str = "OauthDisabled";
pub const SOCIAL_ACCOUNTS_VAR: &str = "USE_ALLAUTH_SOCIAL_ACCOUNTS";

const SERVER_IMAGE_DIR: &str = "./containers/cvat-server";
const SERVERLESS_IMAGE_DIR: &str = "./containers/cvat-serverless";
const SERVER_ENTRY_POINT: &str = "/home/django/backend_entrypoint.sh";
const SERVER_PORT: u16 = 8080;
const OPA_PORT: u16 = 8181;
const UI_PORT: u16 = 80;
const SERVERLESS_PORT: u16 = 8070;

const SERVER_API_PATHS: &[&str] = &["/api/*", "/git/*", "/opencv/*", "/static/*"];
const SERVER_ADMIN_PATHS: &[&str] = &["/admin*", "/documentation/*", "/django-rq*"];
const SELF_REGISTRATION_PATHS: &[&str] = &["/api/auth/register*"];

/// Result of one synthesis pass.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub stack_name: String,
    pub environment: Environment,
    pub template: Template,
    pub assets: AssetManifest,
    /// Listener routing, in evaluation order.
    pub routing: RoutingTable,
    /// Task definition of the CVAT server.
    pub server_task_definition: String,
}

impl Synthesis {
    pub fn template_json(&self) -> serde_json::Result<String> {
        self.template.to_json_pretty()
    }

    pub fn assets_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.assets)
    }

    /// A resolver bound to this stack's name and environment.
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.template)
            .with_environment(self.environment.clone())
            .with_stack_name(&self.stack_name)
    }

    /// Value of the server's social-login flag under the resolver's
    /// parameter values: `"True"` or `"False"`.
    pub fn social_accounts_flag(&self, resolver: &Resolver<'_>) -> std::result::Result<String, ResolveError> {
        let value = self
            .template
            .resource(&self.server_task_definition)
            .and_then(|r| r.property("ContainerDefinitions.0.Environment"))
            .and_then(Expr::as_list)
            .and_then(|env| {
                env.iter()
                    .find(|e| e.get("Name").and_then(Expr::as_str) == Some(SOCIAL_ACCOUNTS_VAR))
            })
            .and_then(|e| e.get("Value"))
            .ok_or_else(|| ResolveError::Deferred(SOCIAL_ACCOUNTS_VAR.to_string()))?;
        resolver.resolve(value)
    }
}

/// Build the complete CVAT stack.
pub fn synthesize(config: &CvatConfig, environment: &Environment) -> Result<Synthesis> {
    config.validate()?;

    let stack_name = config.stack.name.clone();
    let version = config.stack.cvat_version.as_str();
    let multi_az = config.stack.multi_az;
    info!(
        stack = %stack_name,
        cvat_version = version,
        multi_az,
        env = %environment.label(),
        "synthesizing stack"
    );

    let root = ConstructPath::root(&stack_name);
    let mut template = Template::new();
    template.description = Some(
        config
            .stack
            .description
            .clone()
            .unwrap_or_else(|| format!("CVAT {version} on ECS Fargate")),
    );
    let t = &mut template;

    let mut assets = AssetManifest::new();
    let asset_root = config.stack.asset_root.as_path();
    let server_asset = ImageAssetProps::new(SERVER_IMAGE_DIR)
        .build_arg("CVAT_VERSION", version)
        .build(asset_root)?;
    assets.add(&server_asset, environment);
    let cvat_image = ContainerImage::Asset(server_asset);
    let ui_image = ContainerImage::from_registry(format!("{}:{version}", config.ui.repository));

    // ── Secrets ───────────────────────────────────────────────────
    let google = OauthSecret::new(t, &root, "GoogleOauthSecret", "Google")?;
    let github = OauthSecret::new(t, &root, "GitHubOauthSecret", "GitHub")?;
    let oauth_disabled = t.add_condition(
        OAUTH_DISABLED,
        Condition::And(vec![
            Condition::equals(google.client_id.clone(), ""),
            Condition::equals(google.client_secret.clone(), ""),
            Condition::equals(github.client_id.clone(), ""),
            Condition::equals(github.client_secret.clone(), ""),
        ]),
    )?;

    // ── Network and backends ──────────────────────────────────────
    let vpc = Vpc::new(t, root.child("VPC"), &config.network)?;
    let db = ServerlessCluster::new(t, root.child("Database"), &config.database, multi_az, &vpc)?;
    let redis = RedisCluster::new(t, root.child("Redis"), &config.cache, if multi_az { 2 } else { 1 }, &vpc)?;

    let file_system = FileSystem::new(t, root.child("FileSystem"), &vpc)?;
    let data = file_system.add_access_point(t, "DataAccessPoint", &AccessPointProps::django("/data"))?;
    let share = file_system.add_access_point(t, "ShareAccessPoint", &AccessPointProps::django("/share"))?;
    let storage = SharedStorage {
        file_system,
        data,
        share,
    };

    let cluster = Cluster::new(t, root.child("Cluster"), &vpc, NAMESPACE)?;
    let load_balancer = LoadBalancer::new(t, root.child("LoadBalancer"), &vpc)?;
    let cdn = Cdn::new(t, root.child("CDN"), &load_balancer)?;

    let backends = DjangoBackends {
        cvat_host: cdn.domain_name(),
        redis_host: redis.endpoint.hostname.clone(),
        postgres_host: db.endpoint.hostname.clone(),
        db_secret: db.secret.clone(),
    };

    // ── Optional services ─────────────────────────────────────────
    let serverless = if config.auto_annotation.enabled {
        let asset = ImageAssetProps::new(SERVERLESS_IMAGE_DIR).build(asset_root)?;
        assets.add(&asset, environment);
        let service = HttpService::new(
            t,
            root.child("Serverless"),
            &cluster,
            FargateServiceProps::new(ContainerOptions::new(ContainerImage::Asset(asset)))
                .service_name("serverless")
                .with_override(config.service("serverless")),
            SERVERLESS_PORT,
        )?;
        service.base.task_role.attach_inline_policy(
            t,
            root.child("SageMakerPolicy"),
            &[PolicyStatement::allow(
                [
                    "sagemaker:ListEndpoints",
                    "sagemaker:ListModels",
                    "sagemaker:DescribeEndpoint",
                    "sagemaker:DescribeEndpointConfig",
                    "sagemaker:DescribeModel",
                ],
                vec![Expr::str("*")],
            )],
        )?;
        Some(service)
    } else {
        None
    };

    let analytics = if config.analytics.enabled {
        Some(Analytics::new(
            t,
            root.child("Analytics"),
            &cluster,
            &config.analytics,
            config.service("logstash"),
        )?)
    } else {
        None
    };

    // ── CVAT server ───────────────────────────────────────────────
    let mut server_container = backends
        .container(&cvat_image)
        .entry_point([SERVER_ENTRY_POINT])
        .env("DJANGO_MODWSGI_EXTRA_ARGS", "")
        .env("ALLOWED_HOSTS", "*")
        .env("ADAPTIVE_AUTO_ANNOTATION", "false")
        .env("IAM_OPA_BUNDLE", "1")
        .env("NUMPROCS", "2")
        .env("CVAT_ANALYTICS", if analytics.is_some() { "1" } else { "0" })
        .env("CVAT_BASE_URL", Expr::concat([Expr::str("https://"), cdn.domain_name()]))
        .env(
            SOCIAL_ACCOUNTS_VAR,
            Expr::cond(&oauth_disabled, Expr::str("False"), Expr::str("True")),
        )
        .secret("SOCIAL_AUTH_GOOGLE_CLIENT_ID", google.secret.field("clientId"))
        .secret("SOCIAL_AUTH_GOOGLE_CLIENT_SECRET", google.secret.field("clientSecret"))
        .secret("SOCIAL_AUTH_GITHUB_CLIENT_ID", github.secret.field("clientId"))
        .secret("SOCIAL_AUTH_GITHUB_CLIENT_SECRET", github.secret.field("clientSecret"));
    if let Some(serverless) = &serverless {
        server_container = server_container
            .env("CVAT_SERVERLESS", "1")
            .env("CVAT_NUCLIO_HOST", serverless.endpoint.hostname.clone())
            .env("CVAT_NUCLIO_PORT", serverless.endpoint.port_string());
    }
    if let Some(analytics) = &analytics {
        server_container = server_container
            .env("DJANGO_LOG_SERVER_HOST", analytics.logstash.endpoint.hostname.clone())
            .env("DJANGO_LOG_SERVER_PORT", analytics.logstash.endpoint.port_string());
    }
    let server = HttpService::new(
        t,
        root.child("Server"),
        &cluster,
        FargateServiceProps::new(server_container)
            .service_name("server")
            .size(1024, 2048)
            .with_override(config.service("server")),
        SERVER_PORT,
    )?;
    storage.mount(t, &server.base)?;

    // ── Workers ───────────────────────────────────────────────────
    let mut workers = Vec::with_capacity(WORKERS.len());
    for kind in WORKERS {
        let mut container = backends
            .container(&cvat_image)
            .command(["-c", kind.supervisord_conf]);
        match kind.id {
            "Utils" => {
                container = container.env("CVAT_REDIS_PASSWORD", "");
            }
            "WorkerImport" => {
                container = container.env("SMOKESCREEN_OPTS", "");
            }
            "WorkerAnnotation" => {
                if let Some(serverless) = &serverless {
                    container = container
                        .env("CVAT_SERVERLESS", "1")
                        .env("CVAT_NUCLIO_HOST", serverless.endpoint.hostname.clone())
                        .env("CVAT_NUCLIO_PORT", serverless.endpoint.port_string());
                }
            }
            _ => {}
        }
        let mut props = FargateServiceProps::new(container)
            .security_group(server.base.security_group())
            .with_override(config.service(kind.config_key));
        if kind.execute_command {
            props = props.execute_command();
        }
        let worker = WorkerService::new(t, root.child(kind.id), &cluster, props)?;
        storage.mount(t, &worker.base)?;
        workers.push((kind.id, worker));
    }

    // ── Open Policy Agent ─────────────────────────────────────────
    let opa_command = vec![
        Expr::str("run"),
        Expr::str("--server"),
        Expr::str(format!("--log-level={}", config.opa.log_level)),
        Expr::concat([
            Expr::str("--set=services.cvat.url=http://"),
            server.endpoint.socket_address(),
        ]),
        Expr::str("--set=bundles.cvat.service=cvat"),
        Expr::str("--set=bundles.cvat.resource=/api/auth/rules"),
        Expr::str("--set=bundles.cvat.polling.min_delay_seconds=5"),
        Expr::str("--set=bundles.cvat.polling.max_delay_seconds=15"),
    ];
    let opa = HttpService::new(
        t,
        root.child("OpenPolicyAgent"),
        &cluster,
        FargateServiceProps::new(
            ContainerOptions::new(ContainerImage::from_registry(&config.opa.image))
                .name("opa")
                .command(opa_command),
        )
        .service_name("opa")
        .with_override(config.service("opa")),
        OPA_PORT,
    )?;
    server.base.add_environment(
        t,
        "IAM_OPA_HOST",
        Expr::concat([Expr::str("http://"), opa.endpoint.socket_address()]),
    )?;

    // ── UI ────────────────────────────────────────────────────────
    let react = HttpService::new(
        t,
        root.child("React"),
        &cluster,
        FargateServiceProps::new(ContainerOptions::new(ui_image).name("nginx"))
            .size(256, 512)
            .with_override(config.service("ui")),
        UI_PORT,
    )?;

    // ── Permissions ───────────────────────────────────────────────
    server.base.add_dependency(t, &db.writer_id)?;
    let server_conn = server.connections();
    server_conn.allow_to_default_port(t, &db.connections, "from server to database")?;
    server_conn.allow_to_default_port(t, &redis.connections, "from server to redis")?;
    server_conn.allow_to_default_port(t, opa.connections(), "from server to opa")?;
    if let Some(serverless) = &serverless {
        server_conn.allow_to_default_port(t, serverless.connections(), "from server to serverless")?;
    }
    if let Some(analytics) = &analytics {
        server_conn.allow_to_default_port(t, analytics.logstash.connections(), "from server to logstash")?;
    }
    opa.connections()
        .allow_to_default_port(t, server_conn, "from opa to server")?;

    // ── Routing ───────────────────────────────────────────────────
    let react_target = react.add_target_group(
        t,
        &HealthCheck {
            timeout_seconds: Some(2),
            interval_seconds: Some(5),
            ..Default::default()
        },
    )?;
    let server_target = server.add_target_group(
        t,
        &HealthCheck {
            path: Some("/api/server/about".to_string()),
            healthy_threshold: Some(2),
            unhealthy_threshold: Some(10),
            ..Default::default()
        },
    )?;
    let mut listener = load_balancer.add_listener(t, "Listener", 80, &react_target)?;
    listener.add_target_groups(t, "CvatServer1", 20, SERVER_API_PATHS, &server_target)?;
    listener.add_target_groups(t, "CvatServer2", 30, SERVER_ADMIN_PATHS, &server_target)?;
    listener.add_fixed_response(
        t,
        "DisableSelfRegistration",
        1,
        SELF_REGISTRATION_PATHS,
        403,
        "text/plain",
        "Self-registration is not allowed",
    )?;

    // ── Outputs ───────────────────────────────────────────────────
    let (_, utils) = workers
        .iter()
        .find(|(id, _)| *id == "Utils")
        .ok_or_else(|| cvat_core::SynthError::UnknownResource("Utils".to_string()))?;
    let cluster_name = cluster.cluster_name();
    let create_superuser = Expr::concat([
        Expr::str("aws ecs execute-command --cluster "),
        cluster_name.clone(),
        Expr::str(" --task $(aws ecs list-tasks --cluster "),
        cluster_name,
        Expr::str(" --service-name "),
        utils.base.service_name_attr(),
        Expr::str(format!(
            " --query \"taskArns[0]\" --output text) --container {} --interactive --command \"python3 ./manage.py createsuperuser\"",
            utils.base.container_name
        )),
    ]);
    t.add_output(
        "CreateSuperuserCommand",
        create_superuser,
        Some("Create the first CVAT administrator"),
    )?;
    t.add_output(
        "Url",
        Expr::concat([Expr::str("https://"), cdn.domain_name()]),
        Some("Public CVAT URL"),
    )?;

    template.validate()?;
    info!(
        resources = template.resources().len(),
        rules = listener.routing.rules().count(),
        assets = assets.docker_images.len(),
        "stack synthesized"
    );

    Ok(Synthesis {
        stack_name,
        environment: environment.clone(),
        template,
        assets,
        routing: listener.routing,
        server_task_definition: server.base.task_definition_id.clone(),
    })
}
