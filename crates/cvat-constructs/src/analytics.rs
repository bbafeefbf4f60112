//! Log analytics: an OpenSearch domain fed by a Logstash service.
//!
//! The CVAT server ships its event log to Logstash over HTTP. Logstash
//! splits events into monthly `cvat.client.*`, `cvat.server.*` and
//! `cvat.other.*` indices and writes them to the domain as the generated
//! master user.

use std::collections::BTreeMap;

use tracing::info;

use cvat_core::config::{AnalyticsConfig, ServiceOverride};
use cvat_core::{ConstructPath, CpuArchitecture, Expr, RemovalPolicy, Resource, Result, Template};

use crate::cluster::Cluster;
use crate::image::ContainerImage;
use crate::secrets::{GeneratedSecretProps, Secret, generated_secret};
use crate::service::{ContainerOptions, FargateServiceProps, HttpService};

const MASTER_USER_NAME: &str = "admin";
const LOGSTASH_IMAGE: &str = "opensearchproject/logstash-oss-with-opensearch-output-plugin:8.4.0";
const LOGSTASH_PORT: u16 = 8080;

/// Logstash pipeline for CVAT's event log.
pub const LOGSTASH_PIPELINE: &str = r#"input {
  http {
    port => 8080
    codec => json
  }
}

filter {
  mutate {
    add_field => { "[@metadata][_id]" => "" }
    add_field => { "logger_name" => "" }
  }
  mutate {
    copy => { "[headers][x_request_id]" => "[@metadata][_id]" }
    copy => { "[extra][logger_name]" => "logger_name" }
  }
  prune {
    blacklist_names => ["type", "logsource", "extra", "program", "pid", "headers"]
  }
  if [logger_name] =~ /cvat.client/ {
    mutate {
      add_field => { "[@metadata][_index]" => "cvat.client.%{+YYYY}.%{+MM}" }
    }
    mutate {
      rename => { "message" => "source_message" }
    }
    json {
      source => "source_message"
    }
    date {
      match => ["time", "ISO8601"]
      remove_field => "time"
    }
    if [payload] {
      ruby {
        code => "
          event.get('payload').each { |key, value|
            event.set(key, value)
          }
        "
      }
    }
    prune {
      blacklist_names => ["level", "host", "logger_name", "path", "port", "stack_info", "payload", "source_message"]
    }
  } else if [logger_name] =~ /cvat.server/ {
    mutate {
      add_field => { "[@metadata][_index]" => "cvat.server.%{+YYYY}.%{+MM}" }
    }
    mutate {
      rename => { "logger_name" => "task_id" }
      gsub => [ "task_id", "cvat.server.task_", "" ]
    }
    mutate {
      convert => { "task_id" => "integer" }
    }
    prune {
      blacklist_names => ["host", "port", "stack_info"]
    }
  } else {
    mutate {
      add_field => { "[@metadata][_index]" => "cvat.other.%{+YYYY}.%{+MM}" }
    }
  }
}

output {
  stdout {
    codec => rubydebug
  }

  opensearch {
    index => "%{[@metadata][_index]}"
    document_id => "%{[@metadata][_id]}"
    hosts => ["${LOGSTASH_OUTPUT_HOST}"]
    user => "${LOGSTASH_OUTPUT_USER:}"
    password => "${LOGSTASH_OUTPUT_PASS:}"
    manage_template => false
    ecs_compatibility => disabled
    ssl_certificate_verification => false
  }
}"#;

#[derive(Debug, Clone)]
pub struct Analytics {
    pub path: ConstructPath,
    pub domain_id: String,
    pub master_user: Secret,
    pub logstash: HttpService,
}

impl Analytics {
    pub fn new(
        template: &mut Template,
        path: ConstructPath,
        cluster: &Cluster,
        config: &AnalyticsConfig,
        logstash_override: Option<&ServiceOverride>,
    ) -> Result<Self> {
        let mut fields = BTreeMap::new();
        fields.insert("username", MASTER_USER_NAME);
        let master_user = generated_secret(
            template,
            path.child("MasterUser"),
            GeneratedSecretProps {
                description: "OpenSearch Master User",
                fields,
                length: 64,
                exclude_characters: None,
                ..Default::default()
            },
        )?;

        let domain_id = template.add_resource(
            &path.child("Domain"),
            Resource::new("AWS::OpenSearchService::Domain")
                .prop(
                    "AccessPolicies",
                    Expr::map([
                        (
                            "Statement",
                            Expr::list([Expr::map([
                                ("Action", Expr::str("es:*")),
                                ("Effect", Expr::str("Allow")),
                                ("Principal", Expr::map([("AWS", Expr::str("*"))])),
                                ("Resource", Expr::str("*")),
                            ])]),
                        ),
                        ("Version", Expr::str("2012-10-17")),
                    ]),
                )
                .prop(
                    "AdvancedSecurityOptions",
                    Expr::map([
                        ("Enabled", Expr::Bool(true)),
                        ("InternalUserDatabaseEnabled", Expr::Bool(true)),
                        (
                            "MasterUserOptions",
                            Expr::map([
                                ("MasterUserName", Expr::str(MASTER_USER_NAME)),
                                ("MasterUserPassword", master_user.dynamic_reference("password")),
                            ]),
                        ),
                    ]),
                )
                .prop(
                    "ClusterConfig",
                    Expr::map([
                        ("DedicatedMasterEnabled", Expr::Bool(false)),
                        ("InstanceCount", Expr::Int(1)),
                        ("InstanceType", Expr::str(&config.instance_type)),
                        ("ZoneAwarenessEnabled", Expr::Bool(false)),
                    ]),
                )
                .prop(
                    "DomainEndpointOptions",
                    Expr::map([
                        ("EnforceHTTPS", Expr::Bool(true)),
                        ("TLSSecurityPolicy", Expr::str("Policy-Min-TLS-1-0-2019-07")),
                    ]),
                )
                .prop(
                    "EBSOptions",
                    Expr::map([
                        ("EBSEnabled", Expr::Bool(true)),
                        ("VolumeSize", Expr::from(config.volume_size_gib)),
                        ("VolumeType", Expr::str("gp3")),
                    ]),
                )
                .prop("EncryptionAtRestOptions", Expr::map([("Enabled", Expr::Bool(true))]))
                .prop("EngineVersion", format!("OpenSearch_{}", config.search_version))
                .prop("NodeToNodeEncryptionOptions", Expr::map([("Enabled", Expr::Bool(true))]))
                .removal_policy(RemovalPolicy::Delete),
        )?;

        let container = ContainerOptions::new(ContainerImage::from_registry(LOGSTASH_IMAGE))
            .name("logstash")
            .env("CONFIG_STRING", LOGSTASH_PIPELINE)
            .env("PIPELINE_ECS_COMPATIBILITY", "disabled")
            .env("QUEUE_TYPE", "persisted")
            .env("QUEUE_MAX_BYTES", "384mb")
            .env("QUEUE_CHECKPOINT_WRITES", "20")
            .env(
                "LOGSTASH_OUTPUT_HOST",
                Expr::concat([
                    Expr::str("https://"),
                    Expr::att(&domain_id, "DomainEndpoint"),
                    Expr::str(":443"),
                ]),
            )
            .secret("LOGSTASH_OUTPUT_USER", master_user.field("username"))
            .secret("LOGSTASH_OUTPUT_PASS", master_user.field("password"));
        let logstash = HttpService::new(
            template,
            path.child("Logstash"),
            cluster,
            FargateServiceProps::new(container)
                .size(512, 1024)
                .architecture(CpuArchitecture::Arm64)
                .with_override(logstash_override),
            LOGSTASH_PORT,
        )?;

        info!(
            version = %config.search_version,
            instance_type = %config.instance_type,
            "analytics synthesized"
        );

        Ok(Self {
            path,
            domain_id,
            master_user,
            logstash,
        })
    }

    pub fn domain_endpoint(&self) -> Expr {
        Expr::att(&self.domain_id, "DomainEndpoint")
    }
}
