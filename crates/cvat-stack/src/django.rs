//! Container settings shared by the CVAT server and its workers.
//!
//! Every Django process needs the same view of the backends: the public
//! host name, Redis and PostgreSQL endpoints, database credentials and the
//! two shared volumes.

use cvat_constructs::filesystem::{AccessPoint, FileSystem};
use cvat_constructs::image::ContainerImage;
use cvat_constructs::secrets::Secret;
use cvat_constructs::service::{ContainerOptions, FargateService, Volume};
use cvat_core::{Expr, Result, Template};

pub const DATA_MOUNT: &str = "/home/django/data";
pub const SHARE_MOUNT: &str = "/home/django/share";

/// One background worker of the CVAT server image.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSpec {
    /// Construct id.
    pub id: &'static str,
    /// Key under `[services]` in cvat.toml.
    pub config_key: &'static str,
    pub supervisord_conf: &'static str,
    pub execute_command: bool,
}

pub const WORKERS: &[WorkerSpec] = &[
    WorkerSpec {
        id: "Utils",
        config_key: "utils",
        supervisord_conf: "supervisord/utils.conf",
        execute_command: true,
    },
    WorkerSpec {
        id: "WorkerImport",
        config_key: "worker-import",
        supervisord_conf: "supervisord/worker.import.conf",
        execute_command: false,
    },
    WorkerSpec {
        id: "WorkerExport",
        config_key: "worker-export",
        supervisord_conf: "supervisord/worker.export.conf",
        execute_command: false,
    },
    WorkerSpec {
        id: "WorkerAnnotation",
        config_key: "worker-annotation",
        supervisord_conf: "supervisord/worker.annotation.conf",
        execute_command: false,
    },
    WorkerSpec {
        id: "WorkerWebhooks",
        config_key: "worker-webhooks",
        supervisord_conf: "supervisord/worker.webhooks.conf",
        execute_command: false,
    },
];

/// Backend endpoints and credentials injected into every Django container.
#[derive(Debug, Clone)]
pub struct DjangoBackends {
    /// Public host name (the CDN domain).
    pub cvat_host: Expr,
    pub redis_host: Expr,
    pub postgres_host: Expr,
    pub db_secret: Secret,
}

impl DjangoBackends {
    /// Base container for a Django process: host names plus database
    /// credentials as secrets.
    pub fn container(&self, image: &ContainerImage) -> ContainerOptions {
        ContainerOptions::new(image.clone())
            .env("CVAT_HOST", self.cvat_host.clone())
            .env("CVAT_REDIS_HOST", self.redis_host.clone())
            .env("CVAT_POSTGRES_HOST", self.postgres_host.clone())
            .secret("CVAT_POSTGRES_DBNAME", self.db_secret.field("dbname"))
            .secret("CVAT_POSTGRES_USER", self.db_secret.field("username"))
            .secret("CVAT_POSTGRES_PASSWORD", self.db_secret.field("password"))
    }
}

/// The file system and the two access points every Django container mounts.
#[derive(Debug, Clone)]
pub struct SharedStorage {
    pub file_system: FileSystem,
    pub data: AccessPoint,
    pub share: AccessPoint,
}

impl SharedStorage {
    /// Mount `data` and `share` at their fixed paths.
    pub fn mount(&self, template: &mut Template, service: &FargateService) -> Result<()> {
        let data = Volume {
            container_path: DATA_MOUNT,
            access_point: &self.data,
            read_only: false,
        };
        let share = Volume {
            container_path: SHARE_MOUNT,
            access_point: &self.share,
            read_only: false,
        };
        service.add_volume(template, "data", &data, &self.file_system)?;
        service.add_volume(template, "share", &share, &self.file_system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_table() {
        assert_eq!(WORKERS.len(), 5);
        assert_eq!(WORKERS.iter().filter(|w| w.execute_command).count(), 1);
        for w in WORKERS {
            assert!(cvat_core::config::SERVICE_NAMES.contains(&w.config_key));
            assert!(w.supervisord_conf.starts_with("supervisord/"));
        }
    }

    #[test]
    fn container_carries_db_secrets() {
        let backends = DjangoBackends {
            cvat_host: Expr::att("Dist", "DomainName"),
            redis_host: Expr::att("Redis", "RedisEndpoint.Address"),
            postgres_host: Expr::att("Db", "Endpoint.Address"),
            db_secret: Secret { logical_id: "DbSecret".into() },
        };
        let c = backends.container(&ContainerImage::from_registry("cvat/server:dev"));
        assert_eq!(c.secrets.len(), 3);
        assert_eq!(c.environment["CVAT_HOST"], Expr::att("Dist", "DomainName"));
        assert!(!c.secrets.contains_key("CVAT_REDIS_PASSWORD"));
        assert!(!c.environment.contains_key("CVAT_REDIS_PASSWORD"));
    }
}
