pub mod init;
pub mod outputs;
pub mod routes;
pub mod synth;

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use cvat_core::{CvatConfig, Environment};
use cvat_stack::Synthesis;

/// Inputs shared by every command that synthesizes the stack.
#[derive(Args, Debug, Clone)]
pub struct StackArgs {
    /// Stack configuration; defaults apply when the file does not exist
    #[arg(short, long, default_value = "cvat.toml")]
    pub config: PathBuf,
    /// Override [stack].cvat_version
    #[arg(long)]
    pub cvat_version: Option<String>,
    /// Add a database reader and a second cache node
    #[arg(long, conflicts_with = "no_multi_az")]
    pub multi_az: bool,
    /// Single database writer and cache node, even if cvat.toml enables multi_az
    #[arg(long)]
    pub no_multi_az: bool,
    #[arg(long, env = "CDK_DEFAULT_ACCOUNT")]
    pub account: Option<String>,
    #[arg(long, env = "CDK_DEFAULT_REGION")]
    pub region: Option<String>,
}

impl StackArgs {
    /// Load cvat.toml and apply command-line overrides. A relative
    /// `asset_root` is taken relative to the config file's directory.
    pub fn load_config(&self) -> anyhow::Result<CvatConfig> {
        let mut config = if self.config.exists() {
            CvatConfig::from_file(&self.config)
                .with_context(|| format!("loading {}", self.config.display()))?
        } else {
            info!(path = %self.config.display(), "no config file, using defaults");
            CvatConfig::default()
        };
        if let Some(version) = &self.cvat_version {
            config.stack.cvat_version = version.clone();
        }
        if self.multi_az {
            config.stack.multi_az = true;
        } else if self.no_multi_az {
            config.stack.multi_az = false;
        }
        if config.stack.asset_root.is_relative() {
            if let Some(dir) = self.config.parent() {
                config.stack.asset_root = dir.join(&config.stack.asset_root);
            }
        }
        Ok(config)
    }

    pub fn environment(&self) -> Environment {
        Environment {
            account: self.account.clone(),
            region: self.region.clone(),
        }
    }

    pub fn synthesize(&self) -> anyhow::Result<Synthesis> {
        let config = self.load_config()?;
        let synthesis = cvat_stack::synthesize(&config, &self.environment()).context("synthesis failed")?;
        Ok(synthesis)
    }
}

#[cfg(test)]
pub(crate) fn test_args(config: PathBuf) -> StackArgs {
    StackArgs {
        config,
        cvat_version: None,
        multi_az: false,
        no_multi_az: false,
        account: None,
        region: None,
    }
}

/// A directory holding the server image build context.
#[cfg(test)]
pub(crate) fn test_workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let context = dir.path().join("containers/cvat-server");
    std::fs::create_dir_all(&context).unwrap();
    std::fs::write(context.join("Dockerfile"), "FROM cvat/server\n").unwrap();
    dir
}
