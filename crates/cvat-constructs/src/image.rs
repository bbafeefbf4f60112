//! Container images: public registry references and locally built assets.
//!
//! A local asset is identified by a fingerprint of its build context: every
//! file below the context directory (relative path and contents, in sorted
//! order) plus the build arguments. The fingerprint is the image tag in the
//! asset repository, so editing a Dockerfile or anything it copies changes
//! the template.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use cvat_core::{Environment, Expr, Pseudo, Result, SynthError};

/// Qualifier of the bootstrap asset repository.
const ASSET_QUALIFIER: &str = "hnb659fds";

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerImage {
    /// Pulled from a public registry, e.g. `cvat/ui:dev`.
    Registry(String),
    /// Built from a local directory and pushed to the asset repository.
    Asset(ImageAsset),
}

impl ContainerImage {
    pub fn from_registry(name: impl Into<String>) -> Self {
        ContainerImage::Registry(name.into())
    }

    pub fn image_uri(&self) -> Expr {
        match self {
            ContainerImage::Registry(name) => Expr::str(name),
            ContainerImage::Asset(asset) => asset.image_uri(),
        }
    }

    pub fn is_asset(&self) -> bool {
        matches!(self, ContainerImage::Asset(_))
    }
}

/// Build inputs of a local image, before the context has been read.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAssetProps {
    /// Build context, relative to the asset root.
    pub directory: String,
    pub build_args: BTreeMap<String, String>,
}

impl ImageAssetProps {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            build_args: BTreeMap::new(),
        }
    }

    /// Builder method: add a `--build-arg`.
    pub fn build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.insert(key.into(), value.into());
        self
    }

    /// SHA-256 over the build context below `root` and the build args.
    pub fn fingerprint(&self, root: &Path) -> Result<String> {
        let context = root.join(&self.directory);
        let asset_error = |source: std::io::Error| SynthError::Asset {
            path: context.display().to_string(),
            source,
        };

        let mut hasher = Sha256::new();
        let mut files = 0usize;
        for entry in WalkDir::new(&context).sort_by_file_name() {
            let entry = entry.map_err(|e| asset_error(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&context).unwrap_or(entry.path());
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = std::fs::read(entry.path()).map_err(asset_error)?;
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(Sha256::digest(&bytes));
            files += 1;
        }
        for (k, v) in &self.build_args {
            hasher.update([0u8]);
            hasher.update(k.as_bytes());
            hasher.update([b'=']);
            hasher.update(v.as_bytes());
        }
        let tag = hex::encode(hasher.finalize());
        debug!(directory = %self.directory, files, tag = %tag, "fingerprinted image asset");
        Ok(tag)
    }

    /// Read the build context below `root` and fix the image tag.
    pub fn build(self, root: &Path) -> Result<ImageAsset> {
        let tag = self.fingerprint(root)?;
        Ok(ImageAsset {
            directory: self.directory,
            build_args: self.build_args,
            tag,
        })
    }
}

/// A fingerprinted local image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    pub directory: String,
    pub build_args: BTreeMap<String, String>,
    /// Content fingerprint, used as the image tag.
    pub tag: String,
}

impl ImageAsset {
    pub fn repository_name(&self) -> Expr {
        Expr::concat([
            Expr::str(format!("cdk-{ASSET_QUALIFIER}-container-assets-")),
            Expr::Pseudo(Pseudo::AccountId),
            Expr::str("-"),
            Expr::Pseudo(Pseudo::Region),
        ])
    }

    pub fn image_uri(&self) -> Expr {
        Expr::concat([
            Expr::Pseudo(Pseudo::AccountId),
            Expr::str(".dkr.ecr."),
            Expr::Pseudo(Pseudo::Region),
            Expr::str("."),
            Expr::Pseudo(Pseudo::UrlSuffix),
            Expr::str("/"),
            self.repository_name(),
            Expr::str(format!(":{}", self.tag)),
        ])
    }
}

// ── Asset manifest ────────────────────────────────────────────────

/// Build-and-push instructions for every image asset in a stack.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssetManifest {
    pub version: &'static str,
    #[serde(rename = "dockerImages")]
    pub docker_images: BTreeMap<String, DockerImageEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DockerImageEntry {
    pub source: DockerImageSource,
    pub destination: DockerImageDestination,
}

#[derive(Debug, Clone, Serialize)]
pub struct DockerImageSource {
    pub directory: String,
    #[serde(rename = "dockerBuildArgs", skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DockerImageDestination {
    #[serde(rename = "repositoryName")]
    pub repository_name: String,
    #[serde(rename = "imageTag")]
    pub image_tag: String,
}

impl AssetManifest {
    pub fn new() -> Self {
        Self {
            version: "1",
            docker_images: BTreeMap::new(),
        }
    }

    /// Register an asset. Identical assets collapse into one entry.
    pub fn add(&mut self, asset: &ImageAsset, env: &Environment) {
        let tag = asset.tag.clone();
        let repository_name = format!(
            "cdk-{ASSET_QUALIFIER}-container-assets-{}-{}",
            env.account.as_deref().unwrap_or("${AWS::AccountId}"),
            env.region.as_deref().unwrap_or("${AWS::Region}"),
        );
        self.docker_images.entry(tag.clone()).or_insert(DockerImageEntry {
            source: DockerImageSource {
                directory: asset.directory.clone(),
                build_args: asset.build_args.clone(),
            },
            destination: DockerImageDestination {
                repository_name,
                image_tag: tag,
            },
        });
    }

    pub fn is_empty(&self) -> bool {
        self.docker_images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn context() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let server = dir.path().join("containers/cvat-server");
        fs::create_dir_all(server.join("cvat/settings")).unwrap();
        fs::write(server.join("Dockerfile"), "FROM cvat/server\n").unwrap();
        fs::write(server.join("cvat/settings/production.py"), "DEBUG = False\n").unwrap();
        dir
    }

    fn server_asset(root: &Path) -> ImageAsset {
        ImageAssetProps::new("./containers/cvat-server")
            .build_arg("CVAT_VERSION", "dev")
            .build(root)
            .unwrap()
    }

    #[test]
    fn fingerprint_depends_on_build_args() {
        let root = context();
        let a = ImageAssetProps::new("./containers/cvat-server").build_arg("CVAT_VERSION", "dev");
        let b = ImageAssetProps::new("./containers/cvat-server").build_arg("CVAT_VERSION", "v2.4.0");
        let tag = a.fingerprint(root.path()).unwrap();
        assert_ne!(tag, b.fingerprint(root.path()).unwrap());
        assert_eq!(tag, a.clone().fingerprint(root.path()).unwrap());
        assert_eq!(tag.len(), 64);
    }

    #[test]
    fn editing_the_build_context_changes_the_tag() {
        let root = context();
        let before = server_asset(root.path()).tag;

        let dockerfile = root.path().join("containers/cvat-server/Dockerfile");
        fs::write(&dockerfile, "FROM cvat/server\nRUN pip install boto3\n").unwrap();
        let edited = server_asset(root.path()).tag;
        assert_ne!(before, edited);

        fs::write(root.path().join("containers/cvat-server/cvat/settings/base.py"), "").unwrap();
        assert_ne!(edited, server_asset(root.path()).tag);
    }

    #[test]
    fn renaming_a_file_changes_the_tag() {
        let root = context();
        let before = server_asset(root.path()).tag;
        let settings = root.path().join("containers/cvat-server/cvat/settings");
        fs::rename(settings.join("production.py"), settings.join("staging.py")).unwrap();
        assert_ne!(before, server_asset(root.path()).tag);
    }

    #[test]
    fn missing_build_context_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let err = ImageAssetProps::new("./containers/cvat-server")
            .build(root.path())
            .unwrap_err();
        assert!(matches!(err, SynthError::Asset { .. }));
        assert!(err.to_string().contains("cvat-server"));
    }

    #[test]
    fn registry_image_is_literal() {
        let img = ContainerImage::from_registry("cvat/ui:dev");
        assert_eq!(img.image_uri(), Expr::str("cvat/ui:dev"));
        assert!(!img.is_asset());
    }

    #[test]
    fn asset_image_uri_is_deferred() {
        let root = context();
        let img = ContainerImage::Asset(server_asset(root.path()));
        assert!(img.is_asset());
        assert!(img.image_uri().is_deferred());
    }

    #[test]
    fn manifest_deduplicates() {
        let root = context();
        let asset = server_asset(root.path());
        let env = Environment {
            account: Some("123456789012".into()),
            region: Some("us-east-1".into()),
        };
        let mut manifest = AssetManifest::new();
        manifest.add(&asset, &env);
        manifest.add(&asset, &env);
        assert_eq!(manifest.docker_images.len(), 1);
        let json = serde_json::to_value(&manifest).unwrap();
        let entry = &json["dockerImages"][&asset.tag];
        assert_eq!(entry["source"]["directory"], "./containers/cvat-server");
        assert_eq!(entry["source"]["dockerBuildArgs"]["CVAT_VERSION"], "dev");
        assert_eq!(
            entry["destination"]["repositoryName"],
            "cdk-hnb659fds-container-assets-123456789012-us-east-1"
        );
    }
}
