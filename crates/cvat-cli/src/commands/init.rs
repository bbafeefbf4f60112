use std::path::{Path, PathBuf};

use anyhow::bail;

use cvat_core::CvatConfig;

pub fn init(path: &Path, cvat_version: &str, multi_az: bool, force: bool) -> anyhow::Result<PathBuf> {
    let output = path.join("cvat.toml");
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }
    let config = CvatConfig::scaffold(cvat_version, multi_az);
    config.validate()?;
    std::fs::create_dir_all(path)?;
    std::fs::write(&output, config.to_toml_string()?)?;
    println!("✓ Generated {}", output.display());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let output = init(dir.path(), "v2.4.0", true, false).unwrap();
        let config = CvatConfig::from_file(&output).unwrap();
        assert_eq!(config.stack.cvat_version, "v2.4.0");
        assert!(config.stack.multi_az);
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), "dev", false, false).unwrap();
        let err = init(dir.path(), "dev", false, false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(init(dir.path(), "v2.4.0", false, true).is_ok());
    }

    #[test]
    fn rejects_bad_version() {
        let dir = tempfile::tempdir().unwrap();
        assert!(init(dir.path(), "not a tag", false, false).is_err());
        assert!(!dir.path().join("cvat.toml").exists());
    }
}
