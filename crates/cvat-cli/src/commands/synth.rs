use std::path::{Path, PathBuf};

use cvat_stack::Synthesis;

use super::StackArgs;

pub fn synth(args: &StackArgs, out: Option<&Path>) -> anyhow::Result<()> {
    let synthesis = args.synthesize()?;
    match out {
        Some(dir) => {
            let (template, assets) = write_artifacts(&synthesis, dir)?;
            println!(
                "✓ Synthesized {} ({} resources)",
                synthesis.stack_name,
                synthesis.template.resources().len()
            );
            println!("  Template: {}", template.display());
            println!("  Assets:   {}", assets.display());
        }
        None => println!("{}", synthesis.template_json()?),
    }
    Ok(())
}

/// Write `<Stack>.template.json` and `<Stack>.assets.json` into `dir`.
pub fn write_artifacts(synthesis: &Synthesis, dir: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let template = dir.join(format!("{}.template.json", synthesis.stack_name));
    std::fs::write(&template, synthesis.template_json()?)?;
    let assets = dir.join(format!("{}.assets.json", synthesis.stack_name));
    std::fs::write(&assets, synthesis.assets_json()?)?;
    Ok((template, assets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{test_args, test_workspace};
    use std::fs;

    #[test]
    fn writes_template_and_assets() {
        let dir = test_workspace();
        let synthesis = test_args(dir.path().join("cvat.toml")).synthesize().unwrap();
        let out = dir.path().join("cdk.out");

        let (template, assets) = write_artifacts(&synthesis, &out).unwrap();
        assert_eq!(template, out.join("CVAT.template.json"));

        let template: serde_json::Value = serde_json::from_str(&fs::read_to_string(template).unwrap()).unwrap();
        assert!(template["Resources"].as_object().unwrap().len() > 50);
        assert!(template["Outputs"]["Url"].is_object());

        let assets: serde_json::Value = serde_json::from_str(&fs::read_to_string(assets).unwrap()).unwrap();
        assert_eq!(assets["dockerImages"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn rewriting_is_byte_identical() {
        let dir = test_workspace();
        let args = test_args(dir.path().join("cvat.toml"));
        let (first, _) = write_artifacts(&args.synthesize().unwrap(), &dir.path().join("a")).unwrap();
        let (second, _) = write_artifacts(&args.synthesize().unwrap(), &dir.path().join("b")).unwrap();
        assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
    }
}
