use anyhow::bail;

use cvat_core::ResolveError;
use cvat_stack::Synthesis;
use cvat_stack::stack::SOCIAL_ACCOUNTS_VAR;

use super::StackArgs;

/// Parse a `Name=Value` parameter assignment. The value may be empty.
pub fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected Name=Value, got `{s}`")),
    }
}

pub fn outputs(args: &StackArgs, params: &[(String, String)]) -> anyhow::Result<()> {
    let synthesis = args.synthesize()?;
    for (name, value) in resolve_outputs(&synthesis, params)? {
        println!("{name} = {value}");
    }
    Ok(())
}

/// Plan-time values of every output plus the server's social-login flag.
/// Values that depend on deployed resources render as `<deferred: ...>`.
pub fn resolve_outputs(synthesis: &Synthesis, params: &[(String, String)]) -> anyhow::Result<Vec<(String, String)>> {
    let mut resolver = synthesis.resolver();
    for (name, value) in params {
        if !synthesis.template.parameters().contains_key(name) {
            bail!("unknown parameter `{name}`");
        }
        resolver = resolver.with_parameter(name, value);
    }

    let mut resolved = Vec::new();
    for name in synthesis.template.outputs().keys() {
        resolved.push((name.clone(), render(resolver.output(name))?));
    }
    resolved.push((
        SOCIAL_ACCOUNTS_VAR.to_string(),
        render(synthesis.social_accounts_flag(&resolver))?,
    ));
    Ok(resolved)
}

fn render(value: Result<String, ResolveError>) -> anyhow::Result<String> {
    match value {
        Ok(v) => Ok(v),
        Err(ResolveError::Deferred(what)) => Ok(format!("<deferred: {what}>")),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{test_args, test_workspace};

    fn synthesis() -> Synthesis {
        let dir = test_workspace();
        test_args(dir.path().join("cvat.toml")).synthesize().unwrap()
    }

    fn value<'a>(resolved: &'a [(String, String)], name: &str) -> &'a str {
        &resolved.iter().find(|(n, _)| n == name).unwrap().1
    }

    #[test]
    fn parse_param_forms() {
        assert_eq!(
            parse_param("GitHubClientId=abc").unwrap(),
            ("GitHubClientId".to_string(), "abc".to_string())
        );
        assert_eq!(parse_param("GoogleClientId=").unwrap().1, "");
        assert_eq!(parse_param("a=b=c").unwrap().1, "b=c");
        assert!(parse_param("GitHubClientId").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn social_login_follows_parameters() {
        let s = synthesis();
        let resolved = resolve_outputs(&s, &[]).unwrap();
        assert_eq!(value(&resolved, SOCIAL_ACCOUNTS_VAR), "False");

        let params = vec![("GitHubClientId".to_string(), "abc".to_string())];
        let resolved = resolve_outputs(&s, &params).unwrap();
        assert_eq!(value(&resolved, SOCIAL_ACCOUNTS_VAR), "True");
    }

    #[test]
    fn deployed_attributes_are_deferred() {
        let resolved = resolve_outputs(&synthesis(), &[]).unwrap();
        assert!(value(&resolved, "Url").starts_with("<deferred:"));
        assert!(value(&resolved, "CreateSuperuserCommand").starts_with("<deferred:"));
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let params = vec![("AzureClientId".to_string(), "x".to_string())];
        assert!(resolve_outputs(&synthesis(), &params).is_err());
    }
}
