//! Secrets Manager secrets and references into them.
//!
//! Consumers never see a secret's value: task definitions carry
//! `<secret-arn>:<field>::` references and resource properties use
//! `{{resolve:secretsmanager:...}}` dynamic references.

use std::collections::BTreeMap;

use cvat_core::{ConstructPath, Expr, Parameter, Resource, Result, Template};

/// Characters excluded from generated passwords; they break connection URLs.
pub const DEFAULT_EXCLUDE_CHARACTERS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

/// Handle to a secret in the template.
#[derive(Debug, Clone, PartialEq)]
pub struct Secret {
    pub logical_id: String,
}

impl Secret {
    /// The secret ARN (`Ref` of a secret or target attachment).
    pub fn arn(&self) -> Expr {
        Expr::reference(&self.logical_id)
    }

    /// Reference to one JSON field, for container secrets.
    pub fn field(&self, name: &str) -> SecretRef {
        SecretRef {
            secret: self.clone(),
            field: name.to_string(),
        }
    }

    /// Dynamic reference resolved by CloudFormation when the consuming
    /// resource is created.
    pub fn dynamic_reference(&self, field: &str) -> Expr {
        Expr::concat([
            Expr::str("{{resolve:secretsmanager:"),
            self.arn(),
            Expr::str(format!(":SecretString:{field}::}}}}")),
        ])
    }
}

/// One field of a secret.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretRef {
    pub secret: Secret,
    pub field: String,
}

impl SecretRef {
    /// The `ValueFrom` string used by ECS container secrets.
    pub fn value_from(&self) -> Expr {
        Expr::concat([self.secret.arn(), Expr::str(format!(":{}::", self.field))])
    }
}

/// A secret whose password field is generated at deploy time.
#[derive(Debug, Clone)]
pub struct GeneratedSecretProps<'a> {
    pub description: &'a str,
    /// Fixed fields stored alongside the generated one.
    pub fields: BTreeMap<&'a str, &'a str>,
    pub generate_key: &'a str,
    pub length: u32,
    pub exclude_characters: Option<&'a str>,
}

impl Default for GeneratedSecretProps<'_> {
    fn default() -> Self {
        Self {
            description: "",
            fields: BTreeMap::new(),
            generate_key: "password",
            length: 30,
            exclude_characters: Some(DEFAULT_EXCLUDE_CHARACTERS),
        }
    }
}

pub fn generated_secret(
    template: &mut Template,
    path: ConstructPath,
    props: GeneratedSecretProps<'_>,
) -> Result<Secret> {
    let secret_template = serde_json::to_string(&props.fields).unwrap_or_else(|_| "{}".to_string());
    let mut generate = vec![
        ("GenerateStringKey", Expr::str(props.generate_key)),
        ("PasswordLength", Expr::from(props.length)),
        ("SecretStringTemplate", Expr::str(secret_template)),
    ];
    if let Some(exclude) = props.exclude_characters {
        generate.push(("ExcludeCharacters", Expr::str(exclude)));
    }
    let mut resource = Resource::new("AWS::SecretsManager::Secret")
        .prop("GenerateSecretString", Expr::map(generate));
    if !props.description.is_empty() {
        resource = resource.prop("Description", props.description);
    }
    let logical_id = template.add_resource(&path, resource)?;
    Ok(Secret { logical_id })
}

/// OAuth client credentials for one identity provider.
///
/// The id and secret are deploy-time parameters (default empty, not
/// echoed) stored together in one secret.
#[derive(Debug, Clone)]
pub struct OauthSecret {
    pub idp_name: String,
    pub secret: Secret,
    pub client_id: Expr,
    pub client_secret: Expr,
}

impl OauthSecret {
    pub fn new(template: &mut Template, scope: &ConstructPath, id: &str, idp_name: &str) -> Result<Self> {
        let client_id = template.add_parameter(
            &format!("{idp_name}ClientId"),
            Parameter::string()
                .description(format!("{idp_name} - ClientId"))
                .default_value("")
                .no_echo(),
        )?;
        let client_secret = template.add_parameter(
            &format!("{idp_name}ClientSecret"),
            Parameter::string()
                .description(format!("{idp_name} - ClientSecret"))
                .default_value("")
                .no_echo(),
        )?;

        let secret_string = Expr::concat([
            Expr::str("{\"clientId\":\""),
            client_id.clone(),
            Expr::str("\",\"clientSecret\":\""),
            client_secret.clone(),
            Expr::str("\"}"),
        ]);
        let logical_id = template.add_resource(
            &scope.child(id),
            Resource::new("AWS::SecretsManager::Secret")
                .prop("Description", format!("{idp_name} - ClientId & ClientSecret"))
                .prop("SecretString", secret_string),
        )?;

        Ok(Self {
            idp_name: idp_name.to_string(),
            secret: Secret { logical_id },
            client_id,
            client_secret,
        })
    }
}
