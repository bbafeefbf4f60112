//! Plan-time evaluation of template expressions.
//!
//! Given parameter values and the stack environment, the resolver computes
//! what CloudFormation would compute for conditions and string values.
//! Anything that needs a live resource (ids, endpoint addresses, ports)
//! resolves to [`ResolveError::Deferred`] instead of failing.

use std::collections::BTreeMap;

use crate::error::ResolveError;
use crate::expr::{Condition, Expr, Pseudo};
use crate::template::Template;
use crate::types::Environment;

pub struct Resolver<'a> {
    template: &'a Template,
    parameters: BTreeMap<String, String>,
    environment: Environment,
    stack_name: Option<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(template: &'a Template) -> Self {
        Self {
            template,
            parameters: BTreeMap::new(),
            environment: Environment::default(),
            stack_name: None,
        }
    }

    /// Builder method: supply a value for a deploy-time parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_stack_name(mut self, name: impl Into<String>) -> Self {
        self.stack_name = Some(name.into());
        self
    }

    /// Evaluate a named template condition.
    pub fn condition(&self, name: &str) -> Result<bool, ResolveError> {
        let condition = self
            .template
            .conditions()
            .get(name)
            .ok_or_else(|| ResolveError::UnknownCondition(name.to_string()))?;
        self.evaluate(condition)
    }

    pub fn evaluate(&self, condition: &Condition) -> Result<bool, ResolveError> {
        match condition {
            Condition::Equals(a, b) => Ok(self.resolve(a)? == self.resolve(b)?),
            Condition::And(items) => {
                for c in items {
                    if !self.evaluate(c)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or(items) => {
                for c in items {
                    if self.evaluate(c)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(c) => Ok(!self.evaluate(c)?),
            Condition::Named(name) => self.condition(name),
        }
    }

    /// Resolve an expression to its string value.
    pub fn resolve(&self, expr: &Expr) -> Result<String, ResolveError> {
        match expr {
            Expr::Str(s) => Ok(s.clone()),
            Expr::Int(n) => Ok(n.to_string()),
            Expr::Num(n) => Ok(n.to_string()),
            Expr::Bool(b) => Ok(b.to_string()),
            Expr::Ref(id) => self.parameter(id),
            Expr::GetAtt(id, attr) => Err(ResolveError::Deferred(format!("{id}.{attr}"))),
            Expr::Join(parts) => {
                let mut out = String::new();
                for p in parts {
                    out.push_str(&self.resolve(p)?);
                }
                Ok(out)
            }
            Expr::If(cond, then, otherwise) => {
                if self.condition(cond)? {
                    self.resolve(then)
                } else {
                    self.resolve(otherwise)
                }
            }
            Expr::Pseudo(p) => self.pseudo(*p),
            Expr::Select(index, list) => match list.as_ref() {
                Expr::List(items) => {
                    let item = items.get(*index).ok_or(ResolveError::SelectOutOfRange {
                        index: *index,
                        len: items.len(),
                    })?;
                    self.resolve(item)
                }
                other => Err(ResolveError::Deferred(format!("{other:?}"))),
            },
            Expr::AvailabilityZones => Err(ResolveError::Deferred("Fn::GetAZs".to_string())),
            Expr::List(_) | Expr::Map(_) => Err(ResolveError::NotAString(format!("{expr:?}"))),
        }
    }

    /// Resolve a named output.
    pub fn output(&self, name: &str) -> Result<String, ResolveError> {
        let output = self
            .template
            .outputs()
            .get(name)
            .ok_or_else(|| ResolveError::UnknownOutput(name.to_string()))?;
        self.resolve(&output.value)
    }

    fn parameter(&self, id: &str) -> Result<String, ResolveError> {
        if let Some(v) = self.parameters.get(id) {
            return Ok(v.clone());
        }
        match self.template.parameters().get(id) {
            Some(p) => p
                .default
                .clone()
                .ok_or_else(|| ResolveError::Deferred(format!("parameter {id} has no value"))),
            None => Err(ResolveError::Deferred(id.to_string())),
        }
    }

    fn pseudo(&self, p: Pseudo) -> Result<String, ResolveError> {
        let value = match p {
            Pseudo::AccountId => self.environment.account.clone(),
            Pseudo::Region => self.environment.region.clone(),
            Pseudo::StackName => self.stack_name.clone(),
            Pseudo::UrlSuffix => Some("amazonaws.com".to_string()),
            Pseudo::Partition => Some("aws".to_string()),
            Pseudo::NoValue => Some(String::new()),
        };
        value.ok_or_else(|| ResolveError::Deferred(p.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ConstructPath;
    use crate::template::{Parameter, Resource};

    fn template() -> Template {
        let mut t = Template::new();
        let a = t
            .add_parameter("A", Parameter::string().default_value(""))
            .unwrap();
        let b = t
            .add_parameter("B", Parameter::string().default_value(""))
            .unwrap();
        t.add_condition(
            "BothEmpty",
            Condition::And(vec![Condition::equals(a, ""), Condition::equals(b, "")]),
        )
        .unwrap();
        t.add_resource(&ConstructPath::root("T").child("Lb"), Resource::new("X::Lb"))
            .unwrap();
        t.add_output(
            "Flag",
            Expr::cond("BothEmpty", "False".into(), "True".into()),
            None,
        )
        .unwrap();
        t
    }

    #[test]
    fn defaults_are_used_when_no_value_given() {
        let t = template();
        let r = Resolver::new(&t);
        assert!(r.condition("BothEmpty").unwrap());
        assert_eq!(r.output("Flag").unwrap(), "False");
    }

    #[test]
    fn supplied_values_override_defaults() {
        let t = template();
        let r = Resolver::new(&t).with_parameter("B", "secret");
        assert!(!r.condition("BothEmpty").unwrap());
        assert_eq!(r.output("Flag").unwrap(), "True");
    }

    #[test]
    fn resource_attributes_are_deferred() {
        let t = template();
        let r = Resolver::new(&t);
        let e = Expr::concat([Expr::str("https://"), Expr::att("Lb", "DNSName")]);
        assert_eq!(r.resolve(&e), Err(ResolveError::Deferred("Lb.DNSName".into())));
        assert!(matches!(r.resolve(&Expr::reference("Lb")), Err(ResolveError::Deferred(_))));
    }

    #[test]
    fn pseudo_parameters_use_environment() {
        let t = template();
        let env = Environment {
            account: Some("123456789012".into()),
            region: Some("eu-west-1".into()),
        };
        let r = Resolver::new(&t).with_environment(env);
        let e = Expr::concat([Expr::Pseudo(Pseudo::Region), ".".into(), Expr::Pseudo(Pseudo::UrlSuffix)]);
        assert_eq!(r.resolve(&e).unwrap(), "eu-west-1.amazonaws.com");
        assert!(Resolver::new(&t).resolve(&Expr::Pseudo(Pseudo::AccountId)).is_err());
    }

    #[test]
    fn select_picks_from_literal_list() {
        let t = template();
        let r = Resolver::new(&t);
        let e = Expr::select(1, Expr::list(["a", "b"]));
        assert_eq!(r.resolve(&e).unwrap(), "b");
        let e = Expr::select(3, Expr::list(["a"]));
        assert!(matches!(r.resolve(&e), Err(ResolveError::SelectOutOfRange { .. })));
    }

    #[test]
    fn unknown_condition_is_an_error() {
        let t = template();
        assert_eq!(
            Resolver::new(&t).condition("Nope"),
            Err(ResolveError::UnknownCondition("Nope".into()))
        );
    }
}
