//! The synthesized resource graph.
//!
//! A `Template` is the output of one synthesis pass: parameters, conditions,
//! resources and outputs keyed by logical id. All maps are ordered, so the
//! rendered JSON is byte-identical for identical inputs.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{Result, SynthError};
use crate::expr::{Condition, Expr};
use crate::path::ConstructPath;

const FORMAT_VERSION: &str = "2010-09-09";

/// What happens to a resource when it leaves the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    Delete,
    Retain,
    Snapshot,
}

impl RemovalPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalPolicy::Delete => "Delete",
            RemovalPolicy::Retain => "Retain",
            RemovalPolicy::Snapshot => "Snapshot",
        }
    }
}

// ── Resource ──────────────────────────────────────────────────────

/// A single provider resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub resource_type: String,
    pub properties: BTreeMap<String, Expr>,
    pub depends_on: BTreeSet<String>,
    pub removal_policy: Option<RemovalPolicy>,
    pub condition: Option<String>,
    /// Construct path, recorded in resource metadata.
    pub path: Option<String>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            removal_policy: None,
            condition: None,
            path: None,
        }
    }

    /// Builder method: set a property.
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builder method: set a property only when a value is present.
    pub fn prop_opt(self, key: impl Into<String>, value: Option<impl Into<Expr>>) -> Self {
        match value {
            Some(v) => self.prop(key, v),
            None => self,
        }
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.insert(logical_id.into());
        self
    }

    pub fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = Some(policy);
        self
    }

    /// Append to a list property, creating the list if needed.
    pub fn push_property(&mut self, key: &str, item: Expr) {
        match self.properties.get_mut(key) {
            Some(Expr::List(items)) => items.push(item),
            _ => {
                self.properties.insert(key.to_string(), Expr::List(vec![item]));
            }
        }
    }

    /// Look up a property by dotted path (`DnsConfig.NamespaceId`).
    /// Numeric segments index into lists.
    pub fn property(&self, path: &str) -> Option<&Expr> {
        let mut segments = path.split('.');
        let mut current = self.properties.get(segments.next()?)?;
        for seg in segments {
            current = match current {
                Expr::Map(m) => m.get(seg)?,
                Expr::List(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("Type".into(), Value::String(self.resource_type.clone()));
        if !self.properties.is_empty() {
            let props: Map<String, Value> = self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            map.insert("Properties".into(), Value::Object(props));
        }
        if !self.depends_on.is_empty() {
            map.insert("DependsOn".into(), json!(self.depends_on));
        }
        if let Some(policy) = self.removal_policy {
            map.insert("DeletionPolicy".into(), json!(policy.as_str()));
            map.insert("UpdateReplacePolicy".into(), json!(policy.as_str()));
        }
        if let Some(cond) = &self.condition {
            map.insert("Condition".into(), json!(cond));
        }
        if let Some(path) = &self.path {
            map.insert("Metadata".into(), json!({ "cvat:path": path }));
        }
        Value::Object(map)
    }
}

// ── Parameters and outputs ────────────────────────────────────────

/// A deploy-time input.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub parameter_type: String,
    pub description: Option<String>,
    pub default: Option<String>,
    /// Hide the value in console and API output.
    pub no_echo: bool,
}

impl Parameter {
    pub fn string() -> Self {
        Self {
            parameter_type: "String".to_string(),
            description: None,
            default: None,
            no_echo: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn no_echo(mut self) -> Self {
        self.no_echo = true;
        self
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("Type".into(), json!(self.parameter_type));
        if let Some(d) = &self.description {
            map.insert("Description".into(), json!(d));
        }
        if let Some(d) = &self.default {
            map.insert("Default".into(), json!(d));
        }
        if self.no_echo {
            map.insert("NoEcho".into(), json!(true));
        }
        Value::Object(map)
    }
}

/// A value exported after deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub value: Expr,
    pub description: Option<String>,
}

// ── Template ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    pub description: Option<String>,
    parameters: BTreeMap<String, Parameter>,
    conditions: BTreeMap<String, Condition>,
    resources: BTreeMap<String, Resource>,
    outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource at the given construct path and return its logical id.
    pub fn add_resource(&mut self, path: &ConstructPath, mut resource: Resource) -> Result<String> {
        let id = path.checked_logical_id()?;
        if self.resources.contains_key(&id) || self.parameters.contains_key(&id) {
            return Err(SynthError::DuplicateLogicalId {
                id,
                path: path.to_string(),
            });
        }
        resource.path = Some(path.to_string());
        debug!(logical_id = %id, resource_type = %resource.resource_type, "added resource");
        self.resources.insert(id.clone(), resource);
        Ok(id)
    }

    pub fn add_parameter(&mut self, name: &str, parameter: Parameter) -> Result<Expr> {
        if self.parameters.contains_key(name) || self.resources.contains_key(name) {
            return Err(SynthError::DuplicateName {
                kind: "parameter",
                name: name.to_string(),
            });
        }
        self.parameters.insert(name.to_string(), parameter);
        Ok(Expr::reference(name))
    }

    pub fn add_condition(&mut self, name: &str, condition: Condition) -> Result<String> {
        if self.conditions.contains_key(name) {
            return Err(SynthError::DuplicateName {
                kind: "condition",
                name: name.to_string(),
            });
        }
        let mut bad_arity = None;
        condition.walk(&mut |c| {
            if let Some(n) = c.arity() {
                if !(2..=10).contains(&n) {
                    bad_arity = Some(n);
                }
            }
        });
        if let Some(arity) = bad_arity {
            return Err(SynthError::ConditionArity {
                name: name.to_string(),
                arity,
            });
        }
        self.conditions.insert(name.to_string(), condition);
        Ok(name.to_string())
    }

    pub fn add_output(&mut self, name: &str, value: Expr, description: Option<&str>) -> Result<()> {
        if self.outputs.contains_key(name) {
            return Err(SynthError::DuplicateName {
                kind: "output",
                name: name.to_string(),
            });
        }
        self.outputs.insert(
            name.to_string(),
            Output {
                value,
                description: description.map(str::to_string),
            },
        );
        Ok(())
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id)
    }

    pub fn resource_mut(&mut self, logical_id: &str) -> Result<&mut Resource> {
        self.resources
            .get_mut(logical_id)
            .ok_or_else(|| SynthError::UnknownResource(logical_id.to_string()))
    }

    pub fn resources(&self) -> &BTreeMap<String, Resource> {
        &self.resources
    }

    /// All resources of one provider type, in logical id order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
            .map(|(id, r)| (id.as_str(), r))
    }

    /// Number of resources per provider type.
    pub fn resource_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for r in self.resources.values() {
            *counts.entry(r.resource_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn parameters(&self) -> &BTreeMap<String, Parameter> {
        &self.parameters
    }

    pub fn conditions(&self) -> &BTreeMap<String, Condition> {
        &self.conditions
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        &self.outputs
    }

    /// Check that every reference points at something in the template.
    pub fn validate(&self) -> Result<()> {
        for (id, resource) in &self.resources {
            for target in &resource.depends_on {
                if !self.resources.contains_key(target) {
                    return Err(dangling(id, "resource", target));
                }
            }
            for expr in resource.properties.values() {
                self.check_expr(id, expr)?;
            }
            if let Some(cond) = &resource.condition {
                if !self.conditions.contains_key(cond) {
                    return Err(dangling(id, "condition", cond));
                }
            }
        }
        for (name, condition) in &self.conditions {
            let mut result = Ok(());
            condition.walk(&mut |c| match c {
                Condition::Equals(a, b) if result.is_ok() => {
                    result = self.check_expr(name, a).and_then(|_| self.check_expr(name, b));
                }
                Condition::Named(n) if result.is_ok() && !self.conditions.contains_key(n) => {
                    result = Err(dangling(name, "condition", n));
                }
                _ => {}
            });
            result?;
        }
        for (name, output) in &self.outputs {
            self.check_expr(name, &output.value)?;
        }
        Ok(())
    }

    fn check_expr(&self, from: &str, expr: &Expr) -> Result<()> {
        let mut refs = Vec::new();
        expr.references(&mut refs);
        for target in refs {
            if !self.resources.contains_key(&target) && !self.parameters.contains_key(&target) {
                return Err(dangling(from, "resource or parameter", &target));
            }
        }
        let mut conds = Vec::new();
        expr.conditions(&mut conds);
        for cond in conds {
            if !self.conditions.contains_key(&cond) {
                return Err(dangling(from, "condition", &cond));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("AWSTemplateFormatVersion".into(), json!(FORMAT_VERSION));
        if let Some(d) = &self.description {
            map.insert("Description".into(), json!(d));
        }
        if !self.parameters.is_empty() {
            let params: Map<String, Value> = self
                .parameters
                .iter()
                .map(|(k, p)| (k.clone(), p.to_json()))
                .collect();
            map.insert("Parameters".into(), Value::Object(params));
        }
        if !self.conditions.is_empty() {
            let conds: Map<String, Value> = self
                .conditions
                .iter()
                .map(|(k, c)| (k.clone(), c.to_json()))
                .collect();
            map.insert("Conditions".into(), Value::Object(conds));
        }
        let resources: Map<String, Value> = self
            .resources
            .iter()
            .map(|(k, r)| (k.clone(), r.to_json()))
            .collect();
        map.insert("Resources".into(), Value::Object(resources));
        if !self.outputs.is_empty() {
            let outputs: Map<String, Value> = self
                .outputs
                .iter()
                .map(|(k, o)| {
                    let mut out = Map::new();
                    out.insert("Value".into(), o.value.to_json());
                    if let Some(d) = &o.description {
                        out.insert("Description".into(), json!(d));
                    }
                    (k.clone(), Value::Object(out))
                })
                .collect();
            map.insert("Outputs".into(), Value::Object(outputs));
        }
        Value::Object(map)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_json())
    }
}

fn dangling(from: &str, kind: &'static str, target: &str) -> SynthError {
    SynthError::DanglingReference {
        from: from.to_string(),
        kind,
        target: target.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> ConstructPath {
        ConstructPath::root("Test")
    }

    #[test]
    fn add_resource_returns_logical_id() {
        let mut t = Template::new();
        let id = t
            .add_resource(&root().child("Vpc"), Resource::new("AWS::EC2::VPC"))
            .unwrap();
        assert_eq!(id, "Vpc");
        assert_eq!(t.resource("Vpc").unwrap().path.as_deref(), Some("Test/Vpc"));
    }

    #[test]
    fn duplicate_logical_id_is_rejected() {
        let mut t = Template::new();
        t.add_resource(&root().child("Vpc"), Resource::new("AWS::EC2::VPC")).unwrap();
        let err = t
            .add_resource(&root().child("Vpc"), Resource::new("AWS::EC2::VPC"))
            .unwrap_err();
        assert!(matches!(err, SynthError::DuplicateLogicalId { .. }));
    }

    #[test]
    fn construct_id_without_alphanumerics_is_rejected() {
        let mut t = Template::new();
        let err = t
            .add_resource(&root().child("Server").child("--"), Resource::new("AWS::EC2::SecurityGroup"))
            .unwrap_err();
        assert!(matches!(err, SynthError::InvalidConstructId { .. }));
        assert!(t.resources().is_empty());
    }

    #[test]
    fn property_lookup_by_path() {
        let r = Resource::new("AWS::ECS::TaskDefinition").prop(
            "ContainerDefinitions",
            Expr::list([Expr::map([("Name", Expr::str("app"))])]),
        );
        assert_eq!(
            r.property("ContainerDefinitions.0.Name").and_then(Expr::as_str),
            Some("app")
        );
        assert!(r.property("ContainerDefinitions.1.Name").is_none());
    }

    #[test]
    fn push_property_appends() {
        let mut r = Resource::new("AWS::EC2::SecurityGroup");
        r.push_property("SecurityGroupIngress", Expr::str("a"));
        r.push_property("SecurityGroupIngress", Expr::str("b"));
        assert_eq!(r.property("SecurityGroupIngress.1").and_then(Expr::as_str), Some("b"));
    }

    #[test]
    fn validate_catches_dangling_ref() {
        let mut t = Template::new();
        t.add_resource(
            &root().child("Subnet"),
            Resource::new("AWS::EC2::Subnet").prop("VpcId", Expr::reference("Missing")),
        )
        .unwrap();
        let err = t.validate().unwrap_err();
        assert!(matches!(err, SynthError::DanglingReference { .. }));
    }

    #[test]
    fn validate_catches_unknown_condition() {
        let mut t = Template::new();
        t.add_output("Flag", Expr::cond("Nope", "a".into(), "b".into()), None).unwrap();
        assert!(t.validate().is_err());
    }

    #[test]
    fn condition_arity_is_checked() {
        let mut t = Template::new();
        let err = t
            .add_condition("One", Condition::And(vec![Condition::equals("a", "a")]))
            .unwrap_err();
        assert!(matches!(err, SynthError::ConditionArity { arity: 1, .. }));
    }

    #[test]
    fn rendering_is_deterministic() {
        let build = || {
            let mut t = Template::new();
            t.add_resource(&root().child("B"), Resource::new("X::B").prop("Z", "1").prop("A", "2"))
                .unwrap();
            t.add_resource(&root().child("A"), Resource::new("X::A")).unwrap();
            t.to_json_pretty().unwrap()
        };
        let out = build();
        assert_eq!(out, build());
        assert!(out.find("\"A\"").unwrap() < out.find("\"B\"").unwrap());
    }

    #[test]
    fn removal_policy_sets_both_policies() {
        let r = Resource::new("AWS::EFS::FileSystem").removal_policy(RemovalPolicy::Delete);
        let v = r.to_json();
        assert_eq!(v["DeletionPolicy"], "Delete");
        assert_eq!(v["UpdateReplacePolicy"], "Delete");
    }
}
