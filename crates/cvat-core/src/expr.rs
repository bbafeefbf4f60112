//! Deferred template expressions.
//!
//! Most values in a stack are not known at synthesis time: resource ids,
//! endpoint addresses, ports assigned by the provider, parameter values.
//! `Expr` models a value as a tree of literals and CloudFormation intrinsic
//! functions. Literal-only trees collapse back into plain strings so the
//! rendered template stays readable.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};

/// Pseudo parameters supplied by CloudFormation at deploy time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pseudo {
    AccountId,
    Region,
    StackName,
    UrlSuffix,
    Partition,
    /// Removes a property when returned from `Fn::If`.
    NoValue,
}

impl Pseudo {
    pub fn name(&self) -> &'static str {
        match self {
            Pseudo::AccountId => "AWS::AccountId",
            Pseudo::Region => "AWS::Region",
            Pseudo::StackName => "AWS::StackName",
            Pseudo::UrlSuffix => "AWS::URLSuffix",
            Pseudo::Partition => "AWS::Partition",
            Pseudo::NoValue => "AWS::NoValue",
        }
    }
}

/// A template value, possibly deferred until deployment.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Int(i64),
    Num(f64),
    Bool(bool),
    List(Vec<Expr>),
    Map(BTreeMap<String, Expr>),
    /// `Ref` to a resource or parameter by logical id.
    Ref(String),
    /// `Fn::GetAtt` on a resource attribute.
    GetAtt(String, String),
    /// `Fn::Join` with an empty delimiter.
    Join(Vec<Expr>),
    /// `Fn::If` on a named condition.
    If(String, Box<Expr>, Box<Expr>),
    Pseudo(Pseudo),
    /// `Fn::Select` of an index from a list expression.
    Select(usize, Box<Expr>),
    /// `Fn::GetAZs` for the current region.
    AvailabilityZones,
}

impl Expr {
    pub fn str(value: impl Into<String>) -> Self {
        Expr::Str(value.into())
    }

    pub fn reference(logical_id: impl Into<String>) -> Self {
        Expr::Ref(logical_id.into())
    }

    pub fn att(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Expr::GetAtt(logical_id.into(), attribute.into())
    }

    pub fn cond(condition: impl Into<String>, then: Expr, otherwise: Expr) -> Self {
        Expr::If(condition.into(), Box::new(then), Box::new(otherwise))
    }

    pub fn select(index: usize, list: Expr) -> Self {
        Expr::Select(index, Box::new(list))
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Expr>,
    {
        Expr::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Expr)>,
        K: Into<String>,
    {
        Expr::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Concatenate parts into one string value.
    ///
    /// Nested joins are flattened, numbers become literals and adjacent
    /// literals are merged. A result with no deferred parts is a plain
    /// `Str`, so `concat` is safe to call whether or not the inputs are
    /// resolved.
    pub fn concat<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Expr>,
    {
        let mut flat: Vec<Expr> = Vec::new();
        for part in parts {
            push_flattened(&mut flat, part.into());
        }
        match flat.len() {
            0 => Expr::Str(String::new()),
            1 if matches!(flat[0], Expr::Str(_)) => flat.remove(0),
            _ => Expr::Join(flat),
        }
    }

    /// True if evaluating this expression needs deploy-time information.
    pub fn is_deferred(&self) -> bool {
        match self {
            Expr::Str(_) | Expr::Int(_) | Expr::Num(_) | Expr::Bool(_) => false,
            Expr::List(items) => items.iter().any(Expr::is_deferred),
            Expr::Map(entries) => entries.values().any(Expr::is_deferred),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Expr]> {
        match self {
            Expr::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Expr>> {
        match self {
            Expr::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Look up a key in a map expression.
    pub fn get(&self, key: &str) -> Option<&Expr> {
        self.as_map()?.get(key)
    }

    /// Mutable access to a map entry, for constructs that amend properties
    /// after creation.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Expr> {
        match self {
            Expr::Map(entries) => entries.get_mut(key),
            _ => None,
        }
    }

    /// Collect every logical id referenced through `Ref` or `Fn::GetAtt`.
    pub fn references(&self, out: &mut Vec<String>) {
        match self {
            Expr::Ref(id) | Expr::GetAtt(id, _) => out.push(id.clone()),
            Expr::List(items) | Expr::Join(items) => {
                items.iter().for_each(|e| e.references(out));
            }
            Expr::Map(entries) => entries.values().for_each(|e| e.references(out)),
            Expr::If(_, a, b) => {
                a.references(out);
                b.references(out);
            }
            Expr::Select(_, list) => list.references(out),
            _ => {}
        }
    }

    /// Collect every condition name used by `Fn::If`.
    pub fn conditions(&self, out: &mut Vec<String>) {
        match self {
            Expr::If(name, a, b) => {
                out.push(name.clone());
                a.conditions(out);
                b.conditions(out);
            }
            Expr::List(items) | Expr::Join(items) => {
                items.iter().for_each(|e| e.conditions(out));
            }
            Expr::Map(entries) => entries.values().for_each(|e| e.conditions(out)),
            Expr::Select(_, list) => list.conditions(out),
            _ => {}
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Expr::Str(s) => Value::String(s.clone()),
            Expr::Int(n) => json!(n),
            Expr::Num(n) => json!(n),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::List(items) => Value::Array(items.iter().map(Expr::to_json).collect()),
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                Value::Object(map)
            }
            Expr::Ref(id) => json!({ "Ref": id }),
            Expr::GetAtt(id, attr) => json!({ "Fn::GetAtt": [id, attr] }),
            Expr::Join(parts) => {
                let parts: Vec<Value> = parts.iter().map(Expr::to_json).collect();
                json!({ "Fn::Join": ["", parts] })
            }
            Expr::If(cond, a, b) => json!({ "Fn::If": [cond, a.to_json(), b.to_json()] }),
            Expr::Pseudo(p) => json!({ "Ref": p.name() }),
            Expr::Select(index, list) => json!({ "Fn::Select": [index, list.to_json()] }),
            Expr::AvailabilityZones => json!({ "Fn::GetAZs": "" }),
        }
    }
}

fn push_flattened(out: &mut Vec<Expr>, part: Expr) {
    let part = match part {
        Expr::Int(n) => Expr::Str(n.to_string()),
        Expr::Num(n) => Expr::Str(n.to_string()),
        Expr::Join(inner) => {
            for p in inner {
                push_flattened(out, p);
            }
            return;
        }
        other => other,
    };
    if let Expr::Str(s) = &part {
        if s.is_empty() {
            return;
        }
        if let Some(Expr::Str(last)) = out.last_mut() {
            last.push_str(s);
            return;
        }
    }
    out.push(part);
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Str(s.to_string())
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Str(s)
    }
}

impl From<&String> for Expr {
    fn from(s: &String) -> Self {
        Expr::Str(s.clone())
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Self {
        e.clone()
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Int(n)
    }
}

impl From<u32> for Expr {
    fn from(n: u32) -> Self {
        Expr::Int(n.into())
    }
}

impl From<u16> for Expr {
    fn from(n: u16) -> Self {
        Expr::Int(n.into())
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Num(n)
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Bool(b)
    }
}

impl From<Pseudo> for Expr {
    fn from(p: Pseudo) -> Self {
        Expr::Pseudo(p)
    }
}

// ── Conditions ────────────────────────────────────────────────────

/// A boolean expression evaluated by CloudFormation before resources
/// are created.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Expr, Expr),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// Reference to another named condition.
    Named(String),
}

impl Condition {
    pub fn equals(a: impl Into<Expr>, b: impl Into<Expr>) -> Self {
        Condition::Equals(a.into(), b.into())
    }

    /// Number of operands for `Fn::And` / `Fn::Or`, `None` otherwise.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Condition::And(c) | Condition::Or(c) => Some(c.len()),
            _ => None,
        }
    }

    /// Visit this condition and all nested ones.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Condition)) {
        visit(self);
        match self {
            Condition::And(c) | Condition::Or(c) => c.iter().for_each(|c| c.walk(visit)),
            Condition::Not(c) => c.walk(visit),
            _ => {}
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Condition::Equals(a, b) => json!({ "Fn::Equals": [a.to_json(), b.to_json()] }),
            Condition::And(c) => {
                json!({ "Fn::And": c.iter().map(Condition::to_json).collect::<Vec<_>>() })
            }
            Condition::Or(c) => {
                json!({ "Fn::Or": c.iter().map(Condition::to_json).collect::<Vec<_>>() })
            }
            Condition::Not(c) => json!({ "Fn::Not": [c.to_json()] }),
            Condition::Named(name) => json!({ "Condition": name }),
        }
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
