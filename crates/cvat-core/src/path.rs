//! Construct paths and logical id derivation.
//!
//! Every resource lives at a path like `CVAT/Server/TaskDef`. The template
//! key (logical id) is derived from that path: path components are
//! concatenated into a readable prefix and suffixed with a short hash of the
//! full path, so two constructs with the same name under different parents
//! never collide. Top-level constructs keep their plain id.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{Result, SynthError};

/// Components dropped from the readable part of a logical id.
const HIDDEN_IDS: &[&str] = &["Resource", "Default"];

/// Maximum length of a CloudFormation logical id.
const MAX_LOGICAL_ID_LEN: usize = 255;

const HASH_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstructPath {
    /// Name of the stack the path is rooted at.
    stack: String,
    components: Vec<String>,
}

impl ConstructPath {
    pub fn root(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            components: Vec::new(),
        }
    }

    pub fn child(&self, id: impl Into<String>) -> Self {
        let mut components = self.components.clone();
        components.push(id.into());
        Self {
            stack: self.stack.clone(),
            components,
        }
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The last path component, or the stack name for the root.
    pub fn id(&self) -> &str {
        self.components.last().map(String::as_str).unwrap_or(&self.stack)
    }

    /// Derive the logical id, rejecting paths where a component has no
    /// characters left after sanitizing.
    pub fn checked_logical_id(&self) -> Result<String> {
        let ids = if self.components.is_empty() {
            std::slice::from_ref(&self.stack)
        } else {
            self.components.as_slice()
        };
        if let Some(id) = ids.iter().find(|c| sanitize(c).is_empty()) {
            return Err(SynthError::InvalidConstructId {
                id: id.clone(),
                path: self.to_string(),
            });
        }
        Ok(self.logical_id())
    }

    /// Derive the template logical id for this path.
    pub fn logical_id(&self) -> String {
        match self.components.as_slice() {
            [] => sanitize(&self.stack),
            [only] => sanitize(only),
            components => {
                let hash = path_hash(components);
                let human: String = dedupe(
                    components
                        .iter()
                        .filter(|c| !HIDDEN_IDS.contains(&c.as_str()))
                        .map(|c| sanitize(c)),
                )
                .concat();
                let budget = MAX_LOGICAL_ID_LEN - HASH_LEN;
                let human = if human.len() > budget {
                    human[human.len() - budget..].to_string()
                } else {
                    human
                };
                format!("{human}{hash}")
            }
        }
    }
}

impl fmt::Display for ConstructPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stack)?;
        for c in &self.components {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

fn sanitize(id: &str) -> String {
    id.chars().filter(char::is_ascii_alphanumeric).collect()
}

fn path_hash(components: &[String]) -> String {
    let digest = Sha256::digest(components.join("/").as_bytes());
    hex::encode_upper(digest)[..HASH_LEN].to_string()
}

/// Drop a component when the previous one already ends with it
/// (`DatabaseDatabaseSecret` reads better as `DatabaseSecret`).
fn dedupe(parts: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in parts {
        if part.is_empty() {
            continue;
        }
        if let Some(prev) = out.last() {
            if prev.ends_with(&part) {
                continue;
            }
        }
        out.push(part);
    }
    out
}
