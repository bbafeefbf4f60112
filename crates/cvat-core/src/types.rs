//! Shared types used across the CVAT deployment crates.

use serde::{Deserialize, Serialize};

/// Target account and region for a stack.
///
/// Both are optional: an environment-agnostic stack defers them to
/// deployment time through pseudo parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn is_agnostic(&self) -> bool {
        self.account.is_none() && self.region.is_none()
    }

    /// `account/region`, with `unknown` for missing parts.
    pub fn label(&self) -> String {
        format!(
            "{}/{}",
            self.account.as_deref().unwrap_or("unknown-account"),
            self.region.as_deref().unwrap_or("unknown-region"),
        )
    }
}

/// CPU architecture for a task's runtime platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuArchitecture {
    #[default]
    X86_64,
    Arm64,
}

impl CpuArchitecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            CpuArchitecture::X86_64 => "X86_64",
            CpuArchitecture::Arm64 => "ARM64",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agnostic_environment() {
        let env = Environment::default();
        assert!(env.is_agnostic());
        assert_eq!(env.label(), "unknown-account/unknown-region");
    }

    #[test]
    fn architecture_names() {
        assert_eq!(CpuArchitecture::Arm64.as_str(), "ARM64");
        let parsed: CpuArchitecture = serde_json::from_str("\"arm64\"").unwrap();
        assert_eq!(parsed, CpuArchitecture::Arm64);
    }
}
