//! Error types for synthesis, configuration and plan-time resolution.

use thiserror::Error;

/// Failure while composing the resource graph.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("duplicate logical id `{id}` (construct path {path})")]
    DuplicateLogicalId { id: String, path: String },
    #[error("duplicate {kind} `{name}`")]
    DuplicateName { kind: &'static str, name: String },
    #[error("listener rule priority {priority} is already used by `{existing}`")]
    DuplicatePriority { priority: u32, existing: String },
    #[error("listener rule priority {0} is outside 1..=50000")]
    InvalidPriority(u32),
    #[error("invalid CIDR block `{0}`")]
    InvalidCidr(String),
    #[error("cannot fit {subnets} subnets of /{prefix} into {cidr}")]
    SubnetLayout { cidr: String, subnets: usize, prefix: u8 },
    #[error("invalid capacity range {min}..{max}: {reason}")]
    InvalidCapacity { min: f64, max: f64, reason: &'static str },
    #[error("service `{service}`: {cpu} CPU units with {memory_mib} MiB is not a Fargate task size")]
    InvalidTaskSize { service: String, cpu: u32, memory_mib: u32 },
    #[error("`{from}` references unknown {kind} `{target}`")]
    DanglingReference { from: String, kind: &'static str, target: String },
    #[error("condition `{name}` has {arity} operands; Fn::And/Fn::Or take 2 to 10")]
    ConditionArity { name: String, arity: usize },
    #[error("unknown resource `{0}`")]
    UnknownResource(String),
    #[error("construct id `{id}` at {path} has no alphanumeric characters")]
    InvalidConstructId { id: String, path: String },
    #[error("image asset {path}: {source}")]
    Asset {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Failure while loading or validating `cvat.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure while evaluating an expression at plan time.
#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    /// The value depends on something only known after deployment.
    #[error("deferred until deployment: {0}")]
    Deferred(String),
    #[error("unknown condition `{0}`")]
    UnknownCondition(String),
    #[error("unknown output `{0}`")]
    UnknownOutput(String),
    #[error("Fn::Select index {index} out of range for {len} items")]
    SelectOutOfRange { index: usize, len: usize },
    #[error("expression does not produce a string: {0}")]
    NotAString(String),
}

pub type Result<T, E = SynthError> = std::result::Result<T, E>;
