//! Core types for synthesizing the CVAT deployment stack: deferred
//! expressions, the template model, construct paths, plan-time resolution
//! and `cvat.toml` configuration.

pub mod config;
pub mod error;
pub mod expr;
pub mod path;
pub mod resolve;
pub mod template;
pub mod types;

pub use config::CvatConfig;
pub use error::{ConfigError, ResolveError, Result, SynthError};
pub use expr::{Condition, Expr, Pseudo};
pub use path::ConstructPath;
pub use resolve::Resolver;
pub use template::{Output, Parameter, RemovalPolicy, Resource, Template};
pub use types::*;
