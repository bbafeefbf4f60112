//! The CVAT deployment stack.
//!
//! [`synthesize`] runs one pass over a [`cvat_core::CvatConfig`]: network,
//! stateful backends, the ECS cluster, every service, the permissions
//! between them, load balancer routing and the stack outputs.

pub mod django;
pub mod stack;

pub use stack::{Synthesis, synthesize};
