//! Core domain + application logic for the invite-link guard bot.
//!
//! Framework-agnostic: the messaging platform sits behind [`gateway::PlatformGateway`]
//! and persistence behind [`store::PairStore`]; adapter crates provide the rest.

pub mod commands;
pub mod config;
pub mod domain;
pub mod eligibility;
pub mod errors;
pub mod formatting;
pub mod gateway;
pub mod locks;
pub mod logging;
pub mod onboarding;
pub mod pair;
pub mod retry;
pub mod rotation;
pub mod scheduler;
pub mod store;
pub mod template;
pub mod throttled;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};
