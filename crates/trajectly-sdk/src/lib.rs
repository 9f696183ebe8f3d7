//! Agent-side SDK.
//!
//! Agents under test link this crate to emit their event stream and to
//! route nondeterminism through the replay sandbox. The engine never
//! depends on it; communication happens through the events file and the
//! `TRAJECTLY_*` environment variables.

mod context;
mod error;
mod netguard;
mod sandbox;

pub use context::{RuntimeSettings, SdkContext};
pub use error::{Error, Result};
pub use netguard::{NetworkGuard, network_guard_from_env};
pub use sandbox::{
    DeterminismViolation, Sandbox, activate_sandbox_from_env, current_sandbox, reset_for_tests,
};
