//! Shared helpers for workspace tests: trace builders, spec builders, and
//! a temp-directory project world with seeded baselines and fixtures.

mod events;
mod specs;
mod world;

pub use events::{TraceBuilder, llm_exchange, tool_exchange};
pub use specs::{spec_from_json, spec_with_contracts};
pub use world::TestWorld;
