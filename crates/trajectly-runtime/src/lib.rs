//! Runtime orchestration for the TRT engine.
//!
//! Owns everything stateful: spawning the agent subprocess, the baseline
//! and artifact stores under `.trajectly/`, report rendering, and the
//! record / run / shrink command flows that compose the pure engine
//! stages into verdicts on disk.

mod config;
mod error;
mod executor;
mod ops;
mod report;
mod specs;
mod stores;
mod trace_build;

pub use config::WorkspaceConfig;
pub use error::{Error, Result};
pub use executor::{ExecutionResult, RunSeeds, execute_spec};
pub use ops::{
    build_repro_command, initialize_workspace, record_specs, resolve_repro_spec, run_specs,
    shrink_repro,
};
pub use report::{
    aggregate_markdown, augment_report_with_trt, latest_report_path, read_latest_report,
    render_markdown, write_reports,
};
pub use specs::{discover_spec_files, load_spec, load_specs};
pub use stores::{
    ArtifactStore, BaselinePaths, BaselineStore, LocalArtifactStore, LocalBaselineStore,
};
pub use trace_build::build_trace;
