mod constants;
mod diff;
mod error;
mod event;
mod report;
mod spec;
mod violation;

pub use constants::*;
pub use diff::{DiffResult, DiffSummary, Finding, FirstDivergence, TraceTotals};
pub use error::{Error, Result};
pub use event::{EventType, TraceEvent, TraceMeta};
pub use report::{
    CommandOutcome, LatestRunReport, ReproArtifact, ShrinkStats, TrtReport, TrtReportMetadata,
    TrtStatus,
};
pub use spec::{
    AgentContracts, AgentSpec, BudgetThresholds, ClockConfig, ClockMode, DataLeakContracts,
    DeterminismConfig, FilesystemConfig, FilesystemMode, FixturePolicy, NetworkContracts,
    RandomConfig, RandomMode, RefinementConfig, RefinementMode, ReplayConfig, ReplayMode,
    SequenceContracts, SideEffectContracts, SubprocessConfig, SubprocessMode, ToolContracts,
    deep_merge,
};
pub use violation::{FailureClass, Violation};
