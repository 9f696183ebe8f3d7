// Engine crate - the TRT decision pipeline (abstraction, refinement,
// contracts, witness resolution, shrinking). Every stage is pure: events
// in, findings out, no I/O.

mod abstraction;
mod contracts;
mod diff;
mod error;
mod predicates;
mod refinement;
mod runner;
mod shrink;
mod skeleton;
mod witness;

pub use abstraction::{
    AbstractTrace, AbstractionConfig, PiiFlags, PredicateBag, Token, TokenKind,
    build_abstract_trace,
};
pub use contracts::evaluate_contracts;
pub use diff::{StructuralChange, compare_traces, lcs_pairs, structural_diff};
pub use error::{Error, Result};
pub use predicates::{contains_email, contains_phone, contains_pii, extract_domains, extract_numeric_values};
pub use refinement::{RefinementCheckResult, check_skeleton_refinement};
pub use runner::{TrtResult, evaluate_trt, normalizer_mismatch_violation};
pub use shrink::{ShrinkResult, ddmin_shrink};
pub use skeleton::{SkeletonStep, extract_call_skeleton};
pub use witness::{WitnessResolution, resolve_witness};
