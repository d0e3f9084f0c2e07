//! Core orchestration for Luna.
//!
//! This crate provides:
//! - [`context`]: the per-target accumulator stages read from and merge into
//! - [`pipeline`]: the engine that runs a resolved workflow over targets
//! - [`correlate`]: turning collected artifacts into the two report tables

pub mod context;
pub mod correlate;
pub mod pipeline;

pub use context::{ContextSummary, ExecutionContext, HostFilter, MergeStats, TaggedProbe};
pub use correlate::{Reports, build_reports};
pub use pipeline::{
    DerivedInput, Pipeline, ProgressReporter, RunReport, SilentProgress, StageOutcome,
    StageStatus, TargetOutcome, TargetStatus, derive_input,
};
