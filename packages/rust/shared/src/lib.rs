//! Shared types, error model, and configuration for Luna.
//!
//! This crate is the foundation depended on by all other Luna crates.
//! It provides:
//! - [`LunaError`]: the unified error type
//! - The tool taxonomy ([`ToolId`], [`ToolFamily`], [`FamilySpec`])
//! - Workflow definitions ([`Workflow`], [`ResolvedWorkflow`], [`ParamValue`])
//! - Record types shared by the engine, storage and reports
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;
pub mod workflow;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FiltersConfig, PipelineConfig, ReportFormat, ToolConfig,
    config_dir, config_file_path, init_config, init_config_at, load_config, load_config_from,
};
pub use error::{LunaError, Result};
pub use types::{
    ArtifactKind, CorrelationInput, FAMILY_TABLE, FamilySpec, HostAddr, IpPortRow, PortRecord, ProbeRecord, RunId,
    ToolFamily, ToolId, WebAssetRow,
};
pub use workflow::{
    BUILTIN_PROFILES, ParamValue, Params, RESERVED_ALIASES, ResolvedStage, ResolvedWorkflow, Stage,
    UnresolvedParam, Workflow, default_params,
};
