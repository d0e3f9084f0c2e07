//! Tool adapters for the external reconnaissance tools.
//!
//! This crate provides:
//! - [`ToolAdapter`]: the uniform `execute(input, params, env)` contract
//! - [`adapters`]: one command-line adapter per supported tool
//! - [`AdapterRegistry`]: adapters built from the application config
//! - [`runner`]: child-process execution with a time budget

pub mod adapters;
pub mod runner;

pub use adapters::{
    AdapterProvider, AdapterRegistry, CommandAdapter, CommandTool, DirsearchTool, FfufTool,
    FscanTool, HttpxTool, OneForAllTool, PuzzleTool, StageEnv, StageInput, ToolAdapter,
    ToolPayload, ToolResult, TxPortMapTool,
};
pub use runner::{ProcessOutput, ProcessSpec};
