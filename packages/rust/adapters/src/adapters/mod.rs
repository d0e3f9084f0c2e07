//! Tool adapter trait and the built-in command-line adapters.
//!
//! Every external tool is driven through [`ToolAdapter`]. The built-in
//! adapters share one implementation, [`CommandAdapter`], parameterized by a
//! [`CommandTool`] that knows the tool's argv layout and native output format.

mod dirsearch;
mod ffuf;
mod fscan;
mod httpx;
mod oneforall;
mod puzzle;
mod txportmap;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use luna_shared::{AppConfig, HostAddr, LunaError, Params, PortRecord, ProbeRecord, Result, ToolId};

use crate::runner::{self, ProcessOutput, ProcessSpec};

pub use dirsearch::DirsearchTool;
pub use ffuf::FfufTool;
pub use fscan::FscanTool;
pub use httpx::HttpxTool;
pub use oneforall::OneForAllTool;
pub use puzzle::PuzzleTool;
pub use txportmap::TxPortMapTool;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// What a stage runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageInput {
    /// The raw target string (domain or IP).
    Target(String),
    /// A newline-delimited list materialized from the execution context.
    ListFile(PathBuf),
}

impl StageInput {
    /// The input as a single argv element.
    pub fn as_arg(&self) -> String {
        match self {
            Self::Target(t) => t.clone(),
            Self::ListFile(p) => p.display().to_string(),
        }
    }
}

impl std::fmt::Display for StageInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(t) => write!(f, "target {t}"),
            Self::ListFile(p) => write!(f, "list {}", p.display()),
        }
    }
}

/// Per-invocation environment.
#[derive(Debug, Clone)]
pub struct StageEnv {
    /// Stage working directory (`<output_dir>/<target>/<alias>/`).
    pub work_dir: PathBuf,
    /// Time budget for the child process.
    pub timeout: Duration,
}

/// Parsed output of a tool, tagged by family.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolPayload {
    Subdomains {
        subdomains: Vec<String>,
        resolved: Vec<HostAddr>,
    },
    Urls {
        urls: Vec<String>,
    },
    Probes {
        results: Vec<ProbeRecord>,
    },
    Ports {
        results: Vec<PortRecord>,
    },
    #[default]
    Empty,
}

impl ToolPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subdomains { .. } => "subdomains",
            Self::Urls { .. } => "urls",
            Self::Probes { .. } => "probes",
            Self::Ports { .. } => "ports",
            Self::Empty => "empty",
        }
    }

    /// Number of primary records carried.
    pub fn len(&self) -> usize {
        match self {
            Self::Subdomains { subdomains, .. } => subdomains.len(),
            Self::Urls { urls } => urls.len(),
            Self::Probes { results } => results.len(),
            Self::Ports { results } => results.len(),
            Self::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one adapter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    pub error: Option<String>,
    pub data: ToolPayload,
}

impl ToolResult {
    pub fn ok(data: ToolPayload) -> Self {
        Self {
            success: true,
            error: None,
            data,
        }
    }

    /// A failed invocation; failures never carry data.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: ToolPayload::Empty,
        }
    }
}

impl From<Result<ToolPayload>> for ToolResult {
    fn from(result: Result<ToolPayload>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// Uniform contract for driving one external tool.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn tool(&self) -> ToolId;

    /// Run the tool. Every failure, including bad parameters, is reported
    /// through the returned [`ToolResult`].
    async fn execute(&self, input: &StageInput, params: &Params, env: &StageEnv) -> ToolResult;
}

/// Resolves the adapter for a tool.
pub trait AdapterProvider: Send + Sync {
    fn adapter(&self, tool: ToolId) -> Option<Arc<dyn ToolAdapter>>;
}

// ---------------------------------------------------------------------------
// Command-line adapters
// ---------------------------------------------------------------------------

/// Argv construction and output parsing for one command-line tool.
pub trait CommandTool: Send + Sync {
    fn tool(&self) -> ToolId;

    /// Tool arguments (without the program). Parameter type errors are
    /// [`LunaError::Build`]. May clear stale output files in `env.work_dir`.
    fn build_args(&self, input: &StageInput, params: &Params, env: &StageEnv)
    -> Result<Vec<String>>;

    /// Parse the native output left by a successful run.
    fn parse_output(&self, env: &StageEnv, output: &ProcessOutput) -> Result<ToolPayload>;
}

/// A [`ToolAdapter`] that spawns a configured executable.
pub struct CommandAdapter<T> {
    inner: T,
    program: PathBuf,
    interpreter: Option<String>,
}

impl<T: CommandTool> CommandAdapter<T> {
    pub fn new(inner: T, program: PathBuf, interpreter: Option<String>) -> Self {
        Self {
            inner,
            program,
            interpreter,
        }
    }

    /// Adapter using the executable configured for `inner`'s tool.
    pub fn from_config(inner: T, config: &AppConfig) -> Self {
        let tool = inner.tool();
        Self::new(inner, config.tool_path(tool), config.tool(tool).interpreter)
    }

    /// Program and full argv, with the interpreter in front for scripts.
    pub fn command_line(&self, args: Vec<String>) -> (PathBuf, Vec<String>) {
        command_line(&self.program, self.interpreter.as_deref(), args)
    }

    async fn run(&self, input: &StageInput, params: &Params, env: &StageEnv) -> Result<ToolPayload> {
        let args = self.inner.build_args(input, params, env)?;

        if !self.program.exists() {
            return Err(LunaError::execution(format!(
                "{} not found at {}",
                self.inner.tool(),
                self.program.display()
            )));
        }

        // The child runs inside the stage directory.
        let program = std::path::absolute(&self.program).map_err(|e| LunaError::io(&self.program, e))?;
        let (program, args) = command_line(&program, self.interpreter.as_deref(), args);
        let spec = ProcessSpec {
            program,
            args,
            cwd: Some(env.work_dir.clone()),
        };
        tracing::debug!(command = %spec, "spawning tool");

        let output = runner::run(&spec, env.timeout).await?;
        if !output.success() {
            return Err(LunaError::execution(format!(
                "{} exited with {}: {}",
                self.inner.tool(),
                output.status_label(),
                output.stderr_tail()
            )));
        }

        self.inner.parse_output(env, &output)
    }
}

#[async_trait]
impl<T: CommandTool> ToolAdapter for CommandAdapter<T> {
    fn tool(&self) -> ToolId {
        self.inner.tool()
    }

    #[tracing::instrument(skip_all, fields(tool = %self.inner.tool(), input = %input))]
    async fn execute(&self, input: &StageInput, params: &Params, env: &StageEnv) -> ToolResult {
        let result = ToolResult::from(self.run(input, params, env).await);
        match &result.error {
            Some(error) => tracing::warn!(%error, "tool invocation failed"),
            None => tracing::debug!(
                kind = result.data.kind(),
                records = result.data.len(),
                "tool output parsed"
            ),
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The built-in adapters, one per [`ToolId`].
pub struct AdapterRegistry {
    adapters: HashMap<ToolId, Arc<dyn ToolAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register every built-in adapter with the configured executables.
    pub fn from_config(config: &AppConfig) -> Self {
        let oneforall = OneForAllTool::new(results_dir_beside(&config.tool_path(ToolId::OneForAll)));

        let mut registry = Self::new();
        registry.insert(Arc::new(CommandAdapter::from_config(oneforall, config)));
        registry.insert(Arc::new(CommandAdapter::from_config(PuzzleTool, config)));
        registry.insert(Arc::new(CommandAdapter::from_config(HttpxTool, config)));
        registry.insert(Arc::new(CommandAdapter::from_config(DirsearchTool, config)));
        registry.insert(Arc::new(CommandAdapter::from_config(FfufTool, config)));
        registry.insert(Arc::new(CommandAdapter::from_config(FscanTool, config)));
        registry.insert(Arc::new(CommandAdapter::from_config(TxPortMapTool, config)));
        registry
    }

    /// Add or replace the adapter for its tool.
    pub fn insert(&mut self, adapter: Arc<dyn ToolAdapter>) {
        self.adapters.insert(adapter.tool(), adapter);
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterProvider for AdapterRegistry {
    fn adapter(&self, tool: ToolId) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(&tool).cloned()
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the tool modules
// ---------------------------------------------------------------------------

fn command_line(program: &Path, interpreter: Option<&str>, args: Vec<String>) -> (PathBuf, Vec<String>) {
    match interpreter {
        Some(interpreter) => {
            let mut argv = Vec::with_capacity(args.len() + 1);
            argv.push(program.display().to_string());
            argv.extend(args);
            (PathBuf::from(interpreter), argv)
        }
        None => (program.to_path_buf(), args),
    }
}

/// `results/` next to a script.
fn results_dir_beside(program: &Path) -> PathBuf {
    program
        .parent()
        .map(|dir| dir.join("results"))
        .unwrap_or_else(|| PathBuf::from("results"))
}

/// Remove an output file left by an earlier run.
pub(crate) fn clear_output(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed stale output file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LunaError::io(path, e)),
    }
}

/// Content of an output file, `None` when the tool did not write one.
pub(crate) fn read_output(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "tool wrote no output file");
            Ok(None)
        }
        Err(e) => Err(LunaError::io(path, e)),
    }
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
