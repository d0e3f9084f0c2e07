//! Application configuration for Luna.
//!
//! User config lives at `~/.luna/luna.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LunaError, Result};
use crate::types::ToolId;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "luna.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".luna";

// ---------------------------------------------------------------------------
// Config structs (matching luna.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Per-tool installation settings, keyed by tool id (`oneforall`, ...).
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfig>,

    /// Subdomain filters.
    #[serde(default)]
    pub filters: FiltersConfig,
}

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Csv,
    Xlsx,
    Both,
}

impl std::str::FromStr for ReportFormat {
    type Err = LunaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "xlsx" | "excel" => Ok(Self::Xlsx),
            "both" => Ok(Self::Both),
            other => Err(LunaError::config(format!(
                "unknown report format '{other}': expected csv, xlsx or both"
            ))),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root for per-target output directories.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Directory holding profile JSON files.
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: String,

    /// Base directory for relative tool paths.
    #[serde(default = "default_tools_dir")]
    pub tools_dir: String,

    /// Time budget for a single tool invocation.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Number of targets processed concurrently.
    #[serde(default = "default_target_concurrency")]
    pub target_concurrency: usize,

    /// Report format used by `run` and `report`.
    #[serde(default)]
    pub report_format: ReportFormat,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            profiles_dir: default_profiles_dir(),
            tools_dir: default_tools_dir(),
            tool_timeout_secs: default_tool_timeout(),
            target_concurrency: default_target_concurrency(),
            report_format: ReportFormat::default(),
        }
    }
}

fn default_output_dir() -> String {
    "outputs".into()
}
fn default_profiles_dir() -> String {
    "profiles".into()
}
fn default_tools_dir() -> String {
    "tools".into()
}
fn default_tool_timeout() -> u64 {
    300
}
fn default_target_concurrency() -> usize {
    1
}

/// `[tools.<id>]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Executable or script path. Relative paths are joined to `tools_dir`.
    pub path: String,
    /// Interpreter for script tools (e.g. `python3`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
}

impl ToolConfig {
    /// The stock install layout for a tool.
    pub fn default_for(tool: ToolId) -> Self {
        let (path, interpreter) = match tool {
            ToolId::OneForAll => ("OneForAll-master/oneforall.py", Some("python3")),
            ToolId::Puzzle => ("puzzle-master/puzzle", None),
            ToolId::Httpx => ("httpx-dev/httpx", None),
            ToolId::Ffuf => ("ffuf-master/ffuf", None),
            ToolId::Dirsearch => ("dirsearch-master/dirsearch.py", Some("python3")),
            ToolId::Fscan => ("fscan-main/fscan", None),
            ToolId::TxPortMap => ("TXPortMap-main/TxPortMap", None),
        };
        Self {
            path: path.into(),
            interpreter: interpreter.map(String::from),
        }
    }
}

/// `[filters]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersConfig {
    /// Drop mail-server hosts from discovered subdomains.
    #[serde(default = "default_true")]
    pub exclude_mail_hosts: bool,

    /// Case-insensitive regexes matched against the start of a subdomain.
    #[serde(default = "default_mail_host_patterns")]
    pub mail_host_patterns: Vec<String>,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            exclude_mail_hosts: true,
            mail_host_patterns: default_mail_host_patterns(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_mail_host_patterns() -> Vec<String> {
    [
        r"^mail\.",
        r"^smtp\.",
        r"^pop\.",
        r"^pop3\.",
        r"^imap\.",
        r"^webmail\.",
        r"^email\.",
        r"^mx\.",
        r"^mx[0-9]+\.",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl AppConfig {
    /// Resolved settings for a tool: the configured entry or the stock layout.
    pub fn tool(&self, tool: ToolId) -> ToolConfig {
        self.tools
            .get(tool.as_str())
            .cloned()
            .unwrap_or_else(|| ToolConfig::default_for(tool))
    }

    /// Absolute-or-relative path to a tool's executable.
    pub fn tool_path(&self, tool: ToolId) -> PathBuf {
        let path = PathBuf::from(self.tool(tool).path);
        if path.is_absolute() {
            path
        } else {
            Path::new(&self.defaults.tools_dir).join(path)
        }
    }

    /// Config with every tool entry spelled out, as written by `config init`.
    pub fn with_all_tools() -> Self {
        let mut config = Self::default();
        for tool in ToolId::ALL {
            config
                .tools
                .insert(tool.to_string(), ToolConfig::default_for(tool));
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root for per-target output directories.
    pub output_dir: PathBuf,
    /// Time budget for a single tool invocation.
    pub tool_timeout: Duration,
    /// Number of targets processed concurrently (at least 1).
    pub target_concurrency: usize,
    /// Drop mail-server hosts from discovered subdomains.
    pub exclude_mail_hosts: bool,
    /// Patterns for mail-server hosts.
    pub mail_host_patterns: Vec<String>,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.defaults.output_dir),
            tool_timeout: Duration::from_secs(config.defaults.tool_timeout_secs),
            target_concurrency: config.defaults.target_concurrency.max(1),
            exclude_mail_hosts: config.filters.exclude_mail_hosts,
            mail_host_patterns: config.filters.mail_host_patterns.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.luna/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| LunaError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.luna/luna.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LunaError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LunaError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    init_config_at(&config_file_path()?)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| LunaError::io(dir, e))?;
    }

    let config = AppConfig::with_all_tools();
    let content = toml::to_string_pretty(&config).map_err(|e| LunaError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| LunaError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::with_all_tools();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("[tools.oneforall]"));
        assert!(toml_str.contains("python3"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::with_all_tools();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.tool_timeout_secs, 300);
        assert_eq!(parsed.tools.len(), ToolId::ALL.len());
        assert!(parsed.filters.exclude_mail_hosts);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
output_dir = "/tmp/luna-out"
report_format = "xlsx"

[tools.httpx]
path = "/usr/local/bin/httpx"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.report_format, ReportFormat::Xlsx);
        assert_eq!(config.defaults.tool_timeout_secs, 300);
        assert_eq!(
            config.tool_path(ToolId::Httpx),
            PathBuf::from("/usr/local/bin/httpx")
        );
        assert_eq!(
            config.tool_path(ToolId::Puzzle),
            PathBuf::from("tools/puzzle-master/puzzle")
        );
        assert_eq!(config.filters.mail_host_patterns.len(), 9);
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let mut app = AppConfig::default();
        app.defaults.target_concurrency = 0;
        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.tool_timeout, Duration::from_secs(300));
        assert_eq!(pipeline.target_concurrency, 1);
        assert_eq!(pipeline.output_dir, PathBuf::from("outputs"));
    }

    #[test]
    fn report_format_parsing() {
        assert_eq!("CSV".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert_eq!("excel".parse::<ReportFormat>().unwrap(), ReportFormat::Xlsx);
        assert!("pdf".parse::<ReportFormat>().is_err());
    }
}
