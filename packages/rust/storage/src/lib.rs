//! File-backed storage layer.
//!
//! [`ArtifactStore`] owns the per-target output tree written while a pipeline
//! runs and read back by `luna report`:
//!
//! ```text
//! <output_dir>/<target>/
//!   filtered_subdomains.txt
//!   discovered_urls.txt
//!   subdomain_ips.txt
//!   <alias>_results.json      one per HTTP-probe stage
//!   port_scan_results.json
//!   summary.json
//!   run.json
//!   <alias>/                  per-stage working directory
//! ```
//!
//! [`ProfileStore`] keeps workflow definitions as JSON files.

mod profiles;

pub use profiles::ProfileStore;

use std::path::{Path, PathBuf};

use luna_shared::{CorrelationInput, HostAddr, LunaError, PortRecord, ProbeRecord, Result};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

pub const SUBDOMAINS_FILE: &str = "filtered_subdomains.txt";
pub const URLS_FILE: &str = "discovered_urls.txt";
pub const HOST_IPS_FILE: &str = "subdomain_ips.txt";
pub const PORTS_FILE: &str = "port_scan_results.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const RUN_MANIFEST_FILE: &str = "run.json";

/// Suffix of the per-stage probe files (`<alias>_results.json`).
const PROBE_SUFFIX: &str = "_results.json";

/// Handle on the output root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a target's artifacts. Not created.
    pub fn target_dir(&self, target: &str) -> PathBuf {
        self.root.join(dir_name(target))
    }

    /// Create (if needed) and return a target's artifact directory.
    pub fn ensure_target_dir(&self, target: &str) -> Result<PathBuf> {
        let dir = self.target_dir(target);
        std::fs::create_dir_all(&dir).map_err(|e| LunaError::io(&dir, e))?;
        Ok(dir)
    }

    /// Create (if needed) and return the working directory of one stage.
    pub fn stage_dir(&self, target: &str, alias: &str) -> Result<PathBuf> {
        let dir = self.target_dir(target).join(dir_name(alias));
        std::fs::create_dir_all(&dir).map_err(|e| LunaError::io(&dir, e))?;
        Ok(dir)
    }

    /// Write a newline-delimited input list for a stage and return its path.
    pub fn write_input_list(&self, target: &str, alias: &str, items: &[String]) -> Result<PathBuf> {
        let path = self
            .ensure_target_dir(target)?
            .join(format!("{}_input.txt", dir_name(alias)));
        write_lines(&path, items)?;
        Ok(path)
    }

    // -- subdomains / urls ------------------------------------------------

    pub fn save_subdomains(&self, target: &str, subdomains: &[String]) -> Result<()> {
        write_lines(&self.ensure_target_dir(target)?.join(SUBDOMAINS_FILE), subdomains)
    }

    pub fn load_subdomains(&self, target: &str) -> Result<Vec<String>> {
        read_lines(&self.target_dir(target).join(SUBDOMAINS_FILE))
    }

    pub fn save_urls(&self, target: &str, urls: &[String]) -> Result<()> {
        write_lines(&self.ensure_target_dir(target)?.join(URLS_FILE), urls)
    }

    pub fn load_urls(&self, target: &str) -> Result<Vec<String>> {
        read_lines(&self.target_dir(target).join(URLS_FILE))
    }

    // -- subdomain -> ip ----------------------------------------------------

    /// Persist resolved hosts as `subdomain [ip]` lines.
    pub fn save_host_ips(&self, target: &str, hosts: &[HostAddr]) -> Result<()> {
        let lines: Vec<String> = hosts
            .iter()
            .map(|h| format!("{} [{}]", h.subdomain, h.ip))
            .collect();
        write_lines(&self.ensure_target_dir(target)?.join(HOST_IPS_FILE), &lines)
    }

    pub fn load_host_ips(&self, target: &str) -> Result<Vec<HostAddr>> {
        let lines = read_lines(&self.target_dir(target).join(HOST_IPS_FILE))?;
        Ok(lines.iter().filter_map(|l| parse_host_line(l)).collect())
    }

    // -- probes -------------------------------------------------------------

    /// Persist the records produced by one HTTP-probe stage.
    pub fn save_probes(&self, target: &str, alias: &str, probes: &[ProbeRecord]) -> Result<()> {
        let path = self
            .ensure_target_dir(target)?
            .join(format!("{}{PROBE_SUFFIX}", dir_name(alias)));
        write_json(&path, &probes)
    }

    /// Load every probe file of a target in stage order.
    ///
    /// Stage order comes from `run.json`; files of stages it does not list
    /// follow, ordered by file name. A file may hold a plain list or an
    /// object with a `results` list.
    pub fn load_probes(&self, target: &str) -> Result<Vec<ProbeRecord>> {
        let dir = self.target_dir(target);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| LunaError::io(&dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(PROBE_SUFFIX) && n != PORTS_FILE)
            })
            .collect();
        files.sort();
        let stage_files = self.manifest_stage_files(target);
        files.sort_by_key(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            stage_files
                .iter()
                .position(|f| f == name)
                .unwrap_or(usize::MAX)
        });

        let mut probes = Vec::new();
        for path in files {
            let value: serde_json::Value = read_json(&path)?;
            let list = match value {
                serde_json::Value::Object(mut map) => {
                    map.remove("results").unwrap_or(serde_json::Value::Null)
                }
                other => other,
            };
            match serde_json::from_value::<Vec<ProbeRecord>>(list) {
                Ok(records) => probes.extend(records),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable probe file");
                }
            }
        }
        Ok(probes)
    }

    /// Probe file names of the stages recorded in `run.json`, by stage order.
    fn manifest_stage_files(&self, target: &str) -> Vec<String> {
        let path = self.target_dir(target).join(RUN_MANIFEST_FILE);
        if !path.exists() {
            return Vec::new();
        }
        match read_json::<ManifestStages>(&path) {
            Ok(mut manifest) => {
                manifest.stages.sort_by_key(|s| s.order);
                manifest
                    .stages
                    .iter()
                    .map(|s| format!("{}{PROBE_SUFFIX}", dir_name(&s.alias)))
                    .collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "run manifest unreadable, probe files ordered by name");
                Vec::new()
            }
        }
    }

    // -- ports --------------------------------------------------------------

    pub fn save_ports(&self, target: &str, ports: &[PortRecord]) -> Result<()> {
        write_json(&self.ensure_target_dir(target)?.join(PORTS_FILE), &ports)
    }

    pub fn load_ports(&self, target: &str) -> Result<Vec<PortRecord>> {
        let path = self.target_dir(target).join(PORTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    // -- documents ----------------------------------------------------------

    /// Write `summary.json` for a target.
    pub fn write_summary<T: Serialize>(&self, target: &str, summary: &T) -> Result<PathBuf> {
        let path = self.ensure_target_dir(target)?.join(SUMMARY_FILE);
        write_json(&path, summary)?;
        Ok(path)
    }

    /// Write `run.json` for a target.
    pub fn write_run_manifest<T: Serialize>(&self, target: &str, manifest: &T) -> Result<PathBuf> {
        let path = self.ensure_target_dir(target)?.join(RUN_MANIFEST_FILE);
        write_json(&path, manifest)?;
        Ok(path)
    }

    /// Rebuild the correlation input of a target from its artifact files.
    ///
    /// Fails when the target has no output directory at all; missing
    /// individual files count as empty.
    pub fn load_correlation_input(&self, target: &str) -> Result<CorrelationInput> {
        let dir = self.target_dir(target);
        if !dir.is_dir() {
            return Err(LunaError::validation(format!(
                "no results for '{target}' under {}",
                self.root.display()
            )));
        }

        Ok(CorrelationInput {
            subdomains: self.load_subdomains(target)?,
            urls: self.load_urls(target)?,
            probes: self.load_probes(target)?,
            ports: self.load_ports(target)?,
            host_ips: self.load_host_ips(target)?,
        })
    }
}

/// The part of `run.json` that fixes probe file order.
#[derive(Deserialize)]
struct ManifestStages {
    #[serde(default)]
    stages: Vec<ManifestStage>,
}

#[derive(Deserialize)]
struct ManifestStage {
    order: usize,
    alias: String,
}

/// File-system-safe directory name for a target or alias.
fn dir_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Parse one `subdomain [ip]` line.
fn parse_host_line(line: &str) -> Option<HostAddr> {
    let (subdomain, rest) = line.split_once('[')?;
    let ip = rest.split_once(']')?.0.trim();
    let subdomain = subdomain.trim();
    if subdomain.is_empty() || ip.is_empty() {
        return None;
    }
    Some(HostAddr {
        subdomain: subdomain.to_string(),
        ip: ip.to_string(),
    })
}

/// Write `content` to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).map_err(|e| LunaError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| LunaError::io(path, e))
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    write_atomic(path, content.as_bytes())
}

/// Non-empty trimmed lines of a file; a missing file is empty.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| LunaError::io(path, e))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| LunaError::parse(format!("failed to serialize {}: {e}", path.display())))?;
    write_atomic(path, json.as_bytes())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| LunaError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| LunaError::parse(format!("failed to parse {}: {e}", path.display())))
}
