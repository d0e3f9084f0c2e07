//! Workflow definitions ("profiles"): an ordered list of tool stages with
//! bound parameters.
//!
//! A stored [`Workflow`] may contain unset parameters (`null` in JSON). The
//! pipeline only accepts a [`ResolvedWorkflow`], obtained through
//! [`Workflow::resolve`], whose stages carry concrete values only.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LunaError, Result};
use crate::types::ToolId;

/// Names of the profiles that ship with Luna.
pub const BUILTIN_PROFILES: [&str; 3] = ["default", "quick", "deep"];

/// Aliases whose stage files would land on a merged artifact
/// (`port_scan` -> `port_scan_results.json`).
pub const RESERVED_ALIASES: [&str; 1] = ["port_scan"];

// ---------------------------------------------------------------------------
// Parameter values
// ---------------------------------------------------------------------------

/// A concrete parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl ParamValue {
    /// Parse a value typed on the command line: `true`/`false`, integers, and
    /// anything else as text. `null` yields `None` (unset).
    pub fn parse_cli(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw {
            "null" => None,
            "true" => Some(Self::Bool(true)),
            "false" => Some(Self::Bool(false)),
            _ => Some(
                raw.parse::<i64>()
                    .map(Self::Int)
                    .unwrap_or_else(|_| Self::Text(raw.to_string())),
            ),
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Fully resolved parameters of one stage, with typed accessors used by the
/// adapters. A value of the wrong type is a build error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new(values: BTreeMap<String, ParamValue>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) {
        self.0.insert(key.into(), value);
    }

    /// Boolean switch, `default` when absent.
    pub fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.0.get(key) {
            None => Ok(default),
            Some(ParamValue::Bool(b)) => Ok(*b),
            Some(other) => Err(LunaError::build(format!(
                "parameter '{key}' must be true or false, got '{other}'"
            ))),
        }
    }

    /// Integer value, `default` when absent. Numeric strings are accepted.
    pub fn int(&self, key: &str, default: i64) -> Result<i64> {
        match self.0.get(key) {
            None => Ok(default),
            Some(ParamValue::Int(i)) => Ok(*i),
            Some(ParamValue::Text(s)) => s.trim().parse().map_err(|_| {
                LunaError::build(format!("parameter '{key}' must be an integer, got '{s}'"))
            }),
            Some(ParamValue::Bool(b)) => Err(LunaError::build(format!(
                "parameter '{key}' must be an integer, got '{b}'"
            ))),
        }
    }

    /// Text value (integers are rendered), `None` when absent or empty.
    pub fn text(&self, key: &str) -> Result<Option<String>> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ParamValue::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(ParamValue::Text(s)) => Ok(Some(s.clone())),
            Some(ParamValue::Int(i)) => Ok(Some(i.to_string())),
            Some(ParamValue::Bool(b)) => Err(LunaError::build(format!(
                "parameter '{key}' must be text, got '{b}'"
            ))),
        }
    }

    /// Text value with a fallback.
    pub fn text_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.text(key)?.unwrap_or_else(|| default.to_string()))
    }
}

/// Default parameters for a tool. `None` marks values the user must supply.
pub fn default_params(tool: ToolId) -> BTreeMap<String, Option<ParamValue>> {
    let entries: Vec<(&str, Option<ParamValue>)> = match tool {
        ToolId::OneForAll => vec![
            ("brute", Some(true.into())),
            ("dns", Some(true.into())),
            ("req", Some(true.into())),
            ("port", Some("default".into())),
            ("valid", Some(true.into())),
            ("path", None),
        ],
        ToolId::Puzzle => vec![
            ("mode", Some("domain".into())),
            ("timeout", Some(10.into())),
            ("l3", Some(false.into())),
            ("ping", Some(false.into())),
            ("pt", Some(500.into())),
            ("wt", Some(25.into())),
        ],
        ToolId::Httpx => vec![
            ("threads", Some(50.into())),
            ("timeout", Some(10.into())),
            ("status_code", Some(true.into())),
            ("title", Some(true.into())),
            ("tech_detect", Some(false.into())),
            ("follow_redirects", Some(false.into())),
        ],
        ToolId::Dirsearch => vec![
            ("threads", Some(50.into())),
            ("timeout", Some(10.into())),
            ("recursive", Some(false.into())),
            ("recursion_depth", Some(2.into())),
            ("exclude_status", Some("404,403".into())),
            ("wordlist", None),
        ],
        ToolId::Ffuf => vec![
            ("threads", Some(40.into())),
            ("timeout", Some(10.into())),
            ("mc", Some("200,301,302,403".into())),
            ("recursion", Some(false.into())),
            ("recursion_depth", Some(2.into())),
            ("wordlist", None),
        ],
        ToolId::Fscan => vec![
            ("threads", Some(100.into())),
            ("timeout", Some(3.into())),
            ("port", Some("top1000".into())),
            ("no_ping", Some(false.into())),
            ("web_scan", Some(true.into())),
        ],
        ToolId::TxPortMap => vec![
            ("port_range", Some("top1000".into())),
            ("threads", Some(1000.into())),
            ("timeout", Some(3.into())),
        ],
    };

    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

// ---------------------------------------------------------------------------
// Stage / Workflow
// ---------------------------------------------------------------------------

/// One configured tool invocation inside a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// 1-based position, fixed by the stage's place in the list.
    #[serde(default)]
    pub order: usize,
    pub tool: ToolId,
    /// Disambiguates repeated use of the same tool.
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `null` values are unset and block execution.
    #[serde(default)]
    pub params: BTreeMap<String, Option<ParamValue>>,
}

impl Stage {
    /// A stage with the tool's default parameters.
    pub fn new(tool: ToolId, alias: impl Into<String>) -> Self {
        Self {
            order: 0,
            tool,
            alias: alias.into(),
            description: None,
            params: default_params(tool),
        }
    }
}

/// A parameter that still needs a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedParam {
    pub alias: String,
    /// `None` when the stage has no parameters at all.
    pub key: Option<String>,
}

impl std::fmt::Display for UnresolvedParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}.{key}", self.alias),
            None => write!(f, "{} (no parameters configured)", self.alias),
        }
    }
}

/// A stored workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl Workflow {
    /// An empty workflow.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            created_at: now,
            updated_at: now,
            stages: Vec::new(),
        }
    }

    /// Append a stage with default parameters. When `alias` is `None` the
    /// first use of a tool is named after the tool and later uses get a
    /// numeric suffix (`httpx`, `httpx_2`, ...).
    pub fn push_tool(&mut self, tool: ToolId, alias: Option<&str>) -> &mut Stage {
        let alias = match alias {
            Some(a) => a.to_string(),
            None => {
                let uses = self.stages.iter().filter(|s| s.tool == tool).count();
                if uses == 0 {
                    tool.to_string()
                } else {
                    format!("{tool}_{}", uses + 1)
                }
            }
        };
        self.stages.push(Stage::new(tool, alias));
        self.renumber();
        let last = self.stages.len() - 1;
        &mut self.stages[last]
    }

    /// Re-assign 1-based `order` from list position.
    pub fn renumber(&mut self) {
        for (i, stage) in self.stages.iter_mut().enumerate() {
            stage.order = i + 1;
        }
    }

    pub fn stage_mut(&mut self, alias: &str) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| s.alias == alias)
    }

    /// Every parameter that still needs a value, in stage order.
    pub fn unresolved(&self) -> Vec<UnresolvedParam> {
        let mut missing = Vec::new();
        for stage in &self.stages {
            if stage.params.is_empty() {
                missing.push(UnresolvedParam {
                    alias: stage.alias.clone(),
                    key: None,
                });
                continue;
            }
            for (key, value) in &stage.params {
                if value.is_none() {
                    missing.push(UnresolvedParam {
                        alias: stage.alias.clone(),
                        key: Some(key.clone()),
                    });
                }
            }
        }
        missing
    }

    /// Produce the executable form of this workflow.
    ///
    /// Fails with a config error when the workflow has no stages, when two
    /// stages share an alias, or when any parameter is unset.
    pub fn resolve(&self) -> Result<ResolvedWorkflow> {
        if self.stages.is_empty() {
            return Err(LunaError::config(format!(
                "profile '{}' has no stages",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            Self::validate_alias(&stage.alias)?;
            if !seen.insert(stage.alias.as_str()) {
                return Err(LunaError::config(format!(
                    "profile '{}' uses alias '{}' more than once",
                    self.name, stage.alias
                )));
            }
        }

        let missing = self.unresolved();
        if !missing.is_empty() {
            let list: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return Err(LunaError::config(format!(
                "profile '{}' has unset parameters: {}",
                self.name,
                list.join(", ")
            )));
        }

        let stages = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, stage)| ResolvedStage {
                order: i + 1,
                tool: stage.tool,
                alias: stage.alias.clone(),
                params: Params::new(
                    stage
                        .params
                        .iter()
                        .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
                        .collect(),
                ),
            })
            .collect();

        Ok(ResolvedWorkflow {
            name: self.name.clone(),
            stages,
        })
    }

    /// Check that a profile name is usable as a file stem.
    pub fn validate_name(name: &str) -> Result<()> {
        let re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$")
            .map_err(|e| LunaError::validation(e.to_string()))?;
        if re.is_match(name) {
            Ok(())
        } else {
            Err(LunaError::validation(format!(
                "invalid profile name '{name}': use letters, digits, '-' or '_'"
            )))
        }
    }

    /// Check a stage alias. Aliases name a stage's work directory and its
    /// `<alias>_input.txt` / `<alias>_results.json` files.
    pub fn validate_alias(alias: &str) -> Result<()> {
        let re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$")
            .map_err(|e| LunaError::validation(e.to_string()))?;
        if !re.is_match(alias) {
            return Err(LunaError::config(format!(
                "invalid stage alias '{alias}': use letters, digits, '-' or '_'"
            )));
        }
        if RESERVED_ALIASES.iter().any(|r| r.eq_ignore_ascii_case(alias)) {
            return Err(LunaError::config(format!(
                "stage alias '{alias}' is reserved for merged results"
            )));
        }
        Ok(())
    }

    pub fn is_builtin_name(name: &str) -> bool {
        BUILTIN_PROFILES.contains(&name)
    }

    /// The built-in profile with the given name.
    pub fn builtin(name: &str) -> Option<Self> {
        let (description, tools): (&str, &[ToolId]) = match name {
            "default" => (
                "Standard recon: subdomains, probing, paths and ports",
                &[
                    ToolId::OneForAll,
                    ToolId::Puzzle,
                    ToolId::Httpx,
                    ToolId::Dirsearch,
                    ToolId::TxPortMap,
                ],
            ),
            "quick" => (
                "Fast pass: puzzle enumeration, probing and a port sweep",
                &[ToolId::Puzzle, ToolId::Httpx, ToolId::TxPortMap],
            ),
            "deep" => (
                "Exhaustive: both enumerators, both brute-forcers, re-probe discovered paths, both scanners",
                &[
                    ToolId::OneForAll,
                    ToolId::Puzzle,
                    ToolId::Httpx,
                    ToolId::Dirsearch,
                    ToolId::Ffuf,
                    ToolId::Httpx,
                    ToolId::TxPortMap,
                    ToolId::Fscan,
                ],
            ),
            _ => return None,
        };

        let mut workflow = Self::new(name, description);
        for tool in tools {
            workflow.push_tool(*tool, None);
        }
        Some(workflow)
    }
}

/// An executable workflow: every stage has concrete parameters.
#[derive(Debug, Clone)]
pub struct ResolvedWorkflow {
    pub name: String,
    pub stages: Vec<ResolvedStage>,
}

/// An executable stage.
#[derive(Debug, Clone)]
pub struct ResolvedStage {
    pub order: usize,
    pub tool: ToolId,
    pub alias: String,
    pub params: Params,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_values() {
        assert_eq!(ParamValue::parse_cli("true"), Some(ParamValue::Bool(true)));
        assert_eq!(ParamValue::parse_cli("50"), Some(ParamValue::Int(50)));
        assert_eq!(
            ParamValue::parse_cli("/opt/wordlists/dirs.txt"),
            Some(ParamValue::Text("/opt/wordlists/dirs.txt".into()))
        );
        assert_eq!(ParamValue::parse_cli("null"), None);
    }

    #[test]
    fn aliases_are_numbered_per_tool() {
        let mut wf = Workflow::new("t", "");
        wf.push_tool(ToolId::Httpx, None);
        wf.push_tool(ToolId::Puzzle, None);
        wf.push_tool(ToolId::Httpx, None);
        let aliases: Vec<&str> = wf.stages.iter().map(|s| s.alias.as_str()).collect();
        assert_eq!(aliases, vec!["httpx", "puzzle", "httpx_2"]);
        let orders: Vec<usize> = wf.stages.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn unset_parameters_block_resolution() {
        let mut wf = Workflow::new("t", "");
        wf.push_tool(ToolId::Puzzle, None);
        wf.push_tool(ToolId::Ffuf, None);

        let err = wf.resolve().unwrap_err();
        assert!(matches!(err, LunaError::Config { .. }));
        assert!(err.to_string().contains("ffuf.wordlist"));

        wf.stage_mut("ffuf")
            .unwrap()
            .params
            .insert("wordlist".into(), Some("/tmp/words.txt".into()));
        let resolved = wf.resolve().expect("resolved");
        assert_eq!(resolved.stages.len(), 2);
        assert_eq!(
            resolved.stages[1].params.text("wordlist").unwrap().as_deref(),
            Some("/tmp/words.txt")
        );
    }

    #[test]
    fn empty_params_count_as_unresolved() {
        let mut wf = Workflow::new("t", "");
        wf.push_tool(ToolId::Httpx, None).params.clear();
        let missing = wf.unresolved();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].key, None);
        assert!(wf.resolve().is_err());
    }

    #[test]
    fn duplicate_alias_rejected() {
        let mut wf = Workflow::new("t", "");
        wf.push_tool(ToolId::Puzzle, Some("enum"));
        wf.push_tool(ToolId::OneForAll, Some("enum"))
            .params
            .insert("path".into(), Some("/d.txt".into()));
        let err = wf.resolve().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn reserved_and_malformed_aliases_rejected() {
        let mut wf = Workflow::new("t", "");
        wf.push_tool(ToolId::TxPortMap, None);
        wf.push_tool(ToolId::Httpx, Some("port_scan"));
        let err = wf.resolve().unwrap_err();
        assert!(err.to_string().contains("reserved"));

        assert!(Workflow::validate_alias("Port_Scan").is_err());
        assert!(Workflow::validate_alias("run.json").is_err());
        assert!(Workflow::validate_alias("../up").is_err());
        assert!(Workflow::validate_alias("").is_err());
        assert!(Workflow::validate_alias("httpx_2").is_ok());
        assert!(Workflow::validate_alias("reprobe-tls").is_ok());
    }

    #[test]
    fn params_typed_access() {
        let mut params = Params::default();
        params.insert("threads", ParamValue::Text("abc".into()));
        params.insert("recursive", ParamValue::Bool(true));
        params.insert("port", ParamValue::Int(8080));

        assert!(matches!(params.int("threads", 1), Err(LunaError::Build { .. })));
        assert!(params.flag("recursive", false).unwrap());
        assert!(params.flag("missing", true).unwrap());
        assert_eq!(params.text("port").unwrap().as_deref(), Some("8080"));
        assert!(params.text("recursive").is_err());
    }

    #[test]
    fn builtin_profiles() {
        let quick = Workflow::builtin("quick").expect("quick");
        assert!(quick.resolve().is_ok());

        let deep = Workflow::builtin("deep").expect("deep");
        assert!(deep.stages.iter().any(|s| s.alias == "httpx_2"));
        assert!(!deep.unresolved().is_empty());

        assert!(Workflow::builtin("custom").is_none());
    }

    #[test]
    fn workflow_json_roundtrip_keeps_nulls() {
        let wf = Workflow::builtin("default").unwrap();
        let json = serde_json::to_string_pretty(&wf).unwrap();
        assert!(json.contains("\"wordlist\": null"));
        let parsed: Workflow = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.stages, wf.stages);
    }

    #[test]
    fn profile_names() {
        assert!(Workflow::validate_name("my-scan_2").is_ok());
        assert!(Workflow::validate_name("../etc").is_err());
        assert!(Workflow::validate_name("").is_err());
    }
}
