//! Core domain types: the tool taxonomy and the records that flow between
//! adapters, the execution context, storage and reports.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LunaError;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tool taxonomy
// ---------------------------------------------------------------------------

/// Every external tool Luna knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolId {
    OneForAll,
    Puzzle,
    Httpx,
    Dirsearch,
    Ffuf,
    Fscan,
    TxPortMap,
}

impl ToolId {
    /// All tools, in the order they are listed to users.
    pub const ALL: [ToolId; 7] = [
        Self::OneForAll,
        Self::Puzzle,
        Self::Httpx,
        Self::Dirsearch,
        Self::Ffuf,
        Self::Fscan,
        Self::TxPortMap,
    ];

    /// Stable identifier used in profiles, config and directory names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneForAll => "oneforall",
            Self::Puzzle => "puzzle",
            Self::Httpx => "httpx",
            Self::Dirsearch => "dirsearch",
            Self::Ffuf => "ffuf",
            Self::Fscan => "fscan",
            Self::TxPortMap => "txportmap",
        }
    }

    /// The family this tool belongs to.
    pub fn family(&self) -> ToolFamily {
        match self {
            Self::OneForAll | Self::Puzzle => ToolFamily::SubdomainDiscovery,
            Self::Dirsearch | Self::Ffuf => ToolFamily::PathDiscovery,
            Self::Httpx => ToolFamily::HttpProbe,
            Self::Fscan | Self::TxPortMap => ToolFamily::PortScan,
        }
    }

    /// One-line description shown by `luna tools`.
    pub fn description(&self) -> &'static str {
        match self {
            Self::OneForAll => "multi-source subdomain enumeration",
            Self::Puzzle => "subdomain enumeration with IP resolution",
            Self::Httpx => "HTTP probing: status codes, titles, tech",
            Self::Dirsearch => "web path brute-forcing",
            Self::Ffuf => "web fuzzing / path brute-forcing",
            Self::Fscan => "port scanning and service sweep",
            Self::TxPortMap => "fast port scanning with fingerprints",
        }
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolId {
    type Err = LunaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| LunaError::config(format!("unknown tool '{s}'")))
    }
}

/// Functional category of a tool. Decides input derivation, criticality and
/// where results are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolFamily {
    SubdomainDiscovery,
    PathDiscovery,
    HttpProbe,
    PortScan,
}

/// List-typed artifacts a stage may consume as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Subdomains,
    Urls,
    Ips,
}

/// Declarative description of a family.
#[derive(Debug, Clone, Copy)]
pub struct FamilySpec {
    pub family: ToolFamily,
    /// A failed stage of a critical family aborts the target's pipeline.
    pub critical: bool,
    /// Artifacts tried in order when deriving the stage input. The first
    /// non-empty one wins; when all are empty the raw target is used.
    pub sources: &'static [ArtifactKind],
    /// Prefix scheme-less list entries with `http://`.
    pub scheme_prefix: bool,
}

/// The fixed family taxonomy.
pub const FAMILY_TABLE: [FamilySpec; 4] = [
    FamilySpec {
        family: ToolFamily::SubdomainDiscovery,
        critical: true,
        sources: &[],
        scheme_prefix: false,
    },
    FamilySpec {
        family: ToolFamily::PathDiscovery,
        critical: false,
        sources: &[ArtifactKind::Urls, ArtifactKind::Subdomains],
        scheme_prefix: true,
    },
    FamilySpec {
        family: ToolFamily::HttpProbe,
        critical: false,
        sources: &[ArtifactKind::Urls, ArtifactKind::Subdomains],
        scheme_prefix: false,
    },
    FamilySpec {
        family: ToolFamily::PortScan,
        critical: false,
        sources: &[ArtifactKind::Ips],
        scheme_prefix: false,
    },
];

impl ToolFamily {
    /// Look up this family's entry in [`FAMILY_TABLE`].
    pub fn spec(&self) -> &'static FamilySpec {
        FAMILY_TABLE
            .iter()
            .find(|s| s.family == *self)
            .unwrap_or_else(|| unreachable!("every family has a table entry"))
    }

    pub fn is_critical(&self) -> bool {
        self.spec().critical
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubdomainDiscovery => "subdomain-discovery",
            Self::PathDiscovery => "path-discovery",
            Self::HttpProbe => "http-probe",
            Self::PortScan => "port-scan",
        }
    }
}

impl std::fmt::Display for ToolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One HTTP probe observation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub url: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content_length: u64,
    #[serde(default)]
    pub tech: Vec<String>,
}

/// One open port observation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortRecord {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub banner: String,
}

impl PortRecord {
    /// Deduplication key.
    pub fn key(&self) -> (String, u16) {
        (self.ip.clone(), self.port)
    }
}

/// A resolved subdomain reported by a subdomain-discovery tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAddr {
    pub subdomain: String,
    pub ip: String,
}

/// Everything the correlator needs for one target, whether taken from a live
/// execution context or loaded back from the persisted artifact files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationInput {
    pub subdomains: Vec<String>,
    pub urls: Vec<String>,
    /// Probe records in the order they were produced.
    pub probes: Vec<ProbeRecord>,
    pub ports: Vec<PortRecord>,
    pub host_ips: Vec<HostAddr>,
}

// ---------------------------------------------------------------------------
// Report rows
// ---------------------------------------------------------------------------

/// Row of the Web Asset table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebAssetRow {
    pub domain: String,
    pub subdomain: String,
    pub url: String,
    pub status_code: Option<u16>,
    pub title: String,
}

/// Row of the IP/Port table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPortRow {
    pub domain: String,
    pub subdomain: String,
    pub ip: String,
    pub port: u16,
    pub status_code: Option<u16>,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_id_roundtrip() {
        for tool in ToolId::ALL {
            let parsed: ToolId = tool.as_str().parse().expect("parse ToolId");
            assert_eq!(parsed, tool);
        }
        assert_eq!("TXPortMap".parse::<ToolId>().unwrap(), ToolId::TxPortMap);
        assert!("nmap".parse::<ToolId>().is_err());
    }

    #[test]
    fn tool_id_serializes_lowercase() {
        let json = serde_json::to_string(&ToolId::OneForAll).unwrap();
        assert_eq!(json, "\"oneforall\"");
        let parsed: ToolId = serde_json::from_str("\"txportmap\"").unwrap();
        assert_eq!(parsed, ToolId::TxPortMap);
    }

    #[test]
    fn only_subdomain_discovery_is_critical() {
        let critical: Vec<ToolId> = ToolId::ALL
            .into_iter()
            .filter(|t| t.family().is_critical())
            .collect();
        assert_eq!(critical, vec![ToolId::OneForAll, ToolId::Puzzle]);
    }

    #[test]
    fn family_input_sources() {
        assert!(ToolFamily::SubdomainDiscovery.spec().sources.is_empty());
        assert_eq!(
            ToolFamily::HttpProbe.spec().sources,
            &[ArtifactKind::Urls, ArtifactKind::Subdomains]
        );
        assert_eq!(ToolFamily::PortScan.spec().sources, &[ArtifactKind::Ips]);
        assert!(ToolFamily::PathDiscovery.spec().scheme_prefix);
        assert!(!ToolFamily::HttpProbe.spec().scheme_prefix);
    }

    #[test]
    fn probe_record_tolerates_missing_fields() {
        let probe: ProbeRecord =
            serde_json::from_str(r#"{"url": "https://a.example.com"}"#).expect("deserialize");
        assert_eq!(probe.status_code, 0);
        assert!(probe.tech.is_empty());
    }
}
