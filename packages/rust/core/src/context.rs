//! Per-target execution context: the accumulator every stage reads from and
//! merges into.
//!
//! Collections only grow. There is no removal API, and merges take `&mut self`
//! so a stage never observes a half-applied merge.

use indexmap::{IndexMap, IndexSet};
use luna_shared::{HostAddr, LunaError, PortRecord, ProbeRecord, Result};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// A probe record together with the alias of the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedProbe {
    pub alias: String,
    #[serde(flatten)]
    pub record: ProbeRecord,
}

/// Result of one merge, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Records that were new.
    pub added: usize,
    /// Records already present (or filtered out).
    pub ignored: usize,
}

impl MergeStats {
    fn record(&mut self, inserted: bool) {
        if inserted {
            self.added += 1;
        } else {
            self.ignored += 1;
        }
    }
}

/// Artifact counts of a context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextSummary {
    pub subdomains: usize,
    pub urls: usize,
    pub ips: usize,
    pub ports: usize,
    pub http_probes: usize,
}

/// Accumulated artifacts for one target.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionContext {
    target: String,
    subdomains: IndexSet<String>,
    urls: IndexSet<String>,
    ips: IndexSet<String>,
    host_ips: IndexMap<String, String>,
    #[serde(serialize_with = "ports_as_list")]
    ports: IndexMap<(String, u16), PortRecord>,
    http_probes: Vec<TaggedProbe>,
}

fn ports_as_list<S: serde::Serializer>(
    ports: &IndexMap<(String, u16), PortRecord>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(ports.values())
}

impl ExecutionContext {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn subdomains(&self) -> &IndexSet<String> {
        &self.subdomains
    }

    pub fn urls(&self) -> &IndexSet<String> {
        &self.urls
    }

    pub fn ips(&self) -> &IndexSet<String> {
        &self.ips
    }

    /// Subdomain to IP, first mapping wins.
    pub fn host_ips(&self) -> &IndexMap<String, String> {
        &self.host_ips
    }

    pub fn ports(&self) -> impl Iterator<Item = &PortRecord> {
        self.ports.values()
    }

    pub fn http_probes(&self) -> &[TaggedProbe] {
        &self.http_probes
    }

    /// Resolved hosts as records, in discovery order.
    pub fn host_addrs(&self) -> Vec<HostAddr> {
        self.host_ips
            .iter()
            .map(|(subdomain, ip)| HostAddr {
                subdomain: subdomain.clone(),
                ip: ip.clone(),
            })
            .collect()
    }

    pub fn merge_subdomains(&mut self, subdomains: impl IntoIterator<Item = String>) -> MergeStats {
        merge_set(&mut self.subdomains, subdomains)
    }

    pub fn merge_urls(&mut self, urls: impl IntoIterator<Item = String>) -> MergeStats {
        merge_set(&mut self.urls, urls)
    }

    /// Record subdomain/IP pairs: the IP joins `ips` and the first mapping
    /// seen for a subdomain is kept.
    pub fn merge_resolved(&mut self, hosts: impl IntoIterator<Item = HostAddr>) -> MergeStats {
        let mut stats = MergeStats::default();
        for host in hosts {
            if host.ip.is_empty() {
                stats.record(false);
                continue;
            }
            self.ips.insert(host.ip.clone());
            let inserted = !self.host_ips.contains_key(&host.subdomain);
            if inserted {
                self.host_ips.insert(host.subdomain, host.ip);
            }
            stats.record(inserted);
        }
        stats
    }

    /// Merge port records keyed on `(ip, port)`. Existing entries keep their
    /// service and banner.
    pub fn merge_ports(&mut self, records: impl IntoIterator<Item = PortRecord>) -> MergeStats {
        let mut stats = MergeStats::default();
        for record in records {
            let inserted = match self.ports.entry(record.key()) {
                indexmap::map::Entry::Occupied(_) => false,
                indexmap::map::Entry::Vacant(slot) => {
                    slot.insert(record);
                    true
                }
            };
            stats.record(inserted);
        }
        stats
    }

    /// Append a probing stage's full result list. Probes are never
    /// deduplicated.
    pub fn append_probes(
        &mut self,
        alias: &str,
        records: impl IntoIterator<Item = ProbeRecord>,
    ) -> MergeStats {
        let before = self.http_probes.len();
        self.http_probes
            .extend(records.into_iter().map(|record| TaggedProbe {
                alias: alias.to_string(),
                record,
            }));
        MergeStats {
            added: self.http_probes.len() - before,
            ignored: 0,
        }
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            subdomains: self.subdomains.len(),
            urls: self.urls.len(),
            ips: self.ips.len(),
            ports: self.ports.len(),
            http_probes: self.http_probes.len(),
        }
    }
}

fn merge_set(set: &mut IndexSet<String>, items: impl IntoIterator<Item = String>) -> MergeStats {
    let mut stats = MergeStats::default();
    for item in items {
        let item = item.trim();
        if item.is_empty() {
            stats.record(false);
            continue;
        }
        stats.record(set.insert(item.to_string()));
    }
    stats
}

// ---------------------------------------------------------------------------
// Host filter
// ---------------------------------------------------------------------------

/// Drops mail-server hosts (`mail.`, `smtp.`, `mx1.`, ...) from discovered
/// subdomains.
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    patterns: Vec<Regex>,
}

impl HostFilter {
    /// A filter that keeps everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Compile case-insensitive patterns. An invalid pattern is a config error.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| LunaError::config(format!("invalid mail host pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, host: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(host))
    }
}
