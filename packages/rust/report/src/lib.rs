//! Report export for Luna.
//!
//! Turns the correlated tables of one target into files next to its
//! artifacts: CSV, a spreadsheet, or both, plus a `summary.json` with counts.

pub mod csv_export;
pub mod xlsx_export;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use luna_core::{Reports, build_reports};
use luna_shared::{CorrelationInput, ReportFormat, Result};
use luna_storage::ArtifactStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use csv_export::write_csv;
pub use xlsx_export::write_xlsx;

/// Counts of the collected artifacts a report was built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCounts {
    pub subdomains: usize,
    pub urls: usize,
    pub resolved_hosts: usize,
    pub ports: usize,
    pub http_probes: usize,
}

/// Content of `summary.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub domain: String,
    pub generated_at: DateTime<Utc>,
    pub artifacts: ArtifactCounts,
    pub web_assets_count: usize,
    pub ip_ports_count: usize,
    pub unique_subdomains: usize,
    pub unique_ips: usize,
    pub unique_ports: usize,
}

impl ReportSummary {
    pub fn new(domain: &str, input: &CorrelationInput, reports: &Reports) -> Self {
        let unique_subdomains: HashSet<&str> = reports
            .web_assets
            .iter()
            .map(|r| r.subdomain.as_str())
            .chain(reports.ip_ports.iter().map(|r| r.subdomain.as_str()))
            .filter(|s| !s.is_empty())
            .collect();
        let unique_ips: HashSet<&str> = reports.ip_ports.iter().map(|r| r.ip.as_str()).collect();
        let unique_ports: HashSet<u16> = reports.ip_ports.iter().map(|r| r.port).collect();

        Self {
            domain: domain.to_string(),
            generated_at: Utc::now(),
            artifacts: ArtifactCounts {
                subdomains: input.subdomains.len(),
                urls: input.urls.len(),
                resolved_hosts: input.host_ips.len(),
                ports: input.ports.len(),
                http_probes: input.probes.len(),
            },
            web_assets_count: reports.web_assets.len(),
            ip_ports_count: reports.ip_ports.len(),
            unique_subdomains: unique_subdomains.len(),
            unique_ips: unique_ips.len(),
            unique_ports: unique_ports.len(),
        }
    }
}

/// Files written for one target and the summary.
#[derive(Debug, Clone)]
pub struct ReportOutput {
    pub files: Vec<PathBuf>,
    pub summary: ReportSummary,
}

/// Write the tables in `format` into `dir`.
///
/// A failed spreadsheet export falls back to CSV.
pub fn export(dir: &Path, domain: &str, reports: &Reports, format: ReportFormat) -> Result<Vec<PathBuf>> {
    match format {
        ReportFormat::Csv => write_csv(dir, domain, reports),
        ReportFormat::Xlsx => match write_xlsx(dir, domain, reports) {
            Ok(path) => Ok(vec![path]),
            Err(e) => {
                warn!(error = %e, "xlsx export failed, falling back to csv");
                write_csv(dir, domain, reports)
            }
        },
        ReportFormat::Both => {
            let mut files = write_csv(dir, domain, reports)?;
            match write_xlsx(dir, domain, reports) {
                Ok(path) => files.push(path),
                Err(e) => warn!(error = %e, "xlsx export failed, csv files kept"),
            }
            Ok(files)
        }
    }
}

/// Correlate `input`, write the report files and `summary.json` into the
/// target's directory.
pub fn generate(
    store: &ArtifactStore,
    domain: &str,
    input: &CorrelationInput,
    format: ReportFormat,
) -> Result<ReportOutput> {
    let reports = build_reports(domain, input);
    let summary = ReportSummary::new(domain, input, &reports);

    let dir = store.ensure_target_dir(domain)?;
    store.write_summary(domain, &summary)?;
    let files = export(&dir, domain, &reports, format)?;

    info!(
        domain,
        files = files.len(),
        web_assets = summary.web_assets_count,
        ip_ports = summary.ip_ports_count,
        "report generated"
    );
    Ok(ReportOutput { files, summary })
}

/// Rebuild the report of a target from its persisted artifacts.
pub fn generate_from_store(
    store: &ArtifactStore,
    domain: &str,
    format: ReportFormat,
) -> Result<ReportOutput> {
    let input = store.load_correlation_input(domain)?;
    generate(store, domain, &input, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use luna_shared::{HostAddr, PortRecord, ProbeRecord};

    fn temp_store() -> ArtifactStore {
        ArtifactStore::new(std::env::temp_dir().join(format!("luna_report_{}", uuid::Uuid::now_v7())))
    }

    fn sample_input() -> CorrelationInput {
        CorrelationInput {
            subdomains: vec!["a.example.com".into(), "b.example.com".into()],
            urls: vec!["http://a.example.com/admin".into()],
            probes: vec![ProbeRecord {
                url: "https://a.example.com".into(),
                status_code: 200,
                title: "Home".into(),
                ..Default::default()
            }],
            ports: vec![
                PortRecord {
                    ip: "1.2.3.4".into(),
                    port: 80,
                    ..Default::default()
                },
                PortRecord {
                    ip: "1.2.3.4".into(),
                    port: 443,
                    ..Default::default()
                },
            ],
            host_ips: vec![
                HostAddr {
                    subdomain: "a.example.com".into(),
                    ip: "1.2.3.4".into(),
                },
                HostAddr {
                    subdomain: "b.example.com".into(),
                    ip: "1.2.3.4".into(),
                },
            ],
        }
    }

    #[test]
    fn summary_counts_rows_and_uniques() {
        let input = sample_input();
        let reports = build_reports("example.com", &input);
        let summary = ReportSummary::new("example.com", &input, &reports);

        assert_eq!(summary.web_assets_count, 3);
        assert_eq!(summary.ip_ports_count, 4);
        assert_eq!(summary.unique_subdomains, 2);
        assert_eq!(summary.unique_ips, 1);
        assert_eq!(summary.unique_ports, 2);
        assert_eq!(summary.artifacts.http_probes, 1);
        assert_eq!(summary.artifacts.resolved_hosts, 2);
    }

    #[test]
    fn generate_writes_reports_and_summary() {
        let store = temp_store();
        let output = generate(&store, "example.com", &sample_input(), ReportFormat::Both).unwrap();

        assert_eq!(output.files.len(), 3);
        assert!(output.files.iter().all(|f| f.exists()));

        let raw = std::fs::read_to_string(store.target_dir("example.com").join("summary.json")).unwrap();
        let written: ReportSummary = serde_json::from_str(&raw).unwrap();
        assert_eq!(written, output.summary);
    }

    #[test]
    fn csv_is_the_default_export() {
        let store = temp_store();
        let output = generate(&store, "example.com", &sample_input(), ReportFormat::default()).unwrap();
        let names: Vec<String> = output
            .files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["example.com_web_assets.csv", "example.com_ip_ports.csv"]);
    }

    #[test]
    fn report_from_store_needs_results() {
        let store = temp_store();
        assert!(generate_from_store(&store, "nothing.com", ReportFormat::Csv).is_err());
    }

    #[test]
    fn report_from_store_reads_persisted_artifacts() {
        let store = temp_store();
        let input = sample_input();
        store.save_subdomains("example.com", &input.subdomains).unwrap();
        store.save_host_ips("example.com", &input.host_ips).unwrap();
        store.save_ports("example.com", &input.ports).unwrap();

        let output = generate_from_store(&store, "example.com", ReportFormat::Csv).unwrap();
        assert_eq!(output.summary.web_assets_count, 2);
        assert_eq!(output.summary.ip_ports_count, 4);
    }
}
