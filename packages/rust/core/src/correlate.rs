//! Correlation of subdomains, URLs, ports and probes into the two report
//! tables.

use std::collections::HashMap;

use luna_shared::{CorrelationInput, IpPortRow, ProbeRecord, WebAssetRow};
use url::Url;

use crate::context::ExecutionContext;

/// Both report tables for one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reports {
    pub web_assets: Vec<WebAssetRow>,
    pub ip_ports: Vec<IpPortRow>,
}

impl From<&ExecutionContext> for CorrelationInput {
    fn from(ctx: &ExecutionContext) -> Self {
        CorrelationInput {
            subdomains: ctx.subdomains().iter().cloned().collect(),
            urls: ctx.urls().iter().cloned().collect(),
            probes: ctx.http_probes().iter().map(|p| p.record.clone()).collect(),
            ports: ctx.ports().cloned().collect(),
            host_ips: ctx.host_addrs(),
        }
    }
}

/// Build the Web Asset and IP/Port tables for `domain`.
///
/// Every subdomain yields at least one web row and every port record at
/// least one IP/Port row. Rows follow discovery order; the subdomain pass and
/// the URL pass are not deduplicated against each other.
pub fn build_reports(domain: &str, input: &CorrelationInput) -> Reports {
    // Exact-URL index; a later probe of the same URL replaces an earlier one.
    let mut probes: HashMap<&str, &ProbeRecord> = HashMap::new();
    for probe in &input.probes {
        probes.insert(probe.url.as_str(), probe);
    }
    let lookup = |url: &str| probes.get(url).copied();

    let mut web_assets = Vec::with_capacity(input.subdomains.len() + input.urls.len());
    for subdomain in &input.subdomains {
        let probe = lookup(format!("https://{subdomain}").as_str())
            .or_else(|| lookup(format!("http://{subdomain}").as_str()));
        web_assets.push(web_row(domain, subdomain, probe, None));
    }
    for url in &input.urls {
        web_assets.push(web_row(domain, &url_host(url), lookup(url.as_str()), Some(url.as_str())));
    }

    let mut subdomains_by_ip: HashMap<&str, Vec<&str>> = HashMap::new();
    for host in &input.host_ips {
        subdomains_by_ip
            .entry(host.ip.as_str())
            .or_default()
            .push(host.subdomain.as_str());
    }

    let mut ip_ports = Vec::with_capacity(input.ports.len());
    for record in &input.ports {
        let slots = subdomains_by_ip
            .get(record.ip.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[""]);

        for subdomain in slots {
            let mut candidates = vec![
                format!("http://{}:{}", record.ip, record.port),
                format!("https://{}:{}", record.ip, record.port),
            ];
            if !subdomain.is_empty() {
                candidates.push(format!("http://{subdomain}:{}", record.port));
                candidates.push(format!("https://{subdomain}:{}", record.port));
            }
            let probe = candidates.iter().find_map(|url| lookup(url.as_str()));

            ip_ports.push(IpPortRow {
                domain: domain.to_string(),
                subdomain: subdomain.to_string(),
                ip: record.ip.clone(),
                port: record.port,
                status_code: probe.and_then(status_of),
                title: probe.map(|p| p.title.clone()).unwrap_or_default(),
            });
        }
    }

    tracing::debug!(
        domain,
        web_assets = web_assets.len(),
        ip_ports = ip_ports.len(),
        "correlated report rows"
    );

    Reports {
        web_assets,
        ip_ports,
    }
}

/// A web row. Without a probe, `url` is the fallback (empty for bare
/// subdomains) and status/title stay empty.
fn web_row(
    domain: &str,
    subdomain: &str,
    probe: Option<&ProbeRecord>,
    fallback_url: Option<&str>,
) -> WebAssetRow {
    match probe {
        Some(p) => WebAssetRow {
            domain: domain.to_string(),
            subdomain: subdomain.to_string(),
            url: p.url.clone(),
            status_code: status_of(p),
            title: p.title.clone(),
        },
        None => WebAssetRow {
            domain: domain.to_string(),
            subdomain: subdomain.to_string(),
            url: fallback_url.unwrap_or_default().to_string(),
            status_code: None,
            title: String::new(),
        },
    }
}

/// `0` means the prober reported no status.
fn status_of(probe: &ProbeRecord) -> Option<u16> {
    (probe.status_code != 0).then_some(probe.status_code)
}

/// Host part of a URL as written (case kept, no punycode), without
/// userinfo or port; empty when unparseable.
fn url_host(raw: &str) -> String {
    if !Url::parse(raw).is_ok_and(|u| u.has_host()) {
        return String::new();
    }
    let Some((_, rest)) = raw.trim().split_once("://") else {
        return String::new();
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    match host_port.strip_prefix('[') {
        Some(v6) => format!("[{}]", v6.split(']').next().unwrap_or_default()),
        None => host_port.split(':').next().unwrap_or_default().to_string(),
    }
}
