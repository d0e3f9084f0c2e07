//! OneForAll subdomain enumerator.
//!
//! OneForAll writes a timestamped CSV into the `results/` directory beside
//! its script. The newest CSV is parsed and then copied into the stage
//! directory.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use luna_shared::{HostAddr, LunaError, Params, Result, ToolId};

use super::{CommandTool, StageEnv, StageInput, ToolPayload, path_arg};
use crate::runner::ProcessOutput;

pub struct OneForAllTool {
    results_dir: PathBuf,
}

impl OneForAllTool {
    pub fn new(results_dir: PathBuf) -> Self {
        Self { results_dir }
    }

    /// Newest `*.csv` across `dirs`, by modification time.
    fn newest_csv(dirs: &[&Path]) -> Result<Option<PathBuf>> {
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for dir in dirs.iter().filter(|d| d.is_dir()) {
            Self::scan_csv(dir, &mut newest)?;
        }
        Ok(newest.map(|(_, path)| path))
    }

    fn scan_csv(dir: &Path, newest: &mut Option<(SystemTime, PathBuf)>) -> Result<()> {
        for entry in std::fs::read_dir(dir).map_err(|e| LunaError::io(dir, e))?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
                *newest = Some((modified, path));
            }
        }
        Ok(())
    }
}

impl CommandTool for OneForAllTool {
    fn tool(&self) -> ToolId {
        ToolId::OneForAll
    }

    fn build_args(&self, input: &StageInput, params: &Params, env: &StageEnv) -> Result<Vec<String>> {
        let mut args = match input {
            StageInput::Target(t) => vec!["--target".to_string(), t.clone()],
            StageInput::ListFile(p) => vec!["--targets".to_string(), path_arg(p)],
        };

        for flag in ["brute", "dns", "req", "valid"] {
            if params.flag(flag, false)? {
                args.push(format!("--{flag}"));
            }
        }
        if let Some(port) = params.text("port")? {
            args.extend(["--port".into(), port]);
        }
        if let Some(path) = params.text("path")? {
            args.extend(["--path".into(), path]);
        }

        args.extend(["--output".into(), path_arg(&env.work_dir), "run".into()]);
        Ok(args)
    }

    fn parse_output(&self, env: &StageEnv, _output: &ProcessOutput) -> Result<ToolPayload> {
        let Some(csv_path) = Self::newest_csv(&[env.work_dir.as_path(), self.results_dir.as_path()])? else {
            tracing::warn!(dir = %self.results_dir.display(), "no OneForAll result CSV found");
            return Ok(ToolPayload::Subdomains {
                subdomains: Vec::new(),
                resolved: Vec::new(),
            });
        };

        tracing::info!(path = %csv_path.display(), "parsing OneForAll results");
        let content = std::fs::read_to_string(&csv_path).map_err(|e| LunaError::io(&csv_path, e))?;
        let payload = parse_results_csv(&content)?;

        if !csv_path.starts_with(&env.work_dir) {
            if let Some(name) = csv_path.file_name() {
                let copy = env.work_dir.join(name);
                if let Err(e) = std::fs::copy(&csv_path, &copy) {
                    tracing::debug!(error = %e, "could not copy OneForAll CSV into stage dir");
                }
            }
        }
        Ok(payload)
    }
}

/// Parse a OneForAll result CSV: the `subdomain` column (falling back to
/// `domain`), plus the first address of the `ip` column when present.
fn parse_results_csv(content: &str) -> Result<ToolPayload> {
    let content = content.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| LunaError::parse(format!("OneForAll CSV header: {e}")))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let Some(host_col) = column("subdomain").or_else(|| column("domain")) else {
        return Err(LunaError::parse(
            "OneForAll CSV has neither a 'subdomain' nor a 'domain' column",
        ));
    };
    let ip_col = column("ip");

    let mut subdomains = Vec::new();
    let mut resolved = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| LunaError::parse(format!("OneForAll CSV row: {e}")))?;
        let host = record.get(host_col).unwrap_or("").trim();
        if host.is_empty() {
            continue;
        }
        subdomains.push(host.to_string());

        let ip = ip_col
            .and_then(|i| record.get(i))
            .and_then(|raw| raw.split(',').next())
            .map(str::trim)
            .unwrap_or("");
        if !ip.is_empty() {
            resolved.push(HostAddr {
                subdomain: host.to_string(),
                ip: ip.to_string(),
            });
        }
    }

    Ok(ToolPayload::Subdomains {
        subdomains,
        resolved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::{no_output, params, temp_env};
    use luna_shared::ParamValue;

    #[test]
    fn builds_flags_from_params() {
        let env = temp_env();
        let tool = OneForAllTool::new(env.work_dir.join("results"));
        let args = tool
            .build_args(
                &StageInput::Target("example.com".into()),
                &params(&[
                    ("brute", ParamValue::Bool(true)),
                    ("dns", ParamValue::Bool(false)),
                    ("valid", ParamValue::Bool(true)),
                    ("path", ParamValue::Text("/opt/dict.txt".into())),
                ]),
                &env,
            )
            .unwrap();

        assert_eq!(&args[..2], &["--target", "example.com"]);
        assert!(args.contains(&"--brute".to_string()));
        assert!(!args.contains(&"--dns".to_string()));
        assert!(args.contains(&"--valid".to_string()));
        let path_at = args.iter().position(|a| a == "--path").unwrap();
        assert_eq!(args[path_at + 1], "/opt/dict.txt");
        assert_eq!(args.last().unwrap(), "run");
    }

    #[test]
    fn bad_flag_type_is_build_error() {
        let env = temp_env();
        let tool = OneForAllTool::new(env.work_dir.clone());
        let err = tool
            .build_args(
                &StageInput::Target("example.com".into()),
                &params(&[("brute", ParamValue::Text("yes".into()))]),
                &env,
            )
            .unwrap_err();
        assert!(matches!(err, LunaError::Build { .. }));
    }

    #[test]
    fn parses_subdomain_and_ip_columns() {
        let csv = "\u{feff}id,alive,url,subdomain,ip,port\n\
                   1,1,http://a.example.com,a.example.com,\"1.2.3.4,1.2.3.5\",80\n\
                   2,0,http://b.example.com,b.example.com,,80\n\
                   3,1,,,9.9.9.9,80\n";
        let ToolPayload::Subdomains {
            subdomains,
            resolved,
        } = parse_results_csv(csv).unwrap()
        else {
            panic!("expected subdomains");
        };
        assert_eq!(subdomains, vec!["a.example.com", "b.example.com"]);
        assert_eq!(
            resolved,
            vec![HostAddr {
                subdomain: "a.example.com".into(),
                ip: "1.2.3.4".into()
            }]
        );
    }

    #[test]
    fn falls_back_to_domain_column() {
        let csv = "domain,level\nwww.example.com,1\n";
        assert_eq!(parse_results_csv(csv).unwrap().len(), 1);
        assert!(parse_results_csv("host,level\nx,1\n").is_err());
    }

    #[test]
    fn newest_results_csv_is_parsed() {
        let env = temp_env();
        let results = env.work_dir.join("results");
        std::fs::create_dir_all(&results).unwrap();
        std::fs::write(results.join("old.csv"), "subdomain\nold.example.com\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(results.join("new.csv"), "subdomain\nnew.example.com\n").unwrap();

        // Stage dir is separate from the tool's results dir.
        let stage_env = StageEnv {
            work_dir: env.work_dir.join("stage"),
            timeout: env.timeout,
        };
        std::fs::create_dir_all(&stage_env.work_dir).unwrap();

        let tool = OneForAllTool::new(results);
        let payload = tool.parse_output(&stage_env, &no_output()).unwrap();
        assert_eq!(
            payload,
            ToolPayload::Subdomains {
                subdomains: vec!["new.example.com".into()],
                resolved: Vec::new(),
            }
        );
        assert!(stage_env.work_dir.join("new.csv").is_file());
    }

    #[test]
    fn missing_results_yield_empty_payload() {
        let env = temp_env();
        let tool = OneForAllTool::new(env.work_dir.join("nothing"));
        assert!(tool.parse_output(&env, &no_output()).unwrap().is_empty());
    }
}
