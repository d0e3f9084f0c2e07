//! httpx HTTP prober. Output is JSON Lines.

use luna_shared::{Params, ProbeRecord, Result, ToolId};
use serde_json::Value;

use super::{CommandTool, StageEnv, StageInput, ToolPayload, clear_output, path_arg, read_output};
use crate::runner::ProcessOutput;

const OUTPUT_FILE: &str = "httpx_result.json";

pub struct HttpxTool;

impl CommandTool for HttpxTool {
    fn tool(&self) -> ToolId {
        ToolId::Httpx
    }

    fn build_args(&self, input: &StageInput, params: &Params, env: &StageEnv) -> Result<Vec<String>> {
        let mut args = match input {
            StageInput::Target(t) => vec!["-u".to_string(), t.clone()],
            StageInput::ListFile(p) => vec!["-l".to_string(), path_arg(p)],
        };

        args.extend(["-threads".into(), params.int("threads", 50)?.to_string()]);
        args.extend(["-timeout".into(), params.int("timeout", 10)?.to_string()]);

        for (key, default, flag) in [
            ("status_code", true, "-status-code"),
            ("title", true, "-title"),
            ("tech_detect", false, "-tech-detect"),
            ("follow_redirects", false, "-follow-redirects"),
        ] {
            if params.flag(key, default)? {
                args.push(flag.into());
            }
        }

        let output = env.work_dir.join(OUTPUT_FILE);
        clear_output(&output)?;
        args.extend(["-json".into(), "-o".into(), path_arg(&output)]);
        Ok(args)
    }

    fn parse_output(&self, env: &StageEnv, _output: &ProcessOutput) -> Result<ToolPayload> {
        let content = read_output(&env.work_dir.join(OUTPUT_FILE))?.unwrap_or_default();
        Ok(ToolPayload::Probes {
            results: parse_jsonl(&content),
        })
    }
}

/// Parse httpx JSON Lines, accepting both the hyphenated and the
/// underscored field spellings. Malformed lines are skipped.
fn parse_jsonl(content: &str) -> Vec<ProbeRecord> {
    let mut results = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let item: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(line = n + 1, error = %e, "skipping malformed httpx line");
                continue;
            }
        };

        let field = |a: &str, b: &str| item.get(a).or_else(|| item.get(b));
        let number = |a: &str, b: &str| field(a, b).and_then(Value::as_u64).unwrap_or(0);

        results.push(ProbeRecord {
            url: item.get("url").and_then(Value::as_str).unwrap_or("").to_string(),
            status_code: u16::try_from(number("status-code", "status_code")).unwrap_or(0),
            title: item.get("title").and_then(Value::as_str).unwrap_or("").to_string(),
            content_length: number("content-length", "content_length"),
            tech: item
                .get("tech")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        });
    }
    results
}
