//! dirsearch path brute-forcer.

use luna_shared::{LunaError, Params, Result, ToolId};
use serde_json::Value;

use super::{CommandTool, StageEnv, StageInput, ToolPayload, clear_output, path_arg, read_output};
use crate::runner::ProcessOutput;

const OUTPUT_FILE: &str = "dirsearch_result.json";

pub struct DirsearchTool;

impl CommandTool for DirsearchTool {
    fn tool(&self) -> ToolId {
        ToolId::Dirsearch
    }

    fn build_args(&self, input: &StageInput, params: &Params, env: &StageEnv) -> Result<Vec<String>> {
        let mut args = match input {
            StageInput::Target(t) => vec!["-u".to_string(), t.clone()],
            StageInput::ListFile(p) => vec!["-l".to_string(), path_arg(p)],
        };

        if let Some(wordlist) = params.text("wordlist")? {
            args.extend(["-w".into(), wordlist]);
        }
        args.extend(["-t".into(), params.int("threads", 50)?.to_string()]);
        args.extend(["--timeout".into(), params.int("timeout", 10)?.to_string()]);
        if params.flag("recursive", false)? {
            args.push("-r".into());
            args.extend([
                "--recursion-depth".into(),
                params.int("recursion_depth", 2)?.to_string(),
            ]);
        }
        args.extend(["-x".into(), params.text_or("exclude_status", "404,403")?]);

        let output = env.work_dir.join(OUTPUT_FILE);
        clear_output(&output)?;
        args.extend([
            "--format".into(),
            "json".into(),
            "-o".into(),
            path_arg(&output),
        ]);
        Ok(args)
    }

    fn parse_output(&self, env: &StageEnv, _output: &ProcessOutput) -> Result<ToolPayload> {
        let urls = match read_output(&env.work_dir.join(OUTPUT_FILE))? {
            Some(content) if !content.trim().is_empty() => parse_report(&content)?,
            _ => Vec::new(),
        };
        Ok(ToolPayload::Urls { urls })
    }
}

/// Accepts the report shapes dirsearch has used across versions: an object
/// keyed by URL, a list of `{url}` objects, or `{"results": [{url}]}`.
fn parse_report(content: &str) -> Result<Vec<String>> {
    let data: Value = serde_json::from_str(content)
        .map_err(|e| LunaError::parse(format!("dirsearch report: {e}")))?;

    let urls_of = |items: &[Value]| -> Vec<String> {
        items
            .iter()
            .filter_map(|item| item.get("url").and_then(Value::as_str))
            .map(String::from)
            .collect()
    };

    Ok(match &data {
        Value::Object(map) => match map.get("results").and_then(Value::as_array) {
            Some(items) => urls_of(items),
            None => map.keys().cloned().collect(),
        },
        Value::Array(items) => urls_of(items),
        _ => Vec::new(),
    })
}
