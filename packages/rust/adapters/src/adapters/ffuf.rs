//! ffuf web fuzzer, used for path discovery.

use luna_shared::{LunaError, Params, Result, ToolId};
use serde_json::Value;

use super::{CommandTool, StageEnv, StageInput, ToolPayload, clear_output, path_arg, read_output};
use crate::runner::ProcessOutput;

const OUTPUT_FILE: &str = "ffuf_result.json";

pub struct FfufTool;

impl CommandTool for FfufTool {
    fn tool(&self) -> ToolId {
        ToolId::Ffuf
    }

    fn build_args(&self, input: &StageInput, params: &Params, env: &StageEnv) -> Result<Vec<String>> {
        let Some(wordlist) = params.text("wordlist")? else {
            return Err(LunaError::build("ffuf requires a 'wordlist' parameter"));
        };

        let mut args = match input {
            StageInput::Target(t) => vec!["-u".to_string(), fuzz_url(t)],
            // Each list entry is bound to HOST and fuzzed against every word.
            StageInput::ListFile(p) => vec![
                "-w".to_string(),
                format!("{}:HOST", path_arg(p)),
                "-u".to_string(),
                "HOST/FUZZ".to_string(),
            ],
        };
        args.extend(["-w".into(), format!("{wordlist}:FUZZ")]);

        args.extend(["-t".into(), params.int("threads", 40)?.to_string()]);
        args.extend(["-timeout".into(), params.int("timeout", 10)?.to_string()]);
        args.extend(["-mc".into(), params.text_or("mc", "200,301,302,403")?]);
        if params.flag("recursion", false)? {
            args.push("-recursion".into());
            args.extend([
                "-recursion-depth".into(),
                params.int("recursion_depth", 2)?.to_string(),
            ]);
        }

        let output = env.work_dir.join(OUTPUT_FILE);
        clear_output(&output)?;
        args.extend(["-of".into(), "json".into(), "-o".into(), path_arg(&output)]);
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

/// `target/FUZZ`, with a scheme added to bare hosts.
fn fuzz_url(target: &str) -> String {
    if target.contains("FUZZ") {
        return target.to_string();
    }
    let base = target.trim_end_matches('/');
    if base.contains("://") {
        format!("{base}/FUZZ")
    } else {
        format!("http://{base}/FUZZ")
    }
}

fn parse_report(content: &str) -> Result<Vec<String>> {
    let data: Value =
        serde_json::from_str(content).map_err(|e| LunaError::parse(format!("ffuf report: {e}")))?;
    Ok(data
        .get("results")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("url").and_then(Value::as_str))
                .filter(|url| !url.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default())
}
