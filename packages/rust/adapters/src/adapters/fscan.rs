//! fscan port and service scanner.
//!
//! Only the `ip:port open` lines of its report are used; service and banner
//! stay empty.

use std::sync::LazyLock;

use luna_shared::{Params, PortRecord, Result, ToolId};
use regex::Regex;

use super::{CommandTool, StageEnv, StageInput, ToolPayload, clear_output, path_arg, read_output};
use crate::runner::ProcessOutput;

const OUTPUT_FILE: &str = "fscan_result.txt";

static OPEN_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\[[^\]]*\]\s*)?(\S+):(\d{1,5})\s+open\b").unwrap_or_else(|e| {
        unreachable!("static regex is valid: {e}")
    })
});

pub struct FscanTool;

impl CommandTool for FscanTool {
    fn tool(&self) -> ToolId {
        ToolId::Fscan
    }

    fn build_args(&self, input: &StageInput, params: &Params, env: &StageEnv) -> Result<Vec<String>> {
        let mut args = match input {
            StageInput::Target(t) => vec!["-h".to_string(), t.clone()],
            StageInput::ListFile(p) => vec!["-hf".to_string(), path_arg(p)],
        };
        args.extend(["-p".into(), params.text_or("port", "top1000")?]);
        args.extend(["-t".into(), params.int("threads", 100)?.to_string()]);
        args.extend(["-time".into(), params.int("timeout", 3)?.to_string()]);
        if params.flag("no_ping", false)? {
            args.push("-np".into());
        }
        if !params.flag("web_scan", true)? {
            args.extend(["-m".into(), "portscan".into()]);
        }

        let output = env.work_dir.join(OUTPUT_FILE);
        clear_output(&output)?;
        args.extend(["-o".into(), path_arg(&output)]);
        Ok(args)
    }

    fn parse_output(&self, env: &StageEnv, _output: &ProcessOutput) -> Result<ToolPayload> {
        let content = read_output(&env.work_dir.join(OUTPUT_FILE))?.unwrap_or_default();
        Ok(ToolPayload::Ports {
            results: parse_lines(&content),
        })
    }
}

fn parse_lines(content: &str) -> Vec<PortRecord> {
    content
        .lines()
        .filter_map(|line| {
            let caps = OPEN_PORT.captures(line)?;
            let port = caps[2].parse::<u16>().ok()?;
            Some(PortRecord {
                ip: caps[1].to_string(),
                port,
                service: String::new(),
                banner: String::new(),
            })
        })
        .collect()
}
