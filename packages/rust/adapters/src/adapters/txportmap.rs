//! TXPortMap port scanner. Writes `ip:port service banner...` lines.

use luna_shared::{Params, PortRecord, Result, ToolId};

use super::{CommandTool, StageEnv, StageInput, ToolPayload, clear_output, path_arg, read_output};
use crate::runner::ProcessOutput;

const OUTPUT_FILE: &str = "txportmap_result.txt";

pub struct TxPortMapTool;

impl CommandTool for TxPortMapTool {
    fn tool(&self) -> ToolId {
        ToolId::TxPortMap
    }

    fn build_args(&self, input: &StageInput, params: &Params, env: &StageEnv) -> Result<Vec<String>> {
        let mut args = match input {
            StageInput::Target(t) => vec!["-h".to_string(), t.clone()],
            StageInput::ListFile(p) => vec!["-f".to_string(), path_arg(p)],
        };
        args.extend(["-p".into(), params.text_or("port_range", "top1000")?]);
        args.extend(["-t".into(), params.int("threads", 1000)?.to_string()]);
        args.extend(["-timeout".into(), params.int("timeout", 3)?.to_string()]);

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

/// Lines need at least an `ip:port` and a service token.
fn parse_lines(content: &str) -> Vec<PortRecord> {
    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                return None;
            }
            let (ip, port) = parts[0].rsplit_once(':')?;
            let port = port.parse::<u16>().ok()?;
            if ip.is_empty() {
                return None;
            }
            Some(PortRecord {
                ip: ip.to_string(),
                port,
                service: parts[1].to_string(),
                banner: parts[2..].join(" "),
            })
        })
        .collect()
}
