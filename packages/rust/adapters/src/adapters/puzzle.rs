//! puzzle subdomain enumerator. Writes `subdomain [ip]` lines.

use luna_shared::{HostAddr, LunaError, Params, Result, ToolId};

use super::{CommandTool, StageEnv, StageInput, ToolPayload, clear_output, path_arg, read_output};
use crate::runner::ProcessOutput;

const OUTPUT_FILE: &str = "puzzle_result.txt";

pub struct PuzzleTool;

impl CommandTool for PuzzleTool {
    fn tool(&self) -> ToolId {
        ToolId::Puzzle
    }

    fn build_args(&self, input: &StageInput, params: &Params, env: &StageEnv) -> Result<Vec<String>> {
        let StageInput::Target(target) = input else {
            return Err(LunaError::build("puzzle accepts a single domain, not a list"));
        };

        let mut args = vec![
            "-m".to_string(),
            params.text_or("mode", "domain")?,
            "-d".to_string(),
            target.clone(),
        ];

        // puzzle refuses to overwrite an existing output file.
        let output = env.work_dir.join(OUTPUT_FILE);
        clear_output(&output)?;
        args.extend(["-o".into(), path_arg(&output)]);

        args.extend(["-t".into(), params.int("timeout", 10)?.to_string()]);
        if params.flag("l3", false)? {
            args.push("-l3".into());
        }
        if params.flag("ping", false)? {
            args.push("-ping".into());
        }
        args.extend(["-pt".into(), params.int("pt", 500)?.to_string()]);
        args.extend(["-wt".into(), params.int("wt", 25)?.to_string()]);
        Ok(args)
    }

    fn parse_output(&self, env: &StageEnv, _output: &ProcessOutput) -> Result<ToolPayload> {
        let content = read_output(&env.work_dir.join(OUTPUT_FILE))?.unwrap_or_default();
        Ok(parse_lines(&content))
    }
}

fn parse_lines(content: &str) -> ToolPayload {
    let mut subdomains = Vec::new();
    let mut resolved = Vec::new();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let Some(subdomain) = parts.next() else {
            continue;
        };
        subdomains.push(subdomain.to_string());

        let ip = parts
            .next()
            .map(|p| p.trim_matches(|c| c == '[' || c == ']'))
            .unwrap_or("");
        if !ip.is_empty() {
            resolved.push(HostAddr {
                subdomain: subdomain.to_string(),
                ip: ip.to_string(),
            });
        }
    }

    ToolPayload::Subdomains {
        subdomains,
        resolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::{no_output, params, temp_env};
    use luna_shared::ParamValue;

    #[test]
    fn builds_command_and_clears_stale_output() {
        let env = temp_env();
        std::fs::write(env.work_dir.join(OUTPUT_FILE), "stale.example.com\n").unwrap();

        let args = PuzzleTool
            .build_args(
                &StageInput::Target("example.com".into()),
                &params(&[
                    ("mode", ParamValue::Text("domain".into())),
                    ("timeout", ParamValue::Int(10)),
                    ("l3", ParamValue::Bool(true)),
                    ("ping", ParamValue::Bool(false)),
                ]),
                &env,
            )
            .unwrap();

        assert!(!env.work_dir.join(OUTPUT_FILE).exists());
        assert_eq!(&args[..4], &["-m", "domain", "-d", "example.com"]);
        assert!(args.contains(&"-l3".to_string()));
        assert!(!args.contains(&"-ping".to_string()));
        let pt = args.iter().position(|a| a == "-pt").unwrap();
        assert_eq!(args[pt + 1], "500");
    }

    #[test]
    fn list_input_is_build_error() {
        let env = temp_env();
        let err = PuzzleTool
            .build_args(
                &StageInput::ListFile(env.work_dir.join("list.txt")),
                &Params::default(),
                &env,
            )
            .unwrap_err();
        assert!(matches!(err, LunaError::Build { .. }));
    }

    #[test]
    fn parses_subdomain_ip_lines() {
        let payload = parse_lines(
            "a.example.com [1.2.3.4]\n\
             b.example.com\n\
             \n\
             c.example.com [5.6.7.8]\n",
        );
        let ToolPayload::Subdomains {
            subdomains,
            resolved,
        } = payload
        else {
            panic!("expected subdomains");
        };
        assert_eq!(
            subdomains,
            vec!["a.example.com", "b.example.com", "c.example.com"]
        );
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[1].ip, "5.6.7.8");
    }

    #[test]
    fn reads_output_file() {
        let env = temp_env();
        std::fs::write(env.work_dir.join(OUTPUT_FILE), "www.example.com [9.9.9.9]\n").unwrap();
        let payload = PuzzleTool.parse_output(&env, &no_output()).unwrap();
        assert_eq!(payload.len(), 1);
    }
}
