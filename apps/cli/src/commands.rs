//! CLI command definitions, routing, and tracing setup.

use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use luna_adapters::AdapterRegistry;
use luna_core::{Pipeline, TargetOutcome};
use luna_shared::{
    AppConfig, CorrelationInput, ParamValue, PipelineConfig, ReportFormat, ToolId, Workflow,
    default_params, init_config, init_config_at, load_config, load_config_from,
};
use luna_storage::{ArtifactStore, ProfileStore};
use regex::Regex;
use tracing::{info, warn};

use crate::progress::CliProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Luna: reconnaissance pipeline orchestrator.
#[derive(Parser)]
#[command(
    name = "luna",
    version,
    about = "Chain recon tools against target domains and correlate their results into asset reports.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.luna/luna.toml).
    #[arg(long, global = true, env = "LUNA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a profile against one or more targets.
    Run {
        /// Profile to run.
        #[arg(short, long, default_value = "default")]
        profile: String,

        /// Targets, comma-separated.
        #[arg(short, long, value_delimiter = ',')]
        target: Vec<String>,

        /// File with one target per line.
        #[arg(short = 'f', long)]
        target_file: Option<PathBuf>,

        /// Report format: csv, xlsx or both (defaults to the config value).
        #[arg(long)]
        format: Option<ReportFormat>,

        /// Targets processed concurrently.
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Output root (defaults to the config value).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip report generation.
        #[arg(long)]
        no_report: bool,
    },

    /// Create a profile from tools or from an existing profile.
    Create {
        /// Name of the new profile.
        name: String,

        /// Copy the stages of this profile.
        #[arg(long)]
        from: Option<String>,

        /// Tools to append, comma-separated, each `tool` or `tool:alias`.
        #[arg(long, value_delimiter = ',')]
        tools: Vec<String>,

        /// Free-text description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Set stage parameters of a profile (`KEY=VALUE`, `KEY=null` unsets).
    Set {
        /// Profile to edit.
        profile: String,

        /// Stage alias.
        alias: String,

        /// Parameter assignments.
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// List available profiles.
    List,

    /// Show a profile's stages and parameters.
    Show {
        /// Profile name.
        name: String,
    },

    /// Delete a user profile.
    Delete {
        /// Profile name.
        name: String,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Rebuild the reports of a target from its saved results.
    Report {
        /// Target domain.
        #[arg(short, long)]
        target: String,

        /// Report format: csv, xlsx or both.
        #[arg(long)]
        format: Option<ReportFormat>,
    },

    /// List supported tools and where they are expected.
    Tools,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "luna=info",
        1 => "luna=debug",
        _ => "luna=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            profile,
            target,
            target_file,
            format,
            concurrency,
            output,
            no_report,
        } => {
            let config = load(config_path)?;
            let opts = RunOptions {
                format: (!no_report).then(|| format.unwrap_or(config.defaults.report_format)),
                concurrency,
                output,
            };
            cmd_run(&config, &profile, &target, target_file.as_deref(), opts).await
        }
        Command::Create {
            name,
            from,
            tools,
            description,
        } => cmd_create(
            &load(config_path)?,
            &name,
            from.as_deref(),
            &tools,
            description.as_deref(),
        ),
        Command::Set {
            profile,
            alias,
            values,
        } => cmd_set(&load(config_path)?, &profile, &alias, &values),
        Command::List => cmd_list(&load(config_path)?),
        Command::Show { name } => cmd_show(&load(config_path)?, &name),
        Command::Delete { name, yes } => cmd_delete(&load(config_path)?, &name, yes),
        Command::Report { target, format } => {
            let config = load(config_path)?;
            let format = format.unwrap_or(config.defaults.report_format);
            cmd_report(&config, &target, format)
        }
        Command::Tools => cmd_tools(&load(config_path)?),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(&load(config_path)?),
        },
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

fn profile_store(config: &AppConfig) -> ProfileStore {
    ProfileStore::new(&config.defaults.profiles_dir)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

struct RunOptions {
    /// `None` skips reports.
    format: Option<ReportFormat>,
    concurrency: Option<usize>,
    output: Option<PathBuf>,
}

async fn cmd_run(
    config: &AppConfig,
    profile: &str,
    targets: &[String],
    target_file: Option<&Path>,
    opts: RunOptions,
) -> Result<()> {
    let workflow = profile_store(config).load(profile)?;
    let resolved = workflow.resolve().wrap_err_with(|| {
        format!("set the missing values with `luna set {profile} <alias> KEY=VALUE`")
    })?;

    let targets = parse_targets(targets, target_file)?;

    let mut pipeline_config = PipelineConfig::from(config);
    if let Some(n) = opts.concurrency {
        pipeline_config.target_concurrency = n.max(1);
    }
    if let Some(dir) = opts.output {
        pipeline_config.output_dir = dir;
    }

    let adapters = Arc::new(AdapterRegistry::from_config(config));
    let pipeline = Pipeline::new(pipeline_config, adapters)?;

    info!(
        profile,
        description = %workflow.description,
        targets = targets.len(),
        stages = resolved.stages.len(),
        "running profile"
    );

    let report = pipeline
        .run(&resolved, &targets, Arc::new(CliProgress::new()))
        .await;

    println!();
    for outcome in &report.targets {
        print_target(outcome);
        if let Some(format) = opts.format {
            let input = CorrelationInput::from(&outcome.context);
            match luna_report::generate(pipeline.store(), &outcome.target, &input, format) {
                Ok(output) => {
                    for file in &output.files {
                        println!("    report: {}", file.display());
                    }
                }
                Err(e) => warn!(target = %outcome.target, error = %e, "report generation failed"),
            }
        }
    }
    println!();

    let failed = report.failed_targets().count();
    let total = report.targets.len();
    println!("  Done: {} succeeded, {failed} failed", total - failed);
    println!();

    if failed > 0 {
        return Err(eyre!("{failed} of {total} targets failed"));
    }
    Ok(())
}

fn print_target(outcome: &TargetOutcome) {
    let secs = (outcome.finished_at - outcome.started_at).num_milliseconds() as f64 / 1000.0;
    let s = &outcome.summary;
    let status = match &outcome.status {
        luna_core::TargetStatus::Completed => "completed".to_string(),
        luna_core::TargetStatus::Aborted { alias, .. } => format!("aborted at {alias}"),
    };
    println!("  {}  {status}  ({secs:.1}s)", outcome.target);
    println!(
        "    subdomains {}  urls {}  ips {}  ports {}  probes {}",
        s.subdomains, s.urls, s.ips, s.ports, s.http_probes
    );
    for stage in outcome.stages.iter().filter(|s| !s.succeeded()) {
        if let luna_core::StageStatus::Failed { error } = &stage.status {
            println!("    failed {}: {error}", stage.alias);
        }
    }
}

static DOMAIN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$").ok()
});

/// A target is a domain name or an IP address.
fn is_valid_target(raw: &str) -> bool {
    raw.parse::<IpAddr>().is_ok() || DOMAIN_RE.as_ref().is_some_and(|re| re.is_match(raw))
}

/// Collect targets from the flag and the file, skipping invalid entries and
/// duplicates while keeping first-seen order.
fn parse_targets(listed: &[String], file: Option<&Path>) -> Result<Vec<String>> {
    let mut candidates: Vec<String> = listed.iter().map(|t| t.trim().to_string()).collect();
    if let Some(path) = file {
        if !path.exists() {
            return Err(eyre!("target file not found: {}", path.display()));
        }
        candidates.extend(
            luna_storage::read_lines(path)?
                .into_iter()
                .filter(|line| !line.starts_with('#')),
        );
    }

    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for candidate in candidates {
        if candidate.is_empty() {
            continue;
        }
        if !is_valid_target(&candidate) {
            warn!(target = %candidate, "skipping invalid target");
            continue;
        }
        if seen.insert(candidate.to_ascii_lowercase()) {
            targets.push(candidate);
        }
    }

    if targets.is_empty() {
        return Err(eyre!("no valid targets: pass --target or --target-file"));
    }
    Ok(targets)
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

fn cmd_create(
    config: &AppConfig,
    name: &str,
    from: Option<&str>,
    tools: &[String],
    description: Option<&str>,
) -> Result<()> {
    Workflow::validate_name(name)?;
    let store = profile_store(config);
    if store.exists(name) {
        return Err(eyre!("profile '{name}' already exists"));
    }
    if from.is_none() && tools.is_empty() {
        return Err(eyre!("give --from PROFILE, --tools LIST, or both"));
    }

    let mut workflow = Workflow::new(name, description.unwrap_or_default());
    if let Some(base) = from {
        let base = store.load(base)?;
        if description.is_none() {
            workflow.description = base.description.clone();
        }
        workflow.stages = base.stages;
    }
    for spec in tools {
        let (tool, alias) = parse_tool_spec(spec)?;
        if let Some(taken) = alias.filter(|a| workflow.stages.iter().any(|s| s.alias == *a)) {
            return Err(eyre!("alias '{taken}' is already used in '{name}'"));
        }
        workflow.push_tool(tool, alias);
    }

    let path = store.save(&mut workflow)?;
    println!("Profile '{name}' saved to {}", path.display());
    print_unresolved(&workflow);
    Ok(())
}

/// `tool` or `tool:alias`.
fn parse_tool_spec(spec: &str) -> Result<(ToolId, Option<&str>)> {
    let spec = spec.trim();
    let (tool, alias) = match spec.split_once(':') {
        Some((tool, alias)) => (tool, Some(alias.trim())),
        None => (spec, None),
    };
    let tool: ToolId = tool.trim().parse()?;
    match alias {
        Some("") => Err(eyre!("empty alias in '{spec}'")),
        Some(a) => {
            Workflow::validate_alias(a)?;
            Ok((tool, alias))
        }
        None => Ok((tool, None)),
    }
}

fn cmd_set(config: &AppConfig, profile: &str, alias: &str, values: &[String]) -> Result<()> {
    let store = profile_store(config);
    let mut workflow = store.load(profile)?;

    let aliases: Vec<String> = workflow.stages.iter().map(|s| s.alias.clone()).collect();
    let Some(stage) = workflow.stage_mut(alias) else {
        return Err(eyre!(
            "profile '{profile}' has no stage '{alias}' (stages: {})",
            aliases.join(", ")
        ));
    };

    let known = default_params(stage.tool);
    for assignment in values {
        let (key, raw) = parse_assignment(assignment)?;
        if !known.contains_key(key) {
            warn!(tool = %stage.tool, key, "parameter is not a known option of this tool");
        }
        let value = ParamValue::parse_cli(raw);
        match &value {
            Some(v) => println!("  {alias}.{key} = {v}"),
            None => println!("  {alias}.{key} unset"),
        }
        stage.params.insert(key.to_string(), value);
    }

    store.save(&mut workflow)?;
    print_unresolved(&workflow);
    Ok(())
}

fn parse_assignment(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => Err(eyre!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn print_unresolved(workflow: &Workflow) {
    let missing = workflow.unresolved();
    if missing.is_empty() {
        return;
    }
    println!();
    println!("  Still unset (the profile cannot run until these are set):");
    for param in missing {
        println!("    {param}");
    }
}

fn cmd_list(config: &AppConfig) -> Result<()> {
    let store = profile_store(config);
    let names = store.list()?;

    println!();
    println!("  Profiles:");
    for name in names {
        let marker = if Workflow::is_builtin_name(&name) { "*" } else { " " };
        match store.load(&name) {
            Ok(wf) => println!("  {marker} {name:<16} {:>2} stages  {}", wf.stages.len(), wf.description),
            Err(e) => println!("  {marker} {name:<16} (unreadable: {e})"),
        }
    }
    println!();
    println!("  * built-in");
    Ok(())
}

fn cmd_show(config: &AppConfig, name: &str) -> Result<()> {
    let workflow = profile_store(config).load(name)?;

    println!();
    println!("  Profile:     {}", workflow.name);
    println!("  Description: {}", workflow.description);
    println!("  Updated:     {}", workflow.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!();
    for stage in &workflow.stages {
        let family = stage.tool.family();
        let critical = if family.is_critical() { ", critical" } else { "" };
        println!(
            "  {}. {} [{}] ({family}{critical})",
            stage.order, stage.alias, stage.tool
        );
        if let Some(description) = &stage.description {
            println!("     {description}");
        }
        for (key, value) in &stage.params {
            match value {
                Some(v) => println!("     {key} = {v}"),
                None => println!("     {key} = <unset>"),
            }
        }
    }
    print_unresolved(&workflow);
    println!();
    Ok(())
}

fn cmd_delete(config: &AppConfig, name: &str, yes: bool) -> Result<()> {
    let store = profile_store(config);
    if Workflow::is_builtin_name(name) {
        return Err(eyre!("'{name}' is a built-in profile and cannot be deleted"));
    }
    if !store.exists(name) {
        return Err(eyre!("profile '{name}' not found"));
    }
    if !yes && !confirm(&format!("Delete profile '{name}'?"))? {
        println!("Cancelled.");
        return Ok(());
    }
    store.delete(name)?;
    println!("Profile '{name}' deleted.");
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

// ---------------------------------------------------------------------------
// report / tools / config
// ---------------------------------------------------------------------------

fn cmd_report(config: &AppConfig, target: &str, format: ReportFormat) -> Result<()> {
    let store = ArtifactStore::new(&config.defaults.output_dir);
    let output = luna_report::generate_from_store(&store, target, format)?;
    let s = &output.summary;

    println!();
    println!("  Report for {target}");
    println!("  Web assets: {} rows", s.web_assets_count);
    println!("  IP/ports:   {} rows", s.ip_ports_count);
    println!(
        "  Unique:     {} subdomains, {} IPs, {} ports",
        s.unique_subdomains, s.unique_ips, s.unique_ports
    );
    for file in &output.files {
        println!("  File:       {}", file.display());
    }
    println!();
    Ok(())
}

fn cmd_tools(config: &AppConfig) -> Result<()> {
    println!();
    for tool in ToolId::ALL {
        let family = tool.family();
        let path = config.tool_path(tool);
        let found = if path.exists() { "found" } else { "missing" };
        let interpreter = config
            .tool(tool)
            .interpreter
            .map(|i| format!(" via {i}"))
            .unwrap_or_default();
        println!(
            "  {:<10} {:<20} {:<9} {} ({found}{interpreter})",
            tool.as_str(),
            family.as_str(),
            if family.is_critical() { "critical" } else { "" },
            path.display(),
        );
        println!("             {}", tool.description());
    }
    println!();
    Ok(())
}

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => init_config_at(p)?,
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
