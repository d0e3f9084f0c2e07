//! Pipeline engine: runs a resolved workflow against each target.
//!
//! For every stage the engine derives the input from the execution context
//! (never from the previous stage's raw output), invokes the adapter in its
//! own task, merges a successful payload into the context and persists the
//! updated artifacts. A failed stage of a critical family aborts the rest of
//! that target's stages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use luna_adapters::{AdapterProvider, StageEnv, StageInput, ToolPayload, ToolResult};
use luna_shared::{
    ArtifactKind, LunaError, PipelineConfig, ResolvedStage, ResolvedWorkflow, Result, RunId, ToolFamily,
    ToolId,
};
use luna_storage::ArtifactStore;

use crate::context::{ContextSummary, ExecutionContext, HostFilter, MergeStats};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a target starts (`index` is 1-based).
    fn target_started(&self, target: &str, index: usize, total: usize);
    /// Called before a stage runs.
    fn stage_started(&self, target: &str, stage: &ResolvedStage);
    /// Called after a stage ran.
    fn stage_finished(&self, target: &str, outcome: &StageOutcome);
    /// Called when a target is done.
    fn target_finished(&self, outcome: &TargetOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn target_started(&self, _target: &str, _index: usize, _total: usize) {}
    fn stage_started(&self, _target: &str, _stage: &ResolvedStage) {}
    fn stage_finished(&self, _target: &str, _outcome: &StageOutcome) {}
    fn target_finished(&self, _outcome: &TargetOutcome) {}
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed { error: String },
}

/// What happened to one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub order: usize,
    pub alias: String,
    pub tool: ToolId,
    pub status: StageStatus,
    pub critical: bool,
    pub elapsed: Duration,
    /// Merge counts; zero for failed stages.
    pub merged: MergeStats,
}

impl StageOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TargetStatus {
    Completed,
    /// A critical stage failed; later stages did not run.
    Aborted { alias: String, error: String },
}

/// Result of the pipeline for one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub run_id: RunId,
    pub target: String,
    pub status: TargetStatus,
    pub stages: Vec<StageOutcome>,
    #[serde(skip)]
    pub context: ExecutionContext,
    pub summary: ContextSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TargetStatus::Completed
    }
}

/// Result of a whole run, targets in input order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workflow: String,
    pub targets: Vec<TargetOutcome>,
}

impl RunReport {
    /// `true` when no target was aborted.
    pub fn success(&self) -> bool {
        self.targets.iter().all(TargetOutcome::is_success)
    }

    pub fn failed_targets(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.targets.iter().filter(|t| !t.is_success())
    }
}

/// `run.json` document.
#[derive(Serialize)]
struct RunManifest<'a> {
    run_id: &'a RunId,
    workflow: &'a str,
    target: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    status: &'a TargetStatus,
    summary: &'a ContextSummary,
    stages: &'a [StageOutcome],
}

// ---------------------------------------------------------------------------
// Input derivation
// ---------------------------------------------------------------------------

/// Input chosen for a stage before it is materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivedInput {
    Target(String),
    List { kind: ArtifactKind, items: Vec<String> },
}

/// Pick a stage's input from the context per the family table: the first
/// non-empty source artifact, else the raw target.
pub fn derive_input(ctx: &ExecutionContext, family: ToolFamily) -> DerivedInput {
    let spec = family.spec();
    for kind in spec.sources {
        let items: Vec<String> = match kind {
            ArtifactKind::Urls => ctx.urls().iter().cloned().collect(),
            ArtifactKind::Subdomains => ctx.subdomains().iter().cloned().collect(),
            ArtifactKind::Ips => ctx.ips().iter().cloned().collect(),
        };
        if items.is_empty() {
            continue;
        }
        let items = if spec.scheme_prefix {
            items.into_iter().map(with_scheme).collect()
        } else {
            items
        };
        return DerivedInput::List { kind: *kind, items };
    }

    if family == ToolFamily::PortScan {
        warn!("no IPs discovered, port scan falls back to the raw target");
    } else if !spec.sources.is_empty() {
        debug!(%family, "no list artifacts yet, using raw target");
    }
    DerivedInput::Target(ctx.target().to_string())
}

fn with_scheme(entry: String) -> String {
    if entry.contains("://") {
        entry
    } else {
        format!("http://{entry}")
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The pipeline engine. Cheap to clone; clones share adapters and settings.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    adapters: Arc<dyn AdapterProvider>,
    store: ArtifactStore,
    filter: Arc<HostFilter>,
}

impl Pipeline {
    /// Build an engine. Fails on invalid host filter patterns.
    ///
    /// The output root is made absolute since tools run inside their stage
    /// directories and receive artifact paths as arguments.
    pub fn new(config: PipelineConfig, adapters: Arc<dyn AdapterProvider>) -> Result<Self> {
        let filter = if config.exclude_mail_hosts {
            HostFilter::new(&config.mail_host_patterns)?
        } else {
            HostFilter::disabled()
        };
        let root = std::path::absolute(&config.output_dir)
            .map_err(|e| LunaError::io(&config.output_dir, e))?;
        Ok(Self {
            store: ArtifactStore::new(root),
            config: Arc::new(config),
            adapters,
            filter: Arc::new(filter),
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run `workflow` against every target. Targets are independent: a
    /// failure in one never affects another.
    #[instrument(skip_all, fields(workflow = %workflow.name, targets = targets.len()))]
    pub async fn run(
        &self,
        workflow: &ResolvedWorkflow,
        targets: &[String],
        progress: Arc<dyn ProgressReporter>,
    ) -> RunReport {
        let workflow = Arc::new(workflow.clone());
        let semaphore = Arc::new(Semaphore::new(self.config.target_concurrency.max(1)));
        let total = targets.len();

        info!(
            concurrency = self.config.target_concurrency,
            stages = workflow.stages.len(),
            "starting pipeline run"
        );

        let mut handles = Vec::with_capacity(total);
        for (i, target) in targets.iter().enumerate() {
            let engine = self.clone();
            let workflow = Arc::clone(&workflow);
            let progress = Arc::clone(&progress);
            let semaphore = Arc::clone(&semaphore);
            let target = target.clone();

            handles.push((
                target.clone(),
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    progress.target_started(&target, i + 1, total);
                    let outcome = engine.run_target(&workflow, &target, progress.as_ref()).await;
                    progress.target_finished(&outcome);
                    outcome
                }),
            ));
        }

        let mut outcomes = Vec::with_capacity(total);
        for (target, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(%target, error = %e, "target task failed");
                    let now = Utc::now();
                    outcomes.push(TargetOutcome {
                        run_id: RunId::new(),
                        context: ExecutionContext::new(&target),
                        target,
                        status: TargetStatus::Aborted {
                            alias: String::new(),
                            error: format!("target task failed: {e}"),
                        },
                        stages: Vec::new(),
                        summary: ContextSummary::default(),
                        started_at: now,
                        finished_at: now,
                    });
                }
            }
        }

        let report = RunReport {
            workflow: workflow.name.clone(),
            targets: outcomes,
        };
        info!(
            success = report.success(),
            failed = report.failed_targets().count(),
            "pipeline run finished"
        );
        report
    }

    /// Run every stage of `workflow` against one target.
    #[instrument(skip_all, fields(target = %target))]
    pub async fn run_target(
        &self,
        workflow: &ResolvedWorkflow,
        target: &str,
        progress: &dyn ProgressReporter,
    ) -> TargetOutcome {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let mut ctx = ExecutionContext::new(target);
        let mut stages = Vec::with_capacity(workflow.stages.len());
        let mut status = TargetStatus::Completed;

        info!(%run_id, "target started");

        for stage in &workflow.stages {
            progress.stage_started(target, stage);
            let outcome = self.run_stage(&mut ctx, stage).await;
            progress.stage_finished(target, &outcome);

            let abort = match &outcome.status {
                StageStatus::Failed { error } if outcome.critical => {
                    error!(alias = %stage.alias, %error, "critical stage failed, aborting target");
                    status = TargetStatus::Aborted {
                        alias: stage.alias.clone(),
                        error: error.clone(),
                    };
                    true
                }
                StageStatus::Failed { error } => {
                    warn!(alias = %stage.alias, %error, "stage failed, continuing");
                    false
                }
                StageStatus::Succeeded => false,
            };
            stages.push(outcome);
            if abort {
                break;
            }
        }

        let summary = ctx.summary();
        info!(
            subdomains = summary.subdomains,
            urls = summary.urls,
            ips = summary.ips,
            ports = summary.ports,
            http_probes = summary.http_probes,
            "target finished"
        );

        let outcome = TargetOutcome {
            run_id,
            target: target.to_string(),
            status,
            stages,
            context: ctx,
            summary,
            started_at,
            finished_at: Utc::now(),
        };
        self.write_manifest(&workflow.name, &outcome);
        outcome
    }

    #[instrument(skip_all, fields(alias = %stage.alias, tool = %stage.tool))]
    async fn run_stage(&self, ctx: &mut ExecutionContext, stage: &ResolvedStage) -> StageOutcome {
        let family = stage.tool.family();
        let start = Instant::now();

        let result = self.invoke(ctx, stage).await;
        let (status, merged) = if result.success {
            let merged = self.merge(ctx, stage, result.data);
            info!(added = merged.added, ignored = merged.ignored, "stage succeeded");
            (StageStatus::Succeeded, merged)
        } else {
            let error = result
                .error
                .unwrap_or_else(|| "tool reported failure".to_string());
            (StageStatus::Failed { error }, MergeStats::default())
        };

        StageOutcome {
            order: stage.order,
            alias: stage.alias.clone(),
            tool: stage.tool,
            status,
            critical: family.is_critical(),
            elapsed: start.elapsed(),
            merged,
        }
    }

    /// Derive and materialize the input, then run the adapter in its own
    /// task so a panic becomes a stage failure.
    async fn invoke(&self, ctx: &ExecutionContext, stage: &ResolvedStage) -> ToolResult {
        let Some(adapter) = self.adapters.adapter(stage.tool) else {
            return ToolResult::failure(format!("no adapter registered for {}", stage.tool));
        };

        let target = ctx.target();
        let input = match derive_input(ctx, stage.tool.family()) {
            DerivedInput::Target(t) => StageInput::Target(t),
            DerivedInput::List { kind, items } => {
                debug!(?kind, count = items.len(), "materializing input list");
                match self.store.write_input_list(target, &stage.alias, &items) {
                    Ok(path) => StageInput::ListFile(path),
                    Err(e) => return ToolResult::failure(e.to_string()),
                }
            }
        };
        let work_dir = match self.store.stage_dir(target, &stage.alias) {
            Ok(dir) => dir,
            Err(e) => return ToolResult::failure(e.to_string()),
        };
        let env = StageEnv {
            work_dir,
            timeout: self.config.tool_timeout,
        };
        let params = stage.params.clone();

        match tokio::spawn(async move { adapter.execute(&input, &params, &env).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => ToolResult::failure(format!("adapter panicked: {e}")),
            Err(e) => ToolResult::failure(format!("adapter task failed: {e}")),
        }
    }

    /// Merge a successful payload by family and persist what changed.
    fn merge(&self, ctx: &mut ExecutionContext, stage: &ResolvedStage, data: ToolPayload) -> MergeStats {
        let family = stage.tool.family();
        let target = ctx.target().to_string();

        let (stats, persisted) = match (family, data) {
            (
                ToolFamily::SubdomainDiscovery,
                ToolPayload::Subdomains {
                    subdomains,
                    resolved,
                },
            ) => {
                let before = subdomains.len();
                let kept: Vec<String> = subdomains
                    .into_iter()
                    .filter(|s| !self.filter.is_excluded(s))
                    .collect();
                let filtered = before - kept.len();
                if filtered > 0 {
                    debug!(filtered, "dropped mail hosts");
                }
                let resolved = resolved
                    .into_iter()
                    .filter(|h| !self.filter.is_excluded(&h.subdomain));

                let mut stats = ctx.merge_subdomains(kept);
                stats.ignored += filtered;
                ctx.merge_resolved(resolved);

                let subdomains: Vec<String> = ctx.subdomains().iter().cloned().collect();
                let persisted = self
                    .store
                    .save_subdomains(&target, &subdomains)
                    .and_then(|()| self.store.save_host_ips(&target, &ctx.host_addrs()));
                (stats, persisted)
            }
            (ToolFamily::PathDiscovery, ToolPayload::Urls { urls }) => {
                let stats = ctx.merge_urls(urls);
                let urls: Vec<String> = ctx.urls().iter().cloned().collect();
                (stats, self.store.save_urls(&target, &urls))
            }
            (ToolFamily::HttpProbe, ToolPayload::Probes { results }) => {
                let persisted = self.store.save_probes(&target, &stage.alias, &results);
                (ctx.append_probes(&stage.alias, results), persisted)
            }
            (ToolFamily::PortScan, ToolPayload::Ports { results }) => {
                let stats = ctx.merge_ports(results);
                let ports: Vec<_> = ctx.ports().cloned().collect();
                (stats, self.store.save_ports(&target, &ports))
            }
            (_, ToolPayload::Empty) => {
                debug!("stage produced no data");
                (MergeStats::default(), Ok(()))
            }
            (family, other) => {
                warn!(%family, payload = other.kind(), "payload does not match tool family, ignored");
                (
                    MergeStats {
                        added: 0,
                        ignored: other.len(),
                    },
                    Ok(()),
                )
            }
        };

        if let Err(e) = persisted {
            error!(error = %e, "failed to persist artifacts");
        }
        stats
    }

    fn write_manifest(&self, workflow: &str, outcome: &TargetOutcome) {
        let manifest = RunManifest {
            run_id: &outcome.run_id,
            workflow,
            target: &outcome.target,
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            status: &outcome.status,
            summary: &outcome.summary,
            stages: &outcome.stages,
        };
        if let Err(e) = self.store.write_run_manifest(&outcome.target, &manifest) {
            error!(error = %e, "failed to write run manifest");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use luna_adapters::ToolAdapter;
    use luna_shared::{CorrelationInput, HostAddr, Params, PortRecord, ProbeRecord, Workflow};

    use crate::correlate::{Reports, build_reports};

    /// Replays queued results and records what each call received.
    struct ScriptedAdapter {
        tool: ToolId,
        results: Mutex<VecDeque<ToolResult>>,
        calls: Mutex<Vec<(StageInput, Vec<String>)>>,
    }

    #[async_trait]
    impl ToolAdapter for ScriptedAdapter {
        fn tool(&self) -> ToolId {
            self.tool
        }

        async fn execute(&self, input: &StageInput, _params: &Params, _env: &StageEnv) -> ToolResult {
            let listed = match input {
                StageInput::ListFile(path) => luna_storage::read_lines(path).unwrap(),
                StageInput::Target(_) => Vec::new(),
            };
            self.calls.lock().unwrap().push((input.clone(), listed));
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ToolResult::ok(ToolPayload::Empty))
        }
    }

    struct PanickingAdapter;

    #[async_trait]
    impl ToolAdapter for PanickingAdapter {
        fn tool(&self) -> ToolId {
            ToolId::Dirsearch
        }

        async fn execute(&self, _: &StageInput, _: &Params, _: &StageEnv) -> ToolResult {
            panic!("adapter bug");
        }
    }

    /// Fails for one target, succeeds for every other.
    struct FlakyEnumerator {
        failing: &'static str,
    }

    #[async_trait]
    impl ToolAdapter for FlakyEnumerator {
        fn tool(&self) -> ToolId {
            ToolId::Puzzle
        }

        async fn execute(&self, input: &StageInput, _: &Params, _: &StageEnv) -> ToolResult {
            match input {
                StageInput::Target(t) if t == self.failing => ToolResult::failure("down"),
                StageInput::Target(t) => subdomains(&[format!("www.{t}").as_str()], &[]),
                StageInput::ListFile(_) => ToolResult::failure("unexpected list input"),
            }
        }
    }

    #[derive(Default)]
    struct ScriptedProvider {
        adapters: HashMap<ToolId, Arc<dyn ToolAdapter>>,
        scripted: HashMap<ToolId, Arc<ScriptedAdapter>>,
    }

    impl ScriptedProvider {
        fn script(mut self, tool: ToolId, results: Vec<ToolResult>) -> Self {
            let adapter = Arc::new(ScriptedAdapter {
                tool,
                results: Mutex::new(results.into()),
                calls: Mutex::new(Vec::new()),
            });
            self.adapters.insert(tool, adapter.clone());
            self.scripted.insert(tool, adapter);
            self
        }

        fn with(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
            self.adapters.insert(adapter.tool(), adapter);
            self
        }

        fn calls(&self, tool: ToolId) -> Vec<(StageInput, Vec<String>)> {
            self.scripted[&tool].calls.lock().unwrap().clone()
        }
    }

    impl AdapterProvider for ScriptedProvider {
        fn adapter(&self, tool: ToolId) -> Option<Arc<dyn ToolAdapter>> {
            self.adapters.get(&tool).cloned()
        }
    }

    fn test_config() -> PipelineConfig {
        let mut config = PipelineConfig::from(&luna_shared::AppConfig::default());
        config.output_dir = std::env::temp_dir().join(format!("luna_pipeline_{}", uuid::Uuid::now_v7()));
        config
    }

    fn workflow(tools: &[ToolId]) -> ResolvedWorkflow {
        let mut wf = Workflow::new("test", "");
        for tool in tools {
            let stage = wf.push_tool(*tool, None);
            for value in stage.params.values_mut() {
                if value.is_none() {
                    *value = Some("/tmp/words.txt".into());
                }
            }
        }
        wf.resolve().unwrap()
    }

    fn subdomains(subs: &[&str], resolved: &[(&str, &str)]) -> ToolResult {
        ToolResult::ok(ToolPayload::Subdomains {
            subdomains: subs.iter().map(|s| s.to_string()).collect(),
            resolved: resolved
                .iter()
                .map(|(s, ip)| HostAddr {
                    subdomain: s.to_string(),
                    ip: ip.to_string(),
                })
                .collect(),
        })
    }

    fn ports(records: &[(&str, u16, &str)]) -> ToolResult {
        ToolResult::ok(ToolPayload::Ports {
            results: records
                .iter()
                .map(|(ip, port, service)| PortRecord {
                    ip: ip.to_string(),
                    port: *port,
                    service: service.to_string(),
                    banner: String::new(),
                })
                .collect(),
        })
    }

    async fn run_one(
        provider: Arc<ScriptedProvider>,
        config: PipelineConfig,
        tools: &[ToolId],
    ) -> TargetOutcome {
        let pipeline = Pipeline::new(config, provider).unwrap();
        let report = pipeline
            .run(&workflow(tools), &["example.com".to_string()], Arc::new(SilentProgress))
            .await;
        report.targets.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn critical_failure_aborts_remaining_stages() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .script(ToolId::Puzzle, vec![ToolResult::failure("boom")])
                .script(ToolId::Httpx, vec![]),
        );
        let outcome = run_one(provider.clone(), test_config(), &[ToolId::Puzzle, ToolId::Httpx]).await;

        assert_eq!(
            outcome.status,
            TargetStatus::Aborted {
                alias: "puzzle".into(),
                error: "boom".into()
            }
        );
        assert_eq!(outcome.stages.len(), 1);
        assert!(provider.calls(ToolId::Httpx).is_empty());
    }

    #[tokio::test]
    async fn non_critical_failure_continues() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .script(ToolId::Puzzle, vec![subdomains(&["a.example.com"], &[("a.example.com", "1.2.3.4")])])
                .script(ToolId::Httpx, vec![ToolResult::failure("httpx crashed")])
                .script(ToolId::TxPortMap, vec![ports(&[("1.2.3.4", 80, "http")])]),
        );
        let config = test_config();
        let store = ArtifactStore::new(&config.output_dir);
        let outcome = run_one(
            provider.clone(),
            config,
            &[ToolId::Puzzle, ToolId::Httpx, ToolId::TxPortMap],
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.stages.len(), 3);
        assert!(!outcome.stages[1].succeeded());
        assert!(!outcome.stages[1].critical);
        assert_eq!(outcome.summary.ports, 1);

        let manifest: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(store.target_dir("example.com").join("run.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest["status"]["state"], "completed");
        assert_eq!(manifest["stages"][1]["status"]["state"], "failed");
    }

    #[tokio::test]
    async fn inputs_are_derived_from_context() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .script(
                    ToolId::Puzzle,
                    vec![subdomains(
                        &["a.example.com", "mail.example.com"],
                        &[("a.example.com", "1.2.3.4")],
                    )],
                )
                .script(ToolId::Dirsearch, vec![ToolResult::ok(ToolPayload::Urls {
                    urls: vec!["http://a.example.com/admin".into()],
                })])
                .script(ToolId::Httpx, vec![])
                .script(ToolId::TxPortMap, vec![]),
        );
        run_one(
            provider.clone(),
            test_config(),
            &[ToolId::Puzzle, ToolId::Dirsearch, ToolId::Httpx, ToolId::TxPortMap],
        )
        .await;

        let (input, _) = &provider.calls(ToolId::Puzzle)[0];
        assert_eq!(input, &StageInput::Target("example.com".into()));

        // Path discovery gets subdomains with a scheme; the mail host is gone.
        let (input, listed) = &provider.calls(ToolId::Dirsearch)[0];
        assert!(matches!(input, StageInput::ListFile(_)));
        assert_eq!(listed, &vec!["http://a.example.com".to_string()]);

        // The prober prefers discovered URLs.
        let (_, listed) = &provider.calls(ToolId::Httpx)[0];
        assert_eq!(listed, &vec!["http://a.example.com/admin".to_string()]);

        let (_, listed) = &provider.calls(ToolId::TxPortMap)[0];
        assert_eq!(listed, &vec!["1.2.3.4".to_string()]);
    }

    #[tokio::test]
    async fn probe_input_has_no_scheme_prefix() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .script(ToolId::Puzzle, vec![subdomains(&["a.example.com"], &[])])
                .script(ToolId::Httpx, vec![]),
        );
        run_one(provider.clone(), test_config(), &[ToolId::Puzzle, ToolId::Httpx]).await;
        let (_, listed) = &provider.calls(ToolId::Httpx)[0];
        assert_eq!(listed, &vec!["a.example.com".to_string()]);
    }

    #[tokio::test]
    async fn port_scan_falls_back_to_raw_target() {
        let provider = Arc::new(ScriptedProvider::default().script(ToolId::Fscan, vec![]));
        run_one(provider.clone(), test_config(), &[ToolId::Fscan]).await;
        let (input, _) = &provider.calls(ToolId::Fscan)[0];
        assert_eq!(input, &StageInput::Target("example.com".into()));
    }

    #[tokio::test]
    async fn duplicate_ports_from_two_scanners_merge() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .script(ToolId::TxPortMap, vec![ports(&[("1.2.3.4", 80, "http")])])
                .script(ToolId::Fscan, vec![ports(&[("1.2.3.4", 80, ""), ("1.2.3.4", 22, "")])]),
        );
        let outcome = run_one(provider, test_config(), &[ToolId::TxPortMap, ToolId::Fscan]).await;

        let records: Vec<&PortRecord> = outcome.context.ports().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].service, "http");
        assert_eq!(outcome.stages[1].merged, MergeStats { added: 1, ignored: 1 });
    }

    #[tokio::test]
    async fn panicking_adapter_is_a_stage_failure() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .script(ToolId::Puzzle, vec![subdomains(&["a.example.com"], &[])])
                .with(Arc::new(PanickingAdapter)),
        );
        let outcome = run_one(provider, test_config(), &[ToolId::Puzzle, ToolId::Dirsearch]).await;

        assert!(outcome.is_success());
        match &outcome.stages[1].status {
            StageStatus::Failed { error } => assert!(error.contains("panicked")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mismatched_payload_is_ignored() {
        let provider = Arc::new(ScriptedProvider::default().script(
            ToolId::Httpx,
            vec![ToolResult::ok(ToolPayload::Urls {
                urls: vec!["http://x.example.com".into()],
            })],
        ));
        let outcome = run_one(provider, test_config(), &[ToolId::Httpx]).await;
        assert!(outcome.stages[0].succeeded());
        assert_eq!(outcome.summary.urls, 0);
        assert_eq!(outcome.stages[0].merged.ignored, 1);
    }

    #[tokio::test]
    async fn missing_adapter_fails_stage() {
        let provider = Arc::new(ScriptedProvider::default());
        let outcome = run_one(provider, test_config(), &[ToolId::Ffuf]).await;
        assert!(outcome.is_success());
        assert!(!outcome.stages[0].succeeded());
    }

    #[tokio::test]
    async fn targets_are_independent_and_ordered() {
        let provider = Arc::new(
            ScriptedProvider::default().with(Arc::new(FlakyEnumerator { failing: "a.com" })),
        );
        let mut config = test_config();
        config.target_concurrency = 2;
        let pipeline = Pipeline::new(config, provider).unwrap();
        let report = pipeline
            .run(
                &workflow(&[ToolId::Puzzle]),
                &["a.com".to_string(), "b.com".to_string()],
                Arc::new(SilentProgress),
            )
            .await;

        assert!(!report.success());
        let names: Vec<&str> = report.targets.iter().map(|t| t.target.as_str()).collect();
        assert_eq!(names, vec!["a.com", "b.com"]);
        assert!(!report.targets[0].is_success());
        assert!(report.targets[1].is_success());
        assert_eq!(report.targets[1].summary.subdomains, 1);
        assert_eq!(report.failed_targets().count(), 1);
    }

    #[tokio::test]
    async fn persisted_artifacts_match_live_context() {
        let provider = Arc::new(
            ScriptedProvider::default()
                .script(
                    ToolId::Puzzle,
                    vec![subdomains(
                        &["a.example.com", "b.example.com"],
                        &[("a.example.com", "1.2.3.4")],
                    )],
                )
                .script(ToolId::Dirsearch, vec![ToolResult::ok(ToolPayload::Urls {
                    urls: vec!["http://a.example.com/login".into()],
                })])
                .script(ToolId::Httpx, vec![ToolResult::ok(ToolPayload::Probes {
                    results: vec![
                        ProbeRecord {
                            url: "https://a.example.com".into(),
                            status_code: 200,
                            title: "A".into(),
                            ..Default::default()
                        },
                        ProbeRecord {
                            url: "http://1.2.3.4:443".into(),
                            status_code: 400,
                            ..Default::default()
                        },
                    ],
                })])
                .script(ToolId::TxPortMap, vec![ports(&[("1.2.3.4", 443, "https")])]),
        );
        let config = test_config();
        let store = ArtifactStore::new(&config.output_dir);
        let outcome = run_one(
            provider,
            config,
            &[ToolId::Puzzle, ToolId::Dirsearch, ToolId::Httpx, ToolId::TxPortMap],
        )
        .await;

        let live = build_reports("example.com", &CorrelationInput::from(&outcome.context));
        let loaded = build_reports(
            "example.com",
            &store.load_correlation_input("example.com").unwrap(),
        );
        assert_eq!(live, loaded);
        assert_eq!(live.web_assets.len(), 3);
        assert_eq!(live.ip_ports[0].status_code, Some(400));
    }

    #[tokio::test]
    async fn repeated_probe_stages_reload_with_the_later_probe_winning() {
        let probe = |status| {
            ToolResult::ok(ToolPayload::Probes {
                results: vec![ProbeRecord {
                    url: "https://a.example.com".into(),
                    status_code: status,
                    ..Default::default()
                }],
            })
        };
        let provider = Arc::new(
            ScriptedProvider::default()
                .script(ToolId::Puzzle, vec![subdomains(&["a.example.com"], &[])])
                .script(ToolId::Httpx, vec![probe(500), probe(200)]),
        );
        let config = test_config();
        let store = ArtifactStore::new(&config.output_dir);
        let outcome = run_one(provider, config, &[ToolId::Puzzle, ToolId::Httpx, ToolId::Httpx]).await;
        assert!(outcome.is_success());

        let live = build_reports("example.com", &CorrelationInput::from(&outcome.context));
        let loaded = build_reports(
            "example.com",
            &store.load_correlation_input("example.com").unwrap(),
        );
        let status = |reports: &Reports| {
            reports
                .web_assets
                .iter()
                .find(|r| r.url == "https://a.example.com")
                .and_then(|r| r.status_code)
        };
        assert_eq!(status(&live), Some(200));
        assert_eq!(status(&loaded), Some(200));
        assert_eq!(live, loaded);
    }

    #[test]
    fn derive_input_prefers_first_non_empty_source() {
        let mut ctx = ExecutionContext::new("example.com");
        assert_eq!(
            derive_input(&ctx, ToolFamily::HttpProbe),
            DerivedInput::Target("example.com".into())
        );

        ctx.merge_subdomains(["a.example.com".to_string()]);
        assert_eq!(
            derive_input(&ctx, ToolFamily::PathDiscovery),
            DerivedInput::List {
                kind: ArtifactKind::Subdomains,
                items: vec!["http://a.example.com".into()],
            }
        );

        ctx.merge_urls(["https://a.example.com/x".to_string()]);
        assert_eq!(
            derive_input(&ctx, ToolFamily::PathDiscovery),
            DerivedInput::List {
                kind: ArtifactKind::Urls,
                items: vec!["https://a.example.com/x".into()],
            }
        );

        // Subdomain discovery always runs on the raw target.
        assert_eq!(
            derive_input(&ctx, ToolFamily::SubdomainDiscovery),
            DerivedInput::Target("example.com".into())
        );
    }
}
