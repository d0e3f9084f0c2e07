//! Terminal progress: one spinner per running target.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use luna_core::{ProgressReporter, StageOutcome, StageStatus, TargetOutcome};
use luna_shared::ResolvedStage;

/// CLI progress reporter using indicatif spinners.
pub(crate) struct CliProgress {
    multi: MultiProgress,
    style: ProgressStyle,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl CliProgress {
    pub(crate) fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        Self {
            multi: MultiProgress::new(),
            style,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar(&self, target: &str) -> Option<ProgressBar> {
        self.bars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(target)
            .cloned()
    }

    fn println(&self, line: String) {
        // A hidden draw target (no tty) makes this a no-op.
        let _ = self.multi.println(line);
    }
}

impl ProgressReporter for CliProgress {
    fn target_started(&self, target: &str, index: usize, total: usize) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(self.style.clone());
        bar.set_prefix(format!("[{index}/{total}] {target}"));
        bar.set_message("starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        self.bars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(target.to_string(), bar);
    }

    fn stage_started(&self, target: &str, stage: &ResolvedStage) {
        if let Some(bar) = self.bar(target) {
            bar.set_message(format!("{} ({})", stage.alias, stage.tool.family()));
        }
    }

    fn stage_finished(&self, target: &str, outcome: &StageOutcome) {
        let secs = outcome.elapsed.as_secs_f64();
        match &outcome.status {
            StageStatus::Succeeded => self.println(format!(
                "  ✓ {target} {}: +{} new ({secs:.1}s)",
                outcome.alias, outcome.merged.added
            )),
            StageStatus::Failed { error } => {
                let kind = if outcome.critical { "critical" } else { "skipped" };
                self.println(format!("  ✗ {target} {} [{kind}]: {error}", outcome.alias));
            }
        }
    }

    fn target_finished(&self, outcome: &TargetOutcome) {
        let bar = self
            .bars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&outcome.target);
        if let Some(bar) = bar {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }
}
