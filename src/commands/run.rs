use anyhow::Result;
use tracing::debug;

use crate::bridge::CommandTransport;
use crate::commands::{CommandReport, Workspace, load_workspace};
use crate::digest::audit::AuditLog;
use crate::digest::chunker::{Chunker, TokenCounter};
use crate::digest::config::env_lookup;
use crate::digest::job::{ConversationOutcome, JobSettings, RunReport, SummaryJob};
use crate::digest::model::HttpCompletionModel;
use crate::digest::pipeline::SummarizerPipeline;
use crate::digest::run_guard::RunGuard;
use crate::digest::util::now_epoch_millis;
use crate::error::DigestError;

/// Wires the job from configuration: model credentials, bridge binary and
/// buffer all have to resolve before anything runs.
pub fn build_job(ws: &Workspace) -> Result<SummaryJob> {
    let zone = ws.config.zone()?;
    let settings = ws.config.model_settings(&env_lookup)?;
    let counter = TokenCounter::for_model(&settings.model);
    let model = HttpCompletionModel::new(settings)?;
    let pipeline = SummarizerPipeline::new(
        Box::new(model),
        Chunker::new(counter, zone, ws.config.chunk_budget()),
        zone,
    );

    let Some(bin) = ws.config.bridge.bin.as_deref() else {
        return Err(DigestError::Configuration(
            "no transport bridge configured; set DIGEST_BRIDGE_BIN".to_string(),
        )
        .into());
    };
    let transport = CommandTransport::new(bin)?;

    Ok(SummaryJob::new(
        ws.buffer.clone(),
        pipeline,
        Box::new(transport),
        AuditLog::new(&ws.paths),
        JobSettings {
            window_minutes: ws.config.summary.window_minutes,
        },
    ))
}

/// One run under the single-run lock.
pub fn run_guarded(job: &SummaryJob, ws: &Workspace) -> Result<RunReport> {
    let guard = RunGuard::try_acquire(&ws.paths.logs_dir)?;
    debug!(lock = %guard.path().display(), "summary run lock acquired");
    job.run(now_epoch_millis()?)
}

pub fn describe(report: &mut CommandReport, run: &RunReport) {
    report.detail(format!("window_start_ms={}", run.window_start_ms));
    report.detail(format!("window_end_ms={}", run.window_end_ms));
    report.detail(format!("conversations={}", run.conversations.len()));
    for entry in &run.conversations {
        match &entry.outcome {
            ConversationOutcome::Dispatched {
                messages,
                chunks,
                evicted,
                eviction_error,
            } => {
                report.detail(format!(
                    "{}: dispatched messages={messages} chunks={chunks} evicted={evicted}",
                    entry.conversation
                ));
                if let Some(err) = eviction_error {
                    report.issue(format!("{}: eviction failed: {err}", entry.conversation));
                }
            }
            ConversationOutcome::Skipped { reason } => {
                report.detail(format!("{}: skipped ({reason})", entry.conversation));
            }
            ConversationOutcome::Failed { code, error } => {
                report.issue(format!("{}: {code}: {error}", entry.conversation));
            }
        }
    }
}

pub fn run() -> Result<CommandReport> {
    let ws = load_workspace()?;
    let mut report = CommandReport::new("run");
    let job = build_job(&ws)?;

    match run_guarded(&job, &ws) {
        Ok(run) => {
            describe(&mut report, &run);
            report.attach(&run)?;
        }
        Err(err) => match err.downcast_ref::<DigestError>() {
            Some(DigestError::RunInProgress(holder)) => {
                report.issue(format!("summary run already in progress (pid {holder})"));
            }
            _ => return Err(err),
        },
    }
    Ok(report)
}
