use anyhow::Result;
use std::io;
use std::thread;
use tracing::{error, info, warn};

use crate::commands::run::{build_job, run_guarded};
use crate::commands::{CommandReport, load_workspace};
use crate::digest::audit::AuditLog;
use crate::digest::ingest::Ingestor;
use crate::digest::schedule::{CronSchedule, run_daemon};

#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub run_now: bool,
    pub ingest_stdin: bool,
}

pub fn run(opts: &DaemonOptions) -> Result<CommandReport> {
    let ws = load_workspace()?;
    let mut report = CommandReport::new("daemon");
    let schedule = CronSchedule::parse(&ws.config.schedule.cron, ws.config.zone()?)?;
    let job = build_job(&ws)?;

    if opts.ingest_stdin {
        let ingestor = Ingestor::new(ws.buffer.clone(), &ws.config.ingest.target_chat_ids);
        let audit = AuditLog::new(&ws.paths);
        thread::spawn(move || {
            match ingestor.ingest_lines(io::stdin().lock(), Some(&audit)) {
                Ok(summary) => info!(
                    stored = summary.stored,
                    malformed = summary.malformed,
                    "stdin ingestion finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "stdin ingestion stopped"),
            }
        });
    }

    report.detail(format!("schedule={}", schedule.expression()));
    info!(
        schedule = schedule.expression(),
        timezone = %ws.config.summary.timezone,
        "summary daemon started"
    );
    run_daemon(&schedule, opts.run_now, &mut || {
        let run = run_guarded(&job, &ws)?;
        if run.failed() > 0 {
            warn!(
                dispatched = run.dispatched(),
                skipped = run.skipped(),
                failed = run.failed(),
                "summary run finished with failures"
            );
        } else {
            info!(
                dispatched = run.dispatched(),
                skipped = run.skipped(),
                "summary run finished"
            );
        }
        Ok(())
    })?;
    Ok(report)
}
