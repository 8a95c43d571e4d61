use anyhow::Result;
use chrono::Utc;
use std::path::Path;

use crate::commands::{CommandReport, load_workspace};
use crate::digest::schedule::CronSchedule;

pub fn run() -> Result<CommandReport> {
    let ws = load_workspace()?;
    let cfg = &ws.config;
    let mut report = CommandReport::new("status");

    report.detail(format!("home={}", ws.paths.home.display()));
    report.detail(format!("buffer={}", ws.buffer.root().display()));
    report.detail(format!("logs_dir={}", ws.paths.logs_dir.display()));
    report.detail(format!("model={}", cfg.model.id));
    report.detail(format!("schedule={}", cfg.schedule.cron));
    report.detail(format!("timezone={}", cfg.summary.timezone));
    report.detail(format!("window_minutes={}", cfg.summary.window_minutes));
    report.detail(format!("chunk_tokens={}", cfg.summary.chunk_tokens));
    if cfg.ingest.target_chat_ids.is_empty() {
        report.detail("targets=all groups");
    } else {
        report.detail(format!("targets={}", cfg.ingest.target_chat_ids.join(",")));
    }

    let zone = cfg.zone()?;
    match CronSchedule::parse(&cfg.schedule.cron, zone) {
        Ok(schedule) => match schedule.next_after(Utc::now()) {
            Some(next) => report.detail(format!(
                "next_run={}",
                next.with_timezone(&zone.tz()).to_rfc3339()
            )),
            None => report.issue("schedule has no upcoming fire time"),
        },
        Err(err) => report.issue(err.to_string()),
    }

    match cfg.bridge.bin.as_deref() {
        Some(bin) if Path::new(bin).is_file() => report.detail(format!("bridge={bin}")),
        Some(bin) => report.issue(format!("bridge binary not found: {bin}")),
        None => report.detail("bridge=unset"),
    }

    let conversations = ws.buffer.list_conversations()?;
    report.detail(format!("conversations={}", conversations.len()));
    for conversation in &conversations {
        let buckets = ws.buffer.bucket_stats(conversation)?;
        let total = buckets.iter().map(|b| b.messages).sum::<usize>();
        let listing = buckets
            .iter()
            .map(|b| format!("{}:{}", b.date, b.messages))
            .collect::<Vec<_>>()
            .join(",");
        report.detail(format!("{conversation}: messages={total} buckets={listing}"));
    }

    Ok(report)
}
