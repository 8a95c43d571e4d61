use anyhow::Result;

use crate::commands::{CommandReport, load_workspace};
use crate::digest::config::{MAX_WINDOW_MINUTES, MIN_WINDOW_MINUTES};
use crate::digest::message::SummaryWindow;
use crate::digest::stats::aggregate;
use crate::digest::util::now_epoch_millis;
use crate::error::DigestError;

/// Window stats for one conversation, computed locally without the model.
pub fn run(conversation: &str, minutes: Option<u64>) -> Result<CommandReport> {
    let ws = load_workspace()?;
    let minutes = minutes.unwrap_or(ws.config.summary.window_minutes);
    if !(MIN_WINDOW_MINUTES..=MAX_WINDOW_MINUTES).contains(&minutes) {
        return Err(DigestError::Configuration(format!(
            "--minutes must be within {MIN_WINDOW_MINUTES}..={MAX_WINDOW_MINUTES}, got {minutes}"
        ))
        .into());
    }
    let zone = ws.config.zone()?;
    let window = SummaryWindow::ending_at(now_epoch_millis()?, minutes);
    let messages = ws
        .buffer
        .load_window(conversation, window.start_ms)?
        .into_iter()
        .filter(|m| window.contains(m.timestamp))
        .collect::<Vec<_>>();
    let stats = aggregate(&messages, &window, &zone);

    let mut report = CommandReport::new("stats");
    report.detail(format!("conversation={conversation}"));
    report.detail(format!("window={} .. {}", stats.window_start, stats.window_end));
    report.detail(format!("total_messages={}", stats.total_messages));
    report.detail(format!("unique_participants={}", stats.unique_participants));
    report.detail(format!(
        "top_members={}",
        stats
            .top_members
            .iter()
            .map(|m| format!("{} ({})", m.name, m.messages))
            .collect::<Vec<_>>()
            .join(", ")
    ));
    if let Some(busiest) = &stats.busiest_period {
        report.detail(format!("busiest_period={} ({})", busiest.label, busiest.messages));
    }
    for segment in &stats.segments {
        report.detail(format!("segment.{}={}", segment.label, segment.messages));
    }
    report.detail(format!("shared_links={}", stats.shared_links.len()));
    report.attach(&stats)?;
    Ok(report)
}
