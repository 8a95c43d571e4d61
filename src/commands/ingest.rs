use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use crate::commands::{CommandReport, load_workspace};
use crate::digest::audit::AuditLog;
use crate::digest::ingest::{IngestSummary, Ingestor};

fn summarize(report: &mut CommandReport, summary: &IngestSummary) {
    report.detail(format!("stored={}", summary.stored));
    report.detail(format!("not_targeted={}", summary.not_targeted));
    report.detail(format!("incomplete={}", summary.incomplete));
    report.detail(format!("malformed={}", summary.malformed));
}

/// Reads JSON-lines inbound events from `file`, or stdin when absent.
pub fn run(file: Option<&Path>) -> Result<CommandReport> {
    let ws = load_workspace()?;
    let mut report = CommandReport::new("ingest");
    let ingestor = Ingestor::new(ws.buffer.clone(), &ws.config.ingest.target_chat_ids);
    let audit = AuditLog::new(&ws.paths);

    let summary = match file {
        Some(path) => {
            let handle =
                File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            report.detail(format!("source={}", path.display()));
            ingestor.ingest_lines(BufReader::new(handle), Some(&audit))?
        }
        None => {
            report.detail("source=stdin");
            ingestor.ingest_lines(io::stdin().lock(), Some(&audit))?
        }
    };
    report.detail(format!("buffer={}", ws.buffer.root().display()));
    summarize(&mut report, &summary);
    Ok(report)
}
