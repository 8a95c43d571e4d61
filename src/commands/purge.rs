use anyhow::Result;

use crate::commands::{CommandReport, load_workspace};

pub fn run(conversation: &str) -> Result<CommandReport> {
    let ws = load_workspace()?;
    let mut report = CommandReport::new("purge");
    report.detail(format!("conversation={conversation}"));

    let removed = ws.buffer.remove_conversation(conversation)?;
    report.detail(format!("removed={removed}"));
    if !removed {
        report.detail("nothing buffered for conversation");
    }
    Ok(report)
}
