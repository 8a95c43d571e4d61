use crate::digest::audit::AuditLog;
use crate::digest::buffer::{RetentionBuffer, is_storable_conversation_id};
use crate::digest::message::{Message, MessageKind};
use crate::error::DigestError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::BufRead;
use tracing::{debug, warn};

const GROUP_SUFFIX: &str = "@g.us";

/// Inbound message event as emitted by the transport bridge, one JSON object
/// per line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub conversation_id: String,
    pub message_id: String,
    #[serde(default)]
    pub sender_display_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub has_media: bool,
    pub timestamp_seconds: i64,
    #[serde(default)]
    pub is_group: Option<bool>,
    #[serde(default)]
    pub is_system: bool,
}

impl InboundEvent {
    fn is_group(&self) -> bool {
        self.is_group
            .unwrap_or_else(|| self.conversation_id.ends_with(GROUP_SUFFIX))
    }

    fn into_message(self) -> Message {
        let kind = if self.is_system {
            MessageKind::System
        } else if self.has_media {
            MessageKind::Media
        } else {
            MessageKind::Text
        };
        Message::new(
            self.conversation_id,
            self.message_id,
            self.sender_display_name.unwrap_or_default(),
            self.content.unwrap_or_default(),
            kind,
            self.timestamp_seconds.saturating_mul(1000),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestDecision {
    Stored,
    NotTargeted,
    Incomplete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub stored: usize,
    pub not_targeted: usize,
    pub incomplete: usize,
    pub malformed: usize,
}

pub struct Ingestor {
    buffer: RetentionBuffer,
    targets: BTreeSet<String>,
}

impl Ingestor {
    /// An empty target list accepts every group conversation.
    pub fn new(buffer: RetentionBuffer, targets: &[String]) -> Self {
        Self {
            buffer,
            targets: targets.iter().cloned().collect(),
        }
    }

    pub fn is_target(&self, event: &InboundEvent) -> bool {
        if self.targets.is_empty() {
            event.is_group()
        } else {
            self.targets.contains(&event.conversation_id)
        }
    }

    pub fn accept(&self, event: InboundEvent) -> Result<IngestDecision, DigestError> {
        if !is_storable_conversation_id(&event.conversation_id) || event.timestamp_seconds <= 0 {
            warn!(
                conversation = %event.conversation_id,
                message_id = %event.message_id,
                "dropping inbound event without a usable conversation id or timestamp"
            );
            return Ok(IngestDecision::Incomplete);
        }
        if !self.is_target(&event) {
            return Ok(IngestDecision::NotTargeted);
        }
        let message = event.into_message();
        self.buffer.append(&message)?;
        debug!(
            conversation = %message.conversation_id,
            message_id = %message.message_id,
            "message buffered"
        );
        Ok(IngestDecision::Stored)
    }

    /// Reads newline-delimited events until EOF. Lines that are not valid
    /// UTF-8 JSON events are counted and skipped; only read failures and
    /// storage errors stop the stream.
    pub fn ingest_lines<R: BufRead>(
        &self,
        mut reader: R,
        audit: Option<&AuditLog>,
    ) -> anyhow::Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        let mut raw = Vec::new();
        let mut line_no = 0usize;
        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                break;
            }
            line_no += 1;
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.trim(),
                Err(err) => {
                    summary.malformed += 1;
                    warn!(line = line_no, error = %err, "skipping inbound line that is not UTF-8");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            let event = match serde_json::from_str::<InboundEvent>(line) {
                Ok(event) => event,
                Err(err) => {
                    summary.malformed += 1;
                    warn!(line = line_no, error = %err, "skipping malformed inbound event");
                    continue;
                }
            };
            match self.accept(event)? {
                IngestDecision::Stored => summary.stored += 1,
                IngestDecision::NotTargeted => summary.not_targeted += 1,
                IngestDecision::Incomplete => summary.incomplete += 1,
            }
        }
        if let Some(audit) = audit {
            audit.record(
                "ingest",
                if summary.malformed == 0 { "ok" } else { "partial" },
                &format!(
                    "stored={} not_targeted={} incomplete={} malformed={}",
                    summary.stored, summary.not_targeted, summary.incomplete, summary.malformed
                ),
            );
        }
        Ok(summary)
    }
}
