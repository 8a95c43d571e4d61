use serde::{Deserialize, Serialize};

pub const UNKNOWN_SENDER: &str = "Participante desconhecido";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Media,
    System,
}

/// One ingested chat message, exactly as persisted in a bucket file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "chatId")]
    pub conversation_id: String,
    pub message_id: String,
    pub sender: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Message {
    pub fn new(
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
        timestamp: i64,
    ) -> Self {
        let sender = sender.into();
        let sender = if sender.trim().is_empty() {
            UNKNOWN_SENDER.to_string()
        } else {
            sender.trim().to_string()
        };
        Self {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            sender,
            content: content.into(),
            kind,
            timestamp,
        }
    }

    /// Text used wherever the message body is shown to people or the model.
    pub fn display_content(&self) -> &str {
        if !self.content.trim().is_empty() {
            return &self.content;
        }
        match self.kind {
            MessageKind::Media => "[mídia]",
            MessageKind::System => "[evento do sistema]",
            MessageKind::Text => "[mensagem vazia]",
        }
    }
}

/// Half-open interval `[start_ms, end_ms)` evaluated once per job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl SummaryWindow {
    pub fn ending_at(end_ms: i64, minutes: u64) -> Self {
        let span = i64::try_from(minutes).unwrap_or(i64::MAX).saturating_mul(60_000);
        Self {
            start_ms: end_ms.saturating_sub(span),
            end_ms,
        }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms < self.end_ms
    }

    /// Window length rounded to whole hours, as shown in report headings.
    pub fn hours(&self) -> i64 {
        ((self.end_ms - self.start_ms) as f64 / 3_600_000.0).round() as i64
    }
}
