use crate::bridge::Transport;
use crate::digest::audit::AuditLog;
use crate::digest::buffer::{ClearOutcome, RetentionBuffer};
use crate::digest::message::SummaryWindow;
use crate::digest::pipeline::{PipelineOutcome, RunState, SummarizerPipeline};
use crate::digest::zone::Zone;
use crate::error::{DigestError, classify};
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSettings {
    pub window_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ConversationOutcome {
    Dispatched {
        messages: usize,
        chunks: usize,
        evicted: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        eviction_error: Option<String>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        code: &'static str,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationReport {
    pub conversation: String,
    pub states: Vec<RunState>,
    #[serde(flatten)]
    pub outcome: ConversationOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub conversations: Vec<ConversationReport>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&ConversationOutcome) -> bool) -> usize {
        self.conversations.iter().filter(|c| pred(&c.outcome)).count()
    }

    pub fn dispatched(&self) -> usize {
        self.count(|o| matches!(o, ConversationOutcome::Dispatched { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ConversationOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ConversationOutcome::Failed { .. }))
    }
}

/// `Resumo das últimas 24h — 10/03/2024 (17:00 - 17:00)`, in the configured zone.
pub fn build_heading(window: &SummaryWindow, zone: &Zone) -> String {
    format!(
        "Resumo das últimas {}h — {} ({} - {})",
        window.hours(),
        zone.date_label(window.end_ms),
        zone.clock_label(window.start_ms),
        zone.clock_label(window.end_ms)
    )
}

pub struct SummaryJob {
    buffer: RetentionBuffer,
    pipeline: SummarizerPipeline,
    transport: Box<dyn Transport>,
    audit: AuditLog,
    settings: JobSettings,
}

impl SummaryJob {
    pub fn new(
        buffer: RetentionBuffer,
        pipeline: SummarizerPipeline,
        transport: Box<dyn Transport>,
        audit: AuditLog,
        settings: JobSettings,
    ) -> Self {
        Self {
            buffer,
            pipeline,
            transport,
            audit,
            settings,
        }
    }

    /// One pass over every buffered conversation for the window ending at
    /// `now_ms`. Only an unreadable buffer root fails the whole run; anything
    /// else is recorded against the conversation it happened in.
    pub fn run(&self, now_ms: i64) -> Result<RunReport> {
        let window = SummaryWindow::ending_at(now_ms, self.settings.window_minutes);
        let conversations = self.buffer.list_conversations()?;
        info!(
            conversations = conversations.len(),
            model = %self.pipeline.model_label(),
            window_start = %self.pipeline.zone().rfc3339(window.start_ms),
            "summary run started"
        );
        self.audit.record(
            "job",
            "started",
            &format!("conversations={}", conversations.len()),
        );

        let mut report = RunReport {
            window_start_ms: window.start_ms,
            window_end_ms: window.end_ms,
            conversations: Vec::with_capacity(conversations.len()),
        };
        for conversation in conversations {
            let entry = self.process_conversation(&conversation, &window);
            report.conversations.push(entry);
        }

        self.audit.record(
            "job",
            if report.failed() == 0 { "ok" } else { "partial" },
            &format!(
                "dispatched={} skipped={} failed={}",
                report.dispatched(),
                report.skipped(),
                report.failed()
            ),
        );
        Ok(report)
    }

    fn process_conversation(&self, conversation: &str, window: &SummaryWindow) -> ConversationReport {
        let mut states = Vec::new();
        let outcome = match self.summarize_and_dispatch(conversation, window, &mut states) {
            Ok(outcome) => outcome,
            Err(err) => {
                if states.last() != Some(&RunState::Failed) {
                    states.push(RunState::Failed);
                }
                let code = classify(&err);
                error!(conversation, code, error = %format!("{err:#}"), "summary failed");
                self.audit
                    .record("job", "failed", &format!("{conversation}: {code}: {err:#}"));
                ConversationOutcome::Failed {
                    code,
                    error: format!("{err:#}"),
                }
            }
        };
        ConversationReport {
            conversation: conversation.to_string(),
            states,
            outcome,
        }
    }

    fn summarize_and_dispatch(
        &self,
        conversation: &str,
        window: &SummaryWindow,
        states: &mut Vec<RunState>,
    ) -> Result<ConversationOutcome> {
        let messages = self
            .buffer
            .load_window(conversation, window.start_ms)?
            .into_iter()
            .filter(|m| window.contains(m.timestamp))
            .collect::<Vec<_>>();

        let consumed = messages
            .iter()
            .map(|m| m.message_id.clone())
            .collect::<HashSet<_>>();

        let run = self.pipeline.summarize(&messages, window)?;
        states.extend(run.states);
        let result = match run.outcome {
            PipelineOutcome::Summarized(result) => result,
            PipelineOutcome::Skipped(reason) => {
                info!(conversation, reason = reason.as_str(), "conversation skipped");
                return Ok(ConversationOutcome::Skipped {
                    reason: reason.as_str().to_string(),
                });
            }
        };

        let text = format!(
            "{}\n\n{}",
            build_heading(window, self.pipeline.zone()),
            result.narrative
        );
        self.transport.send_message(conversation, &text)?;
        states.push(RunState::Dispatched);
        self.audit.record(
            "dispatch",
            "ok",
            &format!(
                "{conversation}: messages={} chunks={}",
                result.stats.total_messages,
                result.partials.len()
            ),
        );

        let (evicted, eviction_error) = match self.evict(conversation, &consumed, window) {
            Ok(cleared) => {
                self.audit.record(
                    "evict",
                    "ok",
                    &format!(
                        "{conversation}: removed={} buckets_deleted={} buckets_trimmed={}",
                        cleared.messages_removed, cleared.buckets_deleted, cleared.buckets_trimmed
                    ),
                );
                (cleared.messages_removed, None)
            }
            Err(err) => {
                warn!(conversation, error = %err, "eviction failed after dispatch");
                self.audit
                    .record("evict", "failed", &format!("{conversation}: {err}"));
                (0, Some(err.to_string()))
            }
        };
        info!(
            conversation,
            messages = result.stats.total_messages,
            chunks = result.partials.len(),
            evicted,
            "summary dispatched"
        );
        Ok(ConversationOutcome::Dispatched {
            messages: result.stats.total_messages,
            chunks: result.partials.len(),
            evicted,
            eviction_error,
        })
    }

    /// Removes what this run summarized plus anything that already fell out
    /// of the window. Messages that arrived while the model was working stay
    /// for the next run even when their timestamps are inside this window.
    fn evict(
        &self,
        conversation: &str,
        consumed: &HashSet<String>,
        window: &SummaryWindow,
    ) -> Result<ClearOutcome, DigestError> {
        let mut outcome = self.buffer.clear_older_than(conversation, window.start_ms)?;
        outcome.merge(
            self.buffer
                .remove_messages(conversation, consumed, window.end_ms)?,
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::chunker::{Chunker, TokenCounter};
    use crate::digest::message::{Message, MessageKind};
    use crate::digest::model::CompletionModel;
    use crate::digest::paths::DigestPaths;
    use crate::digest::prompts::MAP_PROMPT;
    use std::cell::RefCell;
    use std::rc::Rc;

    const HOUR_MS: i64 = 3_600_000;
    // 2024-03-10T20:00:00Z
    const NOW: i64 = 1_710_100_800_000;

    /// Echoes a fixed map answer per conversation (keyed by the content of the
    /// rendered chunk) and a fixed reduce answer; fails for "boom" content.
    struct KeyedModel {
        empty_for: &'static str,
    }

    impl CompletionModel for KeyedModel {
        fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String> {
            if user_content.contains("boom") {
                return Err(DigestError::Model("upstream 500".to_string()).into());
            }
            if system_prompt == MAP_PROMPT {
                if user_content.contains(self.empty_for) {
                    return Ok(String::new());
                }
                return Ok("parcial".to_string());
            }
            Ok("Métricas Executivas:\n- Total de mensagens: 2".to_string())
        }

        fn label(&self) -> String {
            "keyed".to_string()
        }
    }

    #[derive(Clone, Default)]
    struct RecordingTransport {
        sent: Rc<RefCell<Vec<(String, String)>>>,
        fail_for: Option<&'static str>,
    }

    impl Transport for RecordingTransport {
        fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), DigestError> {
            if self.fail_for == Some(conversation_id) {
                return Err(DigestError::Dispatch("bridge offline".to_string()));
            }
            self.sent
                .borrow_mut()
                .push((conversation_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn msg(conversation: &str, id: &str, content: &str, ts: i64) -> Message {
        Message::new(conversation, id, "Ana", content, MessageKind::Text, ts)
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        buffer: RetentionBuffer,
        paths: DigestPaths,
    }

    fn fixture(messages: &[Message]) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = DigestPaths::under(dir.path());
        let buffer = RetentionBuffer::new(&paths.buffer_dir);
        for m in messages {
            buffer.append(m).expect("append");
        }
        Fixture {
            _dir: dir,
            buffer,
            paths,
        }
    }

    fn job(fx: &Fixture, model: KeyedModel, transport: RecordingTransport) -> SummaryJob {
        let zone = Zone::parse("UTC").expect("zone");
        SummaryJob::new(
            fx.buffer.clone(),
            SummarizerPipeline::new(
                Box::new(model),
                Chunker::new(TokenCounter::Estimate, zone, 1500),
                zone,
            ),
            Box::new(transport),
            AuditLog::new(&fx.paths),
            JobSettings {
                window_minutes: 1440,
            },
        )
    }

    #[test]
    fn heading_uses_window_hours_and_zoned_clock() {
        let zone = Zone::parse("America/Sao_Paulo").expect("zone");
        let window = SummaryWindow::ending_at(NOW, 1440);
        assert_eq!(
            build_heading(&window, &zone),
            "Resumo das últimas 24h — 10/03/2024 (17:00 - 17:00)"
        );
    }

    #[test]
    fn dispatches_and_evicts_window() {
        let fx = fixture(&[
            msg("a@g.us", "1", "bom dia", NOW - 3 * HOUR_MS),
            msg("a@g.us", "2", "reunião amanhã", NOW - HOUR_MS),
        ]);
        let transport = RecordingTransport::default();
        let sent = Rc::clone(&transport.sent);

        let report = job(&fx, KeyedModel { empty_for: "\u{0}" }, transport)
            .run(NOW)
            .expect("run");

        assert_eq!(report.dispatched(), 1);
        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "a@g.us");
        assert!(sent[0].1.starts_with("Resumo das últimas 24h — 10/03/2024 (20:00 - 20:00)\n\n"));
        assert!(sent[0].1.ends_with("Total de mensagens: 2"));
        assert!(fx.buffer.load_window("a@g.us", 0).expect("load").is_empty());
        assert_eq!(
            report.conversations[0].states.last(),
            Some(&RunState::Dispatched)
        );
        let audit = std::fs::read_to_string(fx.paths.audit_log()).expect("audit");
        assert!(audit.contains("\"phase\":\"dispatch\""));
        assert!(audit.contains("\"phase\":\"evict\""));
    }

    #[test]
    fn all_empty_partials_neither_dispatch_nor_evict() {
        let fx = fixture(&[msg("a@g.us", "1", "silêncio", NOW - HOUR_MS)]);
        let transport = RecordingTransport::default();
        let sent = Rc::clone(&transport.sent);

        let report = job(&fx, KeyedModel { empty_for: "silêncio" }, transport)
            .run(NOW)
            .expect("run");

        assert_eq!(report.skipped(), 1);
        assert!(sent.borrow().is_empty());
        assert_eq!(fx.buffer.load_window("a@g.us", 0).expect("load").len(), 1);
    }

    #[test]
    fn dispatch_failure_keeps_history_for_next_run() {
        let fx = fixture(&[msg("a@g.us", "1", "oi", NOW - HOUR_MS)]);
        let transport = RecordingTransport {
            fail_for: Some("a@g.us"),
            ..RecordingTransport::default()
        };

        let report = job(&fx, KeyedModel { empty_for: "\u{0}" }, transport)
            .run(NOW)
            .expect("run");

        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.conversations[0].outcome,
            ConversationOutcome::Failed { code: "E004_DISPATCH", .. }
        ));
        assert_eq!(fx.buffer.load_window("a@g.us", 0).expect("load").len(), 1);
    }

    #[test]
    fn one_failing_conversation_does_not_block_others() {
        let fx = fixture(&[
            msg("a@g.us", "1", "boom", NOW - HOUR_MS),
            msg("b@g.us", "1", "tudo certo", NOW - HOUR_MS),
        ]);
        let transport = RecordingTransport::default();
        let sent = Rc::clone(&transport.sent);

        let report = job(&fx, KeyedModel { empty_for: "\u{0}" }, transport)
            .run(NOW)
            .expect("run");

        assert_eq!(report.failed(), 1);
        assert_eq!(report.dispatched(), 1);
        assert_eq!(sent.borrow()[0].0, "b@g.us");
        assert_eq!(fx.buffer.load_window("a@g.us", 0).expect("load").len(), 1);
    }

    #[test]
    fn messages_at_or_after_window_end_are_kept() {
        let fx = fixture(&[
            msg("a@g.us", "1", "antes", NOW - HOUR_MS),
            msg("a@g.us", "2", "depois", NOW + 1),
            msg("a@g.us", "3", "antigo", NOW - 30 * HOUR_MS),
        ]);
        let report = job(&fx, KeyedModel { empty_for: "\u{0}" }, RecordingTransport::default())
            .run(NOW)
            .expect("run");

        assert!(matches!(
            report.conversations[0].outcome,
            ConversationOutcome::Dispatched { messages: 1, evicted: 2, .. }
        ));
        let left = fx.buffer.load_window("a@g.us", 0).expect("load");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].content, "depois");
    }

    /// Delivers like a bridge that is slow enough for ingestion to append a
    /// late message, stamped inside the window, before eviction runs.
    struct AppendingTransport {
        buffer: RetentionBuffer,
        late: Message,
    }

    impl Transport for AppendingTransport {
        fn send_message(&self, _conversation_id: &str, _text: &str) -> Result<(), DigestError> {
            self.buffer.append(&self.late)
        }
    }

    #[test]
    fn message_arriving_during_the_run_survives_eviction() {
        let fx = fixture(&[msg("a@g.us", "1", "bom dia", NOW - 3 * HOUR_MS)]);
        let late = msg("a@g.us", "2", "cheguei atrasado", NOW - 2 * HOUR_MS);
        let transport = AppendingTransport {
            buffer: fx.buffer.clone(),
            late: late.clone(),
        };
        let zone = Zone::parse("UTC").expect("zone");
        let job = SummaryJob::new(
            fx.buffer.clone(),
            SummarizerPipeline::new(
                Box::new(KeyedModel { empty_for: "\u{0}" }),
                Chunker::new(TokenCounter::Estimate, zone, 1500),
                zone,
            ),
            Box::new(transport),
            AuditLog::new(&fx.paths),
            JobSettings {
                window_minutes: 1440,
            },
        );

        let report = job.run(NOW).expect("run");
        assert!(matches!(
            report.conversations[0].outcome,
            ConversationOutcome::Dispatched { messages: 1, evicted: 1, .. }
        ));
        let left = fx.buffer.load_window("a@g.us", 0).expect("load");
        assert_eq!(left, vec![late]);
    }

    #[test]
    fn empty_buffer_yields_empty_report() {
        let fx = fixture(&[]);
        let report = job(&fx, KeyedModel { empty_for: "\u{0}" }, RecordingTransport::default())
            .run(NOW)
            .expect("run");
        assert!(report.conversations.is_empty());
    }
}
