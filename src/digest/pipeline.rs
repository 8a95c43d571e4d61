use crate::digest::chunker::Chunker;
use crate::digest::message::{Message, SummaryWindow};
use crate::digest::model::CompletionModel;
use crate::digest::prompts::{MAP_PROMPT, REDUCE_PROMPT, build_reduce_input};
use crate::digest::stats::{Stats, aggregate};
use crate::digest::zone::Zone;
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Chunking,
    Mapping,
    Aggregating,
    Reducing,
    Dispatched,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyWindow,
    EmptyPartials,
    EmptyNarrative,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::EmptyWindow => "empty window",
            SkipReason::EmptyPartials => "every chunk summary came back empty",
            SkipReason::EmptyNarrative => "final summary came back empty",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryResult {
    pub narrative: String,
    /// Retained (non-empty) map outputs in chunk order.
    pub partials: Vec<String>,
    pub stats: Stats,
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Summarized(SummaryResult),
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub states: Vec<RunState>,
    pub outcome: PipelineOutcome,
}

impl PipelineRun {
    fn finish(mut states: Vec<RunState>, terminal: RunState, outcome: PipelineOutcome) -> Self {
        states.push(terminal);
        Self { states, outcome }
    }
}

pub struct SummarizerPipeline {
    model: Box<dyn CompletionModel>,
    chunker: Chunker,
    zone: Zone,
}

impl SummarizerPipeline {
    pub fn new(model: Box<dyn CompletionModel>, chunker: Chunker, zone: Zone) -> Self {
        Self {
            model,
            chunker,
            zone,
        }
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    pub fn model_label(&self) -> String {
        self.model.label()
    }

    /// Chunk, map each chunk, aggregate stats over the whole window, reduce.
    /// Model errors propagate; empty model output is a skip, never an error.
    /// The terminal state recorded on success is `Reducing`; dispatch is the
    /// caller's business.
    pub fn summarize(&self, messages: &[Message], window: &SummaryWindow) -> Result<PipelineRun> {
        let mut states = vec![RunState::Idle, RunState::Chunking];
        if messages.is_empty() {
            return Ok(PipelineRun::finish(
                states,
                RunState::Skipped,
                PipelineOutcome::Skipped(SkipReason::EmptyWindow),
            ));
        }

        let chunks = self.chunker.chunk(messages);
        debug!(messages = messages.len(), chunks = chunks.len(), "window chunked");

        states.push(RunState::Mapping);
        let mut partials = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let partial = self
                .model
                .complete(MAP_PROMPT, &chunk.render(&self.zone))
                .with_context(|| format!("map call failed for chunk {}", index + 1))?;
            let partial = partial.trim();
            if partial.is_empty() {
                warn!(chunk_index = index + 1, tokens = chunk.tokens, "chunk summary empty, dropping");
                continue;
            }
            partials.push(partial.to_string());
        }
        if partials.is_empty() {
            return Ok(PipelineRun::finish(
                states,
                RunState::Skipped,
                PipelineOutcome::Skipped(SkipReason::EmptyPartials),
            ));
        }

        states.push(RunState::Aggregating);
        let stats = aggregate(messages, window, &self.zone);
        let stats_json = serde_json::to_string_pretty(&stats)?;

        states.push(RunState::Reducing);
        let narrative = self
            .model
            .complete(REDUCE_PROMPT, &build_reduce_input(&partials, &stats_json))
            .context("reduce call failed")?;
        let narrative = narrative.trim();
        if narrative.is_empty() {
            warn!(partials = partials.len(), "final summary empty, skipping dispatch");
            return Ok(PipelineRun::finish(
                states,
                RunState::Failed,
                PipelineOutcome::Skipped(SkipReason::EmptyNarrative),
            ));
        }

        info!(
            chunks = chunks.len(),
            partials = partials.len(),
            total_messages = stats.total_messages,
            "summary reduced"
        );
        Ok(PipelineRun {
            states,
            outcome: PipelineOutcome::Summarized(SummaryResult {
                narrative: narrative.to_string(),
                partials,
                stats,
            }),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::digest::chunker::TokenCounter;
    use crate::digest::message::MessageKind;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Replays scripted map answers in order and records every reduce input.
    pub(crate) struct ScriptedModel {
        pub map_answers: RefCell<VecDeque<Result<String, String>>>,
        pub reduce_answer: Option<String>,
        pub reduce_inputs: Rc<RefCell<Vec<String>>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(map_answers: &[&str], reduce_answer: Option<&str>) -> Self {
            Self {
                map_answers: RefCell::new(
                    map_answers.iter().map(|s| Ok((*s).to_string())).collect(),
                ),
                reduce_answer: reduce_answer.map(ToOwned::to_owned),
                reduce_inputs: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl CompletionModel for ScriptedModel {
        fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String> {
            if system_prompt == MAP_PROMPT {
                return match self.map_answers.borrow_mut().pop_front() {
                    Some(Ok(text)) => Ok(text),
                    Some(Err(err)) => Err(crate::error::DigestError::Model(err).into()),
                    None => Ok("parcial".to_string()),
                };
            }
            self.reduce_inputs.borrow_mut().push(user_content.to_string());
            Ok(self.reduce_answer.clone().unwrap_or_default())
        }

        fn label(&self) -> String {
            "scripted".to_string()
        }
    }

    pub(crate) fn message(id: usize, ts: i64, sender: &str) -> Message {
        Message::new("a@g.us", id.to_string(), sender, "conteúdo", MessageKind::Text, ts)
    }

    /// One message per chunk: the estimate counter costs far more than 1 token.
    fn pipeline(model: ScriptedModel) -> SummarizerPipeline {
        let zone = Zone::parse("UTC").expect("zone");
        SummarizerPipeline::new(
            Box::new(model),
            Chunker::new(TokenCounter::Estimate, zone, 1),
            zone,
        )
    }

    fn three_messages() -> (Vec<Message>, SummaryWindow) {
        let msgs = vec![
            message(1, 1_000, "Ana"),
            message(2, 2_000, "Bia"),
            message(3, 3_000, "Caio"),
        ];
        (msgs, SummaryWindow { start_ms: 0, end_ms: 10_000 })
    }

    #[test]
    fn empty_chunk_is_dropped_and_reduce_sees_two_partials() {
        let model = ScriptedModel::new(&["p1", "", "p3"], Some("narrativa"));
        let inputs = Rc::clone(&model.reduce_inputs);
        let (msgs, window) = three_messages();

        let run = pipeline(model).summarize(&msgs, &window).expect("run");
        let PipelineOutcome::Summarized(result) = run.outcome else {
            panic!("expected a summary");
        };
        assert_eq!(result.partials, vec!["p1", "p3"]);
        assert_eq!(result.stats.total_messages, 3);
        assert_eq!(result.narrative, "narrativa");
        let reduce_input = inputs.borrow()[0].clone();
        assert!(reduce_input.contains("Trecho 1:\np1\n\nTrecho 2:\np3"));
        assert!(!reduce_input.contains("Trecho 3"));
        assert_eq!(
            run.states,
            vec![
                RunState::Idle,
                RunState::Chunking,
                RunState::Mapping,
                RunState::Aggregating,
                RunState::Reducing
            ]
        );
    }

    #[test]
    fn all_empty_chunks_skip_without_reduce() {
        let model = ScriptedModel::new(&["", " ", ""], Some("never"));
        let inputs = Rc::clone(&model.reduce_inputs);
        let (msgs, window) = three_messages();

        let run = pipeline(model).summarize(&msgs, &window).expect("run");
        assert!(matches!(
            run.outcome,
            PipelineOutcome::Skipped(SkipReason::EmptyPartials)
        ));
        assert_eq!(run.states.last(), Some(&RunState::Skipped));
        assert!(inputs.borrow().is_empty());
    }

    #[test]
    fn empty_window_skips_before_mapping() {
        let run = pipeline(ScriptedModel::new(&[], None))
            .summarize(&[], &SummaryWindow { start_ms: 0, end_ms: 1 })
            .expect("run");
        assert!(matches!(
            run.outcome,
            PipelineOutcome::Skipped(SkipReason::EmptyWindow)
        ));
        assert!(!run.states.contains(&RunState::Mapping));
    }

    #[test]
    fn empty_reduce_is_failed_state_but_skip_outcome() {
        let (msgs, window) = three_messages();
        let run = pipeline(ScriptedModel::new(&["a", "b", "c"], Some("")))
            .summarize(&msgs, &window)
            .expect("run");
        assert!(matches!(
            run.outcome,
            PipelineOutcome::Skipped(SkipReason::EmptyNarrative)
        ));
        assert_eq!(run.states.last(), Some(&RunState::Failed));
    }

    #[test]
    fn map_error_propagates() {
        let model = ScriptedModel::new(&["a"], Some("x"));
        model
            .map_answers
            .borrow_mut()
            .push_back(Err("rate limited".to_string()));
        let (msgs, window) = three_messages();
        let err = pipeline(model).summarize(&msgs, &window).expect_err("error");
        assert_eq!(crate::error::classify(&err), "E003_MODEL");
    }
}
