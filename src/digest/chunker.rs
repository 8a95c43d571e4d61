use crate::digest::message::Message;
use crate::digest::zone::Zone;
use tiktoken_rs::CoreBPE;
use tracing::warn;

/// A contiguous run of window messages that fits one map-stage request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub messages: Vec<Message>,
    pub tokens: usize,
}

impl Chunk {
    pub fn render(&self, zone: &Zone) -> String {
        self.messages
            .iter()
            .map(|m| render_line(m, zone))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Model-facing rendering of one message; this is what the budget measures.
pub fn render_line(message: &Message, zone: &Zone) -> String {
    format!(
        "[{}] {}: {}",
        zone.stamp_label(message.timestamp),
        message.sender,
        message.display_content()
    )
}

pub enum TokenCounter {
    Bpe(CoreBPE),
    /// Roughly four characters per token; used only when no BPE loads.
    Estimate,
}

impl TokenCounter {
    pub fn for_model(model: &str) -> Self {
        match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => return Self::Bpe(bpe),
            Err(err) => {
                warn!(model, error = %err, "unknown tokenizer for model, falling back to cl100k_base");
            }
        }
        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Self::Bpe(bpe),
            Err(err) => {
                warn!(error = %err, "cl100k_base unavailable, estimating tokens from length");
                Self::Estimate
            }
        }
    }

    pub fn count(&self, text: &str) -> usize {
        match self {
            Self::Bpe(bpe) => bpe.encode_with_special_tokens(text).len(),
            Self::Estimate => text.chars().count().div_ceil(4),
        }
    }
}

pub struct Chunker {
    counter: TokenCounter,
    zone: Zone,
    budget: usize,
}

impl Chunker {
    pub fn new(counter: TokenCounter, zone: Zone, budget: usize) -> Self {
        Self {
            counter,
            zone,
            budget,
        }
    }

    pub fn chunk(&self, messages: &[Message]) -> Vec<Chunk> {
        chunk_by_budget(messages, self.budget, |m| {
            self.counter.count(&render_line(m, &self.zone))
        })
    }
}

/// Greedy partition: keep adding messages while the running token sum stays
/// within `budget`; close the current chunk only when it is non-empty and the
/// next message would overflow it. An oversized message therefore travels
/// alone rather than being split or dropped.
pub fn chunk_by_budget<F>(messages: &[Message], budget: usize, mut count: F) -> Vec<Chunk>
where
    F: FnMut(&Message) -> usize,
{
    let mut out = Vec::new();
    let mut current = Vec::new();
    let mut current_tokens = 0usize;

    for message in messages {
        let tokens = count(message);
        if !current.is_empty() && current_tokens.saturating_add(tokens) > budget {
            out.push(Chunk {
                messages: std::mem::take(&mut current),
                tokens: current_tokens,
            });
            current_tokens = 0;
        }
        current.push(message.clone());
        current_tokens = current_tokens.saturating_add(tokens);
    }

    if !current.is_empty() {
        out.push(Chunk {
            messages: current,
            tokens: current_tokens,
        });
    }
    out
}
