//! Completion-model collaborator: a `(system, user) -> text` call over one of
//! the supported HTTP providers.

use crate::digest::util::truncate_with_ellipsis;
use crate::error::DigestError;
use anyhow::Result;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{Value, json};
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 60;
const ERROR_BODY_CHARS: usize = 300;
const ANTHROPIC_MAX_TOKENS: u32 = 2048;
const TEMPERATURE: f64 = 0.2;

pub trait CompletionModel {
    /// Empty text is a valid answer; callers decide what an empty result means.
    fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String>;

    fn label(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    OpenAiCompatible,
}

impl Provider {
    pub fn label(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::OpenAiCompatible => "openai-compatible",
        }
    }

    pub fn parse_alias(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Provider::OpenAi),
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "gemini" | "google" => Some(Provider::Gemini),
            "openai-compatible" | "compatible" | "deepseek" => Some(Provider::OpenAiCompatible),
            _ => None,
        }
    }

    /// Environment variables holding this provider's credential, in priority order.
    pub fn key_vars(self) -> &'static [&'static str] {
        match self {
            Provider::OpenAi => &["DIGEST_API_KEY", "OPENAI_API_KEY", "AI_API_KEY"],
            Provider::Anthropic => &["DIGEST_API_KEY", "ANTHROPIC_API_KEY", "AI_API_KEY"],
            Provider::Gemini => &["DIGEST_API_KEY", "GEMINI_API_KEY", "AI_API_KEY"],
            Provider::OpenAiCompatible => &[
                "DIGEST_API_KEY",
                "AI_API_KEY",
                "DEEPSEEK_API_KEY",
                "OPENAI_API_KEY",
            ],
        }
    }
}

/// `provider:model` → explicit provider hint plus bare model id.
pub fn parse_prefixed_model(raw: &str) -> (Option<Provider>, String) {
    let trimmed = raw.trim();
    if let Some((prefix, model)) = trimmed.split_once(':')
        && let Some(provider) = Provider::parse_alias(prefix)
    {
        return (Some(provider), model.trim().to_string());
    }
    (None, trimmed.to_string())
}

pub fn infer_provider_from_model(model: &str) -> Option<Provider> {
    let lower = model.trim().to_ascii_lowercase();
    if lower.starts_with("deepseek-") {
        return Some(Provider::OpenAiCompatible);
    }
    if lower.starts_with("claude-") {
        return Some(Provider::Anthropic);
    }
    if lower.starts_with("gemini-") {
        return Some(Provider::Gemini);
    }
    if lower.starts_with("gpt-")
        || lower.starts_with("o1")
        || lower.starts_with("o3")
        || lower.starts_with("o4")
    {
        return Some(Provider::OpenAi);
    }
    None
}

pub fn default_compatible_base_url(model: &str) -> &'static str {
    if model.trim().to_ascii_lowercase().starts_with("deepseek-") {
        "https://api.deepseek.com"
    } else {
        "https://api.openai.com"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

pub struct HttpCompletionModel {
    settings: ModelSettings,
    client: Client,
}

impl HttpCompletionModel {
    pub fn new(settings: ModelSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { settings, client })
    }

    fn request(&self, system_prompt: &str, user_content: &str) -> RequestBuilder {
        let s = &self.settings;
        match s.provider {
            Provider::OpenAi => self
                .client
                .post("https://api.openai.com/v1/responses")
                .bearer_auth(&s.api_key)
                .json(&json!({
                    "model": s.model,
                    "input": [
                        {"role": "system", "content": system_prompt},
                        {"role": "user", "content": user_content}
                    ],
                    "temperature": TEMPERATURE
                })),
            Provider::OpenAiCompatible => {
                let base = s
                    .base_url
                    .as_deref()
                    .unwrap_or_else(|| default_compatible_base_url(&s.model))
                    .trim_end_matches('/');
                self.client
                    .post(format!("{base}/v1/chat/completions"))
                    .bearer_auth(&s.api_key)
                    .json(&json!({
                        "model": s.model,
                        "messages": [
                            {"role": "system", "content": system_prompt},
                            {"role": "user", "content": user_content}
                        ],
                        "temperature": TEMPERATURE
                    }))
            }
            Provider::Anthropic => self
                .client
                .post("https://api.anthropic.com/v1/messages")
                .header("x-api-key", &s.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&json!({
                    "model": s.model,
                    "max_tokens": ANTHROPIC_MAX_TOKENS,
                    "temperature": TEMPERATURE,
                    "system": system_prompt,
                    "messages": [{"role": "user", "content": user_content}]
                })),
            Provider::Gemini => self
                .client
                .post(format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                    s.model
                ))
                .header("x-goog-api-key", &s.api_key)
                .json(&json!({
                    "systemInstruction": {"parts": [{"text": system_prompt}]},
                    "contents": [{"role": "user", "parts": [{"text": user_content}]}]
                })),
        }
    }
}

impl CompletionModel for HttpCompletionModel {
    fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String> {
        let provider = self.settings.provider;
        let response = self
            .request(system_prompt, user_content)
            .send()
            .map_err(|err| DigestError::Model(format!("{} request failed: {err}", provider.label())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DigestError::Model(format!(
                "{} call failed with status {status}: {}",
                provider.label(),
                truncate_with_ellipsis(&body, ERROR_BODY_CHARS)
            ))
            .into());
        }

        let json: Value = response.json().map_err(|err| {
            DigestError::Model(format!("{} returned invalid JSON: {err}", provider.label()))
        })?;
        let text = match provider {
            Provider::OpenAi => extract_openai_text(&json),
            Provider::OpenAiCompatible => extract_openai_compatible_text(&json),
            Provider::Anthropic => extract_anthropic_text(&json),
            Provider::Gemini => extract_gemini_text(&json),
        };
        Ok(text.unwrap_or_default().trim().to_string())
    }

    fn label(&self) -> String {
        format!("{}:{}", self.settings.provider.label(), self.settings.model)
    }
}

fn join_text_parts(parts: &[Value]) -> Option<String> {
    let chunks = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>();
    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n"))
    }
}

fn extract_openai_text(json: &Value) -> Option<String> {
    if let Some(text) = json.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    let mut chunks = Vec::new();
    for item in json.get("output").and_then(Value::as_array)? {
        if let Some(content) = item.get("content").and_then(Value::as_array)
            && let Some(text) = join_text_parts(content)
        {
            chunks.push(text);
        }
    }
    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n"))
    }
}

fn extract_anthropic_text(json: &Value) -> Option<String> {
    join_text_parts(json.get("content").and_then(Value::as_array)?)
}

fn extract_openai_compatible_text(json: &Value) -> Option<String> {
    let first = json.get("choices").and_then(Value::as_array)?.first()?;
    match first.get("message")?.get("content")? {
        Value::String(s) => Some(s.to_string()),
        Value::Array(parts) => join_text_parts(parts),
        _ => None,
    }
}

fn extract_gemini_text(json: &Value) -> Option<String> {
    let parts = json
        .get("candidates")
        .and_then(Value::as_array)?
        .first()?
        .get("content")?
        .get("parts")
        .and_then(Value::as_array)?;
    join_text_parts(parts)
}
