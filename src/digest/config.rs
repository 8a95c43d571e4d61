use crate::digest::model::{
    ModelSettings, Provider, infer_provider_from_model, parse_prefixed_model,
};
use crate::digest::paths::DigestPaths;
use crate::digest::schedule::CronSchedule;
use crate::digest::zone::Zone;
use crate::error::DigestError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

include!(concat!(env!("OUT_DIR"), "/digest_env_allowlist.rs"));

pub const MIN_WINDOW_MINUTES: u64 = 60;
pub const MAX_WINDOW_MINUTES: u64 = 2880;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: Option<String>,
    pub id: String,
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: None,
            id: "gpt-4o-mini".to_string(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IngestConfig {
    /// Empty means "every group conversation".
    pub target_chat_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: "0 20 * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BufferConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub window_minutes: u64,
    pub timezone: String,
    pub chunk_tokens: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            window_minutes: 1440,
            timezone: "America/Sao_Paulo".to_string(),
            chunk_tokens: 1500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub bin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DigestConfig {
    pub model: ModelConfig,
    pub ingest: IngestConfig,
    pub schedule: ScheduleConfig,
    pub buffer: BufferConfig,
    pub summary: SummaryConfig,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialDigestConfig {
    model: Option<ModelConfig>,
    ingest: Option<IngestConfig>,
    schedule: Option<ScheduleConfig>,
    buffer: Option<BufferConfig>,
    summary: Option<SummaryConfig>,
    bridge: Option<BridgeConfig>,
}

impl DigestConfig {
    pub fn zone(&self) -> Result<Zone, DigestError> {
        Zone::parse(&self.summary.timezone)
    }

    pub fn buffer_root(&self, paths: &DigestPaths) -> PathBuf {
        self.buffer
            .path
            .clone()
            .unwrap_or_else(|| paths.buffer_dir.clone())
    }

    pub fn chunk_budget(&self) -> usize {
        usize::try_from(self.summary.chunk_tokens).unwrap_or(usize::MAX)
    }

    /// Provider, bare model id and credential for summary runs. Only the
    /// commands that call the model need this, so it is resolved lazily.
    pub fn model_settings(
        &self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<ModelSettings, DigestError> {
        let (hint, model) = parse_prefixed_model(&self.model.id);
        let provider = match self.model.provider.as_deref() {
            Some(raw) => Provider::parse_alias(raw).ok_or_else(|| {
                DigestError::Configuration(format!("unknown model provider `{raw}`"))
            })?,
            None => hint
                .or_else(|| infer_provider_from_model(&model))
                .or_else(|| self.model.base_url.as_ref().map(|_| Provider::OpenAiCompatible))
                .ok_or_else(|| {
                    DigestError::Configuration(format!(
                        "cannot infer provider for model `{model}`; set DIGEST_PROVIDER"
                    ))
                })?,
        };
        let api_key = provider
            .key_vars()
            .iter()
            .find_map(|var| lookup(var))
            .ok_or_else(|| {
                DigestError::Configuration(format!(
                    "missing {} credential; set one of {}",
                    provider.label(),
                    provider.key_vars().join(", ")
                ))
            })?;
        Ok(ModelSettings {
            provider,
            model,
            api_key,
            base_url: self.model.base_url.clone(),
        })
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_or_u64(
    lookup: &dyn Fn(&str) -> Option<String>,
    var: &str,
    fallback: u64,
) -> Result<u64, DigestError> {
    match lookup(var) {
        Some(v) => v.parse::<u64>().map_err(|_| {
            DigestError::Configuration(format!("{var} must be a non-negative integer, got `{v}`"))
        }),
        None => Ok(fallback),
    }
}

fn env_or_string(lookup: &dyn Fn(&str) -> Option<String>, var: &str, fallback: &str) -> String {
    lookup(var).unwrap_or_else(|| fallback.to_string())
}

pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn validate(cfg: &DigestConfig) -> Result<(), DigestError> {
    let window = cfg.summary.window_minutes;
    if !(MIN_WINDOW_MINUTES..=MAX_WINDOW_MINUTES).contains(&window) {
        return Err(DigestError::Configuration(format!(
            "window minutes must be within {MIN_WINDOW_MINUTES}..={MAX_WINDOW_MINUTES}, got {window}"
        )));
    }
    if cfg.summary.chunk_tokens == 0 {
        return Err(DigestError::Configuration(
            "chunk token budget must be >= 1".to_string(),
        ));
    }
    if cfg.schedule.cron.trim().is_empty() {
        return Err(DigestError::Configuration(
            "schedule cron expression cannot be empty".to_string(),
        ));
    }
    if cfg.model.id.trim().is_empty() {
        return Err(DigestError::Configuration("model id cannot be empty".to_string()));
    }
    CronSchedule::parse(&cfg.schedule.cron, cfg.zone()?)?;
    Ok(())
}

pub fn resolve_config_path(lookup: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(custom) = lookup("DIGEST_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }
    if let Some(home) = lookup("DIGEST_HOME") {
        return Some(PathBuf::from(home).join("digest.toml"));
    }
    let home = dirs::home_dir()?;
    Some(home.join(".chat-digest").join("digest.toml"))
}

fn merge_file_config(base: &mut DigestConfig, path: &Path) -> Result<(), DigestError> {
    if !path.exists() {
        return Ok(());
    }
    let raw = fs::read_to_string(path).map_err(|err| DigestError::storage(path, err))?;
    let parsed: PartialDigestConfig = toml::from_str(&raw).map_err(|err| {
        DigestError::Configuration(format!("failed to parse {}: {err}", path.display()))
    })?;
    if let Some(model) = parsed.model {
        base.model = model;
    }
    if let Some(ingest) = parsed.ingest {
        base.ingest = ingest;
    }
    if let Some(schedule) = parsed.schedule {
        base.schedule = schedule;
    }
    if let Some(buffer) = parsed.buffer {
        base.buffer = buffer;
    }
    if let Some(summary) = parsed.summary {
        base.summary = summary;
    }
    if let Some(bridge) = parsed.bridge {
        base.bridge = bridge;
    }
    Ok(())
}

/// Defaults, then the TOML file at `file` (if it exists), then overrides
/// read through `lookup`, then validation.
pub fn load_config_from(
    lookup: &dyn Fn(&str) -> Option<String>,
    file: Option<&Path>,
) -> Result<DigestConfig, DigestError> {
    let mut cfg = DigestConfig::default();
    if let Some(path) = file {
        merge_file_config(&mut cfg, path)?;
    }

    if let Some(provider) = lookup("DIGEST_PROVIDER") {
        cfg.model.provider = Some(provider);
    }
    cfg.model.id = env_or_string(lookup, "DIGEST_MODEL", &cfg.model.id);
    if let Some(base_url) = lookup("DIGEST_BASE_URL") {
        cfg.model.base_url = Some(base_url);
    }
    if let Some(ids) = lookup("DIGEST_TARGET_CHAT_IDS") {
        cfg.ingest.target_chat_ids = parse_csv(&ids);
    }
    cfg.schedule.cron = env_or_string(lookup, "DIGEST_SCHEDULE", &cfg.schedule.cron);
    if let Some(path) = lookup("DIGEST_BUFFER_PATH") {
        cfg.buffer.path = Some(PathBuf::from(path));
    }
    cfg.summary.window_minutes =
        env_or_u64(lookup, "DIGEST_WINDOW_MINUTES", cfg.summary.window_minutes)?;
    cfg.summary.timezone = env_or_string(lookup, "DIGEST_TIMEZONE", &cfg.summary.timezone);
    cfg.summary.chunk_tokens =
        env_or_u64(lookup, "DIGEST_CHUNK_TOKENS", cfg.summary.chunk_tokens)?;
    if let Some(bin) = lookup("DIGEST_BRIDGE_BIN") {
        cfg.bridge.bin = Some(bin);
    }

    validate(&cfg)?;
    Ok(cfg)
}

pub fn env_lookup(var: &str) -> Option<String> {
    non_empty(env::var(var).ok())
}

pub fn load_config() -> Result<DigestConfig, DigestError> {
    warn_unknown_env(env::vars());
    let path = resolve_config_path(&env_lookup);
    load_config_from(&env_lookup, path.as_deref())
}

pub fn unknown_env_keys(vars: impl IntoIterator<Item = (String, String)>) -> Vec<String> {
    let mut unknown = vars
        .into_iter()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("DIGEST_"))
        .filter(|key| !GENERATED_DIGEST_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect::<Vec<_>>();
    unknown.sort();
    unknown
}

fn warn_unknown_env(vars: impl IntoIterator<Item = (String, String)>) {
    for key in unknown_env_keys(vars) {
        warn!(key = %key, "unrecognized DIGEST_ environment variable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key: &str| non_empty(map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let cfg = load_config_from(&lookup_from(&[]), None).expect("config");
        assert_eq!(cfg.model.id, "gpt-4o-mini");
        assert_eq!(cfg.schedule.cron, "0 20 * * *");
        assert_eq!(cfg.summary.window_minutes, 1440);
        assert_eq!(cfg.summary.timezone, "America/Sao_Paulo");
        assert_eq!(cfg.summary.chunk_tokens, 1500);
        assert!(cfg.ingest.target_chat_ids.is_empty());
    }

    #[test]
    fn env_overrides_file_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("digest.toml");
        fs::write(
            &path,
            "[summary]\nwindow_minutes = 120\ntimezone = \"UTC\"\nchunk_tokens = 800\n\n[ingest]\ntarget_chat_ids = [\"a@g.us\"]\n",
        )
        .expect("write");
        let lookup = lookup_from(&[
            ("DIGEST_WINDOW_MINUTES", "90"),
            ("DIGEST_TARGET_CHAT_IDS", " x@g.us, ,y@g.us "),
        ]);
        let cfg = load_config_from(&lookup, Some(&path)).expect("config");
        assert_eq!(cfg.summary.window_minutes, 90);
        assert_eq!(cfg.summary.timezone, "UTC");
        assert_eq!(cfg.summary.chunk_tokens, 800);
        assert_eq!(cfg.ingest.target_chat_ids, vec!["x@g.us", "y@g.us"]);
    }

    #[test]
    fn window_outside_bounds_is_rejected() {
        for raw in ["59", "2881"] {
            let err = load_config_from(&lookup_from(&[("DIGEST_WINDOW_MINUTES", raw)]), None)
                .expect_err("bounds");
            assert!(matches!(err, DigestError::Configuration(_)));
        }
    }

    #[test]
    fn malformed_number_is_an_error_not_a_fallback() {
        let err = load_config_from(&lookup_from(&[("DIGEST_CHUNK_TOKENS", "lots")]), None)
            .expect_err("malformed");
        assert!(err.to_string().contains("DIGEST_CHUNK_TOKENS"));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = load_config_from(&lookup_from(&[("DIGEST_TIMEZONE", "Mars/Olympus")]), None)
            .expect_err("zone");
        assert!(matches!(err, DigestError::Configuration(_)));
    }

    #[test]
    fn invalid_cron_is_rejected_at_load() {
        let err = load_config_from(&lookup_from(&[("DIGEST_SCHEDULE", "every evening")]), None)
            .expect_err("cron");
        assert!(matches!(err, DigestError::Configuration(_)));

        let cfg = load_config_from(&lookup_from(&[("DIGEST_SCHEDULE", "30 8 * * 1-5")]), None)
            .expect("weekday cron");
        assert_eq!(cfg.schedule.cron, "30 8 * * 1-5");
    }

    #[test]
    fn model_settings_infer_provider_and_key() {
        let cfg = load_config_from(&lookup_from(&[("DIGEST_MODEL", "claude-3-5-haiku-latest")]), None)
            .expect("config");
        let settings = cfg
            .model_settings(&lookup_from(&[("ANTHROPIC_API_KEY", "sk-ant")]))
            .expect("settings");
        assert_eq!(settings.provider, Provider::Anthropic);
        assert_eq!(settings.api_key, "sk-ant");

        let missing = cfg.model_settings(&lookup_from(&[])).expect_err("no key");
        assert!(matches!(missing, DigestError::Configuration(_)));
    }

    #[test]
    fn unknown_env_keys_flags_only_unrecognized_digest_vars() {
        // Built at runtime so the misspelling never lands in the generated allowlist.
        let typo = format!("{}MODLE", "DIGEST_");
        let vars = vec![
            ("DIGEST_MODEL".to_string(), "x".to_string()),
            (typo.clone(), "x".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
        ];
        assert_eq!(unknown_env_keys(vars), vec![typo]);
    }
}
