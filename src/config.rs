use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "HealthRoll";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on rows pulled per domain per iteration.
pub const MAX_BATCH_SIZE: usize = 500;

pub const DEFAULT_BULK_DEBOUNCE_SECS: u64 = 60;
pub const DEFAULT_INCREMENTAL_DEBOUNCE_SECS: u64 = 15;
pub const DEFAULT_BULK_THRESHOLD: i64 = 500;
pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_ITERATION_SLEEP_MS: u64 = 1000;
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.88;
pub const DEFAULT_SEARCH_TOP_K: usize = 10;
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_ORACLE_MODEL: &str = "medgemma:4b";
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 60;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "healthroll=info"
}

/// ~/HealthRoll/ on all platforms. Falls back to the working directory when
/// no home directory can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn default_db_path() -> PathBuf {
    app_data_dir().join("healthroll.db")
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

// ═══════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════

/// One countdown for the whole process, or one per signal source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebounceMode {
    Global,
    PerSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebounceConfig {
    pub bulk_delay: Duration,
    pub incremental_delay: Duration,
    /// Pending rows at or above which a signal counts as a bulk import.
    pub bulk_threshold: i64,
    pub mode: DebounceMode,
}

impl DebounceConfig {
    /// Countdown length for the pending-row count sampled at signal time.
    pub fn delay_for(&self, pending: i64) -> Duration {
        if pending >= self.bulk_threshold {
            self.bulk_delay
        } else {
            self.incremental_delay
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            bulk_delay: Duration::from_secs(DEFAULT_BULK_DEBOUNCE_SECS),
            incremental_delay: Duration::from_secs(DEFAULT_INCREMENTAL_DEBOUNCE_SECS),
            bulk_threshold: DEFAULT_BULK_THRESHOLD,
            mode: DebounceMode::Global,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorConfig {
    /// Rows pulled per domain per iteration, within 1..=MAX_BATCH_SIZE.
    pub batch_size: usize,
    pub iteration_sleep: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            iteration_sleep: Duration::from_millis(DEFAULT_ITERATION_SLEEP_MS),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolverConfig {
    /// Minimum similarity (0..1) for a fuzzy category match.
    pub fuzzy_threshold: f64,
    /// Candidates returned by similarity search.
    pub search_top_k: usize,
    /// Re-run external-code search on cache hits still coded `UNKNOWN`.
    pub retry_unresolved_codes: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            search_top_k: DEFAULT_SEARCH_TOP_K,
            retry_unresolved_codes: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OracleSettings {
    pub ollama_host: String,
    pub model: String,
    pub embedding_model: String,
    pub timeout: Duration,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            ollama_host: DEFAULT_OLLAMA_HOST.into(),
            model: DEFAULT_ORACLE_MODEL.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
        }
    }
}

/// Everything the worker needs, resolved once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSettings {
    pub db_path: PathBuf,
    pub debounce: DebounceConfig,
    pub processor: ProcessorConfig,
    pub resolver: ResolverConfig,
    pub oracle: OracleSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            debounce: DebounceConfig::default(),
            processor: ProcessorConfig::default(),
            resolver: ResolverConfig::default(),
            oracle: OracleSettings::default(),
        }
    }
}

impl PipelineSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(path) = lookup("HEALTHROLL_DB_PATH").filter(|p| !p.trim().is_empty()) {
            settings.db_path = PathBuf::from(path);
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "HEALTHROLL_BULK_DEBOUNCE_SECS")? {
            settings.debounce.bulk_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "HEALTHROLL_INCREMENTAL_DEBOUNCE_SECS")? {
            settings.debounce.incremental_delay = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<i64, _>(&lookup, "HEALTHROLL_BULK_THRESHOLD")? {
            settings.debounce.bulk_threshold = n;
        }
        if let Some(raw) = lookup("HEALTHROLL_DEBOUNCE_MODE") {
            settings.debounce.mode = match raw.trim() {
                "global" => DebounceMode::Global,
                "per_source" => DebounceMode::PerSource,
                _ => return Err(invalid("HEALTHROLL_DEBOUNCE_MODE", &raw)),
            };
        }

        if let Some(n) = parse_var::<usize, _>(&lookup, "HEALTHROLL_BATCH_SIZE")? {
            settings.processor.batch_size = n.clamp(1, MAX_BATCH_SIZE);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "HEALTHROLL_ITERATION_SLEEP_MS")? {
            settings.processor.iteration_sleep = Duration::from_millis(ms);
        }

        if let Some(t) = parse_var::<f64, _>(&lookup, "HEALTHROLL_FUZZY_THRESHOLD")? {
            if !(0.0..=1.0).contains(&t) {
                return Err(invalid("HEALTHROLL_FUZZY_THRESHOLD", &t.to_string()));
            }
            settings.resolver.fuzzy_threshold = t;
        }
        if let Some(k) = parse_var::<usize, _>(&lookup, "HEALTHROLL_SEARCH_TOP_K")? {
            settings.resolver.search_top_k = k.max(1);
        }

        if let Some(host) = lookup("OLLAMA_HOST").filter(|h| !h.trim().is_empty()) {
            settings.oracle.ollama_host = host.trim().trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("HEALTHROLL_ORACLE_MODEL").filter(|m| !m.trim().is_empty()) {
            settings.oracle.model = model.trim().to_string();
        }
        if let Some(model) = lookup("HEALTHROLL_EMBEDDING_MODEL").filter(|m| !m.trim().is_empty()) {
            settings.oracle.embedding_model = model.trim().to_string();
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "HEALTHROLL_ORACLE_TIMEOUT_SECS")? {
            settings.oracle.timeout = Duration::from_secs(secs);
        }

        Ok(settings)
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| invalid(key, &raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<PipelineSettings, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn app_data_dir_ends_with_app_name() {
        assert!(app_data_dir().ends_with("HealthRoll"));
        assert!(default_db_path().ends_with("healthroll.db"));
    }

    #[test]
    fn defaults_when_unset() {
        let s = settings_from(&[]).unwrap();
        assert_eq!(s.debounce.bulk_delay, Duration::from_secs(60));
        assert_eq!(s.debounce.incremental_delay, Duration::from_secs(15));
        assert_eq!(s.debounce.mode, DebounceMode::Global);
        assert_eq!(s.processor.batch_size, 200);
        assert_eq!(s.processor.iteration_sleep, Duration::from_millis(1000));
        assert_eq!(s.resolver.fuzzy_threshold, 0.88);
        assert_eq!(s.resolver.search_top_k, 10);
        assert!(!s.resolver.retry_unresolved_codes);
        assert_eq!(s.oracle.ollama_host, "http://localhost:11434");
        assert_eq!(s.oracle.model, "medgemma:4b");
    }

    #[test]
    fn overrides_are_applied() {
        let s = settings_from(&[
            ("HEALTHROLL_DB_PATH", "/tmp/roll.db"),
            ("HEALTHROLL_BULK_DEBOUNCE_SECS", "90"),
            ("HEALTHROLL_ITERATION_SLEEP_MS", "0"),
            ("HEALTHROLL_DEBOUNCE_MODE", "per_source"),
            ("OLLAMA_HOST", "http://gpu-box:11434/"),
        ])
        .unwrap();
        assert_eq!(s.db_path, PathBuf::from("/tmp/roll.db"));
        assert_eq!(s.debounce.bulk_delay, Duration::from_secs(90));
        assert_eq!(s.processor.iteration_sleep, Duration::ZERO);
        assert_eq!(s.debounce.mode, DebounceMode::PerSource);
        assert_eq!(s.oracle.ollama_host, "http://gpu-box:11434");
    }

    #[test]
    fn batch_size_is_clamped() {
        let s = settings_from(&[("HEALTHROLL_BATCH_SIZE", "5000")]).unwrap();
        assert_eq!(s.processor.batch_size, MAX_BATCH_SIZE);
        let s = settings_from(&[("HEALTHROLL_BATCH_SIZE", "0")]).unwrap();
        assert_eq!(s.processor.batch_size, 1);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = settings_from(&[("HEALTHROLL_BATCH_SIZE", "lots")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "HEALTHROLL_BATCH_SIZE".into(),
                value: "lots".into()
            }
        );
        assert!(settings_from(&[("HEALTHROLL_FUZZY_THRESHOLD", "1.5")]).is_err());
        assert!(settings_from(&[("HEALTHROLL_DEBOUNCE_MODE", "sometimes")]).is_err());
    }

    #[test]
    fn delay_depends_on_pending_volume() {
        let cfg = DebounceConfig::default();
        assert_eq!(cfg.delay_for(10), Duration::from_secs(15));
        assert_eq!(cfg.delay_for(500), Duration::from_secs(60));
    }
}
