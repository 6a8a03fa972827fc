//! Layered runtime configuration.
//!
//! Values resolve file > environment > default: every field has a working
//! default so the engine runs with no config at all, `STRATA_*` environment
//! variables override the defaults, and a TOML config file (when present)
//! wins over both — a variable only fills in what the file leaves unset.
//! Environment lookup is injected as a closure so tests can exercise the
//! override path without touching process state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_gateway::GatewayConfig;
use strata_splitter::SplitterConfig;

/// Environment variable prefix for overrides (`STRATA_DB_PATH`, ...).
const ENV_PREFIX: &str = "STRATA_";

/// Everything the engine needs to run, nested sections included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// SQLite database holding documents, chunks, tasks and vectors
    pub db_path: PathBuf,
    /// Processor lock token file
    pub lock_path: PathBuf,
    /// Attempts before a task is marked permanently failed
    pub max_retries: u32,
    /// Tasks claimed per drain pass
    pub drain_batch_size: usize,
    /// Wall-clock budget for one drain, in seconds
    pub drain_budget_secs: u64,
    /// Completed/failed tasks older than this are pruned
    pub task_retention_days: i64,
    /// Texts embedded per gateway call
    pub embed_batch_size: usize,
    /// Pause between embedding batches, in milliseconds
    pub embed_batch_pause_ms: u64,
    /// TTL of the retrieval engine's document reverse-lookup cache
    pub cache_ttl_secs: u64,
    /// Maximum cosine distance for a hit to survive the threshold filter
    pub search_threshold: f32,
    /// Lock tokens older than this are treated as stale even when owner
    /// liveness cannot be determined, in seconds
    pub lock_staleness_secs: u64,
    pub gateway: GatewayConfig,
    pub splitter: SplitterConfig,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("strata.db"),
            lock_path: PathBuf::from("strata.lock"),
            max_retries: 3,
            drain_batch_size: 5,
            drain_budget_secs: 900,
            task_retention_days: 7,
            embed_batch_size: 50,
            embed_batch_pause_ms: 100,
            cache_ttl_secs: 60,
            search_threshold: 0.75,
            lock_staleness_secs: 3600,
            gateway: GatewayConfig::default(),
            splitter: SplitterConfig::default(),
        }
    }
}

impl StrataConfig {
    /// Load the layered configuration. Precedence is file > environment >
    /// default: `STRATA_*` variables override only the keys the TOML file
    /// at `path` (if given) leaves unset.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// `load` with the environment lookup injected, so the precedence rules
    /// can be exercised without touching process state.
    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let Some(path) = path else {
            let mut config = Self::default();
            config.apply_overrides(lookup);
            return Ok(config);
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let file_keys: toml::Table = text
            .parse()
            .with_context(|| format!("parsing config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        // File values win: mask every override whose key the file sets.
        config.apply_overrides(|key| {
            if set_in_file(&file_keys, key) {
                None
            } else {
                lookup(key)
            }
        });
        Ok(config)
    }

    /// Parse a TOML config file; missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Apply environment-style overrides through an injected lookup.
    ///
    /// Unparseable values are ignored with a warning rather than failing
    /// startup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("DB_PATH") {
            self.db_path = PathBuf::from(value);
        }
        if let Some(value) = var("LOCK_PATH") {
            self.lock_path = PathBuf::from(value);
        }
        parse_into(&mut self.max_retries, "MAX_RETRIES", var("MAX_RETRIES"));
        parse_into(
            &mut self.drain_batch_size,
            "DRAIN_BATCH_SIZE",
            var("DRAIN_BATCH_SIZE"),
        );
        parse_into(
            &mut self.drain_budget_secs,
            "DRAIN_BUDGET_SECS",
            var("DRAIN_BUDGET_SECS"),
        );
        parse_into(
            &mut self.task_retention_days,
            "TASK_RETENTION_DAYS",
            var("TASK_RETENTION_DAYS"),
        );
        parse_into(
            &mut self.embed_batch_size,
            "EMBED_BATCH_SIZE",
            var("EMBED_BATCH_SIZE"),
        );
        parse_into(
            &mut self.embed_batch_pause_ms,
            "EMBED_BATCH_PAUSE_MS",
            var("EMBED_BATCH_PAUSE_MS"),
        );
        parse_into(
            &mut self.cache_ttl_secs,
            "CACHE_TTL_SECS",
            var("CACHE_TTL_SECS"),
        );
        parse_into(
            &mut self.search_threshold,
            "SEARCH_THRESHOLD",
            var("SEARCH_THRESHOLD"),
        );
        parse_into(
            &mut self.lock_staleness_secs,
            "LOCK_STALENESS_SECS",
            var("LOCK_STALENESS_SECS"),
        );
        if let Some(value) = var("COMPLETION_MODEL") {
            self.gateway.completion_model = value;
        }
        if let Some(value) = var("EMBEDDING_MODEL") {
            self.gateway.embedding_model = value;
        }
    }

    pub fn drain_budget(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.drain_budget_secs)
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn embed_batch_pause(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.embed_batch_pause_ms)
    }

    pub fn lock_staleness(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_staleness_secs)
    }
}

/// Whether the TOML file explicitly sets the field an environment variable
/// targets. The model keys live in the `[gateway]` table; everything else is
/// top-level under its lowercased name.
fn set_in_file(file: &toml::Table, env_key: &str) -> bool {
    let Some(name) = env_key.strip_prefix(ENV_PREFIX) else {
        return false;
    };
    let field = name.to_lowercase();
    match name {
        "COMPLETION_MODEL" | "EMBEDDING_MODEL" => file
            .get("gateway")
            .and_then(|value| value.as_table())
            .is_some_and(|gateway| gateway.contains_key(&field)),
        _ => file.contains_key(&field),
    }
}

fn parse_into<T: std::str::FromStr>(slot: &mut T, name: &str, value: Option<String>) {
    if let Some(value) = value {
        match value.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => {
                tracing::warn!("ignoring unparseable {ENV_PREFIX}{name}={value:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = StrataConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.drain_batch_size, 5);
        assert_eq!(config.drain_budget_secs, 900);
        assert_eq!(config.embed_batch_size, 50);
        assert_eq!(config.gateway.context_budget, 128_000);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: StrataConfig = toml::from_str(
            r#"
            db_path = "data/index.db"
            max_retries = 5

            [gateway]
            completion_model = "big-model"
            embedding_model = "small-embed"
            context_budget = 64000
            call_timeout = 30
            "#,
        )
        .unwrap();

        assert_eq!(parsed.db_path, PathBuf::from("data/index.db"));
        assert_eq!(parsed.max_retries, 5);
        // Untouched keys keep their defaults.
        assert_eq!(parsed.drain_batch_size, 5);
        assert_eq!(parsed.gateway.completion_model, "big-model");
        assert_eq!(
            parsed.gateway.call_timeout,
            std::time::Duration::from_secs(30)
        );
        assert_eq!(parsed.splitter.content_target, 1000);
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let mut env = HashMap::new();
        env.insert("STRATA_DB_PATH".to_string(), "/tmp/other.db".to_string());
        env.insert("STRATA_MAX_RETRIES".to_string(), "7".to_string());
        env.insert("STRATA_SEARCH_THRESHOLD".to_string(), "0.5".to_string());
        env.insert(
            "STRATA_EMBEDDING_MODEL".to_string(),
            "alt-embed".to_string(),
        );

        let mut config = StrataConfig::default();
        config.apply_overrides(|key| env.get(key).cloned());

        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.search_threshold, 0.5);
        assert_eq!(config.gateway.embedding_model, "alt-embed");
    }

    #[test]
    fn test_file_wins_over_environment() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "max_retries = 5\n").unwrap();

        let mut env = HashMap::new();
        env.insert("STRATA_MAX_RETRIES".to_string(), "7".to_string());
        env.insert("STRATA_DRAIN_BATCH_SIZE".to_string(), "9".to_string());

        let config = StrataConfig::load_with(Some(&path), |key| env.get(key).cloned()).unwrap();

        // The file sets max_retries, so the variable loses there; the key
        // the file leaves unset still comes from the environment.
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.drain_batch_size, 9);
    }

    #[test]
    fn test_file_wins_over_environment_in_nested_sections() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[gateway]\nembedding_model = \"file-embed\"\n").unwrap();

        let mut env = HashMap::new();
        env.insert("STRATA_EMBEDDING_MODEL".to_string(), "env-embed".to_string());
        env.insert(
            "STRATA_COMPLETION_MODEL".to_string(),
            "env-complete".to_string(),
        );

        let config = StrataConfig::load_with(Some(&path), |key| env.get(key).cloned()).unwrap();

        assert_eq!(config.gateway.embedding_model, "file-embed");
        assert_eq!(config.gateway.completion_model, "env-complete");
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = StrataConfig::default();
        config.apply_overrides(|key| {
            (key == "STRATA_MAX_RETRIES").then(|| "not-a-number".to_string())
        });
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = StrataConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: StrataConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.db_path, config.db_path);
        assert_eq!(parsed.max_retries, config.max_retries);
    }
}
