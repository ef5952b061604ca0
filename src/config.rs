//! Configuration management
//!
//! Everything is sourced from the environment (after `dotenvy`), with
//! defaults for anything unset. Invalid values are rejected up front.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::social::x_api::DEFAULT_API_BASE;

/// Social provider selection and credentials
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Use the in-memory mock instead of the real API
    pub use_mock: bool,
    pub api_base: String,
    pub bearer_token: Option<String>,
    pub user_id: Option<String>,
    /// Handle the persona posts as (without @)
    pub handle: String,
}

/// Ingestion loop settings
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub poll_interval: Duration,
    /// Compose replies for newly ingested mentions
    pub reply_to_mentions: bool,
}

/// Timeline posting gates and cadence
#[derive(Debug, Clone)]
pub struct PostingConfig {
    pub interval: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub hourly_limit: u32,
    pub daily_limit: u32,
    /// Never post anything
    pub safe_mode: bool,
    /// Stage content for human approval instead of posting
    pub require_approval: bool,
}

/// Learning worker settings
#[derive(Debug, Clone)]
pub struct LearningWorkerConfig {
    pub interval: Duration,
    pub batch_size: usize,
    /// Ask the LLM for extra memories on top of the rule-based ones
    pub use_llm: bool,
}

/// Self-style analysis settings
#[derive(Debug, Clone)]
pub struct SelfStyleConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub min_tweets: usize,
    pub max_tweets: usize,
    pub days: i64,
    pub include_replies: bool,
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path
    pub db_path: PathBuf,

    /// Persona definition (TOML); built-in neutral persona when unset
    pub persona_file: Option<PathBuf>,

    /// Where style guide artifacts are written
    pub style_output_dir: PathBuf,

    /// Redis URL for distributed locks (in-process locks when unset)
    pub redis_url: Option<String>,

    /// Lock expiry for a loop's unit of work
    pub lock_ttl: Duration,

    /// Anthropic API key (LLM disabled when unset)
    pub anthropic_api_key: Option<String>,

    /// Anthropic model id, sent as-is
    pub llm_model: String,

    /// Extra moderation terms
    pub blocked_terms: Vec<String>,

    /// Emit JSON logs
    pub json_logs: bool,

    pub provider: ProviderConfig,
    pub ingestion: IngestionConfig,
    pub posting: PostingConfig,
    pub learning: LearningWorkerConfig,
    pub self_style: SelfStyleConfig,
}

impl Default for Config {
    fn default() -> Self {
        let db_path = default_db_path();
        let style_output_dir = db_path
            .parent()
            .map(|p| p.join("style_guides"))
            .unwrap_or_else(|| PathBuf::from("style_guides"));

        Self {
            db_path,
            persona_file: None,
            style_output_dir,
            redis_url: None,
            lock_ttl: Duration::from_secs(300),
            anthropic_api_key: None,
            llm_model: "claude-sonnet-4-20250514".to_string(),
            blocked_terms: Vec::new(),
            json_logs: false,
            provider: ProviderConfig {
                use_mock: false,
                api_base: DEFAULT_API_BASE.to_string(),
                bearer_token: None,
                user_id: None,
                handle: "persona".to_string(),
            },
            ingestion: IngestionConfig {
                poll_interval: Duration::from_secs(60),
                reply_to_mentions: false,
            },
            posting: PostingConfig {
                interval: Duration::from_secs(3600),
                jitter_min: Duration::ZERO,
                jitter_max: Duration::from_secs(600),
                hourly_limit: 2,
                daily_limit: 12,
                safe_mode: false,
                require_approval: true,
            },
            learning: LearningWorkerConfig {
                interval: Duration::from_secs(300),
                batch_size: 50,
                use_llm: true,
            },
            self_style: SelfStyleConfig {
                enabled: false,
                interval: Duration::from_secs(86_400),
                min_tweets: 20,
                max_tweets: 200,
                days: 30,
                include_replies: false,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let db_path = std::env::var("PERSONA_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let style_output_dir = std::env::var("STYLE_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                db_path
                    .parent()
                    .map(|p| p.join("style_guides"))
                    .unwrap_or(defaults.style_output_dir)
            });

        let blocked_terms = std::env::var("BLOCKED_TERMS")
            .map(|v| {
                v.split(',')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            db_path,
            persona_file: std::env::var("PERSONA_FILE").ok().map(PathBuf::from),
            style_output_dir,
            redis_url: non_empty("REDIS_URL"),
            lock_ttl: secs("LOCK_TTL_SECS", defaults.lock_ttl)?,
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            llm_model: std::env::var("LLM_MODEL").unwrap_or(defaults.llm_model),
            blocked_terms,
            json_logs: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            provider: ProviderConfig {
                use_mock: flag("USE_MOCK_PROVIDER", defaults.provider.use_mock),
                api_base: std::env::var("X_API_BASE").unwrap_or(defaults.provider.api_base),
                bearer_token: non_empty("X_BEARER_TOKEN"),
                user_id: non_empty("X_USER_ID"),
                handle: std::env::var("X_HANDLE")
                    .map(|h| h.trim_start_matches('@').to_string())
                    .unwrap_or(defaults.provider.handle),
            },
            ingestion: IngestionConfig {
                poll_interval: secs("POLL_INTERVAL_SECS", defaults.ingestion.poll_interval)?,
                reply_to_mentions: flag("REPLY_TO_MENTIONS", defaults.ingestion.reply_to_mentions),
            },
            posting: PostingConfig {
                interval: secs("TIMELINE_INTERVAL_SECS", defaults.posting.interval)?,
                jitter_min: secs("TIMELINE_JITTER_MIN_SECS", defaults.posting.jitter_min)?,
                jitter_max: secs("TIMELINE_JITTER_MAX_SECS", defaults.posting.jitter_max)?,
                hourly_limit: parsed("HOURLY_POST_LIMIT", defaults.posting.hourly_limit)?,
                daily_limit: parsed("DAILY_POST_LIMIT", defaults.posting.daily_limit)?,
                safe_mode: flag("SAFE_MODE", defaults.posting.safe_mode),
                require_approval: flag("REQUIRE_APPROVAL", defaults.posting.require_approval),
            },
            learning: LearningWorkerConfig {
                interval: secs("LEARNING_INTERVAL_SECS", defaults.learning.interval)?,
                batch_size: parsed("LEARNING_BATCH_SIZE", defaults.learning.batch_size)?,
                use_llm: flag("LEARNING_USE_LLM", defaults.learning.use_llm),
            },
            self_style: SelfStyleConfig {
                enabled: flag("SELF_STYLE_ENABLED", defaults.self_style.enabled),
                interval: secs("SELF_STYLE_INTERVAL_SECS", defaults.self_style.interval)?,
                min_tweets: parsed("SELF_STYLE_MIN_TWEETS", defaults.self_style.min_tweets)?,
                max_tweets: parsed("SELF_STYLE_MAX_TWEETS", defaults.self_style.max_tweets)?,
                days: parsed("SELF_STYLE_DAYS", defaults.self_style.days)?,
                include_replies: flag("SELF_STYLE_INCLUDE_REPLIES", defaults.self_style.include_replies),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the loops cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.posting.jitter_min > self.posting.jitter_max {
            bail!(
                "TIMELINE_JITTER_MIN_SECS ({}) exceeds TIMELINE_JITTER_MAX_SECS ({})",
                self.posting.jitter_min.as_secs(),
                self.posting.jitter_max.as_secs()
            );
        }
        if self.posting.hourly_limit > self.posting.daily_limit {
            bail!("HOURLY_POST_LIMIT cannot exceed DAILY_POST_LIMIT");
        }
        if self.learning.batch_size == 0 {
            bail!("LEARNING_BATCH_SIZE must be at least 1");
        }
        if self.self_style.min_tweets > self.self_style.max_tweets {
            bail!("SELF_STYLE_MIN_TWEETS cannot exceed SELF_STYLE_MAX_TWEETS");
        }
        if self.self_style.days <= 0 {
            bail!("SELF_STYLE_DAYS must be positive");
        }
        if self.lock_ttl.is_zero() {
            bail!("LOCK_TTL_SECS must be positive");
        }
        Ok(())
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("persona-agent")
        .join("agent.db")
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.trim().parse().with_context(|| format!("Invalid {}: {:?}", key, v)),
        Err(_) => Ok(default),
    }
}

fn secs(key: &str, default: Duration) -> Result<Duration> {
    parsed(key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.posting.require_approval);
        assert!(!config.self_style.enabled);
        assert_eq!(config.ingestion.poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_inverted_jitter_rejected() {
        let mut config = Config::default();
        config.posting.jitter_min = Duration::from_secs(100);
        config.posting.jitter_max = Duration::from_secs(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hourly_above_daily_rejected() {
        let mut config = Config::default();
        config.posting.hourly_limit = 20;
        config.posting.daily_limit = 5;
        assert!(config.validate().is_err());
    }
}
