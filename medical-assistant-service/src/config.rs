use anyhow::{Context as _, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use swarm_flow::RetryPolicy;

use crate::agents::REPORT_ANALYST;
use crate::store::Collections;

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_LOG_FILTER: &str = "medical_assistant_service=debug,swarm_flow=debug,tower_http=debug";

/// `LOG_FORMAT`: structured JSON in production, human-readable output for development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => anyhow::bail!("unknown log format {other:?}, expected \"json\" or \"pretty\""),
        }
    }
}

/// Service settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub openrouter_api_key: Option<String>,
    pub model: String,
    /// Absent means in-memory stores
    pub database_url: Option<String>,
    pub seed_file: Option<PathBuf>,
    pub port: u16,
    pub max_steps: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub default_agent: String,
    pub collections: Collections,
    pub log_format: LogFormat,
    /// `RUST_LOG` directives
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            database_url: None,
            seed_file: None,
            port: DEFAULT_PORT,
            max_steps: swarm_flow::swarm::DEFAULT_MAX_STEPS,
            request_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            default_agent: REPORT_ANALYST.to_string(),
            collections: Collections::default(),
            log_format: LogFormat::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Load from the process environment, after applying a `.env` file if one exists.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let mut retry = defaults.retry.clone();
        if let Some(attempts) = parse_var::<u32>(&var, "RETRY_MAX_ATTEMPTS")? {
            retry = retry.with_attempts(attempts);
        }
        if let Some(ms) = parse_var::<u64>(&var, "RETRY_INITIAL_BACKOFF_MS")? {
            retry = retry.with_initial_backoff(Duration::from_millis(ms));
        }

        let max_steps = parse_var::<usize>(&var, "MAX_STEPS")?.unwrap_or(defaults.max_steps);
        if max_steps == 0 {
            anyhow::bail!("MAX_STEPS must be greater than zero");
        }

        let collections = defaults.collections;
        let collections = Collections {
            users: var("USER_COLLECTION").unwrap_or(collections.users),
            treatments: var("TREATMENT_COLLECTION").unwrap_or(collections.treatments),
            reports: var("REPORT_COLLECTION").unwrap_or(collections.reports),
            bookings: var("TEST_COLLECTION").unwrap_or(collections.bookings),
            policies: var("INSURANCE_COLLECTION").unwrap_or(collections.policies),
            claims: var("CLAIM_COLLECTION").unwrap_or(collections.claims),
        };

        Ok(Self {
            openrouter_api_key: var("OPENROUTER_API_KEY"),
            model: var("MODEL").unwrap_or(defaults.model),
            database_url: var("DATABASE_URL"),
            seed_file: var("SEED_FILE").map(PathBuf::from),
            port: parse_var(&var, "PORT")?.unwrap_or(defaults.port),
            max_steps,
            request_timeout: parse_var::<u64>(&var, "REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            retry,
            default_agent: var("DEFAULT_AGENT").unwrap_or(defaults.default_agent),
            collections,
            log_format: var("LOG_FORMAT")
                .map(|raw| raw.parse::<LogFormat>())
                .transpose()
                .context("invalid value for LOG_FORMAT")?
                .unwrap_or(defaults.log_format),
            log_filter: var("RUST_LOG").unwrap_or(defaults.log_filter),
        })
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid value for {key}: {raw:?}")))
        .transpose()
}
