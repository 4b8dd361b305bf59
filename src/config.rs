//! Runtime configuration, read from environment variables.
//!
//! Every value has a default except the mailbox credentials. A value that is
//! set but unparsable is an error rather than a silent default.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::channels::imap::MailboxConfig;
use crate::error::ConfigError;
use crate::pipeline::dispatcher::RetryPolicy;
use crate::pipeline::processor::RunSettings;
use crate::pipeline::rules::RuleSet;

pub const RULES_PATH_ENV: &str = "INBOX_RELAY_RULES";
pub const RULES_JSON_ENV: &str = "INBOX_RELAY_RULES_JSON";
pub const LOG_DIR_ENV: &str = "INBOX_RELAY_LOG_DIR";

/// Upper bound for day-count settings, roughly a century.
pub const MAX_DAYS: u32 = 36_500;

/// Source of variable values. Production reads the process environment;
/// tests pass a map.
pub struct Env<'a> {
    lookup: Box<dyn Fn(&str) -> Option<String> + 'a>,
}

impl<'a> Env<'a> {
    pub fn process() -> Self {
        Self {
            lookup: Box::new(|key: &str| std::env::var(key).ok()),
        }
    }

    pub fn from_map(vars: &'a HashMap<String, String>) -> Self {
        Self {
            lookup: Box::new(move |key: &str| vars.get(key).cloned()),
        }
    }

    /// Value of `key`, treating blank as unset.
    pub fn optional_env(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn required_env(&self, key: &str) -> Result<String, ConfigError> {
        self.optional_env(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    pub fn parse_optional_env<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional_env(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        }
    }

    pub fn parse_bool_env(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional_env(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{v:?} is not a boolean"),
            }),
        }
    }
}

/// Where the rule document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulesSource {
    /// Inline JSON (e.g. injected from a CI secret).
    Inline(String),
    File(PathBuf),
}

impl RulesSource {
    pub fn load(&self) -> Result<RuleSet, ConfigError> {
        match self {
            Self::Inline(json) => RuleSet::from_json(json),
            Self::File(path) => RuleSet::from_path(path),
        }
    }
}

/// Full runtime configuration for one run.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub rules: RulesSource,
    pub state_path: PathBuf,
    pub retry: RetryPolicy,
    pub post_timeout: Duration,
    pub max_concurrency: usize,
    pub run_budget: Option<Duration>,
    pub retention_days: u32,
    pub mailbox: MailboxConfig,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&Env::process())
    }

    pub fn from_lookup(env: &Env<'_>) -> Result<Self, ConfigError> {
        let rules = match env.optional_env(RULES_JSON_ENV) {
            Some(json) => RulesSource::Inline(json),
            None => RulesSource::File(PathBuf::from(
                env.optional_env(RULES_PATH_ENV)
                    .unwrap_or_else(|| "config.json".to_string()),
            )),
        };

        let state_path = PathBuf::from(
            env.optional_env("INBOX_RELAY_STATE")
                .unwrap_or_else(|| "processed.json".to_string()),
        );

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: env.parse_optional_env("INBOX_RELAY_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay: Duration::from_millis(env.parse_optional_env("INBOX_RELAY_BACKOFF_MS", 500u64)?),
            max_delay: Duration::from_millis(
                env.parse_optional_env("INBOX_RELAY_MAX_BACKOFF_MS", 10_000u64)?,
            ),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_RELAY_MAX_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }

        let post_timeout =
            Duration::from_secs(env.parse_optional_env("INBOX_RELAY_POST_TIMEOUT_SECS", 10u64)?);

        let max_concurrency: usize = env.parse_optional_env("INBOX_RELAY_CONCURRENCY", 4)?;
        if max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_RELAY_CONCURRENCY".into(),
                message: "must be at least 1".into(),
            });
        }

        let budget_secs: u64 = env.parse_optional_env("INBOX_RELAY_RUN_BUDGET_SECS", 300)?;
        let run_budget = (budget_secs > 0).then(|| Duration::from_secs(budget_secs));

        let retention_days: u32 = env.parse_optional_env("INBOX_RELAY_RETENTION_DAYS", 30)?;
        if retention_days > MAX_DAYS {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_RELAY_RETENTION_DAYS".into(),
                message: format!("must be at most {MAX_DAYS}"),
            });
        }

        let mailbox = MailboxConfig::from_lookup(env)?;
        if retention_days <= mailbox.lookback_days {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_RELAY_RETENTION_DAYS".into(),
                message: format!(
                    "must exceed IMAP_LOOKBACK_DAYS ({}) or pruned ids would be fetched again",
                    mailbox.lookback_days
                ),
            });
        }

        Ok(Self {
            rules,
            state_path,
            retry,
            post_timeout,
            max_concurrency,
            run_budget,
            retention_days,
            mailbox,
        })
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            max_concurrency: self.max_concurrency,
            run_budget: self.run_budget,
            retention: Some(chrono::Duration::days(i64::from(self.retention_days))),
            mark_seen: self.mailbox.mark_seen,
        }
    }
}
