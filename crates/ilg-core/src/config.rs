use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, retry::RetryPolicy, Result};

/// Typed configuration, loaded from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    /// Empty means every user may link channels.
    pub telegram_allowed_users: Vec<i64>,

    // Storage
    pub store_path: PathBuf,

    // Rotation
    pub rotation_period: Duration,
    pub scheduler_tick: Duration,
    pub rotation_pacing: Duration,
    pub retry: RetryPolicy,

    // Onboarding
    pub onboarding_ttl: Duration,

    /// Footer line of the anchor message. `None` means "Powered by @<bot>".
    pub branding: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let telegram_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"));

        let store_path = env_path("STORE_PATH")
            .unwrap_or_else(|| PathBuf::from("data/linked_pairs.json"));

        let rotation_period = hours_to_duration(
            "ROTATION_PERIOD_HOURS",
            env_u64("ROTATION_PERIOD_HOURS").unwrap_or(12),
        )?;
        let scheduler_tick = Duration::from_secs(env_u64("SCHEDULER_TICK_SECS").unwrap_or(300));
        let rotation_pacing =
            Duration::from_millis(env_u64("ROTATION_PACING_MS").unwrap_or(1000));

        if rotation_period.is_zero() {
            return Err(Error::Config(
                "ROTATION_PERIOD_HOURS must be at least 1".to_string(),
            ));
        }
        if scheduler_tick.is_zero() {
            return Err(Error::Config(
                "SCHEDULER_TICK_SECS must be at least 1".to_string(),
            ));
        }

        let retry = RetryPolicy {
            fast_retry_limit: env_u32("FAST_RETRY_LIMIT").unwrap_or(3),
            base_backoff: scheduler_tick,
            max_backoff: bounded(
                "MAX_BACKOFF_SECS",
                Duration::from_secs(env_u64("MAX_BACKOFF_SECS").unwrap_or(6 * 3600)),
            )?,
            quarantine_after: env_u32("QUARANTINE_AFTER").unwrap_or(10).max(1),
        };

        let onboarding_ttl = Duration::from_secs(env_u64("ONBOARDING_TTL_SECS").unwrap_or(900));
        let branding = env_str("BRANDING").and_then(non_empty);

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            store_path,
            rotation_period,
            scheduler_tick,
            rotation_pacing,
            retry,
            onboarding_ttl,
            branding,
        })
    }

    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.telegram_allowed_users.is_empty() || self.telegram_allowed_users.contains(&user_id)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

/// Upper bound for the rotation period and the backoff cap.
const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 3600);

fn hours_to_duration(name: &str, hours: u64) -> Result<Duration> {
    let secs = hours
        .checked_mul(3600)
        .ok_or_else(|| Error::Config(format!("{name} is too large")))?;
    bounded(name, Duration::from_secs(secs))
}

fn bounded(name: &str, d: Duration) -> Result<Duration> {
    if d > MAX_INTERVAL {
        return Err(Error::Config(format!(
            "{name} is too large (at most {} hours)",
            MAX_INTERVAL.as_secs() / 3600
        )));
    }
    Ok(d)
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
