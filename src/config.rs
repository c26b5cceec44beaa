use std::str::FromStr;
use std::time::Duration;

/// Failed fetch kinds in one pass at which the view is declared unavailable.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 2;

/// Per-fetch deadline; a fetch that runs longer counts as failed.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub failure_threshold: usize,
    pub fetch_timeout: Duration,
    /// Log every reference that ends up as a placeholder.
    pub warn_on_missing: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            warn_on_missing: true,
        }
    }
}

impl ReconcileConfig {
    /// Read `VENUE_SYNC_FAILURE_THRESHOLD`, `VENUE_SYNC_FETCH_TIMEOUT_MS` and
    /// `VENUE_SYNC_WARN_ON_MISSING`, keeping the default for anything unset or
    /// unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: env_parse::<usize>("VENUE_SYNC_FAILURE_THRESHOLD")
                .filter(|t| *t > 0)
                .unwrap_or(defaults.failure_threshold),
            fetch_timeout: env_parse::<u64>("VENUE_SYNC_FETCH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.fetch_timeout),
            warn_on_missing: env_parse("VENUE_SYNC_WARN_ON_MISSING")
                .unwrap_or(defaults.warn_on_missing),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Refetch the whole view in the background after each mutation.
    pub resync_after_mutation: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resync_after_mutation: true,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            resync_after_mutation: env_parse("VENUE_SYNC_RESYNC").unwrap_or(true),
        }
    }
}

pub(crate) fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
