//! Environment-sourced configuration for the sync pipeline.
//!
//! Every knob has a default matching the deployed system: 45 s propagation
//! wait, 15 min schedule, ignore-duplicates writes. Credentials left empty
//! disable the scheduler (see `Scheduler::start`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Portal login material plus the installation/unit the sync targets.
/// Immutable once loaded; threaded by reference through the run.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
    pub device_id: String,
    pub installation_id: String,
    pub unit_id: String,
}

impl Credentials {
    /// The scheduler refuses to start without at least identifier + secret.
    pub fn is_configured(&self) -> bool {
        !self.identifier.is_empty() && !self.secret.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Destination store
// ---------------------------------------------------------------------------

/// Duplicate-resolution semantics for the remote upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictMode {
    /// Existing rows win; duplicates are dropped silently.
    #[default]
    Ignore,
    /// Incoming rows overwrite existing ones on the `(badgeId, timestamp)` key.
    Merge,
}

impl ConflictMode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => ConflictMode::Merge,
            _ => ConflictMode::Ignore,
        }
    }

    /// Value for the store's `Prefer` header.
    pub fn prefer_header(self) -> &'static str {
        match self {
            ConflictMode::Ignore => "resolution=ignore-duplicates,return=minimal",
            ConflictMode::Merge => "resolution=merge-duplicates,return=minimal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub key: String,
    pub conflict_mode: ConflictMode,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the portal, e.g. `https://portal.example.com`.
    pub portal_url: String,
    pub credentials: Credentials,
    /// Propagation wait after a successful retrieval trigger.
    pub wait: Duration,
    /// Default schedule cadence; runtime-adjustable via the scheduler.
    pub interval_minutes: u64,
    pub store: Option<StoreConfig>,
    /// Optional secondary sqlite sink.
    pub local_db_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            portal_url: "https://portal.example.com".to_string(),
            credentials: Credentials::default(),
            wait: Duration::from_secs(45),
            interval_minutes: 15,
            store: None,
            local_db_path: None,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let store = match (std::env::var("STORE_URL"), std::env::var("STORE_KEY")) {
            (Ok(url), Ok(key)) if !url.is_empty() && !key.is_empty() => Some(StoreConfig {
                url,
                key,
                conflict_mode: ConflictMode::parse(&env_or("STORE_CONFLICT_MODE", "ignore")),
            }),
            _ => None,
        };

        Self {
            portal_url: env_or("PORTAL_URL", &defaults.portal_url),
            credentials: Credentials {
                identifier: env_or("PORTAL_EMAIL", ""),
                secret: env_or("PORTAL_PASSWORD", ""),
                device_id: env_or("PORTAL_DEVICE_ID", ""),
                installation_id: env_or("PORTAL_INSTALLATION_ID", ""),
                unit_id: env_or("PORTAL_UNIT_ID", ""),
            },
            wait: Duration::from_secs(parse_or("SYNC_WAIT_SECS", 45)),
            interval_minutes: parse_or("SYNC_INTERVAL_MINUTES", defaults.interval_minutes),
            store,
            local_db_path: std::env::var("LOCAL_DB_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployed_system() {
        let cfg = Config::default();
        assert_eq!(cfg.wait, Duration::from_secs(45));
        assert_eq!(cfg.interval_minutes, 15);
        assert!(cfg.store.is_none());
        assert!(cfg.local_db_path.is_none());
        assert!(!cfg.credentials.is_configured());
    }

    #[test]
    fn conflict_mode_parse() {
        assert_eq!(ConflictMode::parse("merge"), ConflictMode::Merge);
        assert_eq!(ConflictMode::parse("MERGE"), ConflictMode::Merge);
        assert_eq!(ConflictMode::parse("ignore"), ConflictMode::Ignore);
        assert_eq!(ConflictMode::parse("anything-else"), ConflictMode::Ignore);
    }

    #[test]
    fn conflict_mode_prefer_headers() {
        assert_eq!(
            ConflictMode::Ignore.prefer_header(),
            "resolution=ignore-duplicates,return=minimal"
        );
        assert_eq!(
            ConflictMode::Merge.prefer_header(),
            "resolution=merge-duplicates,return=minimal"
        );
    }

    #[test]
    fn credentials_need_identifier_and_secret() {
        let mut creds = Credentials::default();
        assert!(!creds.is_configured());
        creds.identifier = "admin@club".to_string();
        assert!(!creds.is_configured());
        creds.secret = "hunter2".to_string();
        assert!(creds.is_configured());
    }
}
