//! Configuration management.
//!
//! Settings come from the environment (a `.env` file is loaded by the
//! binary before this runs):
//!
//! | Variable | Default |
//! |---|---|
//! | `PROTHEUS_BASE_URL` | required for remote operations |
//! | `PROTHEUS_USERNAME` / `PROTHEUS_PASSWORD` | required with the base URL |
//! | `PROTHEUS_TIMEOUT_S` | `30` |
//! | `PSYNC_DB` | |
//! | `DATABASE_URL` | `sqlite:///path`, used when `PSYNC_DB` is unset |
//! | `IDEMPOTENCY_TTL_SECS` | `86400` |
//! | `IDEMPOTENCY_STALE_SECS` | `300` |
//!
//! Local-only commands (run history, mappings) work without any remote
//! settings.

use crate::error::{Error, Result};
use crate::remote::RemoteConfig;
use crate::remote::protheus::DEFAULT_TIMEOUT;
use crate::storage::IdempotencyPolicy;
use crate::storage::idempotency::{DEFAULT_STALE_AFTER, DEFAULT_TTL};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub db_path: PathBuf,
    pub policy: IdempotencyPolicy,
    /// `None` when `PROTHEUS_BASE_URL` is not set.
    pub remote: Option<RemoteConfig>,
}

impl SyncConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a variable is malformed or no database location
    /// can be determined.
    pub fn from_env(explicit_db: Option<&Path>) -> Result<Self> {
        let values: HashMap<String, String> = std::env::vars().collect();
        Self::from_lookup(explicit_db, |name| values.get(name).cloned())
    }

    /// Load from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(
        explicit_db: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let db_path = resolve_db_path(explicit_db, &lookup)?;

        let policy = IdempotencyPolicy {
            ttl: secs_or_default(&lookup, "IDEMPOTENCY_TTL_SECS", DEFAULT_TTL)?,
            stale_after: secs_or_default(&lookup, "IDEMPOTENCY_STALE_SECS", DEFAULT_STALE_AFTER)?,
        };

        let remote = match optional_trimmed(&lookup, "PROTHEUS_BASE_URL") {
            None => None,
            Some(base_url) => {
                if !is_http_url(&base_url) {
                    return Err(Error::Config(
                        "PROTHEUS_BASE_URL must start with http:// or https://".to_string(),
                    ));
                }
                Some(RemoteConfig {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    username: required_trimmed(&lookup, "PROTHEUS_USERNAME")?,
                    password: required_raw(&lookup, "PROTHEUS_PASSWORD")?,
                    timeout: timeout_or_default(&lookup, "PROTHEUS_TIMEOUT_S")?,
                })
            }
        };

        // A reservation must outlive at least one remote call
        if let Some(remote) = remote
            .as_ref()
            .filter(|remote| policy.stale_after <= remote.timeout)
        {
            return Err(Error::Config(format!(
                "IDEMPOTENCY_STALE_SECS ({}s) must be greater than PROTHEUS_TIMEOUT_S ({}s)",
                policy.stale_after.as_secs_f64(),
                remote.timeout.as_secs_f64()
            )));
        }

        Ok(Self {
            db_path,
            policy,
            remote,
        })
    }

    /// Remote settings, required by every sync operation.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `PROTHEUS_BASE_URL` is not set.
    pub fn require_remote(&self) -> Result<&RemoteConfig> {
        self.remote
            .as_ref()
            .ok_or_else(|| Error::Config("PROTHEUS_BASE_URL is not set".to_string()))
    }
}

/// Get the global psync directory (`~/.psync`).
#[must_use]
pub fn global_psync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".psync"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. `explicit_path` (the `--db` flag)
/// 2. `PSYNC_DB`
/// 3. `DATABASE_URL` in `sqlite:///path` form
/// 4. `~/.psync/data/psync.db`
///
/// # Errors
///
/// Returns `Config` for a non-SQLite `DATABASE_URL` or when no home
/// directory exists.
pub fn resolve_db_path(
    explicit_path: Option<&Path>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = optional_trimmed(lookup, "PSYNC_DB") {
        return Ok(PathBuf::from(path));
    }

    if let Some(url) = optional_trimmed(lookup, "DATABASE_URL") {
        return sqlite_url_path(&url).map(PathBuf::from).ok_or_else(|| {
            Error::Config(format!("DATABASE_URL must be a sqlite:/// URL, got '{url}'"))
        });
    }

    global_psync_dir()
        .map(|dir| dir.join("data").join("psync.db"))
        .ok_or_else(|| Error::Config("no home directory; pass --db or set PSYNC_DB".to_string()))
}

/// `sqlite:///./app.db` → `./app.db`, `sqlite:////var/app.db` → `/var/app.db`.
fn sqlite_url_path(url: &str) -> Option<&str> {
    let path = url
        .strip_prefix("sqlite:///")
        .or_else(|| url.strip_prefix("sqlite://"))?;
    (!path.is_empty()).then_some(path)
}

fn optional_trimmed(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required_trimmed(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    optional_trimmed(lookup, name)
        .ok_or_else(|| Error::Config(format!("missing required environment variable: {name}")))
}

/// Passwords keep surrounding whitespace.
fn required_raw(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    lookup(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::Config(format!("missing required environment variable: {name}")))
}

fn secs_or_default(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration> {
    match optional_trimmed(lookup, name) {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| Error::Config(format!("{name} must be a positive integer"))),
    }
}

/// Fractional seconds are allowed (`PROTHEUS_TIMEOUT_S=2.5`).
fn timeout_or_default(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Duration> {
    match optional_trimmed(lookup, name) {
        None => Ok(DEFAULT_TIMEOUT),
        Some(value) => value
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(|| Error::Config(format!("{name} must be a positive number of seconds"))),
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| values.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_remote() {
        let config =
            SyncConfig::from_lookup(Some(Path::new("/tmp/x.db")), lookup_from(&[])).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.policy, IdempotencyPolicy::default());
        assert!(config.remote.is_none());
        assert!(matches!(config.require_remote(), Err(Error::Config(_))));
    }

    #[test]
    fn test_remote_settings() {
        let config = SyncConfig::from_lookup(
            Some(Path::new("x.db")),
            lookup_from(&[
                ("PROTHEUS_BASE_URL", "https://erp.example.com:8181/"),
                ("PROTHEUS_USERNAME", " admin "),
                ("PROTHEUS_PASSWORD", "p@ss"),
                ("PROTHEUS_TIMEOUT_S", "12.5"),
            ]),
        )
        .unwrap();

        let remote = config.require_remote().unwrap();
        assert_eq!(remote.base_url, "https://erp.example.com:8181");
        assert_eq!(remote.username, "admin");
        assert_eq!(remote.timeout, Duration::from_millis(12_500));
        assert!(!format!("{config:?}").contains("p@ss"));
    }

    #[test]
    fn test_base_url_requires_credentials() {
        let err = SyncConfig::from_lookup(
            Some(Path::new("x.db")),
            lookup_from(&[("PROTHEUS_BASE_URL", "http://erp")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("PROTHEUS_USERNAME"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_url = lookup_from(&[("PROTHEUS_BASE_URL", "erp:8080")]);
        assert!(SyncConfig::from_lookup(Some(Path::new("x.db")), bad_url).is_err());

        let bad_ttl = lookup_from(&[("IDEMPOTENCY_TTL_SECS", "soon")]);
        assert!(SyncConfig::from_lookup(Some(Path::new("x.db")), bad_ttl).is_err());
    }

    #[test]
    fn test_stale_threshold_must_exceed_remote_timeout() {
        let remote = [
            ("PROTHEUS_BASE_URL", "http://erp"),
            ("PROTHEUS_USERNAME", "admin"),
            ("PROTHEUS_PASSWORD", "p@ss"),
            ("PROTHEUS_TIMEOUT_S", "30"),
        ];

        let mut equal = remote.to_vec();
        equal.push(("IDEMPOTENCY_STALE_SECS", "30"));
        let err = SyncConfig::from_lookup(Some(Path::new("x.db")), lookup_from(&equal))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("IDEMPOTENCY_STALE_SECS"));

        let mut longer = remote.to_vec();
        longer.push(("IDEMPOTENCY_STALE_SECS", "31"));
        assert!(SyncConfig::from_lookup(Some(Path::new("x.db")), lookup_from(&longer)).is_ok());

        // Without a remote there is no timeout to compare against
        let local_only = lookup_from(&[("IDEMPOTENCY_STALE_SECS", "1")]);
        assert!(SyncConfig::from_lookup(Some(Path::new("x.db")), local_only).is_ok());
    }

    #[test]
    fn test_db_path_priority() {
        let lookup = lookup_from(&[
            ("PSYNC_DB", "/data/psync.db"),
            ("DATABASE_URL", "sqlite:///./app.db"),
        ]);
        assert_eq!(
            resolve_db_path(Some(Path::new("cli.db")), &lookup).unwrap(),
            PathBuf::from("cli.db")
        );
        assert_eq!(resolve_db_path(None, &lookup).unwrap(), PathBuf::from("/data/psync.db"));

        let lookup = lookup_from(&[("DATABASE_URL", "sqlite:///./app.db")]);
        assert_eq!(resolve_db_path(None, &lookup).unwrap(), PathBuf::from("./app.db"));

        let lookup = lookup_from(&[("DATABASE_URL", "postgres://db/app")]);
        assert!(resolve_db_path(None, &lookup).is_err());
    }

    #[test]
    fn test_sqlite_url_path() {
        assert_eq!(sqlite_url_path("sqlite:////var/lib/app.db"), Some("/var/lib/app.db"));
        assert_eq!(sqlite_url_path("sqlite://app.db"), Some("app.db"));
        assert_eq!(sqlite_url_path("sqlite:///"), None);
    }
}
