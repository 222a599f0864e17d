//! Lease, claim and housekeeping timings for a worker process.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Timing configuration shared read-only by all of a worker's tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Display name stored with the registration. Defaults to the worker id.
    pub name: Option<String>,
    /// How long a worker lease lasts after a refresh.
    pub expiration_interval: Duration,
    /// How often a worker refreshes its lease.
    pub refresh_interval: Duration,
    /// How often expired worker registrations are purged.
    pub worker_purge_interval: Duration,
    /// How often stuck seeking attempts are purged.
    pub work_seeker_purge_interval: Duration,
    /// How long a claim on a work item lasts.
    pub claim_lifetime: Duration,
    /// How often expired claims are purged.
    pub work_claim_purge_interval: Duration,
    /// How long a worker may look for work before giving up for the cycle.
    pub work_seeking_lifetime: Duration,
    /// Pause between seeking cycles when the queue is empty.
    pub poll_interval: Duration,
    /// Length in days of the tracking window given to a first-time user.
    pub new_user_total_interval: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: None,
            expiration_interval: Duration::from_secs(60 * 60),
            refresh_interval: Duration::from_secs(5 * 60),
            worker_purge_interval: Duration::from_secs(6 * 60),
            work_seeker_purge_interval: Duration::from_secs(5 * 60),
            claim_lifetime: Duration::from_secs(2 * 60),
            work_claim_purge_interval: Duration::from_secs(6 * 60),
            work_seeking_lifetime: Duration::from_secs(2 * 60),
            poll_interval: Duration::from_secs(5),
            new_user_total_interval: 365,
        }
    }
}

/// A setting that is legal but likely wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub setting: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.setting, self.message)
    }
}

/// `[worker]` table of the TOML config file. Durations use humantime syntax.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkerSection {
    name: Option<String>,
    worker_lifetime: Option<String>,
    refresh_interval: Option<String>,
    purge_workers_interval: Option<String>,
    purge_seekers_interval: Option<String>,
    claim_lifetime: Option<String>,
    purge_claims_interval: Option<String>,
    seeking_lifetime: Option<String>,
    poll_interval: Option<String>,
    new_user_total_interval: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    worker: WorkerSection,
}

impl WorkerConfig {
    /// Parse the `[worker]` table of a TOML document over the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        let section = file.worker;
        let mut config = Self::default();

        if let Some(name) = section.name {
            config.name = Some(name);
        }
        let durations = [
            ("worker_lifetime", section.worker_lifetime, &mut config.expiration_interval),
            ("refresh_interval", section.refresh_interval, &mut config.refresh_interval),
            (
                "purge_workers_interval",
                section.purge_workers_interval,
                &mut config.worker_purge_interval,
            ),
            (
                "purge_seekers_interval",
                section.purge_seekers_interval,
                &mut config.work_seeker_purge_interval,
            ),
            ("claim_lifetime", section.claim_lifetime, &mut config.claim_lifetime),
            (
                "purge_claims_interval",
                section.purge_claims_interval,
                &mut config.work_claim_purge_interval,
            ),
            ("seeking_lifetime", section.seeking_lifetime, &mut config.work_seeking_lifetime),
            ("poll_interval", section.poll_interval, &mut config.poll_interval),
        ];
        for (key, raw, slot) in durations {
            if let Some(raw) = raw {
                *slot = parse_duration(key, &raw)?;
            }
        }
        if let Some(days) = section.new_user_total_interval {
            config.new_user_total_interval = days;
        }

        Ok(config)
    }

    /// Override settings from environment-style variables.
    pub fn apply_lookup<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("WORKER_NAME") {
            self.name = Some(name);
        }
        let durations = [
            ("WORKER_LIFETIME", &mut self.expiration_interval),
            ("REFRESH_INTERVAL", &mut self.refresh_interval),
            ("PURGE_WORKERS_INTERVAL", &mut self.worker_purge_interval),
            ("PURGE_SEEKERS_INTERVAL", &mut self.work_seeker_purge_interval),
            ("CLAIM_LIFETIME", &mut self.claim_lifetime),
            ("PURGE_CLAIMS_INTERVAL", &mut self.work_claim_purge_interval),
            ("SEEKING_LIFETIME", &mut self.work_seeking_lifetime),
            ("WORK_POLL_INTERVAL", &mut self.poll_interval),
        ];
        for (var, slot) in durations {
            if let Some(raw) = lookup(var) {
                *slot = parse_duration(var, &raw)?;
            }
        }
        if let Some(raw) = lookup("NEW_USER_TOTAL_INTERVAL") {
            self.new_user_total_interval = raw.trim().parse().map_err(|_| {
                Error::Config(format!("NEW_USER_TOTAL_INTERVAL must be a number of days, got {raw}"))
            })?;
        }
        Ok(())
    }

    /// Check the timings for settings that would break the lease protocol.
    ///
    /// Returns warnings for settings that are legal but suspicious; the caller
    /// logs them.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>> {
        let required = [
            ("worker_lifetime", self.expiration_interval),
            ("refresh_interval", self.refresh_interval),
            ("purge_workers_interval", self.worker_purge_interval),
            ("purge_seekers_interval", self.work_seeker_purge_interval),
            ("claim_lifetime", self.claim_lifetime),
            ("purge_claims_interval", self.work_claim_purge_interval),
            ("seeking_lifetime", self.work_seeking_lifetime),
            ("poll_interval", self.poll_interval),
        ];
        for (setting, value) in required {
            if value.is_zero() {
                return Err(Error::Config(format!("{setting} must be greater than zero")));
            }
        }

        if self.new_user_total_interval <= 0 {
            return Err(Error::Config(format!(
                "new_user_total_interval must be a positive number of days, got {}",
                self.new_user_total_interval
            )));
        }

        // A lease that lapses between refreshes would drop a healthy worker.
        if self.refresh_interval >= self.expiration_interval {
            return Err(Error::Config(format!(
                "refresh_interval ({}) must be shorter than worker_lifetime ({})",
                humantime::format_duration(self.refresh_interval),
                humantime::format_duration(self.expiration_interval)
            )));
        }

        let mut warnings = Vec::new();
        let pairs = [
            (
                "purge_workers_interval",
                self.worker_purge_interval,
                "worker_lifetime",
                self.expiration_interval,
            ),
            (
                "purge_seekers_interval",
                self.work_seeker_purge_interval,
                "seeking_lifetime",
                self.work_seeking_lifetime,
            ),
            (
                "purge_claims_interval",
                self.work_claim_purge_interval,
                "claim_lifetime",
                self.claim_lifetime,
            ),
        ];
        for (setting, interval, lifetime_name, lifetime) in pairs {
            if interval < lifetime {
                warnings.push(ConfigWarning {
                    setting,
                    message: format!(
                        "{} is shorter than {lifetime_name} ({})",
                        humantime::format_duration(interval),
                        humantime::format_duration(lifetime)
                    ),
                });
            }
        }

        Ok(warnings)
    }

    pub fn expiration(&self) -> chrono::Duration {
        to_chrono(self.expiration_interval)
    }

    pub fn claim_expiration(&self) -> chrono::Duration {
        to_chrono(self.claim_lifetime)
    }

    pub fn seeking_expiration(&self) -> chrono::Duration {
        to_chrono(self.work_seeking_lifetime)
    }
}

fn parse_duration(setting: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| Error::Config(format!("{setting} must be a duration like 2m or 1h: {e}")))
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = WorkerConfig::default();
        let warnings = config.validate().unwrap();
        // The worker purge runs more often than the worker lifetime by default.
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].setting, "purge_workers_interval");
    }

    #[test]
    fn env_overrides_parse_humantime() {
        let mut config = WorkerConfig::default();
        config
            .apply_lookup(lookup(&[
                ("CLAIM_LIFETIME", "90s"),
                ("WORKER_LIFETIME", "2h 30m"),
                ("NEW_USER_TOTAL_INTERVAL", "30"),
            ]))
            .unwrap();
        assert_eq!(config.claim_lifetime, Duration::from_secs(90));
        assert_eq!(config.expiration_interval, Duration::from_secs(9000));
        assert_eq!(config.new_user_total_interval, 30);
    }

    #[test]
    fn bad_duration_is_a_config_error() {
        let mut config = WorkerConfig::default();
        let err = config
            .apply_lookup(lookup(&[("REFRESH_INTERVAL", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn refresh_must_be_shorter_than_lifetime() {
        let config = WorkerConfig {
            refresh_interval: Duration::from_secs(3600),
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_durations_are_rejected() {
        let config = WorkerConfig {
            claim_lifetime: Duration::ZERO,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_new_user_interval_is_rejected() {
        let config = WorkerConfig {
            new_user_total_interval: 0,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_claim_purge_is_a_warning() {
        let config = WorkerConfig {
            work_claim_purge_interval: Duration::from_secs(30),
            ..WorkerConfig::default()
        };
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.setting == "purge_claims_interval"));
    }

    #[test]
    fn toml_section_overrides_defaults() {
        let config = WorkerConfig::from_toml_str(
            r#"
            [worker]
            name = "ledger-a"
            claim_lifetime = "3m"
            purge_claims_interval = "4m"
            new_user_total_interval = 90
            "#,
        )
        .unwrap();
        assert_eq!(config.name.as_deref(), Some("ledger-a"));
        assert_eq!(config.claim_lifetime, Duration::from_secs(180));
        assert_eq!(config.work_claim_purge_interval, Duration::from_secs(240));
        assert_eq!(config.new_user_total_interval, 90);
        assert_eq!(config.refresh_interval, WorkerConfig::default().refresh_interval);
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        assert!(WorkerConfig::from_toml_str("[worker]\nclaim_lifetim = \"3m\"\n").is_err());
    }
}
