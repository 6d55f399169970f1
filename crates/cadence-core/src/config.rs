use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 5 * 60;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
pub const DEFAULT_HISTORY_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_HISTORY_PRUNE_INTERVAL_MINUTES: u32 = 60;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
///
/// Env keys use a double underscore between section and field, e.g.
/// `CADENCE_SCHEDULER__POLL_INTERVAL_SECS=5`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Dispatch loop and executor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the dispatch loop scans for due jobs. 0 falls back to the default.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Wall-clock budget before an execution is recorded as `timeout`.
    /// The handler itself is not killed.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// How long `stop()` waits for in-flight executions.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Built-in housekeeping of the execution history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Terminal executions older than this are deleted.
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,
    #[serde(default = "default_history_prune_interval_minutes")]
    pub history_prune_interval_minutes: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_retention_days: DEFAULT_HISTORY_RETENTION_DAYS,
            history_prune_interval_minutes: DEFAULT_HISTORY_PRUNE_INTERVAL_MINUTES,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_job_timeout_secs() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECS
}
fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}
fn default_history_retention_days() -> u32 {
    DEFAULT_HISTORY_RETENTION_DAYS
}
fn default_history_prune_interval_minutes() -> u32 {
    DEFAULT_HISTORY_PRUNE_INTERVAL_MINUTES
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// A missing file is not an error: every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))?;

        tracing::debug!(path = %path, "configuration loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CadenceConfig::default();
        assert_eq!(cfg.scheduler.poll_interval_secs, 60);
        assert_eq!(cfg.scheduler.job_timeout_secs, 300);
        assert_eq!(cfg.scheduler.shutdown_grace_secs, 30);
        assert!(cfg.maintenance.enabled);
        assert!(cfg.database.path.ends_with(".cadence/cadence.db"));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "cadence.toml",
                r#"
                [scheduler]
                poll_interval_secs = 5

                [database]
                path = "/tmp/jobs.db"
                "#,
            )?;
            let cfg = CadenceConfig::load(Some("cadence.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.scheduler.poll_interval_secs, 5);
            assert_eq!(cfg.scheduler.job_timeout_secs, DEFAULT_JOB_TIMEOUT_SECS);
            assert_eq!(cfg.database.path, "/tmp/jobs.db");
            assert_eq!(cfg.maintenance.history_retention_days, 30);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("cadence.toml", "[scheduler]\njob_timeout_secs = 120\n")?;
            jail.set_env("CADENCE_SCHEDULER__JOB_TIMEOUT_SECS", "10");
            jail.set_env("CADENCE_MAINTENANCE__ENABLED", "false");
            let cfg = CadenceConfig::load(Some("cadence.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.scheduler.job_timeout_secs, 10);
            assert!(!cfg.maintenance.enabled);
            Ok(())
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let cfg = CadenceConfig::load(Some("does-not-exist.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.scheduler.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
            Ok(())
        });
    }

    #[test]
    fn bad_value_is_config_error() {
        Jail::expect_with(|jail| {
            jail.create_file("cadence.toml", "[scheduler]\npoll_interval_secs = \"soon\"\n")?;
            let err = CadenceConfig::load(Some("cadence.toml")).unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR");
            Ok(())
        });
    }
}
