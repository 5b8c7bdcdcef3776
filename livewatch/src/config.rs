//! Process configuration and the creator roster.
//!
//! Process settings come from the environment (a `.env` file is honoured by
//! the binaries). The roster is a JSON document owned by the administration
//! surface and re-read periodically.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dispatcher::{BindingSpec, DispatcherConfig};
use crate::domain::{Creator, EndpointProfile};
use crate::logging::Severity;
use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub roster_path: PathBuf,
    pub database_url: String,
    pub log_dir: PathBuf,
    pub poll_interval: Duration,
    pub live_hourly_minutes: u64,
    pub fetch_timeout: Duration,
    pub screenshot_timeout: Duration,
    pub ack_timeout: Duration,
    pub queue_capacity: usize,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub roster_reload: Duration,
    /// Snapshot bridge; required by the daemon.
    pub platform_url: Option<String>,
    /// Screenshot renderer; messages are text-only without it.
    pub screenshot_url: Option<String>,
    pub diagnostics_min_level: Severity,
    pub diagnostics_retention_days: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            roster_path: PathBuf::from("roster.json"),
            database_url: "sqlite:livewatch.db?mode=rwc".to_string(),
            log_dir: PathBuf::from("logs"),
            poll_interval: Duration::from_secs(30),
            live_hourly_minutes: 60,
            fetch_timeout: Duration::from_secs(8),
            screenshot_timeout: Duration::from_millis(2000),
            ack_timeout: Duration::from_secs(5),
            queue_capacity: 64,
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(20),
            roster_reload: Duration::from_secs(30),
            platform_url: None,
            screenshot_url: None,
            diagnostics_min_level: Severity::Info,
            diagnostics_retention_days: 7,
        }
    }
}

impl AppConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `LIVEWATCH_ROSTER`, `DATABASE_URL`, `LIVEWATCH_LOG_DIR`
    /// - `LIVEWATCH_POLL_INTERVAL_SECS`, `LIVEWATCH_LIVE_HOURLY_MINUTES`
    /// - `LIVEWATCH_FETCH_TIMEOUT_SECS`, `LIVEWATCH_SCREENSHOT_TIMEOUT_MS`,
    ///   `LIVEWATCH_ACK_TIMEOUT_SECS`
    /// - `LIVEWATCH_QUEUE_CAPACITY`, `LIVEWATCH_RECONNECT_DELAY_SECS`,
    ///   `LIVEWATCH_PING_INTERVAL_SECS`, `LIVEWATCH_ROSTER_RELOAD_SECS`
    /// - `LIVEWATCH_PLATFORM_URL`, `LIVEWATCH_SCREENSHOT_URL`
    /// - `LIVEWATCH_DIAGNOSTICS_MIN_LEVEL`, `LIVEWATCH_DIAGNOSTICS_RETENTION_DAYS`
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Non-positive or unparseable
    /// numbers keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let positive = |key: &str| text(key).and_then(|v| v.parse::<u64>().ok()).filter(|v| *v > 0);

        if let Some(path) = text("LIVEWATCH_ROSTER") {
            config.roster_path = PathBuf::from(path);
        }
        if let Some(url) = text("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = text("LIVEWATCH_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(secs) = positive("LIVEWATCH_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(minutes) = positive("LIVEWATCH_LIVE_HOURLY_MINUTES") {
            config.live_hourly_minutes = minutes;
        }
        if let Some(secs) = positive("LIVEWATCH_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = positive("LIVEWATCH_SCREENSHOT_TIMEOUT_MS") {
            config.screenshot_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = positive("LIVEWATCH_ACK_TIMEOUT_SECS") {
            config.ack_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = positive("LIVEWATCH_QUEUE_CAPACITY") {
            config.queue_capacity = capacity as usize;
        }
        if let Some(secs) = positive("LIVEWATCH_RECONNECT_DELAY_SECS") {
            config.reconnect_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = positive("LIVEWATCH_PING_INTERVAL_SECS") {
            config.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = positive("LIVEWATCH_ROSTER_RELOAD_SECS") {
            config.roster_reload = Duration::from_secs(secs);
        }
        config.platform_url = text("LIVEWATCH_PLATFORM_URL");
        config.screenshot_url = text("LIVEWATCH_SCREENSHOT_URL");
        if let Some(level) = text("LIVEWATCH_DIAGNOSTICS_MIN_LEVEL") {
            match Severity::from_str(&level) {
                Ok(severity) => config.diagnostics_min_level = severity,
                Err(_) => warn!("Ignoring unknown diagnostics level '{}'", level),
            }
        }
        if let Some(days) = positive("LIVEWATCH_DIAGNOSTICS_RETENTION_DAYS") {
            config.diagnostics_retention_days = days;
        }

        config
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            global_poll_interval: self.poll_interval,
            live_hourly_minutes: self.live_hourly_minutes,
        }
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.queue_capacity,
            ack_timeout: self.ack_timeout,
            reconnect_delay: self.reconnect_delay,
            ping_interval: self.ping_interval,
        }
    }

    pub fn diagnostics_retention(&self) -> Duration {
        Duration::from_secs(self.diagnostics_retention_days.saturating_mul(24 * 60 * 60))
    }
}

/// The monitored creators with their bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    /// Overrides the process default when positive.
    #[serde(default)]
    pub global_poll_interval_secs: Option<i64>,
    /// Overrides the process default when positive.
    #[serde(default)]
    pub live_hourly_minutes: Option<i64>,
    #[serde(default)]
    pub endpoints: Vec<EndpointProfile>,
    #[serde(default)]
    pub creators: Vec<Creator>,
}

impl Roster {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("cannot read roster {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn poll_interval(&self, default: Duration) -> Duration {
        self.global_poll_interval_secs
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(default)
    }

    pub fn live_hourly_minutes(&self, default: u64) -> u64 {
        self.live_hourly_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| minutes as u64)
            .unwrap_or(default)
    }

    /// Check roster-wide consistency.
    ///
    /// Problems local to a single binding are not reported here; they make
    /// only that binding unusable when the dispatcher resolves it.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut creators = HashSet::new();
        let mut bindings = HashSet::new();
        let mut profiles = HashSet::new();

        for profile in &self.endpoints {
            if !profiles.insert(profile.id.as_str()) {
                problems.push(format!("duplicate endpoint profile id '{}'", profile.id));
            }
        }
        for creator in &self.creators {
            if creator.id.trim().is_empty() {
                problems.push("creator with empty id".to_string());
            }
            if !creators.insert(creator.id.as_str()) {
                problems.push(format!("duplicate creator id '{}'", creator.id));
            }
            for binding in &creator.bindings {
                if !bindings.insert(binding.id.as_str()) {
                    problems.push(format!("duplicate binding id '{}'", binding.id));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(problems.join("; ")))
        }
    }

    /// Resolved specs of every enabled binding of every enabled creator.
    pub fn binding_specs(&self) -> Vec<BindingSpec> {
        self.creators
            .iter()
            .filter(|c| c.enabled)
            .flat_map(|creator| {
                creator
                    .enabled_bindings()
                    .map(|binding| BindingSpec::resolve(&creator.id, binding, &self.endpoints))
            })
            .collect()
    }
}
