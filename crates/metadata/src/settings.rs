use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::SettingsError;

/// Default capability tag advertised in the join message
pub const DEFAULT_TAG: &str = "wflink";

/// Default pool sizes
pub const DEFAULT_CONTROL_POOL_SIZE: usize = 4;
pub const DEFAULT_CRITERIA_POOL_SIZE: usize = 8;
pub const DEFAULT_PROCESSOR_POOL_SIZE: usize = 16;
/// Grace period for in-flight tasks on pool shutdown
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Upper bound on a single stream write or close
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Reconnection backoff defaults
pub const DEFAULT_RECONNECT_INITIAL_DELAY_MS: u64 = 200;
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_RECONNECT_MAX_FAILURES: u32 = 10;

/// Sent-event cache defaults
pub const DEFAULT_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
/// Keep-alive staleness threshold (5 minutes)
pub const DEFAULT_KEEP_ALIVE_WARN_MS: u64 = 300_000;
pub const DEFAULT_MONITOR_INITIAL_DELAY_SECS: u64 = 10;
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Snapshot search defaults
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_MAX_WAIT_MS: u64 = 10_000;
pub const DEFAULT_MAX_AUTH_ATTEMPTS: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// How a worker pool runs its tasks
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    /// Dedicated runtime with named OS worker threads per pool
    Os,
    /// Tasks on the ambient tokio runtime
    #[default]
    Lightweight,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformConfig {
    /// Streaming endpoint (ws:// or wss://)
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// REST base URL used by search
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Envelope `source` identifying this client instance
    #[serde(default = "default_source")]
    pub source: String,
    /// Capability tags sent in the join message
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    /// A stream write or close that takes longer fails the stream
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl PlatformConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

fn default_ws_url() -> String {
    "ws://localhost:8082/api/cloudevents".to_string()
}

fn default_api_url() -> String {
    "http://localhost:8082/api".to_string()
}

fn default_source() -> String {
    "urn:wflink:client".to_string()
}

fn default_tags() -> Vec<String> {
    vec![DEFAULT_TAG.to_string()]
}

fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            api_url: default_api_url(),
            source: default_source(),
            tags: default_tags(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

/// Where bearer tokens come from
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    Anonymous,
    Static {
        token: String,
    },
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolsConfig {
    #[serde(default = "default_control_size")]
    pub control_size: usize,
    #[serde(default = "default_criteria_size")]
    pub criteria_size: usize,
    #[serde(default = "default_processor_size")]
    pub processor_size: usize,
    #[serde(default)]
    pub thread_kind: ThreadKind,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_control_size() -> usize {
    DEFAULT_CONTROL_POOL_SIZE
}

fn default_criteria_size() -> usize {
    DEFAULT_CRITERIA_POOL_SIZE
}

fn default_processor_size() -> usize {
    DEFAULT_PROCESSOR_POOL_SIZE
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            control_size: default_control_size(),
            criteria_size: default_criteria_size(),
            processor_size: default_processor_size(),
            thread_kind: ThreadKind::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl PoolsConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Consecutive failures after which automatic attempts stop
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_RECONNECT_INITIAL_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_RECONNECT_MAX_DELAY_MS
}

fn default_max_failures() -> u32 {
    DEFAULT_RECONNECT_MAX_FAILURES
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_failures: default_max_failures(),
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_keep_alive_warn_ms")]
    pub keep_alive_warn_ms: u64,
    #[serde(default = "default_monitor_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_keep_alive_warn_ms() -> u64 {
    DEFAULT_KEEP_ALIVE_WARN_MS
}

fn default_monitor_initial_delay_secs() -> u64 {
    DEFAULT_MONITOR_INITIAL_DELAY_SECS
}

fn default_monitor_interval_secs() -> u64 {
    DEFAULT_MONITOR_INTERVAL_SECS
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            keep_alive_warn_ms: default_keep_alive_warn_ms(),
            initial_delay_secs: default_monitor_initial_delay_secs(),
            interval_secs: default_monitor_interval_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn keep_alive_warn(&self) -> Duration {
        Duration::from_millis(self.keep_alive_warn_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Attempts per call when the platform answers 401
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_wait_ms() -> u64 {
    DEFAULT_MAX_WAIT_MS
}

fn default_max_auth_attempts() -> u32 {
    DEFAULT_MAX_AUTH_ATTEMPTS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
            max_auth_attempts: default_max_auth_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SearchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub pools: PoolsConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make a component misbehave at runtime
    pub fn validate(&self) -> Result<(), SettingsError> {
        let platform = &self.platform;
        if !(platform.ws_url.starts_with("ws://") || platform.ws_url.starts_with("wss://")) {
            return Err(SettingsError::Validation(format!(
                "platform.ws_url must be ws:// or wss://, got {}",
                platform.ws_url
            )));
        }
        if !(platform.api_url.starts_with("http://") || platform.api_url.starts_with("https://")) {
            return Err(SettingsError::Validation(format!(
                "platform.api_url must be http:// or https://, got {}",
                platform.api_url
            )));
        }

        if platform.write_timeout_ms == 0 {
            return Err(SettingsError::Validation(
                "platform.write_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let pools = &self.pools;
        for (name, size) in [
            ("control_size", pools.control_size),
            ("criteria_size", pools.criteria_size),
            ("processor_size", pools.processor_size),
        ] {
            if size == 0 {
                return Err(SettingsError::Validation(format!(
                    "pools.{} must be greater than zero",
                    name
                )));
            }
        }

        let reconnect = &self.reconnect;
        if reconnect.initial_delay_ms == 0 || reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(SettingsError::Validation(format!(
                "reconnect delays must satisfy 0 < initial ({}) <= max ({})",
                reconnect.initial_delay_ms, reconnect.max_delay_ms
            )));
        }
        if reconnect.max_failures == 0 {
            return Err(SettingsError::Validation(
                "reconnect.max_failures must be greater than zero".to_string(),
            ));
        }

        if self.monitor.cache_capacity == 0 {
            return Err(SettingsError::Validation(
                "monitor.cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self.monitor.interval_secs == 0 {
            return Err(SettingsError::Validation(
                "monitor.interval_secs must be greater than zero".to_string(),
            ));
        }

        let search = &self.search;
        if search.poll_interval_ms == 0 || search.max_auth_attempts == 0 {
            return Err(SettingsError::Validation(
                "search.poll_interval_ms and search.max_auth_attempts must be greater than zero"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.pools.thread_kind, ThreadKind::Lightweight);
        assert_eq!(settings.reconnect.initial_delay(), Duration::from_millis(200));
        assert_eq!(settings.reconnect.max_delay(), Duration::from_secs(10));
        assert_eq!(settings.reconnect.max_failures, 10);
        assert_eq!(settings.monitor.cache_capacity, 100);
        assert_eq!(settings.monitor.cache_ttl(), Duration::from_secs(300));
        assert_eq!(settings.search.poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.search.max_wait(), Duration::from_secs(10));
        assert_eq!(settings.auth, AuthConfig::Anonymous);
        assert_eq!(settings.platform.write_timeout(), Duration::from_secs(10));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
platform:
  ws_url: wss://platform.example.com/api/cloudevents
  api_url: https://platform.example.com/api
  source: urn:wflink:loans
  tags:
    - loans
    - accruals
auth:
  type: client_credentials
  token_url: https://platform.example.com/oauth/token
  client_id: loans
  client_secret: s3cret
pools:
  processor_size: 32
  thread_kind: os
reconnect:
  max_failures: 5
"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.platform.tags, vec!["loans", "accruals"]);
        assert_eq!(settings.pools.processor_size, 32);
        assert_eq!(settings.pools.control_size, DEFAULT_CONTROL_POOL_SIZE);
        assert_eq!(settings.pools.thread_kind, ThreadKind::Os);
        assert_eq!(settings.reconnect.max_failures, 5);
        assert_eq!(settings.reconnect.initial_delay_ms, 200);
        match settings.auth {
            AuthConfig::ClientCredentials { client_id, .. } => assert_eq!(client_id, "loans"),
            other => panic!("unexpected auth config: {:?}", other),
        }
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = Settings::from_yaml("{}").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_rejects_zero_pool_size() {
        let result = Settings::from_yaml("pools:\n  criteria_size: 0\n");
        match result {
            Err(SettingsError::Validation(msg)) => assert!(msg.contains("criteria_size")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let result =
            Settings::from_yaml("reconnect:\n  initial_delay_ms: 20000\n  max_delay_ms: 100\n");
        assert!(matches!(result, Err(SettingsError::Validation(_))));
    }

    #[test]
    fn test_rejects_http_stream_url() {
        let result = Settings::from_yaml("platform:\n  ws_url: http://example.com\n");
        assert!(matches!(result, Err(SettingsError::Validation(_))));
    }

    #[test]
    fn test_rejects_zero_write_timeout() {
        let result = Settings::from_yaml("platform:\n  write_timeout_ms: 0\n");
        match result {
            Err(SettingsError::Validation(msg)) => assert!(msg.contains("write_timeout_ms")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = Settings::load(Path::new("/nonexistent/wflink.yaml"));
        assert!(matches!(result, Err(SettingsError::Read(_))));
    }
}
