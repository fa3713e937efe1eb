use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exit code reserved for lock/backend failures and undecodable child statuses
pub const EXIT_CODE_ERROR: i32 = 111;

/// Default session `LockDelay`, in seconds
pub const DEFAULT_LOCK_DELAY_SECS: u64 = 15;

/// Upper bound on a single long-poll read of the lock key
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Key-value prefix under which every lock key lives
pub const DEFAULT_NAMESPACE: &str = "locks";

/// Local agent address used when nothing else is configured
pub const DEFAULT_ADDRESS: &str = "http://localhost:8500";

/// Environment variable consulted for the agent address
pub const ADDRESS_ENV: &str = "CONSUL_HTTP_ADDR";

/// Configuration for retry logic on the release path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Minimum delay between retry attempts (in milliseconds)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum delay between retry attempts (in milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum number of attempts, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Whether to randomize delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Create a RetryConfig with no retries (fail fast)
    pub fn no_retry() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
            max_attempts: 1,
            jitter: false,
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(anyhow::anyhow!(
                "min_delay_ms cannot be greater than max_delay_ms"
            ));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("max_attempts must be at least 1"));
        }

        if self.max_attempts > 10 {
            return Err(anyhow::anyhow!(
                "max_attempts should not exceed 10 to avoid excessive retries"
            ));
        }

        if self.max_delay_ms > 60_000 {
            return Err(anyhow::anyhow!("max_delay_ms should not exceed 60 seconds"));
        }

        Ok(())
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Number of retries after the first attempt
    pub fn retries(&self) -> usize {
        self.max_attempts.saturating_sub(1) as usize
    }
}

/// How the session-create request is shaped
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPayload {
    /// `{"LockDelay": "<n>s", "Name": "lock-for-<key>"}`
    #[default]
    Structured,
    /// No request body; the agent applies its own session defaults
    Empty,
}

/// Behaviour of a single lock acquisition
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into))]
pub struct LockOptions {
    /// Wait for the lock instead of giving up when it is held
    #[builder(default = "true")]
    pub blocking: bool,
    #[builder(default = "DEFAULT_LOCK_DELAY_SECS")]
    pub lock_delay_secs: u64,
    /// Exit code reported when the lock is held and `blocking` is off
    #[builder(default = "EXIT_CODE_ERROR")]
    pub contention_exit_code: i32,
    #[builder(default = "DEFAULT_WAIT_TIMEOUT")]
    pub wait_timeout: Duration,
    #[builder(default)]
    pub session_payload: SessionPayload,
    /// Pause between contended reads that carried no index header
    #[builder(default = "Duration::from_secs(1)")]
    pub contention_backoff: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            blocking: true,
            lock_delay_secs: DEFAULT_LOCK_DELAY_SECS,
            contention_exit_code: EXIT_CODE_ERROR,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            session_payload: SessionPayload::default(),
            contention_backoff: Duration::from_secs(1),
        }
    }
}

impl LockOptions {
    pub fn builder() -> LockOptionsBuilder {
        LockOptionsBuilder::default()
    }
}

/// Where and how to reach the coordination backend
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into))]
pub struct BackendConfig {
    #[builder(default = "DEFAULT_ADDRESS.to_string()")]
    pub address: String,
    #[builder(default = "DEFAULT_NAMESPACE.to_string()")]
    pub namespace: String,
    /// Must exceed the long-poll wait so blocking reads are not cut short
    #[builder(default = "Duration::from_secs(30)")]
    pub request_timeout: Duration,
    #[builder(default)]
    pub retry_config: RetryConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            request_timeout: Duration::from_secs(30),
            retry_config: RetryConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn builder() -> BackendConfigBuilder {
        BackendConfigBuilder::default()
    }

    /// Resolve the agent address: explicit value, then `CONSUL_HTTP_ADDR`, then the default
    pub fn resolve_address(explicit: Option<String>) -> String {
        explicit
            .or_else(|| std::env::var(ADDRESS_ENV).ok().filter(|v| !v.is_empty()))
            .map(|addr| {
                if addr.starts_with("http://") || addr.starts_with("https://") {
                    addr
                } else {
                    format!("http://{addr}")
                }
            })
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string())
    }

    pub fn validate(&self, options: &LockOptions) -> anyhow::Result<()> {
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(anyhow::anyhow!(
                "namespace must be a single non-empty path segment"
            ));
        }

        if self.request_timeout <= options.wait_timeout {
            return Err(anyhow::anyhow!(
                "request_timeout must exceed the long-poll wait timeout"
            ));
        }

        self.retry_config.validate()
    }
}

// Default value functions for serde
fn default_min_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    2_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_jitter() -> bool {
    true
}
