//! Proxy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Runtime configuration for the proxy.
///
/// All fields fall back to defaults when absent, so an empty JSON object is a
/// valid configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Interface the listener binds to.
    pub listen_addr: String,
    /// TCP port the listener binds to.
    pub listen_port: u16,
    /// Path of the forbidden-words file. A missing file disables filtering.
    pub policy_path: String,
    /// Path of the plain-text activity log.
    pub log_path: String,
    /// Optional path for a JSON-lines event log.
    pub event_log_path: Option<String>,
    /// Idle limit for any single read or write on a proxied connection.
    pub receive_timeout_secs: u64,
    /// Overall deadline for resolving and connecting to an upstream host.
    pub connect_timeout_secs: u64,
    /// Upper bound for an entire header block, terminator included.
    pub max_header_bytes: usize,
    /// Upper bound for a single protocol line.
    pub max_line_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 5465,
            policy_path: "forbidden.txt".to_string(),
            log_path: "proxy_http.log".to_string(),
            event_log_path: None,
            receive_timeout_secs: 300,
            connect_timeout_secs: 30,
            max_header_bytes: 64 * 1024,
            max_line_bytes: 8 * 1024,
        }
    }
}

impl ProxyConfig {
    /// Checks the configuration for values that cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::EmptyValue("listen_addr"));
        }
        if self.policy_path.trim().is_empty() {
            return Err(ConfigError::EmptyValue("policy_path"));
        }
        if self.log_path.trim().is_empty() {
            return Err(ConfigError::EmptyValue("log_path"));
        }
        if let Some(path) = &self.event_log_path {
            if path.trim().is_empty() {
                return Err(ConfigError::EmptyValue("event_log_path"));
            }
        }
        if self.receive_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("receive_timeout_secs"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("connect_timeout_secs"));
        }
        if self.max_header_bytes == 0 {
            return Err(ConfigError::ZeroValue("max_header_bytes"));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::ZeroValue("max_line_bytes"));
        }
        if self.max_line_bytes > self.max_header_bytes {
            return Err(ConfigError::LineBudgetExceedsHeaderBudget {
                line: self.max_line_bytes,
                header: self.max_header_bytes,
            });
        }
        Ok(())
    }

    /// Bind target in `addr:port` form.
    pub fn listen_target(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
