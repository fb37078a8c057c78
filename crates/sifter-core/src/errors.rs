use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    EmptyValue(&'static str),
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("max_line_bytes ({line}) must not exceed max_header_bytes ({header})")]
    LineBudgetExceedsHeaderBudget { line: usize, header: usize },
}

/// Top-level failures reported by the proxy facade.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("configuration file {path}: {detail}")]
    ConfigFile { path: String, detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
