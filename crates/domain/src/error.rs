use thiserror::Error;

/// Domain-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Dependency not resolved: {0}")]
    DependencyUnresolved(String),

    #[error("Invalid value: {0}")]
    Value(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Register not found: {0}")]
    RegisterNotFound(String),
}

impl DomainError {
    /// True for failures that originate on the wire rather than in config.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Timeout(_) | Self::Protocol(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
