use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid os version: {0}")]
    InvalidVersion(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}
