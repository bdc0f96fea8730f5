use thiserror::Error;

pub type Result<T> = std::result::Result<T, InsightError>;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[cfg(feature = "serial")]
impl From<serialport::Error> for InsightError {
    fn from(err: serialport::Error) -> Self {
        InsightError::Transport(err.to_string())
    }
}
