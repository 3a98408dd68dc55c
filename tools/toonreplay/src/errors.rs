use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("metadata error: {0}")]
    Metadata(String),
    #[error("notebook error: {0}")]
    Notebook(String),
    #[error("unknown cell: {0}")]
    UnknownCell(String),
    #[error("fixture error: {0}")]
    Fixture(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("extension is deactivated")]
    Deactivated,
}
