use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Pattern error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Text generator failed: {0}")]
    TextGenerator(String),

    #[error("Image generator for {participant} failed: {message}")]
    ImageGenerator { participant: String, message: String },

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Image producer for {0} stopped")]
    ImageProducerStopped(String),

    #[error("Seed is not a valid utterance: {0:?}")]
    InvalidSeed(String),

    #[error("Pool is empty: {0}")]
    EmptyPool(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
