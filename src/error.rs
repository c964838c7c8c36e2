use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutopaceError {
    #[error("Duration probe failed: {0}")]
    Probe(String),

    #[error("Prober not found: {0}")]
    ProberNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No template with ordinal {0}")]
    TemplateNotFound(usize),

    #[error("Invalid timing: {0}")]
    InvalidTiming(String),

    #[error("Playback speed unavailable: {0}")]
    SpeedUnavailable(String),

    #[error("Player error: {0}")]
    Player(String),

    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, AutopaceError>;
