/// Core error type.
///
/// Adapter crates map their specific errors into this type so the scheduler and
/// the command surface can handle failures consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("linked pair not found: owner {owner}, channel {channel}")]
    NotFound { owner: i64, channel: i64 },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
