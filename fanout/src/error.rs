use thiserror::Error;

/// Fan-out configuration failures. Raised before any child is spawned.
#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("invalid fan-out configuration: {0}")]
    Config(String),
}
