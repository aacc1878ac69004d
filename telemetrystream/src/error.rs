use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}
