use shared::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("voice codec: {0}")]
    Codec(#[from] CodecError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
