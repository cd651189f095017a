use repeater_core::{io_error_code, DialError};
use std::io;
use thiserror::Error;
use tokio_native_tls::native_tls;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error(transparent)]
    Dial(#[from] DialError),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Parse Error: {0}")]
    Parse(String),

    #[error("Protocol \"{0}:\" not supported")]
    UnsupportedScheme(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Decompression failed: {0}")]
    Decompress(io::Error),
}

impl HttpError {
    pub fn error_code(&self) -> &'static str {
        match self {
            HttpError::Dial(e) => e.error_code(),
            HttpError::Io(e) => io_error_code(e),
            HttpError::Tls(_) => "EPROTO",
            HttpError::Parse(_) => "HPE_INVALID_CONSTANT",
            HttpError::UnsupportedScheme(_) => "ERR_INVALID_PROTOCOL",
            HttpError::InvalidTarget(_) => "EINVAL",
            HttpError::Decompress(_) => "Z_DATA_ERROR",
        }
    }
}
