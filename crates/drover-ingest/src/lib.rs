pub mod fetcher;
pub mod sandbox;
pub mod urls;

pub use fetcher::*;
pub use sandbox::*;
pub use urls::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("invalid or unsafe URL: {0}")]
    UnsafeUrl(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("file too large: {0}")]
    TooLarge(String),

    #[error("HTTP error {status} fetching {url}")]
    Http { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
