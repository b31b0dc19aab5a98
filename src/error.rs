use thiserror::Error;

/// Errors that end processing of a single container. A batch run logs
/// these per file and moves on; nothing here aborts the whole run.
#[derive(Error, Debug)]
pub enum NcmError {
    #[error("not an ncm container (signature mismatch)")]
    InvalidFormat,

    #[error("container truncated while reading {0}")]
    TruncatedContainer(&'static str),

    #[error("failed to unwrap audio key: {0}")]
    KeyUnwrapFailed(String),

    #[error("no keystream variant produced a recognized audio header")]
    NoMatchingVariant,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NcmError>;
