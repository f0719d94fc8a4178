use thiserror::Error;

/// Failures reported by the crypto backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("unsupported enctype {0}")]
    UnsupportedEnctype(i32),

    #[error("enctype {0} cannot be used for this operation")]
    WrongEnctype(i32),

    #[error("unsupported checksum type {0}")]
    UnsupportedChecksum(i32),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("bad message length {0}")]
    BadLength(usize),

    #[error("missing {0} region")]
    MissingRegion(&'static str),

    #[error("integrity check failed")]
    IntegrityFailure,

    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),
}
