use gsskrb5_crypto::CryptoError;
use std::fmt;
use thiserror::Error;

// RFC 2744 routine error codes, already shifted into place
pub const GSS_S_BAD_SIG: u32 = 6 << 16;
pub const GSS_S_NO_CONTEXT: u32 = 8 << 16;
pub const GSS_S_DEFECTIVE_TOKEN: u32 = 9 << 16;
pub const GSS_S_CONTEXT_EXPIRED: u32 = 12 << 16;
pub const GSS_S_FAILURE: u32 = 13 << 16;
pub const GSS_S_BAD_QOP: u32 = 14 << 16;
pub const GSS_S_CALL_BAD_STRUCTURE: u32 = 3 << 24;

bitflags! {
    /// Supplementary status bits reported next to a successful unseal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MajorFlags: u32 {
        const GSS_S_CONTINUE_NEEDED = 1;
        const GSS_S_DUPLICATE_TOKEN = 2;
        const GSS_S_OLD_TOKEN = 4;
        const GSS_S_UNSEQ_TOKEN = 8;
        const GSS_S_GAP_TOKEN = 16;
    }
}

/// Why a context refused to do something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    NotEstablished,
    Terminated,
    ProtocolMismatch,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StateError::NotEstablished => "context is not established",
            StateError::Terminated => "context has been deleted",
            StateError::ProtocolMismatch => "token protocol does not match the context",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed, truncated or structurally invalid token.
    #[error("defective token: {0}")]
    DefectiveToken(&'static str),

    /// Integrity check failed. Bad padding, bad checksums, failed
    /// decryption and direction mismatches all land here.
    #[error("bad signature")]
    BadSignature,

    #[error("{0}")]
    ContextState(StateError),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("bad parameter: {0}")]
    BadParameter(&'static str),

    #[error("crypto backend: {0}")]
    Crypto(CryptoError),
}

impl Error {
    /// The GSS major status code the calling protocol layer should see.
    pub fn major(&self) -> u32 {
        match self {
            Error::DefectiveToken(_) => GSS_S_DEFECTIVE_TOKEN,
            Error::BadSignature => GSS_S_BAD_SIG,
            Error::ContextState(StateError::Terminated) => GSS_S_CONTEXT_EXPIRED,
            Error::ContextState(_) => GSS_S_NO_CONTEXT,
            Error::UnsupportedAlgorithm(_) => GSS_S_BAD_QOP,
            Error::BadParameter(_) => GSS_S_CALL_BAD_STRUCTURE,
            Error::ResourceExhaustion(_) | Error::Crypto(_) => GSS_S_FAILURE,
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::IntegrityFailure => Error::BadSignature,
            CryptoError::BadLength(_) => Error::DefectiveToken("bad ciphertext length"),
            CryptoError::OutOfMemory(n) => {
                Error::ResourceExhaustion(format!("allocating {} bytes", n))
            }
            CryptoError::UnsupportedEnctype(_)
            | CryptoError::UnsupportedChecksum(_)
            | CryptoError::WrongEnctype(_) => Error::UnsupportedAlgorithm(e.to_string()),
            e @ (CryptoError::InvalidKeyLength { .. } | CryptoError::MissingRegion(_)) => {
                Error::Crypto(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_errors_fold_into_gss_outcomes() {
        assert_eq!(Error::from(CryptoError::IntegrityFailure), Error::BadSignature);
        assert_eq!(
            Error::from(CryptoError::BadLength(3)).major(),
            GSS_S_DEFECTIVE_TOKEN
        );
        assert_eq!(
            Error::from(CryptoError::WrongEnctype(23)).major(),
            GSS_S_BAD_QOP
        );
    }

    #[test]
    fn terminated_is_expired() {
        assert_eq!(
            Error::ContextState(StateError::Terminated).major(),
            GSS_S_CONTEXT_EXPIRED
        );
        assert_eq!(
            Error::ContextState(StateError::ProtocolMismatch).major(),
            GSS_S_NO_CONTEXT
        );
    }
}
