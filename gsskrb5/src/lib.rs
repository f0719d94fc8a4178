//! Per-message protection for established Kerberos 5 GSSAPI contexts.
//!
//! Both token formats are supported: the RFC 1964 / RFC 4757 tokens
//! (DES, triple DES and RC4) and the RFC 4121 tokens (AES and triple DES
//! through the simplified profile). A [`SecurityContext`] seals messages
//! into wrap or MIC tokens and unseals the peer's tokens, either from
//! contiguous buffers or, with the `iov` feature, in place over a list
//! of caller supplied segments.
//!
//! Establishing the context is somebody else's job. Its result, the
//! keys, the negotiated flags and the initial sequence numbers, is what
//! the constructors take.
#[macro_use]
extern crate bitflags;

mod cksum;
pub mod cfx;
pub mod context;
pub mod error;
mod iov;
pub mod legacy;
pub mod oid;
mod seqnum;
pub mod seqstate;
pub mod token;
pub mod util;

pub use cfx::{CfxKeys, KeySelector};
pub use context::{
    ContextState, CtxFlags, IovStatus, Protocol, Role, SecurityContext, Sealed, SharedCtx,
    Unsealed,
};
pub use error::{Error, MajorFlags, StateError};
pub use gsskrb5_crypto as crypto;
pub use legacy::{LegacyKeys, SealAlg, SignAlg};
pub use oid::Oid;
pub use seqstate::{ReplayStatus, SeqAnomaly};
pub use token::TokenType;
pub use util::Buf;
#[cfg(feature = "iov")]
pub use util::{GssIov, GssIovFake, GssIovType};
