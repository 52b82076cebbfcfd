//! Error types for the runtime core.
//!
//! Library-internal code returns [`FcgiError`]. The user-facing [`crate::request::Handler`]
//! trait keeps returning `anyhow::Result<()>`, matching the shape the original `minifcgi`
//! `Handler` trait used, so handler implementations aren't forced to depend on this enum.

use crate::record::RecordType;

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, FcgiError>;

/// Errors produced by the reactor, transceiver, record codec, manager and request engine.
///
/// See spec §7 for the policy attached to each kind.
#[derive(Debug, thiserror::Error)]
pub enum FcgiError {
    /// The underlying OS call failed in a way that isn't "would block".
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A record header declared a version other than 1.
    #[error("unsupported FastCGI protocol version {0}")]
    UnsupportedVersion(u8),

    /// A record header's type byte didn't map to a known [`RecordType`].
    #[error("unknown FastCGI record type {0}")]
    UnknownRecordType(u8),

    /// A record arrived whose type doesn't belong in the request's current state.
    #[error("record type {found:?} is out of sequence (expected {expected})")]
    ProtocolViolation {
        /// The record type that actually arrived.
        found: RecordType,
        /// A short description of what was expected instead.
        expected: &'static str,
    },

    /// `BEGIN_REQUEST` declared a role other than RESPONDER or AUTHORIZER.
    #[error("unknown or unsupported FastCGI role {0}")]
    UnknownRole(u16),

    /// Declared `CONTENT_LENGTH` exceeded the configured maximum POST size.
    #[error("POST body of {got} bytes exceeds the {limit} byte maximum")]
    OversizePost {
        /// The declared content length.
        got: usize,
        /// The configured maximum.
        limit: usize,
    },

    /// A second [`crate::manager::Manager`] was constructed in this process.
    #[error("a FastCGI manager already exists in this process")]
    AlreadyRunning,

    /// A byte sequence that was supposed to be UTF-8 wasn't.
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),

    /// Transport setup failed (bad listen address, not a FastCGI socket, etc).
    #[error("{0}")]
    Setup(String),
}
