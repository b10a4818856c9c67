//! Centralized error types
//!
//! Two layers:
//! - `CodecError` - pure encode/decode failures, no I/O involved
//! - `EmopError` - everything a meter conversation can hit (codec, socket,
//!   retries, configuration, caller input)
//!
//! Use `Result<T>` as shorthand for `std::result::Result<T, EmopError>`.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Codec Errors
// =============================================================================

/// Errors raised while encoding or decoding frames, data fields and records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// First byte of a frame was not 0x7E
    BadDelimiter(u8),
    /// Frame structure is inconsistent (length field, oversize data, ...)
    MalformedFrame { reason: String },
    /// Data field format tag is not one we know
    UnknownFormat(u8),
    /// Fewer bytes available than the structure requires
    TruncatedPayload { needed: usize, available: usize },
    /// Bytes present but not valid for the field (non-ASCII text, bad enum)
    InvalidEncoding { field: &'static str, reason: String },
    /// Received CRC does not match the one computed over the frame
    ChecksumMismatch { expected: u16, actual: u16 },
    /// A record value was encoded against a shape it does not fit
    ShapeMismatch {
        shape: &'static str,
        reason: String,
    },
}

impl CodecError {
    pub(crate) fn truncated(needed: usize, available: usize) -> Self {
        Self::TruncatedPayload { needed, available }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// Frame-level corruption that a fresh exchange may not reproduce
    pub fn is_frame_corruption(&self) -> bool {
        matches!(
            self,
            Self::BadDelimiter(_) | Self::MalformedFrame { .. } | Self::ChecksumMismatch { .. }
        )
    }
}

impl std::error::Error for CodecError {}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadDelimiter(b) => write!(f, "bad frame delimiter 0x{:02x}", b),
            Self::MalformedFrame { reason } => write!(f, "malformed frame: {}", reason),
            Self::UnknownFormat(tag) => write!(f, "unknown data field format {}", tag),
            Self::TruncatedPayload { needed, available } => write!(
                f,
                "truncated payload: needed {} bytes, {} available",
                needed, available
            ),
            Self::InvalidEncoding { field, reason } => {
                write!(f, "invalid encoding in {}: {}", field, reason)
            }
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch: frame carries {:04x}, computed {:04x}",
                actual, expected
            ),
            Self::ShapeMismatch { shape, reason } => {
                write!(f, "value does not fit {} record: {}", shape, reason)
            }
        }
    }
}

// =============================================================================
// Client Errors
// =============================================================================

/// Stage of a socket exchange an I/O error happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Send,
    Receive,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Coarse error categories for callers that only need to branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied a bad value
    InvalidArgument,
    /// Configuration missing or invalid
    Config,
    /// Meter unreachable after retries, or a single socket failure
    Connection,
    /// Another caller holds the meter
    Busy,
    /// Meter answered with bytes we could not make sense of
    Protocol,
}

/// All client errors
#[derive(Debug)]
pub enum EmopError {
    // === Codec ===
    Codec(CodecError),

    // === Network ===
    /// One socket operation failed (retryable)
    Transport {
        endpoint: String,
        phase: Phase,
        source: std::io::Error,
    },
    /// Every attempt of an exchange failed
    ConnectionFailure {
        endpoint: String,
        attempts: u32,
        source: Box<EmopError>,
    },
    /// Transaction deadline ran out before a response was parsed
    DeadlineExceeded { endpoint: String, elapsed: Duration },
    /// Meter lock not acquired in time
    MeterBusy { endpoint: String, waited: Duration },

    // === Input ===
    InvalidArgument { field: &'static str, reason: String },

    // === Config ===
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    ConfigValidation { field: &'static str, reason: String },
    MissingConfig { field: &'static str },
}

impl EmopError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Codec(_) => ErrorKind::Protocol,
            Self::Transport { .. }
            | Self::ConnectionFailure { .. }
            | Self::DeadlineExceeded { .. } => ErrorKind::Connection,
            Self::MeterBusy { .. } => ErrorKind::Busy,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::ConfigRead { .. } | Self::ConfigValidation { .. } | Self::MissingConfig { .. } => {
                ErrorKind::Config
            }
        }
    }

    /// Response ended before the record did
    ///
    /// Some meters cut replies short for individual objects; callers that
    /// can live without the value check this instead of failing outright.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::Codec(CodecError::TruncatedPayload { .. }))
    }

    /// Socket timed out (connect, send or receive)
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            Self::ConnectionFailure { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl From<CodecError> for EmopError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl std::error::Error for EmopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::Transport { source, .. } | Self::ConfigRead { source, .. } => Some(source),
            Self::ConnectionFailure { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for EmopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "{}", e),
            Self::Transport {
                endpoint,
                phase,
                source,
            } => write!(f, "{} failed for {}: {}", phase, endpoint, source),
            Self::ConnectionFailure {
                endpoint,
                attempts,
                source,
            } => write!(
                f,
                "meter {} unreachable after {} attempts: {}",
                endpoint, attempts, source
            ),
            Self::DeadlineExceeded { endpoint, elapsed } => write!(
                f,
                "transaction with {} exceeded deadline after {:.1}s",
                endpoint,
                elapsed.as_secs_f64()
            ),
            Self::MeterBusy { endpoint, waited } => write!(
                f,
                "meter {} busy, gave up after {}s",
                endpoint,
                waited.as_secs()
            ),
            Self::InvalidArgument { field, reason } => write!(f, "invalid {}: {}", field, reason),
            Self::ConfigRead { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "invalid config {}: {}", field, reason)
            }
            Self::MissingConfig { field } => write!(f, "missing configuration: {}", field),
        }
    }
}

/// Alias for Result with EmopError
pub type Result<T> = std::result::Result<T, EmopError>;
