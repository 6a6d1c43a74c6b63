//! # Error Definitions
//!
//! Local operational failures, plus `RemoteError` for rejections that
//! crossed the channel.

use std::fmt;

use crate::packet::CallId;
use crate::transport::TransportError;

/// A rejection that originated on the peer.
///
/// Carries the peer's message and, when it sent one, its stack text, so a
/// caller can tell a cross-boundary failure apart from a local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    message: String,
    stack: Option<String>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            message: message.into(),
            stack,
        }
    }

    /// The peer's error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The peer's stack text, if it was exposed.
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteError: {}", self.message)?;
        if let Some(stack) = &self.stack {
            write!(f, "\n{}", stack)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

/// Failures of the call-marshalling core.
#[derive(Debug)]
pub enum Error {
    /// The peer rejected the call.
    Remote(RemoteError),
    /// The transport could not move the packet.
    Transport(TransportError),
    /// A local handler failed while error exposure is disabled.
    Handler(anyhow::Error),
    /// The pending entry was dropped before it settled (evicted, or the
    /// endpoint was torn down).
    Abandoned(CallId),
    /// The endpoint behind a stand-in no longer exists.
    Closed,
    /// Every ID in the configured call-ID space is live.
    CallIdsExhausted,
    /// Arguments nest deeper than the configured limit.
    DepthLimitExceeded,
    /// The name is a reserved control tag.
    ReservedName(String),
    /// A packet did not have the expected structure.
    Protocol(String),
    /// JSON wire codec failure.
    Json(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(e) => write!(f, "{}", e),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Handler(e) => write!(f, "Handler failed: {}", e),
            Self::Abandoned(id) => write!(f, "Call {} was evicted or its endpoint was dropped", id),
            Self::Closed => write!(f, "Endpoint closed"),
            Self::CallIdsExhausted => write!(f, "No free call-ID left in the configured ID space"),
            Self::DepthLimitExceeded => write!(f, "Argument nesting exceeds the depth limit"),
            Self::ReservedName(name) => write!(f, "'{}' is a reserved control name", name),
            Self::Protocol(msg) => write!(f, "Protocol violation: {}", msg),
            Self::Json(msg) => write!(f, "JSON codec error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Remote(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Handler(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
