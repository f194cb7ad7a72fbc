//! Pool and registry error types.

use std::time::Duration;

use thiserror::Error;

/// Why a wait on a pool's queue failed.
///
/// Each kind has a stable numeric code for callers that log or compare
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueErrorKind {
    /// The wait exceeded its timeout.
    Timeout,
    /// The queue was closed.
    Closed,
    /// The wait was aborted by an external cancellation signal.
    Canceled,
}

impl QueueErrorKind {
    /// Numeric status code (`-1` timeout, `-2` closed, `-3` canceled).
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Timeout => -1,
            Self::Closed => -2,
            Self::Canceled => -3,
        }
    }
}

impl std::fmt::Display for QueueErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::Timeout => "timeout",
            Self::Closed => "closed",
            Self::Canceled => "canceled",
        };
        f.write_str(reason)
    }
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Waiting on the queue exceeded the timeout.
    #[error("pool wait timed out after {0:?}")]
    Timeout(Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    Closed,

    /// The wait was canceled before a connection became available.
    #[error("pool wait was canceled")]
    Canceled,

    /// The connection manager failed to create a connection.
    #[error("failed to create connection: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Build the error for a failed queue wait.
    ///
    /// `timeout` is the bound the wait ran under; it is only reported for
    /// [`QueueErrorKind::Timeout`].
    #[must_use]
    pub fn from_queue(kind: QueueErrorKind, timeout: Option<Duration>) -> Self {
        match kind {
            QueueErrorKind::Timeout => Self::Timeout(timeout.unwrap_or_default()),
            QueueErrorKind::Closed => Self::Closed,
            QueueErrorKind::Canceled => Self::Canceled,
        }
    }

    /// The queue reason behind this error, if it came from a queue wait.
    #[must_use]
    pub fn kind(&self) -> Option<QueueErrorKind> {
        match self {
            Self::Timeout(_) => Some(QueueErrorKind::Timeout),
            Self::Closed => Some(QueueErrorKind::Closed),
            Self::Canceled => Some(QueueErrorKind::Canceled),
            Self::Connection(_) | Self::Configuration(_) => None,
        }
    }

    /// Numeric status code for queue errors, `0` for everything else.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.kind().map_or(0, QueueErrorKind::code)
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// The pool itself never retries; this is a hint for callers.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Canceled)
    }
}

/// Errors raised by [`PoolRegistry`](crate::registry::PoolRegistry).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// No channel is registered under the requested name.
    #[error("channel `{0}` not found")]
    ChannelNotFound(String),

    /// The registry holds no channels at all.
    #[error("channel list is empty")]
    NoChannels,

    /// A pool operation failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl RegistryError {
    /// Whether this is a lookup failure (unknown name or empty registry).
    #[must_use]
    pub fn is_channel_not_found(&self) -> bool {
        matches!(self, Self::ChannelNotFound(_) | Self::NoChannels)
    }
}
