use std::time::Duration;

use crate::CancelReason;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    /// Invalid client configuration or a transport that could not be built.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Network failure that persisted through every allowed attempt.
    #[error("transport error after {attempts} attempt(s) in {elapsed:?}: {source}")]
    Transport {
        /// Number of send attempts performed.
        attempts: u32,
        /// Time spent from the first send to the final failure.
        elapsed: Duration,
        #[source]
        source: reqwest::Error,
    },
    /// A failure that retrying cannot fix, such as a redirect loop or a
    /// response body the transport could not decompress.
    #[error("request error after {attempts} attempt(s) in {elapsed:?}: {source}")]
    Request {
        /// Number of send attempts performed.
        attempts: u32,
        /// Time spent from the first send to the failure.
        elapsed: Duration,
        #[source]
        source: reqwest::Error,
    },
    /// The request context was cancelled or its deadline passed.
    #[error("request {reason} after {attempts} attempt(s) in {elapsed:?}")]
    Cancelled {
        /// Whether the token fired or the deadline passed.
        reason: CancelReason,
        /// Send attempts started before the context finished.
        attempts: u32,
        /// Time spent in the retry loop.
        elapsed: Duration,
    },
    /// A response arrived but its body did not decode into the requested type.
    #[error("decode error (http status {status}): {source}")]
    Decode {
        /// HTTP status of the undecodable response.
        status: u16,
        #[source]
        source: serde_json::Error,
    },
    /// The request body could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),
    /// The request could not be built (malformed URL, invalid header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpClientError {
    /// Number of send attempts made before this error, when known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Transport { attempts, .. }
            | Self::Request { attempts, .. }
            | Self::Cancelled { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Time spent in the retry loop before this error, when known.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Self::Transport { elapsed, .. }
            | Self::Request { elapsed, .. }
            | Self::Cancelled { elapsed, .. } => Some(*elapsed),
            _ => None,
        }
    }

    /// HTTP status of the response that failed to decode.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for retryable network failures that exhausted the budget.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// True when the request context stopped the call.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// True when a response arrived but did not decode.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}
