//! `resilient-http` is an async HTTP client built for long-lived services.
//!
//! A single [`ResilientClient`] owns a pooled keep-alive transport and exposes:
//! - [`ResilientClient::get`]
//! - [`ResilientClient::post`]
//!
//! Transport failures are retried up to the configured retry count with a
//! backoff delay between attempts. Every call takes a [`RequestContext`]
//! whose cancellation or deadline aborts the call, including a pending
//! backoff sleep.

mod client;
mod config;
mod context;
mod error;
mod logger;

pub use client::{ContentType, ResilientClient, MIME_FORM, MIME_JSON};
pub use config::{BackoffStrategy, ClientConfig};
pub use context::{CancelReason, RequestContext};
pub use error::HttpClientError;
#[cfg(feature = "tracing")]
pub use logger::TracingLogger;
pub use logger::{Level, Logger, NoopLogger};

pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, HttpClientError>;
