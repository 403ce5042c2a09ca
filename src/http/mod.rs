//! Outbound HTTP with timeout, retry and exponential backoff.
pub mod client;
pub mod transport;

pub use client::{FetchError, ResilientClient, RetryPolicy};
pub use transport::{RawResponse, ReqwestTransport, Transport, TransportError};
