//! Transport layer: single requests, failure classification, retry.
//!
//! # Features
//!
//! - One POST per call against the listing or object endpoint
//! - Typed failures split into connect, server, client and parse kinds
//! - A single retry wrapper shared by every call site
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::transport::{ApiRequest, HttpTransport, Transport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new("https://www.eoz.kz/api/uicommand")?;
//! let doc = transport.request(&ApiRequest::object("Plan", "38901")).await?;
//! println!("{doc}");
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
pub mod retry;

pub use client::{ApiRequest, HttpTransport, Transport, parse_document};
pub use error::TransportError;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAYS, FailureKind, RetryDecision, RetryPolicy,
    classify_error, retry_call,
};
