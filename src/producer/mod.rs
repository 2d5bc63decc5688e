//! Analysis producer access.
//!
//! This module provides the fallback-guarded producer client and the HTTP
//! transport it uses in production.

pub mod client;
pub mod http;

pub use client::{ProducerClient, ProducerTransport};
pub use http::HttpTransport;
