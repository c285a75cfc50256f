//! HTTP transport with retry, backoff and circuit breaking

mod client;
mod error;

pub use client::{HttpClient, HttpClientBuilder, SharedBreaker};
pub use error::HttpError;
