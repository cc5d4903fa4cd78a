//! # Blox Upstream
//!
//! HTTP client for the upstream REST API family. [`HttpUpstreamClient`]
//! implements [`blox_core::UpstreamClient`], turning one descriptor into one
//! HTTP request and classifying the outcome.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;

pub use client::{
    classify_response, extract_error_message, parse_retry_after, Credentials,
    HttpUpstreamClient, UpstreamConfig, DEFAULT_USER_AGENT,
};
pub use secrecy::SecretString;
