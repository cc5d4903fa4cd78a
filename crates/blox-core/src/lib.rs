//! Core types for the Blox API gateway.
//!
//! This crate holds everything the other gateway crates agree on:
//!
//! - [`ResourceCategory`]: the closed set of upstream API families
//! - [`RequestDescriptor`]: an immutable description of one upstream call
//! - [`UpstreamResult`] and [`UpstreamClient`]: the outcome of one attempt and
//!   the seam through which attempts are made
//! - [`GatewayError`]: the typed failure taxonomy
//! - [`GatewayResponse`]: the envelope returned to callers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod category;
pub mod descriptor;
pub mod error;
pub mod response;
pub mod upstream;

pub use category::ResourceCategory;
pub use descriptor::{DescriptorBuilder, RequestDescriptor, CACHE_KEY_PREFIX};
pub use error::{GatewayError, GatewayResult};
pub use response::{ErrorBody, GatewayResponse};
pub use upstream::{UpstreamClient, UpstreamResult};

pub use http::Method;
