//! # Blox Gateway
//!
//! The facade every inbound request goes through. A fetch consults the
//! response cache first, then takes a rate-limit token for the request's
//! category, then calls the upstream under the retry controller, and finally
//! caches successful payloads. Failures are never cached and come back as a
//! [`GatewayResponse`](blox_core::GatewayResponse) carrying the typed error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod facade;
pub mod instrumented;

pub use facade::{Gateway, GatewayBuilder};
pub use instrumented::InstrumentedClient;
