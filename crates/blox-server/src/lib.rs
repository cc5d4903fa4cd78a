//! # Blox Server
//!
//! axum front end for the Blox API gateway. Handlers translate REST calls
//! into request descriptors and render the gateway envelope; the server
//! applies the configured request deadline, CORS, request IDs and logging.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResponse};
pub use routes::create_router;
pub use server::{shutdown_signal, Server, ServerError};
pub use state::AppState;
