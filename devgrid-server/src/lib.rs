//! Axum transport adapter for the devgrid broker.
//!
//! Binds the broker's neutral A2A handler to HTTP: a single JSON-RPC
//! POST endpoint with SSE streaming for `message/stream` and
//! `tasks/resubscribe`, plus the well-known agent card path.

pub mod auth;
pub mod error;
pub mod routes;
pub mod server;

pub use auth::{AuthError, AuthExtractor, HeaderAuth};
pub use server::{BrokerServer, BrokerServerBuilder};
