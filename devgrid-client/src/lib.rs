//! Outbound A2A client for the devgrid broker.
//!
//! The broker delegates work to external agents over A2A JSON-RPC. This
//! crate holds the HTTP side of that: agent card discovery, the unary
//! method calls delegation needs (`message/send`, `tasks/get`,
//! `tasks/cancel`), transparent retry on transport errors, and a
//! per-endpoint health record the intent router uses for tie-breaking.

pub mod client;
pub mod error;

pub use client::{AgentClient, EndpointHealth};
pub use error::{ClientError, ClientResult};
