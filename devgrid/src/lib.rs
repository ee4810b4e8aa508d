//! devgrid — a broker between a fleet of end devices and external
//! agents speaking the A2A JSON-RPC protocol.
//!
//! The broker accepts A2A requests, decides which device capability (if
//! any) should fulfill them, dispatches work to a device tool or a peer
//! agent, streams device data through a durable per-device log, and
//! periodically inspects that log to autonomously raise new tasks.

pub mod agents;
pub mod broker;
pub mod card;
pub mod config;
pub mod errors;
pub mod handler;
pub mod ports;
pub mod registry;
pub mod router;
pub mod scan;
pub mod streams;
pub mod tasks;
pub mod workers;

pub use broker::{Broker, BrokerBuilder};
pub use config::BrokerConfig;
pub use errors::{BrokerError, BrokerResult};
pub use handler::{A2aHandler, HandlerOutcome, Principal};
