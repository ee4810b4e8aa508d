//! Abstract interfaces to the broker's external collaborators.
//!
//! The core never talks to a concrete device transport, LLM backend, or
//! storage engine; it goes through these ports. Mock implementations
//! used by tests and examples live alongside each trait.

pub mod device;
pub mod llm;
pub mod repository;

pub use device::{DeviceConnector, MockDeviceConnector, ToolDescriptor, ToolFile, ToolOutput};
pub use llm::{IntentLlm, ScriptedLlm};
pub use repository::{InMemoryRepository, Repository, StreamOrigin, TaskRecord};
