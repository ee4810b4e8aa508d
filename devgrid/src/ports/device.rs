//! Device tool port.
//!
//! A device exposes a discoverable set of tools behind an opaque
//! capability source reference. The broker probes the source at
//! registration time and invokes tools through the same connector.

use crate::errors::{BrokerError, BrokerResult};
use crate::workers::CancelToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// One tool as declared by a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub tool_id: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the tool's arguments, opaque to the core.
    #[serde(default = "empty_object")]
    pub input_schema: serde_json::Value,
    /// JSON Schema of the tool's result.
    #[serde(default = "empty_object")]
    pub output_schema: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl ToolDescriptor {
    pub fn new(tool_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            description: description.into(),
            input_schema: empty_object(),
            output_schema: empty_object(),
        }
    }

    /// Property names the tool's input schema marks as required.
    pub fn required_inputs(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
            .unwrap_or_default()
    }
}

/// A binary payload produced by a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolFile {
    pub name: Option<String>,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// The result of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Structured result data.
    pub data: serde_json::Value,
    /// Binary payloads, e.g. a captured image.
    pub files: Vec<ToolFile>,
}

/// Abstract capability-discovery and tool-call interface to one device.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Probe a capability source and return the tools it declares.
    ///
    /// Called during registration; an unreachable source fails the
    /// registration with `InvalidCapabilitySource`.
    async fn discover_tools(&self, source: &str) -> BrokerResult<Vec<ToolDescriptor>>;

    /// Invoke a tool. Must return promptly after `cancel` fires.
    async fn invoke_tool(
        &self,
        source: &str,
        tool_id: &str,
        arguments: serde_json::Value,
        cancel: CancelToken,
    ) -> BrokerResult<ToolOutput>;
}

/// In-memory connector for tests and examples.
///
/// Tools are registered per capability source; invocations are recorded
/// and answered from a canned output. A per-source delay simulates slow
/// devices and respects cancellation.
#[derive(Default)]
pub struct MockDeviceConnector {
    tools: Mutex<HashMap<String, Vec<ToolDescriptor>>>,
    outputs: Mutex<HashMap<String, ToolOutput>>,
    delays: Mutex<HashMap<String, Duration>>,
    invocations: Mutex<Vec<RecordedInvocation>>,
}

/// One recorded `invoke_tool` call.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub source: String,
    pub tool_id: String,
    pub arguments: serde_json::Value,
}

impl MockDeviceConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the tools a capability source responds with.
    pub fn add_source(&self, source: impl Into<String>, tools: Vec<ToolDescriptor>) {
        self.tools.lock().unwrap().insert(source.into(), tools);
    }

    /// Set the canned output for a tool.
    pub fn set_output(&self, tool_id: impl Into<String>, output: ToolOutput) {
        self.outputs.lock().unwrap().insert(tool_id.into(), output);
    }

    /// Delay every invocation on a tool, to exercise timeouts and
    /// cancellation.
    pub fn set_delay(&self, tool_id: impl Into<String>, delay: Duration) {
        self.delays.lock().unwrap().insert(tool_id.into(), delay);
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceConnector for MockDeviceConnector {
    async fn discover_tools(&self, source: &str) -> BrokerResult<Vec<ToolDescriptor>> {
        self.tools
            .lock()
            .unwrap()
            .get(source)
            .cloned()
            .ok_or_else(|| BrokerError::InvalidCapabilitySource {
                device_id: source.to_string(),
                reason: "unknown capability source".to_string(),
            })
    }

    async fn invoke_tool(
        &self,
        source: &str,
        tool_id: &str,
        arguments: serde_json::Value,
        cancel: CancelToken,
    ) -> BrokerResult<ToolOutput> {
        self.invocations.lock().unwrap().push(RecordedInvocation {
            source: source.to_string(),
            tool_id: tool_id.to_string(),
            arguments,
        });

        let delay = self.delays.lock().unwrap().get(tool_id).copied();
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(BrokerError::Canceled {
                        operation: format!("invoke {tool_id}"),
                    });
                }
            }
        }

        let output = self.outputs.lock().unwrap().get(tool_id).cloned();
        Ok(output.unwrap_or_else(|| ToolOutput {
            data: serde_json::json!({ "tool": tool_id, "ok": true }),
            files: Vec::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_inputs_from_schema() {
        let tool = ToolDescriptor {
            tool_id: "capture_image".into(),
            description: "Capture a still image".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "resolution": { "type": "string" } },
                "required": ["resolution"]
            }),
            output_schema: serde_json::json!({}),
        };
        assert_eq!(tool.required_inputs(), vec!["resolution"]);
        assert!(ToolDescriptor::new("noop", "").required_inputs().is_empty());
    }

    #[tokio::test]
    async fn mock_records_invocations() {
        let connector = MockDeviceConnector::new();
        connector.add_source("mock://cam-1", vec![ToolDescriptor::new("capture_image", "")]);

        let tools = connector.discover_tools("mock://cam-1").await.unwrap();
        assert_eq!(tools.len(), 1);

        connector
            .invoke_tool(
                "mock://cam-1",
                "capture_image",
                serde_json::json!({}),
                CancelToken::noop(),
            )
            .await
            .unwrap();
        assert_eq!(connector.invocations().len(), 1);
        assert_eq!(connector.invocations()[0].tool_id, "capture_image");
    }

    #[tokio::test]
    async fn unknown_source_is_invalid() {
        let connector = MockDeviceConnector::new();
        let err = connector.discover_tools("mock://nope").await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidCapabilitySource { .. }));
    }
}
