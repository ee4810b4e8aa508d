//! Runnable broker with mock ports: a scripted LLM, a mock camera
//! device, and header-based development auth.
//!
//! ```sh
//! cargo run --example broker_server
//! curl http://localhost:7420/.well-known/agent-card.json
//! curl -X POST http://localhost:7420/rpc \
//!   -H 'Content-Type: application/json' \
//!   -d '{"jsonrpc":"2.0","id":1,"method":"message/send",
//!        "params":{"message":{"messageId":"m1","role":"user",
//!        "parts":[{"kind":"text","text":"take a photo"}]}}}'
//! ```

use devgrid::ports::{MockDeviceConnector, ScriptedLlm, ToolDescriptor, ToolFile, ToolOutput};
use devgrid::registry::DeviceSpec;
use devgrid::Broker;
use devgrid_server::BrokerServer;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devgrid=debug,devgrid_server=debug,info".into()),
        )
        .init();

    // A mock camera behind the device connector.
    let connector = Arc::new(MockDeviceConnector::new());
    connector.add_source(
        "mock://cam-1",
        vec![ToolDescriptor::new(
            "capture_image",
            "Capture a still image from the camera",
        )],
    );
    connector.set_output(
        "capture_image",
        ToolOutput {
            data: serde_json::json!({ "resolution": "1920x1080" }),
            files: vec![ToolFile {
                name: Some("capture.jpg".to_string()),
                mime_type: "image/jpeg".to_string(),
                bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
            }],
        },
    );

    // Route photo requests to the camera; everything else is local chat.
    let llm = Arc::new(ScriptedLlm::new(
        r#"{"action": "local", "reply": "Hello from devgrid!", "confidence": 1.0}"#,
    ));

    let broker = Broker::builder(connector).with_llm(llm).build().await?;

    broker
        .register_device(DeviceSpec {
            device_id: "cam-1".to_string(),
            name: "Front Door Camera".to_string(),
            kind: "camera".to_string(),
            capability_source: "mock://cam-1".to_string(),
            intent_keywords: vec!["photo".to_string(), "picture".to_string()],
            system_prompt: Some(
                "Raise a task when the stream suggests someone is at the door.".to_string(),
            ),
            output_modes: vec!["image/jpeg".to_string()],
        })
        .await?;

    BrokerServer::builder(broker)
        .build()
        .serve("0.0.0.0:7420")
        .await?;
    Ok(())
}
