//! Intent router.
//!
//! Takes an incoming message (or a device stream observation), the
//! current registry snapshot, and the external endpoint table, and
//! decides: answer locally, invoke a device tool, delegate to an
//! external agent, or reject. Pure with respect to its inputs — the
//! LLM call is its only I/O.

use crate::agents::AgentEndpoint;
use crate::config::RouterConfig;
use crate::errors::{BrokerError, BrokerResult};
use crate::ports::IntentLlm;
use crate::registry::{Device, Liveness};
use devgrid_a2a::{Message, MessageRole, Part};
use devgrid_client::EndpointHealth;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The router's verdict on one request.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Answer inline; no side-effects beyond completing the task.
    Local { reply: Message },
    /// Invoke a specific device tool.
    Device {
        device_id: String,
        tool_id: String,
        arguments: serde_json::Value,
    },
    /// Forward to an external agent.
    Delegate { agent_id: String },
    /// Decline the request.
    Reject { reason: String },
}

/// A decision plus the router's confidence in it.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub decision: Decision,
    pub confidence: f64,
    pub rationale: Option<String>,
    /// True when the local reply is a clarification request and the
    /// task should wait for input.
    pub needs_input: bool,
}

/// Immutable view of the world the router decides against.
pub struct RouterSnapshot {
    pub devices: Vec<Device>,
    pub endpoints: Vec<(AgentEndpoint, EndpointHealth)>,
}

/// Structured answer expected from the LLM.
#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    arguments: Option<serde_json::Value>,
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    rationale: Option<String>,
}

pub struct IntentRouter {
    llm: Option<Arc<dyn IntentLlm>>,
    config: RouterConfig,
    llm_timeout: Duration,
}

impl IntentRouter {
    pub fn new(
        llm: Option<Arc<dyn IntentLlm>>,
        config: RouterConfig,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            config,
            llm_timeout,
        }
    }

    /// Route one request.
    ///
    /// `origin` is set when the text came from a device stream; its
    /// system prompt then steers the LLM.
    pub async fn route(
        &self,
        text: &str,
        origin: Option<&Device>,
        snapshot: &RouterSnapshot,
    ) -> BrokerResult<RouteOutcome> {
        if let Some(llm) = &self.llm {
            match self.route_with_llm(llm.as_ref(), text, origin, snapshot).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    tracing::warn!(error = %e, "llm routing failed, falling back to keywords");
                }
            }
        }
        Ok(self.route_by_keywords(text, snapshot))
    }

    /// Keyword fast path: one unambiguous online device wins; anything
    /// else answers locally.
    fn route_by_keywords(&self, text: &str, snapshot: &RouterSnapshot) -> RouteOutcome {
        let candidates = keyword_candidates(text, &snapshot.devices, self.config.keyword_min_overlap);
        let online: Vec<&(usize, &Device)> = candidates
            .iter()
            .filter(|(_, d)| d.liveness == Liveness::Online)
            .collect();

        if online.len() == 1 {
            let device = online[0].1;
            if let Some(tool) = select_tool(device, text) {
                return RouteOutcome {
                    decision: Decision::Device {
                        device_id: device.device_id.clone(),
                        tool_id: tool.tool_id.clone(),
                        arguments: serde_json::json!({}),
                    },
                    confidence: 1.0,
                    rationale: Some("keyword fast path".to_string()),
                    needs_input: false,
                };
            }
        }

        RouteOutcome {
            decision: Decision::Local {
                reply: agent_reply(format!(
                    "No device capability matched this request; handled locally. Request was: {text}"
                )),
            },
            confidence: 1.0,
            rationale: Some("no unambiguous device match".to_string()),
            needs_input: false,
        }
    }

    async fn route_with_llm(
        &self,
        llm: &dyn IntentLlm,
        text: &str,
        origin: Option<&Device>,
        snapshot: &RouterSnapshot,
    ) -> BrokerResult<RouteOutcome> {
        let prompt = build_prompt(text, origin, snapshot);
        let completion = tokio::time::timeout(self.llm_timeout, llm.analyze(&prompt))
            .await
            .map_err(|_| BrokerError::Timeout {
                operation: "llm routing call".to_string(),
                duration_ms: self.llm_timeout.as_millis() as u64,
            })??;

        let raw = parse_decision(&completion)?;
        let confidence = raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0);
        let rationale = raw.rationale.clone();

        // Low-confidence non-local answers downgrade to a clarification
        // request and park the task on input-required.
        if confidence < self.config.confidence_threshold && raw.action != "local" {
            return Ok(RouteOutcome {
                decision: Decision::Local {
                    reply: agent_reply(format!(
                        "I am not sure how to handle this yet (best guess: {}). \
                         Could you add more detail?",
                        raw.action
                    )),
                },
                confidence,
                rationale,
                needs_input: true,
            });
        }

        let action = raw.action.clone();
        let decision = match action.as_str() {
            "local" => Decision::Local {
                reply: agent_reply(
                    raw.reply
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "Understood.".to_string()),
                ),
            },
            "device" => self.resolve_device(text, raw, snapshot)?,
            "delegate" => self.resolve_agent(text, raw, snapshot)?,
            "reject" => Decision::Reject {
                reason: raw
                    .rationale
                    .clone()
                    .unwrap_or_else(|| "request rejected by router".to_string()),
            },
            other => {
                return Err(BrokerError::Llm {
                    reason: format!("router llm returned unknown action '{other}'"),
                })
            }
        };

        Ok(RouteOutcome {
            decision,
            confidence,
            rationale,
            needs_input: false,
        })
    }

    /// Pin the LLM's device choice to a real, reachable device/tool,
    /// tie-breaking by the registry order.
    fn resolve_device(
        &self,
        text: &str,
        raw: RawDecision,
        snapshot: &RouterSnapshot,
    ) -> BrokerResult<Decision> {
        let candidates = keyword_candidates(text, &snapshot.devices, 0);
        let device = match raw.target.as_deref() {
            Some(target) => snapshot
                .devices
                .iter()
                .find(|d| d.device_id == target && d.liveness != Liveness::Offline),
            None => candidates
                .iter()
                .map(|(_, d)| *d)
                .find(|d| d.liveness == Liveness::Online),
        };
        let device = device.ok_or_else(|| BrokerError::Llm {
            reason: format!(
                "router llm chose device '{}' which is unknown or offline",
                raw.target.as_deref().unwrap_or("<none>")
            ),
        })?;

        let tool = match raw.tool.as_deref() {
            Some(tool_id) => device.tool(tool_id),
            None => select_tool(device, text),
        };
        let tool = tool.ok_or_else(|| BrokerError::ToolNotFound {
            device_id: device.device_id.clone(),
            tool_id: raw.tool.unwrap_or_else(|| "<unselected>".to_string()),
        })?;

        Ok(Decision::Device {
            device_id: device.device_id.clone(),
            tool_id: tool.tool_id.clone(),
            arguments: raw.arguments.unwrap_or_else(|| serde_json::json!({})),
        })
    }

    /// Pin the LLM's delegation choice to an enabled endpoint,
    /// tie-breaking by tag specificity then endpoint health.
    fn resolve_agent(
        &self,
        text: &str,
        raw: RawDecision,
        snapshot: &RouterSnapshot,
    ) -> BrokerResult<Decision> {
        if let Some(target) = raw.target.as_deref() {
            if snapshot
                .endpoints
                .iter()
                .any(|(e, _)| e.agent_id == target && e.enabled)
            {
                return Ok(Decision::Delegate {
                    agent_id: target.to_string(),
                });
            }
        }
        rank_endpoints(text, &snapshot.endpoints)
            .first()
            .map(|agent_id| Decision::Delegate {
                agent_id: agent_id.clone(),
            })
            .ok_or_else(|| BrokerError::Llm {
                reason: "router llm chose delegation but no endpoint is enabled".to_string(),
            })
    }
}

/// Devices with at least `min_overlap` keyword hits, ordered by overlap
/// count, liveness, then heartbeat recency. Offline devices never
/// match.
fn keyword_candidates<'a>(
    text: &str,
    devices: &'a [Device],
    min_overlap: usize,
) -> Vec<(usize, &'a Device)> {
    let lowered = text.to_lowercase();
    let mut candidates: Vec<(usize, &Device)> = devices
        .iter()
        .filter(|d| d.liveness != Liveness::Offline)
        .filter_map(|d| {
            let overlap = d
                .intent_keywords
                .iter()
                .filter(|k| lowered.contains(&k.to_lowercase()))
                .count();
            (overlap >= min_overlap.max(1)).then_some((overlap, d))
        })
        .collect();
    candidates.sort_by(|(overlap_a, a), (overlap_b, b)| {
        overlap_b
            .cmp(overlap_a)
            .then(liveness_rank(a.liveness).cmp(&liveness_rank(b.liveness)))
            .then(b.last_seen.cmp(&a.last_seen))
    });
    candidates
}

fn liveness_rank(liveness: Liveness) -> u8 {
    match liveness {
        Liveness::Online => 0,
        Liveness::Unknown => 1,
        Liveness::Offline => 2,
    }
}

/// Best tool on a device for a request, by input-schema compatibility:
/// tools named in the text win, then tools whose schema demands nothing
/// we cannot infer.
fn select_tool<'a>(
    device: &'a Device,
    text: &str,
) -> Option<&'a crate::ports::ToolDescriptor> {
    let lowered = text.to_lowercase();
    device
        .tools
        .iter()
        .map(|tool| {
            let name_hits = tool
                .tool_id
                .split('_')
                .filter(|token| !token.is_empty() && lowered.contains(&token.to_lowercase()))
                .count();
            let no_required = usize::from(tool.required_inputs().is_empty());
            (name_hits * 2 + no_required, tool)
        })
        .max_by_key(|(score, _)| *score)
        .map(|(_, tool)| tool)
}

/// Enabled endpoints ranked by capability-tag specificity (matching
/// tags, then fewer total tags), then last-success recency.
fn rank_endpoints(text: &str, endpoints: &[(AgentEndpoint, EndpointHealth)]) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut ranked: Vec<(usize, usize, Option<std::time::Instant>, &AgentEndpoint)> = endpoints
        .iter()
        .filter(|(e, _)| e.enabled)
        .map(|(e, health)| {
            let matching = e
                .capability_tags
                .iter()
                .filter(|t| lowered.contains(&t.to_lowercase()))
                .count();
            (matching, e.capability_tags.len(), health.last_success, e)
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(a.1.cmp(&b.1))
            .then(b.2.cmp(&a.2))
    });
    ranked.into_iter().map(|(_, _, _, e)| e.agent_id.clone()).collect()
}

fn build_prompt(text: &str, origin: Option<&Device>, snapshot: &RouterSnapshot) -> String {
    let mut prompt = String::from(
        "You route requests for a broker that fronts a fleet of devices and a set of \
         cooperating external agents.\n\nAvailable device skills:\n",
    );
    for device in snapshot
        .devices
        .iter()
        .filter(|d| d.liveness != Liveness::Offline)
    {
        prompt.push_str(&format!(
            "- device '{}' ({}), keywords [{}], tools: ",
            device.device_id,
            device.kind,
            device.intent_keywords.join(", ")
        ));
        for (i, tool) in device.tools.iter().enumerate() {
            if i > 0 {
                prompt.push_str(", ");
            }
            prompt.push_str(&tool.tool_id);
            if !tool.description.is_empty() {
                prompt.push_str(&format!(" ({})", tool.description));
            }
        }
        prompt.push('\n');
    }

    prompt.push_str("\nAvailable external agents:\n");
    for (endpoint, _) in snapshot.endpoints.iter().filter(|(e, _)| e.enabled) {
        prompt.push_str(&format!(
            "- agent '{}', tags [{}]\n",
            endpoint.agent_id,
            endpoint.capability_tags.join(", ")
        ));
    }

    if let Some(device) = origin {
        prompt.push_str(&format!(
            "\nThis request was observed on the data stream of device '{}'.\n",
            device.device_id
        ));
        if let Some(system_prompt) = &device.system_prompt {
            prompt.push_str(system_prompt);
            prompt.push('\n');
        }
    }

    prompt.push_str(&format!(
        "\nRequest: \"{text}\"\n\n\
         Answer with a single JSON object and nothing else:\n\
         {{\"action\": \"local\"|\"device\"|\"delegate\"|\"reject\", \
         \"target\": \"<device or agent id>\", \"tool\": \"<tool id>\", \
         \"arguments\": {{}}, \"reply\": \"<text when action is local>\", \
         \"confidence\": 0.0-1.0, \"rationale\": \"<one sentence>\"}}\n\
         Prefer \"local\" for small talk and questions you can answer directly."
    ));
    prompt
}

/// Pull the decision object out of a completion, tolerating prose or
/// code fences around the JSON.
fn parse_decision(completion: &str) -> BrokerResult<RawDecision> {
    let start = completion.find('{');
    let end = completion.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if end > start => &completion[start..=end],
        _ => completion,
    };
    serde_json::from_str(json).map_err(|e| BrokerError::Llm {
        reason: format!("router llm returned unparsable decision: {e}"),
    })
}

fn agent_reply(text: impl Into<String>) -> Message {
    Message {
        kind: devgrid_a2a::MESSAGE_KIND.to_string(),
        message_id: Uuid::new_v4().to_string(),
        role: MessageRole::Agent,
        parts: vec![Part::text(text.into())],
        context_id: None,
        task_id: None,
        reference_task_ids: Vec::new(),
        metadata: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ScriptedLlm, ToolDescriptor};
    use chrono::Utc;

    fn device(device_id: &str, keywords: &[&str], tools: &[&str], liveness: Liveness) -> Device {
        Device {
            device_id: device_id.to_string(),
            name: device_id.to_string(),
            kind: "camera".to_string(),
            capability_source: format!("mock://{device_id}"),
            tools: tools
                .iter()
                .map(|t| ToolDescriptor::new(t.to_string(), ""))
                .collect(),
            intent_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            system_prompt: None,
            output_modes: Vec::new(),
            last_seen: Utc::now(),
            liveness,
        }
    }

    fn endpoint(agent_id: &str, tags: &[&str]) -> (AgentEndpoint, EndpointHealth) {
        (
            AgentEndpoint {
                agent_id: agent_id.to_string(),
                url: format!("http://{agent_id}.example"),
                capability_tags: tags.iter().map(|t| t.to_string()).collect(),
                auth_token: None,
                enabled: true,
            },
            EndpointHealth::default(),
        )
    }

    #[tokio::test]
    async fn fast_path_picks_single_matching_device() {
        let router = IntentRouter::new(None, RouterConfig::default(), Duration::from_secs(30));
        let snapshot = RouterSnapshot {
            devices: vec![
                device("cam-1", &["photo", "picture"], &["capture_image"], Liveness::Online),
                device("thermo-1", &["temperature"], &["read_temp"], Liveness::Online),
            ],
            endpoints: Vec::new(),
        };

        let outcome = router.route("take a photo", None, &snapshot).await.unwrap();
        match outcome.decision {
            Decision::Device {
                device_id, tool_id, ..
            } => {
                assert_eq!(device_id, "cam-1");
                assert_eq!(tool_id, "capture_image");
            }
            other => panic!("expected device decision, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_match_answers_locally() {
        let router = IntentRouter::new(None, RouterConfig::default(), Duration::from_secs(30));
        let snapshot = RouterSnapshot {
            devices: vec![device("cam-1", &["photo"], &["capture_image"], Liveness::Online)],
            endpoints: Vec::new(),
        };

        let outcome = router.route("ping", None, &snapshot).await.unwrap();
        match outcome.decision {
            Decision::Local { reply } => assert!(!reply.text().is_empty()),
            other => panic!("expected local decision, got {other:?}"),
        }
        assert!(!outcome.needs_input);
    }

    #[tokio::test]
    async fn llm_device_decision_is_validated() {
        let llm = Arc::new(ScriptedLlm::new(""));
        llm.push_reply(
            r#"{"action": "device", "target": "cam-1", "tool": "capture_image",
                "arguments": {"resolution": "1080p"}, "confidence": 0.9}"#,
        );
        let router = IntentRouter::new(
            Some(llm),
            RouterConfig::default(),
            Duration::from_secs(30),
        );
        let snapshot = RouterSnapshot {
            devices: vec![device("cam-1", &["photo"], &["capture_image"], Liveness::Online)],
            endpoints: Vec::new(),
        };

        let outcome = router.route("take a photo", None, &snapshot).await.unwrap();
        match outcome.decision {
            Decision::Device { arguments, .. } => {
                assert_eq!(arguments["resolution"], "1080p");
            }
            other => panic!("expected device decision, got {other:?}"),
        }
        assert!((outcome.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn low_confidence_downgrades_to_clarification() {
        let llm = Arc::new(ScriptedLlm::new(""));
        llm.push_reply(r#"{"action": "device", "target": "cam-1", "confidence": 0.2}"#);
        let router = IntentRouter::new(
            Some(llm),
            RouterConfig::default(),
            Duration::from_secs(30),
        );
        let snapshot = RouterSnapshot {
            devices: vec![device("cam-1", &["photo"], &["capture_image"], Liveness::Online)],
            endpoints: Vec::new(),
        };

        let outcome = router.route("do the thing", None, &snapshot).await.unwrap();
        assert!(outcome.needs_input);
        assert!(matches!(outcome.decision, Decision::Local { .. }));
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_keywords() {
        let llm = Arc::new(ScriptedLlm::new("this is not json at all"));
        let router = IntentRouter::new(
            Some(llm),
            RouterConfig::default(),
            Duration::from_secs(30),
        );
        let snapshot = RouterSnapshot {
            devices: vec![device("cam-1", &["photo"], &["capture_image"], Liveness::Online)],
            endpoints: Vec::new(),
        };

        let outcome = router.route("take a photo", None, &snapshot).await.unwrap();
        assert!(matches!(outcome.decision, Decision::Device { .. }));
    }

    #[tokio::test]
    async fn delegation_prefers_specific_tags() {
        let llm = Arc::new(ScriptedLlm::new(""));
        llm.push_reply(r#"{"action": "delegate", "confidence": 0.9}"#);
        let router = IntentRouter::new(
            Some(llm),
            RouterConfig::default(),
            Duration::from_secs(30),
        );
        let snapshot = RouterSnapshot {
            devices: Vec::new(),
            endpoints: vec![
                endpoint("generalist", &["translation", "search", "summarize"]),
                endpoint("translator", &["translation"]),
            ],
        };

        let outcome = router
            .route("please handle this translation", None, &snapshot)
            .await
            .unwrap();
        match outcome.decision {
            Decision::Delegate { agent_id } => assert_eq!(agent_id, "translator"),
            other => panic!("expected delegation, got {other:?}"),
        }
    }

    #[test]
    fn decision_parsing_tolerates_fences() {
        let raw = parse_decision(
            "Here is my answer:\n```json\n{\"action\": \"local\", \"reply\": \"hi\", \
             \"confidence\": 1.0}\n```",
        )
        .unwrap();
        assert_eq!(raw.action, "local");
        assert_eq!(raw.reply.as_deref(), Some("hi"));

        assert!(parse_decision("no json here").is_err());
    }

    #[test]
    fn offline_devices_never_match_keywords() {
        let devices = vec![device("cam-1", &["photo"], &["capture_image"], Liveness::Offline)];
        assert!(keyword_candidates("take a photo", &devices, 1).is_empty());
    }
}
