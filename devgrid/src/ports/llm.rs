//! LLM port.
//!
//! The broker needs exactly one thing from a language model: a raw
//! completion for a routing or reply prompt. Prompt construction and
//! decision parsing stay in the intent router, so backends remain a
//! one-method trait.

use crate::errors::BrokerResult;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Abstract `analyze(prompt) -> completion` interface to a language
/// model backend.
#[async_trait]
pub trait IntentLlm: Send + Sync {
    /// Stable model identifier for logging.
    fn model_name(&self) -> &str;

    /// Produce a completion for the given prompt.
    async fn analyze(&self, prompt: &str) -> BrokerResult<String>;
}

/// Deterministic LLM for tests and examples.
///
/// Replies are served from a FIFO script; once the script is exhausted,
/// the default reply is returned. Prompts are recorded for assertions.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    default_reply: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: default_reply.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue the next scripted reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(reply.into());
    }

    /// Prompts seen so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl IntentLlm for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, prompt: &str) -> BrokerResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = self.replies.lock().unwrap().pop_front();
        Ok(reply.unwrap_or_else(|| self.default_reply.clone()))
    }
}
