//! Scripted model: replays canned replies in order
//!
//! Used by tests and offline runs. Each reply may be delayed or replaced by
//! an error to exercise timeout and failure paths.

use crate::llm::{CompletionRequest, LanguageModel, LlmError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Debug)]
enum Reply {
    Text(String),
    Fail(LlmError),
}

#[derive(Clone, Debug)]
struct Step {
    reply: Reply,
    delay: Option<Duration>,
}

#[derive(Default)]
pub struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Reply::Text(text.into()), None)
    }

    /// Queue a reply delivered after `delay`
    pub fn reply_after(self, text: impl Into<String>, delay: Duration) -> Self {
        self.push(Reply::Text(text.into()), Some(delay))
    }

    /// Queue a failure
    pub fn fail(self, error: LlmError) -> Self {
        self.push(Reply::Fail(error), None)
    }

    fn push(self, reply: Reply, delay: Option<Duration>) -> Self {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(Step { reply, delay });
        }
        self
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }

        let step = self.steps.lock().ok().and_then(|mut s| s.pop_front());
        let Some(step) = step else {
            return Err(LlmError::Unavailable {
                message: "script exhausted".to_string(),
            });
        };

        if let Some(delay) = step.delay {
            tokio::time::sleep(delay).await;
        }

        match step.reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(err) => Err(err),
        }
    }
}
