//! In-process fakes for providers, used by unit tests across the crate.

use crate::error::ProviderError;
use crate::providers::{GenerationOptions, TextGenerator};
use crate::task::{ResultPersister, TaskHandle, TaskPoll, TaskProvider};
use crate::types::{Sizing, Values};
use std::collections::HashMap;
use std::sync::Mutex;

/// Scripted behaviour of a fake task
#[derive(Debug, Clone)]
pub enum Script {
    /// Processing until the nth poll, then completed
    CompleteAfter(u32),
    /// Processing until the nth poll, then failed with the message
    FailAfter(u32, String),
    /// Never leaves processing
    Never,
    /// Submission is rejected with the message
    RejectSubmit(String),
    /// The first n polls error out, the next one completes
    FlakyThenComplete(u32),
}

#[derive(Default)]
struct ProviderState {
    next_id: u32,
    prompts: HashMap<String, String>,
    polls: HashMap<String, u32>,
    submitted: Vec<String>,
    last_sizing: Option<Sizing>,
}

/// Task provider whose behaviour is chosen by substring match on the prompt
pub struct ScriptedTaskProvider {
    default: Script,
    scripts: Vec<(String, Script)>,
    state: Mutex<ProviderState>,
}

impl ScriptedTaskProvider {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            scripts: Vec::new(),
            state: Mutex::new(ProviderState::default()),
        }
    }

    /// Use `script` for prompts containing `needle`
    pub fn with_script(mut self, needle: impl Into<String>, script: Script) -> Self {
        self.scripts.push((needle.into(), script));
        self
    }

    fn script_for(&self, prompt: &str) -> Script {
        self.scripts
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn poll_count(&self, task_id: &str) -> u32 {
        self.state.lock().unwrap().polls.get(task_id).copied().unwrap_or(0)
    }

    pub fn submitted_prompts(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn last_sizing(&self) -> Option<Sizing> {
        self.state.lock().unwrap().last_sizing
    }
}

#[async_trait::async_trait]
impl TaskProvider for ScriptedTaskProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(
        &self,
        prompt: &str,
        sizing: Sizing,
        _extras: &Values,
    ) -> Result<TaskHandle, ProviderError> {
        if let Script::RejectSubmit(message) = self.script_for(prompt) {
            return Err(ProviderError::Submission(message));
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("task-{}", state.next_id);
        state.prompts.insert(id.clone(), prompt.to_string());
        state.submitted.push(prompt.to_string());
        state.last_sizing = Some(sizing);

        Ok(TaskHandle {
            poll_target: format!("mock://tasks/{}", id),
            id,
        })
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<TaskPoll, ProviderError> {
        let (count, prompt) = {
            let mut state = self.state.lock().unwrap();
            let count = {
                let entry = state.polls.entry(handle.id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            let prompt = state.prompts.get(&handle.id).cloned().unwrap_or_default();
            (count, prompt)
        };

        let locator = format!("https://provider.example/{}.png", handle.id);
        match self.script_for(&prompt) {
            Script::CompleteAfter(n) if count >= n => Ok(TaskPoll::completed(locator)),
            Script::CompleteAfter(n) => Ok(TaskPoll::processing(Some(count as f64 / n as f64))),
            Script::FailAfter(n, message) if count >= n => Ok(TaskPoll::failed(message)),
            Script::FailAfter(_, _) | Script::Never => Ok(TaskPoll::processing(None)),
            Script::FlakyThenComplete(n) if count <= n => {
                Err(ProviderError::InvalidResponse("connection reset".into()))
            }
            Script::FlakyThenComplete(_) => Ok(TaskPoll::completed(locator)),
            Script::RejectSubmit(message) => Err(ProviderError::Submission(message)),
        }
    }
}

/// Persister that always fails
pub struct FailingPersister;

#[async_trait::async_trait]
impl ResultPersister for FailingPersister {
    async fn persist(&self, _locator: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Persist("disk full".into()))
    }
}

/// Text generator returning canned responses
pub struct StaticTextGenerator {
    response: Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl StaticTextGenerator {
    pub fn replying(response: impl Into<String>) -> Self {
        Self {
            response: Ok(response.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: Err(message.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TextGenerator for StaticTextGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(ProviderError::Api {
                status: 500,
                message: message.clone(),
            }),
        }
    }
}
