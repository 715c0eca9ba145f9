//! Text generator that replays canned continuations in order.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use super::{GenerationParams, TextGenerator};
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct ScriptedTextGenerator {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedTextGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Load a JSON array of continuations.
    pub fn load(path: &Path) -> Result<Self> {
        let responses: Vec<String> = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Self::new(responses))
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl TextGenerator for ScriptedTextGenerator {
    fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<Vec<String>> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| Error::TextGenerator("script lock poisoned".to_string()))?;
        responses
            .pop_front()
            .map(|r| vec![r])
            .ok_or_else(|| Error::TextGenerator("script exhausted".to_string()))
    }
}
