//! Shared fakes for unit tests.
use crate::bridge::ExecutionSurface;
use crate::lm::{ClassifyRequest, GenerateRequest, ModelService};
use crate::templates::{EmbeddedTemplates, TemplateId, TemplateStore};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Model with one canned answer per request kind.
pub struct FakeModel {
    classify: Result<String, String>,
    generate: Result<String, String>,
    generate_calls: CallCount,
}

impl FakeModel {
    pub fn new() -> Self {
        Self {
            classify: Err("no classify answer scripted".to_string()),
            generate: Err("no generate answer scripted".to_string()),
            generate_calls: CallCount::default(),
        }
    }

    pub fn classify_ok(mut self, answer: &str) -> Self {
        self.classify = Ok(answer.to_string());
        self
    }

    pub fn classify_err(mut self, message: &str) -> Self {
        self.classify = Err(message.to_string());
        self
    }

    pub fn generate_ok(mut self, answer: &str) -> Self {
        self.generate = Ok(answer.to_string());
        self
    }

    pub fn generate_err(mut self, message: &str) -> Self {
        self.generate = Err(message.to_string());
        self
    }

    /// Counter shared with the model after it is boxed.
    pub fn generate_calls(&self) -> CallCount {
        self.generate_calls.clone()
    }
}

impl ModelService for FakeModel {
    fn classify(&self, _request: &ClassifyRequest) -> Result<String> {
        self.classify.clone().map_err(|message| anyhow!(message))
    }

    fn generate(&self, _request: &GenerateRequest) -> Result<String> {
        self.generate_calls.0.fetch_add(1, Ordering::SeqCst);
        self.generate.clone().map_err(|message| anyhow!(message))
    }
}

impl Default for FakeModel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallCount(Arc<AtomicUsize>);

impl CallCount {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bundled templates with selected resources knocked out.
pub struct FakeStore {
    missing: Vec<TemplateId>,
    catalog: bool,
}

impl FakeStore {
    pub fn embedded() -> Self {
        Self {
            missing: Vec::new(),
            catalog: true,
        }
    }

    pub fn without(mut self, id: TemplateId) -> Self {
        self.missing.push(id);
        self
    }

    pub fn without_catalog(mut self) -> Self {
        self.catalog = false;
        self
    }
}

impl TemplateStore for FakeStore {
    fn load(&self, id: TemplateId) -> Result<String> {
        if self.missing.contains(&id) {
            return Err(anyhow!("no resource for {id}"));
        }
        EmbeddedTemplates.load(id)
    }

    fn load_catalog(&self) -> Result<String> {
        if !self.catalog {
            return Err(anyhow!("catalog unavailable"));
        }
        EmbeddedTemplates.load_catalog()
    }
}

/// Surface whose inbound channel the test drives by hand.
#[derive(Default)]
pub struct ChannelSurface {
    sender: Mutex<Option<Sender<Value>>>,
    rendered: Mutex<Vec<String>>,
}

impl ChannelSurface {
    /// Post to the most recent render.
    pub fn post(&self, value: Value) {
        if let Some(sender) = self.sender() {
            let _ = sender.send(value);
        }
    }

    pub fn sender(&self) -> Option<Sender<Value>> {
        self.sender.lock().unwrap().clone()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

impl ExecutionSurface for ChannelSurface {
    fn render(&self, document: &str) -> Result<Receiver<Value>> {
        let (tx, rx) = mpsc::channel();
        *self.sender.lock().unwrap() = Some(tx);
        self.rendered.lock().unwrap().push(document.to_string());
        Ok(rx)
    }
}

/// Surface that refuses every document.
pub struct FailingSurface;

impl ExecutionSurface for FailingSurface {
    fn render(&self, _document: &str) -> Result<Receiver<Value>> {
        Err(anyhow!("output dir is read-only"))
    }
}
