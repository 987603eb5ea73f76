//! One generation run, end to end.
//!
//! A `Pipeline` owns the collaborators and the shared event log. Each call
//! to `run` builds a fresh `PipelineRun` that walks the state machine
//!
//! ```text
//! Idle -> Selecting -> Synthesizing -> Sanitizing -> Rendered
//!             \              \              \
//!              +--------------+--------------+--> Failed
//! ```
//!
//! Runs never overlap: a second trigger while one is in flight is rejected
//! with `PipelineError::Busy` before it touches the log. Starting a run tears
//! down the previous preview subscription and then clears the log, so nothing
//! from an earlier run can appear in the new one.
use crate::bridge::{ExecutionBridge, ExecutionSurface, RuntimeErrorSubscription};
use crate::config::{GenConfig, ModelProfile};
use crate::error::PipelineError;
use crate::events::{Event, EventLog};
use crate::lm::ModelService;
use crate::sanitize::{sanitize, Sanitized};
use crate::selector::{select_template, Selection};
use crate::synthesizer::synthesize;
use crate::templates::{TemplateId, TemplateStore};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Selecting,
    Synthesizing,
    Sanitizing,
    Rendered,
    Failed,
}

impl RunState {
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Selecting)
                | (Selecting, Synthesizing)
                | (Synthesizing, Sanitizing)
                | (Sanitizing, Rendered)
                | (Selecting | Synthesizing | Sanitizing, Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Selecting => "selecting",
            RunState::Synthesizing => "synthesizing",
            RunState::Sanitizing => "sanitizing",
            RunState::Rendered => "rendered",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything one generation produced. Replaced wholesale by the next run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub request: String,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Sanitized>,
    #[serde(
        serialize_with = "serialize_failure",
        skip_serializing_if = "Option::is_none"
    )]
    pub failure: Option<PipelineError>,
    /// Log snapshot at completion, newest first.
    pub events: Vec<Event>,
}

fn serialize_failure<S>(failure: &Option<PipelineError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match failure {
        Some(err) => serializer.serialize_str(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

impl PipelineRun {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            state: RunState::Idle,
            selection: None,
            output: None,
            failure: None,
            events: Vec::new(),
        }
    }

    /// Move to `next`, rejecting out-of-order transitions.
    pub fn advance(&mut self, next: RunState) -> Result<(), PipelineError> {
        if !self.state.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = %self.state, to = %next, "run transition");
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, err: PipelineError) {
        if self.state.can_advance_to(RunState::Failed) {
            self.state = RunState::Failed;
        }
        self.output = None;
        self.failure = Some(err);
    }

    pub fn template(&self) -> Option<TemplateId> {
        self.selection.as_ref().map(|selection| selection.id)
    }

    pub fn document(&self) -> Option<&str> {
        self.output.as_ref().map(|output| output.document.as_str())
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Rendered
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Generation pipeline with its collaborators and event log.
pub struct Pipeline<S> {
    store: Box<dyn TemplateStore>,
    model: Box<dyn ModelService>,
    selector: ModelProfile,
    synthesizer: ModelProfile,
    bridge: ExecutionBridge<S>,
    log: EventLog,
    busy: AtomicBool,
    preview: Mutex<Option<RuntimeErrorSubscription>>,
}

impl<S: ExecutionSurface> Pipeline<S> {
    pub fn new(
        store: Box<dyn TemplateStore>,
        model: Box<dyn ModelService>,
        config: &GenConfig,
        surface: S,
    ) -> Self {
        let log = EventLog::new();
        Self {
            store,
            model,
            selector: config.selector.clone(),
            synthesizer: config.synthesizer.clone(),
            bridge: ExecutionBridge::new(surface, log.clone()),
            log,
            busy: AtomicBool::new(false),
            preview: Mutex::new(None),
        }
    }

    pub fn surface(&self) -> &S {
        self.bridge.surface()
    }

    #[cfg(test)]
    fn log(&self) -> &EventLog {
        &self.log
    }

    #[cfg(test)]
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Whether the last rendered preview is still feeding runtime errors.
    #[cfg(test)]
    fn preview_active(&self) -> bool {
        self.preview_slot()
            .as_ref()
            .map(RuntimeErrorSubscription::is_active)
            .unwrap_or(false)
    }

    fn preview_slot(&self) -> MutexGuard<'_, Option<RuntimeErrorSubscription>> {
        self.preview.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop listening to the current preview, if any.
    pub fn teardown_preview(&self) {
        let previous = self.preview_slot().take();
        if let Some(mut subscription) = previous {
            if subscription.is_active() {
                tracing::debug!(epoch = subscription.epoch(), "tearing down preview subscription");
            }
            subscription.cancel();
        }
    }

    /// Run the whole pipeline for one description.
    ///
    /// `Err` means the trigger was rejected and nothing happened. Every
    /// started run returns `Ok`, with the outcome recorded in the run itself.
    pub fn run(&self, request: &str) -> Result<PipelineRun, PipelineError> {
        let request = request.trim();
        if request.is_empty() {
            return Err(PipelineError::EmptyRequest);
        }
        let _busy = BusyGuard::acquire(&self.busy).ok_or(PipelineError::Busy)?;

        self.teardown_preview();
        self.log.clear();

        let mut run = PipelineRun::new(request);
        self.log.info(format!("Analyzing request: \"{request}\"..."));
        if let Err(err) = self.execute(&mut run) {
            self.log.error(format!("Error during generation: {err}"));
            run.fail(err);
        }
        run.events = self.log.snapshot();
        Ok(run)
    }

    fn execute(&self, run: &mut PipelineRun) -> Result<(), PipelineError> {
        run.advance(RunState::Selecting)?;
        let catalog = self
            .store
            .load_catalog()
            .map_err(|err| PipelineError::CatalogLoad(format!("{err:#}")))?;
        let selection = select_template(
            self.model.as_ref(),
            &self.selector.model,
            &run.request,
            &catalog,
        );
        let id = selection.id;
        match &selection.fallback {
            Some(reason) => self
                .log
                .success(format!("Template selected: {id} (fallback: {reason})")),
            None => self.log.success(format!("Template selected: {id}")),
        };
        run.selection = Some(selection);

        run.advance(RunState::Synthesizing)?;
        self.log
            .info(format!("Generating game code based on {id} template..."));
        let raw = synthesize(
            self.store.as_ref(),
            self.model.as_ref(),
            &self.synthesizer,
            id,
            &run.request,
        )?;

        run.advance(RunState::Sanitizing)?;
        let sanitized = sanitize(&raw);
        self.log.info(format!(
            "Extracted {}-byte document from model response",
            sanitized.document.len()
        ));
        if let Some(warning) = &sanitized.warning {
            self.log.error(format!("Warning: {warning}"));
        }

        let subscription = self
            .bridge
            .render(&sanitized.document)
            .map_err(|err| PipelineError::Render(format!("{err:#}")))?;
        *self.preview_slot() = Some(subscription);
        run.output = Some(sanitized);
        run.advance(RunState::Rendered)?;
        self.log.success("Game generation complete!");
        Ok(())
    }
}
