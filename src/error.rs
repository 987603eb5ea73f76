//! Error taxonomy for the generation pipeline.
//!
//! Only failures that abort a run (or reject a trigger outright) are errors.
//! Selector fallbacks, extraction warnings, and runtime errors from the
//! preview are recorded as data and events instead.

use crate::pipeline::RunState;
use crate::templates::TemplateId;
use thiserror::Error;

/// Fatal pipeline failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The game description was blank; nothing was started.
    #[error("game description must not be empty")]
    EmptyRequest,

    /// A run is already in progress on this pipeline.
    #[error("a generation run is already in progress")]
    Busy,

    /// The template catalog could not be read.
    #[error("failed to load template catalog: {0}")]
    CatalogLoad(String),

    /// The selected template has no backing resource.
    #[error("failed to load template {id}: {message}")]
    TemplateLoad { id: TemplateId, message: String },

    /// The generation-style model call failed outright.
    #[error("{0}")]
    SynthesisTransport(String),

    /// The execution surface refused the document.
    #[error("failed to render preview: {0}")]
    Render(String),

    /// A run tried to move between states out of order.
    #[error("invalid run transition {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },
}
