//! Template routing.
//!
//! Selection is advisory: whatever the model answers, the caller gets a
//! usable template id. Anything outside the known set falls back to
//! `TemplateId::FALLBACK` and is reported as data, never as an error.
use crate::lm::{ClassifyRequest, ModelService};
use crate::templates::TemplateId;
use crate::util::{fill_placeholders, preview};
use serde::Serialize;
use std::fmt;

const SELECT_TEMPLATE_MD: &str = include_str!("../prompts/select_template.md");

/// Why the selector fell back to the default template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    /// The model answered with nothing usable.
    EmptyResponse,
    /// The model answered with a token outside the known set.
    UnknownId { response: String },
    /// The model call itself failed.
    Transport { message: String },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::EmptyResponse => write!(f, "empty response"),
            FallbackReason::UnknownId { response } => {
                write!(f, "unrecognized id {:?}", preview(response, 60))
            }
            FallbackReason::Transport { message } => write!(f, "model call failed: {message}"),
        }
    }
}

/// Outcome of template routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub id: TemplateId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
}

impl Selection {
    fn chosen(id: TemplateId) -> Self {
        Self { id, fallback: None }
    }

    fn fallback(reason: FallbackReason) -> Self {
        Self {
            id: TemplateId::FALLBACK,
            fallback: Some(reason),
        }
    }
}

/// Build the routing prompt from the request and the catalog text.
pub fn build_selection_prompt(request: &str, catalog: &str) -> String {
    fill_placeholders(
        SELECT_TEMPLATE_MD,
        &[("request", request.trim()), ("catalog", catalog.trim())],
    )
}

/// Map a raw model answer onto the known identifier set.
pub fn interpret_response(raw: &str) -> Selection {
    let token = raw.trim().to_lowercase();
    if token.is_empty() {
        return Selection::fallback(FallbackReason::EmptyResponse);
    }
    match TemplateId::from_token(&token) {
        Some(id) => Selection::chosen(id),
        None => Selection::fallback(FallbackReason::UnknownId {
            response: raw.trim().to_string(),
        }),
    }
}

/// Ask the model for the best-matching template; never fails.
pub fn select_template(
    model: &dyn ModelService,
    model_name: &str,
    request: &str,
    catalog: &str,
) -> Selection {
    let prompt = build_selection_prompt(request, catalog);
    let selection = match model.classify(&ClassifyRequest {
        model: model_name.to_string(),
        prompt,
    }) {
        Ok(raw) => interpret_response(&raw),
        Err(err) => Selection::fallback(FallbackReason::Transport {
            message: format!("{err:#}"),
        }),
    };
    match &selection.fallback {
        Some(reason) => tracing::warn!(id = %selection.id, %reason, "template selection fell back"),
        None => tracing::info!(id = %selection.id, "template selected"),
    }
    selection
}
