//! Content synthesis: template body plus request in, raw model text out.
//!
//! Nothing here judges the answer; extraction belongs to `sanitize`.
use crate::config::{ModelProfile, DEFAULT_SYNTH_TEMPERATURE};
use crate::error::PipelineError;
use crate::lm::{GenerateRequest, ModelService};
use crate::templates::{TemplateId, TemplateStore};
use crate::util::fill_placeholders;

const SYNTHESIZE_MD: &str = include_str!("../prompts/synthesize.md");

/// Build the generation prompt around a template body.
pub fn build_synthesis_prompt(template_body: &str, request: &str) -> String {
    fill_placeholders(
        SYNTHESIZE_MD,
        &[("template", template_body.trim()), ("request", request.trim())],
    )
}

/// Load the template and ask the model for a complete document.
///
/// A missing template is a configuration error and aborts before any model
/// call. An empty answer is passed through as-is.
pub fn synthesize(
    store: &dyn TemplateStore,
    model: &dyn ModelService,
    profile: &ModelProfile,
    id: TemplateId,
    request: &str,
) -> Result<String, PipelineError> {
    let body = store.load(id).map_err(|err| PipelineError::TemplateLoad {
        id,
        message: format!("{err:#}"),
    })?;
    let prompt = build_synthesis_prompt(&body, request);
    let request = GenerateRequest {
        model: profile.model.clone(),
        prompt,
        temperature: profile.temperature.unwrap_or(DEFAULT_SYNTH_TEMPERATURE),
        thinking_budget: profile.thinking_budget,
    };
    tracing::debug!(
        %id,
        model = %request.model,
        prompt_bytes = request.prompt.len(),
        "requesting synthesis"
    );
    model
        .generate(&request)
        .map_err(|err| PipelineError::SynthesisTransport(format!("{err:#}")))
}
