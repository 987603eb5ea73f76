//! Model service boundary and its two backends.
//!
//! The pipeline only ever asks two things of a model: a short classification
//! (scalar text out) and a long generation (free text out, with sampling
//! knobs). `GeminiClient` speaks the hosted REST API over `ureq`;
//! `CommandClient` pipes the prompt into any local command, which keeps the
//! generator usable with local models, wrappers, and test doubles.
//!
//! Both backends bound every call by the configured timeout. A timed-out call
//! is reported as an ordinary transport error.

use crate::config::{resolve_api_key, Backend, GenConfig};
use crate::util::truncate_string;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STDERR_LIMIT: usize = 2000;
const ERROR_BODY_LIMIT: usize = 2000;

/// Classification-style request: pick a label, nothing else.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyRequest {
    pub model: String,
    pub prompt: String,
}

/// Generation-style request with sampling controls.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub thinking_budget: Option<u32>,
}

/// External text-completion provider.
pub trait ModelService: Send + Sync {
    fn classify(&self, request: &ClassifyRequest) -> Result<String>;
    fn generate(&self, request: &GenerateRequest) -> Result<String>;
}

/// Build the backend selected by the config.
pub fn build_model_service(config: &GenConfig) -> Result<Box<dyn ModelService>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.backend {
        Backend::Gemini => {
            let api_key = resolve_api_key(|key| std::env::var(key).ok())?;
            Ok(Box::new(GeminiClient::new(&config.api_base, api_key, timeout)))
        }
        Backend::Command => {
            let command = config
                .lm_command
                .as_deref()
                .ok_or_else(|| anyhow!("lm_command is required for the command backend"))?;
            Ok(Box::new(CommandClient::new(command, timeout)?))
        }
    }
}

// ============================================================================
// Gemini REST backend
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<ContentOut<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct ContentOut<'a> {
    parts: Vec<PartOut<'a>>,
}

#[derive(Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartIn>,
}

#[derive(Deserialize)]
struct PartIn {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Service explanation from an error reply, or the raw body when it has none.
fn service_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => truncate_string(body.trim(), ERROR_BODY_LIMIT),
    }
}

impl GenerateContentResponse {
    /// Answer text of the first candidate, skipping reasoning parts.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Blocking client for the `generateContent` endpoint.
pub struct GeminiClient {
    agent: ureq::Agent,
    api_base: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_base: &str, api_key: String, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: config.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.api_base, model)
    }

    fn call(&self, model: &str, body: &GenerateContentRequest<'_>, prompt_len: usize) -> Result<String> {
        let start = Instant::now();
        let mut response = self
            .agent
            .post(&self.endpoint(model))
            .header("x-goog-api-key", self.api_key.as_str())
            .send_json(body)
            .with_context(|| format!("call model {model}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            tracing::warn!(model, status = status.as_u16(), "lm invoke rejected");
            return Err(anyhow!(
                "call model {model}: http status {}: {}",
                status.as_u16(),
                service_error_message(&body)
            ));
        }
        let parsed: GenerateContentResponse = response
            .body_mut()
            .read_json()
            .context("decode generateContent response")?;
        let text = parsed.text();
        tracing::info!(
            model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = prompt_len,
            response_bytes = text.len(),
            "lm invoke complete"
        );
        Ok(text)
    }
}

impl ModelService for GeminiClient {
    fn classify(&self, request: &ClassifyRequest) -> Result<String> {
        let body = GenerateContentRequest {
            contents: vec![ContentOut {
                parts: vec![PartOut {
                    text: &request.prompt,
                }],
            }],
            generation_config: None,
        };
        self.call(&request.model, &body, request.prompt.len())
    }

    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let body = GenerateContentRequest {
            contents: vec![ContentOut {
                parts: vec![PartOut {
                    text: &request.prompt,
                }],
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(request.temperature),
                thinking_config: request
                    .thinking_budget
                    .map(|thinking_budget| ThinkingConfig { thinking_budget }),
            }),
        };
        self.call(&request.model, &body, request.prompt.len())
    }
}

// ============================================================================
// Local command backend
// ============================================================================

/// Runs a local command with the prompt on stdin and reads the answer from stdout.
///
/// Request metadata is exported to the child as `SKELGEN_REQUEST_KIND`
/// (`classify` or `generate`), `SKELGEN_MODEL`, `SKELGEN_TEMPERATURE`, and
/// `SKELGEN_THINKING_BUDGET` so wrappers can route on it.
#[derive(Debug, Clone)]
pub struct CommandClient {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandClient {
    pub fn new(command: &str, timeout: Duration) -> Result<Self> {
        let mut args =
            shell_words::split(command).with_context(|| format!("parse LM command: {command}"))?;
        if args.is_empty() {
            return Err(anyhow!("LM command is empty"));
        }
        let name = args.remove(0);
        let program =
            which::which(&name).with_context(|| format!("resolve LM command {name:?}"))?;
        Ok(Self {
            program,
            args,
            timeout,
        })
    }

    fn invoke(&self, prompt: &str, env: &[(&str, String)]) -> Result<String> {
        let start = Instant::now();
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            command.env(key, value);
        }
        let mut child = command
            .spawn()
            .with_context(|| format!("spawn LM command: {}", self.program.display()))?;

        let stdout = read_pipe(child.stdout.take());
        let stderr = read_pipe(child.stderr.take());
        let stdin = child.stdin.take().map(|mut stdin| {
            let bytes = prompt.as_bytes().to_vec();
            thread::spawn(move || match stdin.write_all(&bytes) {
                Err(err) if err.kind() != ErrorKind::BrokenPipe => Err(err),
                _ => Ok(()),
            })
        });

        let deadline = start + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait().context("wait for LM command")? {
                break status;
            }
            if Instant::now() >= deadline {
                // Kill failures mean the child already exited; nothing left to do.
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!("LM command timed out after {:?}", self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if let Some(handle) = stdin {
            handle
                .join()
                .map_err(|_| anyhow!("LM stdin writer panicked"))?
                .context("write prompt to LM stdin")?;
        }
        let stdout = join_pipe(stdout, "stdout")?;
        let stderr = join_pipe(stderr, "stderr")?;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = prompt.len(),
            response_bytes = stdout.len(),
            "lm invoke complete"
        );

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(anyhow!(
                "LM command failed with status {}: {}",
                status,
                truncate_string(stderr.trim(), STDERR_LIMIT)
            ));
        }
        String::from_utf8(stdout).context("decode LM stdout as UTF-8")
    }
}

impl ModelService for CommandClient {
    fn classify(&self, request: &ClassifyRequest) -> Result<String> {
        self.invoke(
            &request.prompt,
            &[
                ("SKELGEN_REQUEST_KIND", "classify".to_string()),
                ("SKELGEN_MODEL", request.model.clone()),
            ],
        )
    }

    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let mut env = vec![
            ("SKELGEN_REQUEST_KIND", "generate".to_string()),
            ("SKELGEN_MODEL", request.model.clone()),
            ("SKELGEN_TEMPERATURE", request.temperature.to_string()),
        ];
        if let Some(budget) = request.thinking_budget {
            env.push(("SKELGEN_THINKING_BUDGET", budget.to_string()));
        }
        self.invoke(&request.prompt, &env)
    }
}

fn read_pipe<R>(pipe: Option<R>) -> Option<JoinHandle<std::io::Result<Vec<u8>>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn join_pipe(
    handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    label: &str,
) -> Result<Vec<u8>> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow!("LM {label} reader panicked"))?
            .with_context(|| format!("read LM {label}")),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_skips_thought_parts() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "planning the game loop", "thought": true},
                        {"text": "<!DOCTYPE html>"},
                        {"text": "<html></html>"}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"totalTokenCount": 12}
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.text(), "<!DOCTYPE html><html></html>");
    }

    #[test]
    fn test_response_without_candidates_is_empty() {
        let parsed: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        assert_eq!(parsed.text(), "");
    }

    #[test]
    fn test_generate_body_carries_sampling_config() {
        let body = GenerateContentRequest {
            contents: vec![ContentOut {
                parts: vec![PartOut { text: "make a game" }],
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.5),
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: 4000,
                }),
            }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "make a game");
        assert_eq!(value["generationConfig"]["temperature"], 0.5);
        assert_eq!(
            value["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            4000
        );
    }

    #[test]
    fn test_classify_body_omits_generation_config() {
        let body = GenerateContentRequest {
            contents: vec![ContentOut {
                parts: vec![PartOut { text: "pick one" }],
            }],
            generation_config: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("generationConfig").is_none());
    }

    /// Answer exactly one HTTP request with `status` and `body`.
    fn serve_once(status: &str, body: &'static str) -> String {
        use std::io::{BufRead, BufReader};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();
            let mut stream = reader.into_inner();
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
        });
        format!("http://{addr}")
    }

    fn generate_request() -> GenerateRequest {
        GenerateRequest {
            model: "m".to_string(),
            prompt: "p".to_string(),
            temperature: 0.7,
            thinking_budget: None,
        }
    }

    #[test]
    fn test_http_error_carries_service_message() {
        let base = serve_once(
            "400 Bad Request",
            r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#,
        );
        let client = GeminiClient::new(&base, "bad".to_string(), Duration::from_secs(10));
        let err = client.generate(&generate_request()).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("http status 400"), "{message}");
        assert!(message.contains("API key not valid"), "{message}");
    }

    #[test]
    fn test_http_error_without_json_keeps_raw_body() {
        let base = serve_once("503 Service Unavailable", "upstream overloaded");
        let client = GeminiClient::new(&base, "key".to_string(), Duration::from_secs(10));
        let err = client.generate(&generate_request()).unwrap_err();
        assert!(format!("{err:#}").contains("upstream overloaded"), "{err:#}");
    }

    #[test]
    fn test_http_success_returns_candidate_text() {
        let base = serve_once(
            "200 OK",
            r#"{"candidates":[{"content":{"parts":[{"text":"s2_puzzle"}]}}]}"#,
        );
        let client = GeminiClient::new(&base, "key".to_string(), Duration::from_secs(10));
        let out = client
            .classify(&ClassifyRequest {
                model: "m".to_string(),
                prompt: "pick".to_string(),
            })
            .unwrap();
        assert_eq!(out, "s2_puzzle");
    }

    #[test]
    fn test_service_error_message_truncates_raw_body() {
        let body = "x".repeat(ERROR_BODY_LIMIT + 50);
        assert_eq!(service_error_message(&body).len(), ERROR_BODY_LIMIT);
        assert_eq!(
            service_error_message(r#"{"error":{"message":"quota exceeded"}}"#),
            "quota exceeded"
        );
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = GeminiClient::new("http://localhost:9/", "key".to_string(), Duration::from_secs(1));
        assert_eq!(
            client.endpoint("gemini-3-flash-preview"),
            "http://localhost:9/v1beta/models/gemini-3-flash-preview:generateContent"
        );
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(CommandClient::new("   ", Duration::from_secs(1)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_client_pipes_prompt_and_env() {
        let Ok(client) = CommandClient::new(
            r#"sh -c 'printf "%s:" "$SKELGEN_REQUEST_KIND"; cat'"#,
            Duration::from_secs(10),
        ) else {
            return;
        };
        let out = client
            .classify(&ClassifyRequest {
                model: "m".to_string(),
                prompt: "hello".to_string(),
            })
            .unwrap();
        assert_eq!(out, "classify:hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_client_reports_failure_stderr() {
        let Ok(client) =
            CommandClient::new(r#"sh -c 'echo boom >&2; exit 3'"#, Duration::from_secs(10))
        else {
            return;
        };
        let err = client
            .generate(&GenerateRequest {
                model: "m".to_string(),
                prompt: "p".to_string(),
                temperature: 0.7,
                thinking_budget: None,
            })
            .unwrap_err();
        assert!(err.to_string().contains("boom"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_client_times_out() {
        let Ok(client) = CommandClient::new("sleep 5", Duration::from_millis(200)) else {
            return;
        };
        let start = Instant::now();
        let err = client
            .classify(&ClassifyRequest {
                model: "m".to_string(),
                prompt: String::new(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("timed out after 200ms"), "{err}");
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
