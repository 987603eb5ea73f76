//! Execution bridge: hands documents to an isolated surface and turns the
//! surface's structured error messages into log events.
//!
//! The bridge never inspects or edits the document. Each render yields a
//! `RuntimeErrorSubscription` bound to the log epoch current at render time;
//! cancelling it (or starting a new run, which clears the log) stops further
//! runtime errors from that preview reaching the log.
use crate::events::{EventKind, EventLog};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub const GAME_FILE: &str = "game.html";
pub const PREVIEW_FILE: &str = "preview.html";

/// Isolated environment that runs a generated document.
pub trait ExecutionSurface: Send + Sync {
    /// Start rendering `document`; the receiver carries raw inbound messages.
    fn render(&self, document: &str) -> Result<Receiver<Value>>;
}

/// A runtime error reported by the rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub line: u64,
}

impl RuntimeError {
    pub fn event_message(&self) -> String {
        format!("Runtime Error: {} (Line: {})", self.message, self.line)
    }
}

/// Accept only `{type: "error", message: string, line: integer}` objects.
///
/// `kind` is accepted in place of `type`. Anything else is unrelated traffic.
pub fn parse_surface_message(value: &Value) -> Option<RuntimeError> {
    let object = value.as_object()?;
    let tag = object
        .get("type")
        .or_else(|| object.get("kind"))
        .and_then(Value::as_str)?;
    if tag != "error" {
        return None;
    }
    let message = object.get("message").and_then(Value::as_str)?;
    let line = object.get("line").and_then(Value::as_u64)?;
    Some(RuntimeError {
        message: message.to_string(),
        line,
    })
}

/// Live link between one rendered preview and the event log.
pub struct RuntimeErrorSubscription {
    epoch: u64,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RuntimeErrorSubscription {
    fn spawn(inbound: Receiver<Value>, log: EventLog, epoch: u64) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let handle = thread::spawn(move || listen(inbound, &log, epoch, &flag));
        Self {
            epoch,
            cancelled,
            handle: Some(handle),
        }
    }

    /// Log epoch this subscription writes into.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the listener is still delivering messages.
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire)
            && self
                .handle
                .as_ref()
                .map(|handle| !handle.is_finished())
                .unwrap_or(false)
    }

    /// Stop delivery and wait for the listener to exit.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("runtime error listener panicked");
            }
        }
    }
}

impl Drop for RuntimeErrorSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn listen(inbound: Receiver<Value>, log: &EventLog, epoch: u64, cancelled: &AtomicBool) {
    loop {
        if cancelled.load(Ordering::Acquire) {
            return;
        }
        match inbound.recv_timeout(POLL_INTERVAL) {
            Ok(value) => {
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                match parse_surface_message(&value) {
                    Some(error) => {
                        if log
                            .append_in(epoch, EventKind::Error, error.event_message())
                            .is_none()
                        {
                            return;
                        }
                    }
                    None => tracing::debug!(%value, "ignoring unrelated surface message"),
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Couples a surface with the log that receives its runtime errors.
pub struct ExecutionBridge<S> {
    surface: S,
    log: EventLog,
}

impl<S: ExecutionSurface> ExecutionBridge<S> {
    pub fn new(surface: S, log: EventLog) -> Self {
        Self { surface, log }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Render the document and subscribe to its runtime errors.
    pub fn render(&self, document: &str) -> Result<RuntimeErrorSubscription> {
        let epoch = self.log.epoch();
        let inbound = self.surface.render(document)?;
        tracing::debug!(epoch, document_bytes = document.len(), "subscribed to surface messages");
        Ok(RuntimeErrorSubscription::spawn(
            inbound,
            self.log.clone(),
            epoch,
        ))
    }
}

/// Writes the document and a sandboxed preview host page to a directory.
///
/// `game.html` is the document byte-for-byte. `preview.html` embeds it in an
/// iframe that may run scripts but cannot navigate or reach the top frame.
/// Static files have no live back-channel, so the returned receiver is
/// already disconnected.
#[derive(Debug, Clone)]
pub struct FileSurface {
    out_dir: PathBuf,
}

impl FileSurface {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }

    pub fn game_path(&self) -> PathBuf {
        self.out_dir.join(GAME_FILE)
    }

    pub fn preview_path(&self) -> PathBuf {
        self.out_dir.join(PREVIEW_FILE)
    }
}

impl ExecutionSurface for FileSurface {
    fn render(&self, document: &str) -> Result<Receiver<Value>> {
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("create output dir {}", self.out_dir.display()))?;
        write_atomic(&self.game_path(), document)?;
        if let Err(err) = write_atomic(&self.preview_path(), &preview_page(document)) {
            // A failed render must not leave this run's document behind.
            let _ = fs::remove_file(self.game_path());
            return Err(err);
        }
        tracing::info!(
            game = %self.game_path().display(),
            preview = %self.preview_path().display(),
            "rendered preview files"
        );
        let (_closed, inbound) = mpsc::channel();
        Ok(inbound)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    file.persist(path)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

/// Host page embedding the document in a sandboxed iframe.
pub fn preview_page(document: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Game Preview</title>
<style>
  html, body {{ margin: 0; height: 100%; background: #020617; }}
  iframe {{ border: none; width: 100%; height: 100%; background: #000; }}
  #errors {{ position: fixed; bottom: 0; left: 0; right: 0; max-height: 30%; overflow: auto;
            margin: 0; padding: 8px 12px; font: 12px monospace; color: #f87171; background: rgba(0,0,0,.8); }}
  #errors:empty {{ display: none; }}
</style>
</head>
<body>
<iframe title="Game Preview" sandbox="allow-scripts allow-modals" srcdoc="{srcdoc}"></iframe>
<pre id="errors"></pre>
<script>
addEventListener("message", function (event) {{
  var data = event.data;
  if (!data || data.type !== "error" || typeof data.message !== "string") return;
  document.getElementById("errors").textContent +=
    "Runtime Error: " + data.message + " (Line: " + data.line + ")\n";
}});
</script>
</body>
</html>
"#,
        srcdoc = escape_attr(document)
    )
}

fn escape_attr(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}
