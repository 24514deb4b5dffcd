use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::chat::Style;

/// One line of the chat diagnostics log. `type` is the snake_case variant
/// name; styles are written by label.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    SessionStarted {
        out_dir: String,
        provider: String,
        model: String,
        #[serde(serialize_with = "style_label")]
        style: Style,
    },
    StyleSelected {
        #[serde(serialize_with = "style_label")]
        style: Style,
    },
    GenerationDispatched {
        message_id: u64,
        #[serde(serialize_with = "style_label")]
        style: Style,
        model: String,
    },
    GenerationCompleted {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<u64>,
        provider: String,
        model: String,
        #[serde(serialize_with = "style_label")]
        style: Style,
        mime_type: String,
        latency_s: f64,
        provider_response: Map<String, Value>,
    },
    GenerationNoImage {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<u64>,
        provider: String,
        model: String,
        #[serde(serialize_with = "style_label")]
        style: Style,
        latency_s: f64,
        text_parts: Vec<String>,
        provider_response: Map<String, Value>,
    },
    GenerationFailed {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<u64>,
        model: String,
        #[serde(serialize_with = "style_label")]
        style: Style,
        #[serde(skip_serializing_if = "Option::is_none")]
        latency_s: Option<f64>,
        error: String,
    },
    ImageSaved {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<u64>,
        path: String,
        width: u32,
        height: u32,
        reencoded: bool,
    },
    ImageSaveFailed {
        message_id: u64,
        file_name: String,
        error: String,
    },
    SessionFinished {
        messages: usize,
    },
}

fn style_label<S: Serializer>(style: &Style, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(style.label())
}

#[derive(Serialize)]
struct LogLine<'a> {
    #[serde(flatten)]
    event: &'a ChatEvent,
    session_id: &'a str,
    ts: String,
}

/// Append-only `events.jsonl` for one chat session. Clones share the file
/// lock, so generation workers log next to the control thread.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                append: Mutex::new(()),
            }),
        }
    }

    pub fn for_new_session(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn record(&self, event: &ChatEvent) -> anyhow::Result<Value> {
        let line = serde_json::to_value(LogLine {
            event,
            session_id: &self.shared.session_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })?;
        let text = serde_json::to_string(&line)?;

        if let Some(dir) = self.shared.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let _append = self
            .shared
            .append
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)?;
        writeln!(file, "{text}")?;
        Ok(line)
    }

    /// Failed writes only warn on stderr; the chat keeps going.
    pub fn record_quiet(&self, event: ChatEvent) {
        if let Err(err) = self.record(&event) {
            eprintln!(
                "rlo warning: event log write to {} failed: {err:#}",
                self.shared.path.display()
            );
        }
    }
}
