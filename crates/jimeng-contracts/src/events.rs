use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::materials::{MaterialRef, MaterialType};

/// Lifecycle of one generate call, as recorded in the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    GenerationStarted {
        flavor: String,
        model: String,
        ratio: String,
        resolution: String,
        width: u32,
        height: u32,
        duration_s: u32,
        files: usize,
    },
    MaterialUploaded {
        index: usize,
        kind: MaterialType,
        reference: MaterialRef,
    },
    MaterialSkipped {
        index: usize,
        reason: String,
    },
    JobSubmitted {
        history_id: String,
        materials: usize,
    },
    JobPolled {
        history_id: String,
        attempt: u32,
        status: i64,
        fail_code: Option<i64>,
    },
    VideoReady {
        history_id: String,
        url: String,
    },
    GenerationFailed {
        flavor: String,
        history_id: Option<String>,
        error: String,
    },
}

/// Append-only JSONL log stamped with a generation id and UTC timestamp.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: PathBuf,
    generation_id: Arc<str>,
    lock: Arc<Mutex<()>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, generation_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            generation_id: Arc::from(generation_id.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append one event and return the line that was written.
    pub fn record(&self, event: &GenerationEvent) -> Result<Value> {
        let mut line = serde_json::to_value(event)?;
        let Some(fields) = line.as_object_mut() else {
            bail!("event did not serialize to an object");
        };
        fields.insert("generation_id".to_string(), Value::from(&*self.generation_id));
        fields.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&line)?)?;
        Ok(line)
    }
}
