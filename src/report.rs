use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::observability::MetricsSnapshot;
use crate::pipeline::PipelineResult;

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub streams: Vec<StreamReport>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct StreamReport {
    pub input: String,
    pub output: String,
    pub frames: usize,
    pub metadata: Map<String, Value>,
}

impl RunReport {
    pub fn new(results: &[PipelineResult], metrics: MetricsSnapshot) -> Self {
        let streams = results
            .iter()
            .map(|result| StreamReport {
                input: result.input.to_string_lossy().to_string(),
                output: result.output.to_string_lossy().to_string(),
                frames: result.frames,
                metadata: result.metadata.clone(),
            })
            .collect();
        Self {
            generated_at: Utc::now(),
            streams,
            metrics,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create report directory: {}", parent.display())
                })?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)
            .with_context(|| format!("Failed to write report JSON: {}", path.display()))?;
        Ok(())
    }
}
