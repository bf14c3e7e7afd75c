use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::frame::FrameBuffer;
use crate::pipeline::{OutputSpec, STREAM_BUFFER_BYTES, StreamContext};

pub type SinkParameters = Map<String, Value>;

/// Receives every frame the driving loop fills.
pub trait FrameSink: Send {
    fn name(&self) -> &'static str;
    fn begin(&mut self, _ctx: &StreamContext) -> Result<()> {
        Ok(())
    }
    fn consume(&mut self, frame: &FrameBuffer, index: usize) -> Result<()>;
    /// Called once the stream is drained; records results in `metadata`.
    fn finish(&mut self, metadata: &mut Map<String, Value>) -> Result<()>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkSpec {
    pub sink: String,
    #[serde(default)]
    pub params: Option<SinkParameters>,
}

type SinkConstructor = Arc<dyn Fn(SinkParameters) -> Result<Box<dyn FrameSink>> + Send + Sync>;

pub struct SinkRegistry {
    factories: HashMap<String, SinkConstructor>,
}

impl Default for SinkRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        register_defaults(&mut registry);
        registry
    }
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(SinkParameters) -> Result<Box<dyn FrameSink>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(constructor));
    }

    pub fn create(&self, name: &str, params: SinkParameters) -> Result<Box<dyn FrameSink>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "Unknown sink '{}'. Available sinks: {}",
                name,
                self.known_sinks().join(", ")
            )
        })?;
        factory(params)
    }

    pub fn build(&self, specs: &[SinkSpec]) -> Result<Vec<Box<dyn FrameSink>>> {
        specs
            .iter()
            .map(|spec| self.create(&spec.sink, spec.params.clone().unwrap_or_default()))
            .collect()
    }

    pub fn known_sinks(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

pub fn register_defaults(registry: &mut SinkRegistry) {
    registry.register("raw", |params| Ok(Box::new(RawFileSink::from_params(params)?)));
    registry.register("digest", |params| {
        Ok(Box::new(DigestSink::from_params(params)?))
    });
}

/// Writes each filled buffer to the stream's output file.
///
/// With `visible_only` the stride padding and alignment rows are dropped and
/// only the tightly packed frame is written.
pub struct RawFileSink {
    extension: Option<String>,
    visible_only: bool,
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
    image_height: usize,
}

impl RawFileSink {
    pub fn from_params(mut params: SinkParameters) -> Result<Self> {
        let extension = take_string(&mut params, "extension");
        let visible_only = take_bool(&mut params, "visible_only").unwrap_or(false);
        Ok(Self {
            extension,
            visible_only,
            path: None,
            writer: None,
            bytes_written: 0,
            image_height: 0,
        })
    }

    fn write_visible(writer: &mut impl Write, frame: &FrameBuffer, rows: usize) -> Result<u64> {
        let row_bytes = frame.layout().min_line_length(frame.width());
        let line_length = frame.line_length();
        let mut written = 0u64;
        for row in 0..rows {
            let start = row * line_length;
            writer.write_all(&frame.data()[start..start + row_bytes])?;
            written += row_bytes as u64;
        }
        if frame.layout().is_420() {
            let base = frame.chroma_offset();
            for row in 0..rows / 2 {
                let start = base + row * line_length;
                writer.write_all(&frame.data()[start..start + row_bytes])?;
                written += row_bytes as u64;
            }
        }
        Ok(written)
    }
}

impl FrameSink for RawFileSink {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn begin(&mut self, ctx: &StreamContext) -> Result<()> {
        let extension = self
            .extension
            .clone()
            .unwrap_or_else(|| ctx.format.output_extension().to_string());
        let path = resolve_output_path(&ctx.output, &ctx.stem, &extension);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
        let file = File::create(&path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        self.writer = Some(BufWriter::with_capacity(STREAM_BUFFER_BYTES, file));
        self.path = Some(path);
        self.bytes_written = 0;
        self.image_height = ctx.image_height;
        Ok(())
    }

    fn consume(&mut self, frame: &FrameBuffer, index: usize) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("raw sink received a frame before the stream began"))?;
        let written = if self.visible_only {
            Self::write_visible(writer, frame, self.image_height)?
        } else {
            writer.write_all(frame.payload())?;
            frame.bytes_used() as u64
        };
        self.bytes_written += written;
        debug!(frame = index, bytes = written, "Raw frame written");
        Ok(())
    }

    fn finish(&mut self, metadata: &mut Map<String, Value>) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().context("Failed to flush output file")?;
        }
        if let Some(path) = self.path.take() {
            metadata.insert(
                "output_path".to_string(),
                Value::String(path.to_string_lossy().to_string()),
            );
        }
        metadata.insert("output.size_bytes".to_string(), json!(self.bytes_written));
        Ok(())
    }
}

/// SHA-256 over every frame payload in stream order.
pub struct DigestSink {
    key: String,
    hasher: Sha256,
}

impl DigestSink {
    pub fn from_params(mut params: SinkParameters) -> Result<Self> {
        let key = take_string(&mut params, "key").unwrap_or_else(|| "digest.sha256".to_string());
        Ok(Self {
            key,
            hasher: Sha256::new(),
        })
    }
}

impl FrameSink for DigestSink {
    fn name(&self) -> &'static str {
        "digest"
    }

    fn begin(&mut self, _ctx: &StreamContext) -> Result<()> {
        self.hasher = Sha256::new();
        Ok(())
    }

    fn consume(&mut self, frame: &FrameBuffer, _index: usize) -> Result<()> {
        self.hasher.update(frame.payload());
        Ok(())
    }

    fn finish(&mut self, metadata: &mut Map<String, Value>) -> Result<()> {
        let digest = std::mem::take(&mut self.hasher).finalize();
        metadata.insert(self.key.clone(), Value::String(format!("{:x}", digest)));
        Ok(())
    }
}

pub fn resolve_output_path(spec: &OutputSpec, stem: &str, extension: &str) -> PathBuf {
    let file_name = spec
        .structure
        .replace("{stem}", stem)
        .replace("{ext}", extension);
    spec.directory.join(file_name)
}

fn take_string(params: &mut SinkParameters, key: &str) -> Option<String> {
    params.remove(key).and_then(|value| match value {
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

fn take_bool(params: &mut SinkParameters, key: &str) -> Option<bool> {
    params.remove(key).and_then(|value| match value {
        Value::Bool(b) => Some(b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}
