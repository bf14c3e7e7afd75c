use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::frame::{
    FrameBuffer, FrameError, MacroblockPlane, Plane, PlaneLayout, SourceFormat, macroblock_grid,
    read_frame, remap_reconstruction,
};
use crate::job::{Job, Resolution};
use crate::observability::MetricsCollector;
use crate::sinks::{FrameSink, SinkRegistry};

/// Capacity of the buffered readers and writers wrapped around frame files.
pub const STREAM_BUFFER_BYTES: usize = 20 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSpec {
    pub directory: PathBuf,
    #[serde(default = "default_output_structure")]
    pub structure: String,
}

fn default_output_structure() -> String {
    "{stem}.{ext}".to_string()
}

impl OutputSpec {
    /// Output spec that resolves to exactly `path`.
    pub fn for_file(path: &Path) -> Self {
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let structure = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(default_output_structure);
        Self {
            directory,
            structure,
        }
    }
}

/// Per-stream information handed to sinks before the first frame.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub input_path: PathBuf,
    pub stem: String,
    pub format: SourceFormat,
    pub width: usize,
    pub image_height: usize,
    pub output: OutputSpec,
}

/// The driving loop: one reusable input buffer, one reader per source format,
/// and every filled frame handed to the sinks in order.
pub struct FramePipeline {
    format: SourceFormat,
    resolution: Resolution,
    line_length: usize,
    frame_limit: Option<usize>,
    sinks: Vec<Box<dyn FrameSink>>,
    output: OutputSpec,
    metrics: MetricsCollector,
}

impl FramePipeline {
    pub fn new(
        format: SourceFormat,
        resolution: Resolution,
        line_length: Option<usize>,
        frame_limit: Option<usize>,
        sinks: Vec<Box<dyn FrameSink>>,
        output: OutputSpec,
    ) -> Self {
        let layout = format.destination_layout();
        Self {
            format,
            resolution,
            line_length: line_length.unwrap_or_else(|| layout.min_line_length(resolution.width)),
            frame_limit,
            sinks,
            output,
            metrics: MetricsCollector::new(),
        }
    }

    /// Input buffer sized as the encoder's pool would size it.
    pub fn allocate_buffer(&self) -> Result<FrameBuffer, FrameError> {
        FrameBuffer::with_line_length(
            self.resolution.width,
            self.resolution.height,
            self.format.destination_layout(),
            self.line_length,
        )
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    /// Reads frames until the limit is reached or the stream ends on a frame
    /// boundary. A stream ending inside a frame aborts with a short read.
    #[instrument(skip_all, fields(input = %ctx.input_path.display()))]
    pub fn process_stream<R: BufRead>(
        &mut self,
        reader: &mut R,
        ctx: &StreamContext,
    ) -> Result<Map<String, Value>> {
        let mut buffer = self
            .allocate_buffer()
            .context("Failed to allocate input buffer")?;
        for sink in &mut self.sinks {
            sink.begin(ctx)?;
        }

        let mut frames = 0usize;
        let mut bytes = 0u64;
        loop {
            if self.frame_limit.is_some_and(|limit| frames >= limit) {
                break;
            }
            if stream_exhausted(reader)? {
                if frames == 0 {
                    warn!("Input stream holds no frames");
                }
                break;
            }

            let span = tracing::span!(tracing::Level::DEBUG, "frame", index = frames);
            let _span_guard = span.enter();
            {
                let _timer = self.metrics.start_stage("read");
                if let Err(err) =
                    read_frame(self.format, reader, &mut buffer, self.resolution.height)
                {
                    if err.is_short_read() {
                        self.metrics.record_short_read();
                    }
                    return Err(err).with_context(|| format!("Failed to read frame {frames}"));
                }
            }
            self.metrics.record_frame_read(buffer.bytes_used());
            bytes += buffer.bytes_used() as u64;

            for sink in &mut self.sinks {
                let _timer = self.metrics.start_stage(&format!("sink:{}", sink.name()));
                sink.consume(&buffer, frames)
                    .with_context(|| format!("Sink '{}' failed on frame {frames}", sink.name()))?;
            }
            frames += 1;
        }

        let mut metadata = Map::new();
        metadata.insert(
            "input_path".to_string(),
            Value::String(ctx.input_path.to_string_lossy().to_string()),
        );
        metadata.insert("stem".to_string(), Value::String(ctx.stem.clone()));
        metadata.insert(
            "source.format".to_string(),
            Value::String(ctx.format.label().to_string()),
        );
        metadata.insert("frames".to_string(), json!(frames));
        metadata.insert("bytes_used".to_string(), json!(bytes));
        metadata.insert("buffer.line_length".to_string(), json!(self.line_length));
        metadata.insert("buffer.capacity".to_string(), json!(buffer.capacity()));
        for sink in &mut self.sinks {
            sink.finish(&mut metadata)?;
        }
        Ok(metadata)
    }

    pub fn execute(&mut self, inputs: &[PathBuf]) -> Result<Vec<PipelineResult>> {
        self.metrics.reset();
        let total_start = Instant::now();
        let mut results = Vec::new();
        for input in inputs {
            let file = File::open(input)
                .with_context(|| format!("Failed to open input file: {}", input.display()))?;
            let mut reader = BufReader::with_capacity(STREAM_BUFFER_BYTES, file);
            let ctx = StreamContext {
                input_path: input.clone(),
                stem: input
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "stream".to_string()),
                format: self.format,
                width: self.resolution.width,
                image_height: self.resolution.height,
                output: self.output.clone(),
            };
            let metadata = self.process_stream(&mut reader, &ctx)?;
            let frames = metadata
                .get("frames")
                .and_then(Value::as_u64)
                .unwrap_or_default() as usize;
            let output = metadata
                .get("output_path")
                .and_then(Value::as_str)
                .map(PathBuf::from)
                .unwrap_or_else(|| self.output.directory.join(&ctx.stem));
            info!(input = %input.display(), frames, "Stream converted");
            results.push(PipelineResult {
                input: input.clone(),
                output,
                frames,
                metadata,
            });
        }

        self.metrics.record_total_duration(total_start.elapsed());
        Ok(results)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub input: PathBuf,
    pub output: PathBuf,
    pub frames: usize,
    pub metadata: Map<String, Value>,
}

pub fn build_pipeline(job: &Job, registry: &SinkRegistry) -> Result<FramePipeline> {
    let sinks = registry.build(&job.sinks)?;
    Ok(FramePipeline::new(
        job.source.format,
        job.source.resolution,
        job.source.line_length,
        job.frames,
        sinks,
        job.output.clone(),
    ))
}

fn stream_exhausted<R: BufRead>(reader: &mut R) -> Result<bool> {
    Ok(reader
        .fill_buf()
        .context("Failed to read input stream")?
        .is_empty())
}

/// Remaps a dump of reconstructed frames (luma plane then chroma plane per
/// frame) into raster packed 4:2:2 frames. Returns the number of frames.
#[instrument(skip_all, fields(resolution = %resolution))]
pub fn remap_recon_stream<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    resolution: Resolution,
    frame_limit: Option<usize>,
    metrics: &MetricsCollector,
) -> Result<usize> {
    let (mb_count_x, mb_count_y) = macroblock_grid(resolution.width, resolution.height)?;
    let mut dest =
        FrameBuffer::alloc(resolution.width, resolution.height, PlaneLayout::Packed422)?;
    let plane_too_large = || FrameError::FrameTooLarge {
        line_length: resolution.width,
        rows: resolution.height,
    };
    let mut luma = vec![
        0u8;
        MacroblockPlane::luma_len(mb_count_x, mb_count_y).ok_or_else(plane_too_large)?
    ];
    let mut chroma = vec![
        0u8;
        MacroblockPlane::chroma_len(mb_count_x, mb_count_y).ok_or_else(plane_too_large)?
    ];

    let mut frames = 0usize;
    loop {
        if frame_limit.is_some_and(|limit| frames >= limit) || stream_exhausted(reader)? {
            break;
        }
        let _timer = metrics.start_stage("remap");
        for (plane, storage) in [(Plane::Luma, &mut luma), (Plane::Chroma, &mut chroma)] {
            if let Err(err) = reader.read_exact(storage) {
                let err = FrameError::from_read(err, plane, 0);
                if err.is_short_read() {
                    metrics.record_short_read();
                }
                return Err(err)
                    .with_context(|| format!("Failed to read reconstructed frame {frames}"));
            }
        }
        remap_reconstruction(
            &MacroblockPlane::luma(&luma, mb_count_x, mb_count_y)?,
            &MacroblockPlane::chroma(&chroma, mb_count_x, mb_count_y)?,
            resolution.width,
            resolution.height,
            &mut dest,
        )?;
        writer
            .write_all(dest.payload())
            .context("Failed to write remapped frame")?;
        metrics.record_frame_remapped();
        frames += 1;
    }
    writer.flush().context("Failed to flush remapped frames")?;
    Ok(frames)
}
