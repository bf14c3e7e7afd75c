use anyhow::{Context, Result};
use serde::Serialize;

use crate::frame::{HEIGHT_ALIGNMENT, MACROBLOCK_SIZE, SourceFormat};
use crate::job::Job;
use crate::sinks::{SinkRegistry, SinkSpec};

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_job(job: &Job, registry: &SinkRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();

    if job.version != 1 {
        report
            .errors
            .push(format!("Unsupported job version: {}", job.version));
    }

    if job.inputs.is_empty() {
        report
            .errors
            .push("At least one input pattern is required".into());
    }
    for (idx, input) in job.inputs.iter().enumerate() {
        if input.path.trim().is_empty() {
            report
                .errors
                .push("Input path patterns cannot be empty".into());
        } else if let Err(err) = glob::Pattern::new(&input.path) {
            report.errors.push(format!(
                "Input pattern {} ('{}') is not a valid glob: {}",
                idx + 1,
                input.path,
                err
            ));
        }
    }

    if job.output.directory.as_os_str().is_empty() {
        report
            .errors
            .push("Output directory cannot be empty".into());
    }

    if job.frames == Some(0) {
        report
            .warnings
            .push("Frame limit is 0; no frames will be read".into());
    }

    report.merge(validate_geometry(
        job.source.format,
        job.source.resolution.width,
        job.source.resolution.height,
        job.source.line_length,
    ));

    if job.sinks.is_empty() {
        report
            .warnings
            .push("No sinks configured; frames are read and discarded".into());
    }
    for (idx, sink) in job.sinks.iter().enumerate() {
        report.merge(
            validate_sink(sink, registry)
                .with_context(|| format!("Sink {} ('{}')", idx + 1, sink.sink))
                .unwrap_or_else(|err| ValidationReport {
                    errors: vec![err.to_string()],
                    warnings: vec![],
                }),
        );
    }

    report
}

/// Checks a source geometry against what the readers and the encoder accept.
pub fn validate_geometry(
    format: SourceFormat,
    width: usize,
    height: usize,
    line_length: Option<usize>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if width == 0 || height == 0 {
        report
            .errors
            .push(format!("Resolution {width}x{height} must be non-zero"));
        return report;
    }
    if width % 8 != 0 || height % 8 != 0 {
        report
            .warnings
            .push(format!("Width and height should be multiples of 8 (got {width}x{height})"));
    }
    if width % MACROBLOCK_SIZE != 0 || height % MACROBLOCK_SIZE != 0 {
        report.warnings.push(format!(
            "{width}x{height} is not macroblock aligned; reconstructed frames cannot be remapped"
        ));
    }
    if format.destination_layout().is_420() && (width % 2 != 0 || height % 2 != 0) {
        report.errors.push(format!(
            "4:2:0 sources need even dimensions (got {width}x{height})"
        ));
    }
    if format == SourceFormat::Packed422 && width % 2 != 0 {
        report
            .errors
            .push(format!("Packed 4:2:2 sources need an even width (got {width})"));
    }

    let layout = format.destination_layout();
    let required = layout.min_line_length(width);
    if let Some(line_length) = line_length {
        if line_length < required {
            report.errors.push(format!(
                "Line length {line_length} is below the {required} bytes a {} row needs",
                format.label()
            ));
        }
    }
    let line_length = line_length.unwrap_or(required);
    let fits = height
        .checked_next_multiple_of(HEIGHT_ALIGNMENT)
        .and_then(|rows| layout.capacity_for(line_length, rows))
        .is_some();
    if !fits {
        report.errors.push(format!(
            "A {width}x{height} frame with line length {line_length} overflows the addressable buffer size"
        ));
    }

    report
}

fn validate_sink(sink: &SinkSpec, registry: &SinkRegistry) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    let params = sink.params.clone().unwrap_or_default();
    if let Err(err) = registry.create(&sink.sink, params) {
        report
            .errors
            .push(format!("{:#}", err.context("Failed to instantiate sink")));
    }

    Ok(report)
}
