use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use frame_convert::frame::SourceFormat;
use frame_convert::job::{Job, Resolution};
use frame_convert::observability::{MetricsCollector, MetricsSnapshot, log_snapshot};
use frame_convert::pipeline::{
    FramePipeline, OutputSpec, PipelineResult, STREAM_BUFFER_BYTES, build_pipeline,
    remap_recon_stream,
};
use frame_convert::report::RunReport;
use frame_convert::sinks::SinkRegistry;
use frame_convert::validation::{ValidationReport, validate_geometry, validate_job};
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

#[cfg(feature = "otel")]
use opentelemetry::KeyValue;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};

/// Frame count processed by `convert` when none is given.
const DEFAULT_NUM_FRAMES: usize = 100;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let otlp_endpoint = match &cli.command {
        Commands::Run { otlp_endpoint, .. } => otlp_endpoint.clone(),
        _ => None,
    };
    configure_tracing(otlp_endpoint.as_deref())?;

    let command_result = match cli.command {
        Commands::Convert {
            input,
            output,
            resolution,
            format,
            num_frames,
            line_length,
            benchmark,
            metrics_json,
        } => convert(
            input,
            output,
            resolution,
            format,
            num_frames,
            line_length,
            benchmark,
            metrics_json,
        ),
        Commands::Run {
            job,
            dry_run,
            print_metrics,
            metrics_json,
            metrics_prometheus,
            report,
            otlp_endpoint: _,
        } => run_job(
            job,
            dry_run,
            print_metrics,
            metrics_json,
            metrics_prometheus,
            report,
        ),
        Commands::Validate { job } => validate_job_cmd(job),
        Commands::ListSinks => {
            list_sinks();
            Ok(())
        }
        Commands::Recon {
            input,
            output,
            resolution,
            num_frames,
            benchmark,
        } => recon(input, output, resolution, num_frames, benchmark),
    };

    #[cfg(feature = "otel")]
    if otlp_endpoint.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }

    command_result
}

fn configure_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "otel")]
    if let Some(endpoint) = otlp_endpoint {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "frame-convert"),
            ])))
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .install_simple()?;

        return tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()
            .map_err(|err| anyhow!(err.to_string()));
    }

    #[cfg(not(feature = "otel"))]
    if let Some(endpoint) = otlp_endpoint {
        eprintln!(
            "warning: --otlp-endpoint '{}' requested but OpenTelemetry support is not enabled. Rebuild with --features otel.",
            endpoint
        );
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))
}

#[allow(clippy::too_many_arguments)]
fn convert(
    input: PathBuf,
    output: PathBuf,
    resolution: Resolution,
    format: SourceFormat,
    num_frames: usize,
    line_length: Option<usize>,
    benchmark: bool,
    metrics_json: Option<PathBuf>,
) -> Result<()> {
    let report = validate_geometry(format, resolution.width, resolution.height, line_length);
    ensure_valid(&report, &input)?;

    let registry = SinkRegistry::default();
    let sinks = vec![registry.create("raw", Default::default())?];
    let mut pipeline = FramePipeline::new(
        format,
        resolution,
        line_length,
        Some(num_frames),
        sinks,
        OutputSpec::for_file(&output),
    );

    info!(
        input = %input.display(),
        format = format.label(),
        %resolution,
        "Starting conversion"
    );
    let results = pipeline.execute(std::slice::from_ref(&input))?;
    log_results(&results);

    let snapshot = pipeline.metrics().snapshot();
    if benchmark {
        log_snapshot(&snapshot);
    }
    if let Some(path) = metrics_json {
        write_metrics_json(&path, &snapshot)?;
    }
    Ok(())
}

fn run_job(
    job_path: PathBuf,
    dry_run: bool,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
    metrics_prometheus: Option<PathBuf>,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let job = Job::load(&job_path)?;
    let registry = SinkRegistry::default();
    let report = validate_job(&job, &registry);
    ensure_valid(&report, &job_path)?;

    if dry_run {
        info!(
            "Loaded job with {} sink(s) reading {} {}. Available inputs: {:?}",
            job.sinks.len(),
            job.source.resolution,
            job.source.format.label(),
            job.inputs.iter().map(|i| &i.path).collect::<Vec<_>>()
        );
        return Ok(());
    }

    let inputs = job.expand_inputs()?;
    if inputs.is_empty() {
        warn!("No inputs resolved for job. Nothing to process.");
        return Ok(());
    }

    let mut pipeline = build_pipeline(&job, &registry)?;
    let results = pipeline.execute(&inputs)?;
    log_results(&results);

    let snapshot = pipeline.metrics().snapshot();
    if print_metrics {
        log_snapshot(&snapshot);
    }
    if let Some(path) = metrics_json {
        write_metrics_json(&path, &snapshot)?;
    }
    if let Some(path) = metrics_prometheus {
        create_parent_dir(&path)?;
        fs::write(&path, snapshot.to_prometheus()).with_context(|| {
            format!("Failed to write Prometheus metrics: {}", path.display())
        })?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }
    if let Some(path) = report_path {
        RunReport::new(&results, snapshot).write(&path)?;
        info!(report = %path.display(), "Run report written");
    }

    Ok(())
}

fn validate_job_cmd(job_path: PathBuf) -> Result<()> {
    let job = Job::load(&job_path)?;
    let registry = SinkRegistry::default();
    let report = validate_job(&job, &registry);
    ensure_valid(&report, &job_path)?;
    info!(file = %job_path.display(), "Job validation passed");
    Ok(())
}

fn list_sinks() {
    let registry = SinkRegistry::default();
    println!("Available sinks:");
    for name in registry.known_sinks() {
        println!("- {name}");
    }
}

fn recon(
    input: PathBuf,
    output: PathBuf,
    resolution: Resolution,
    num_frames: Option<usize>,
    benchmark: bool,
) -> Result<()> {
    let file = File::open(&input)
        .with_context(|| format!("Failed to open reconstruction dump: {}", input.display()))?;
    let mut reader = BufReader::with_capacity(STREAM_BUFFER_BYTES, file);
    create_parent_dir(&output)?;
    let out_file = File::create(&output)
        .with_context(|| format!("Failed to create output file: {}", output.display()))?;
    let mut writer = BufWriter::with_capacity(STREAM_BUFFER_BYTES, out_file);

    let metrics = MetricsCollector::new();
    let started = Instant::now();
    let frames = remap_recon_stream(&mut reader, &mut writer, resolution, num_frames, &metrics)?;
    metrics.record_total_duration(started.elapsed());

    info!(
        input = %input.display(),
        output = %output.display(),
        frames,
        "Reconstructed frames remapped"
    );
    if benchmark {
        log_snapshot(&metrics.snapshot());
    }
    Ok(())
}

fn ensure_valid(report: &ValidationReport, source: &Path) -> Result<()> {
    for warning in &report.warnings {
        warn!(file = %source.display(), "{warning}");
    }
    if report.is_ok() {
        return Ok(());
    }
    for error_msg in &report.errors {
        error!(file = %source.display(), "{error_msg}");
    }
    bail!("Validation failed with {} error(s)", report.errors.len())
}

fn log_results(results: &[PipelineResult]) {
    for result in results {
        info!(
            input = %result.input.display(),
            output = %result.output.display(),
            frames = result.frames,
            "Conversion completed"
        );
    }
}

fn write_metrics_json(path: &Path, snapshot: &MetricsSnapshot) -> Result<()> {
    create_parent_dir(path)?;
    let file = File::create(path)
        .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
    to_writer_pretty(file, snapshot)
        .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
    info!(metrics = %path.display(), "Metrics JSON written");
    Ok(())
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "frame-convert",
    version,
    about = "Raw YUV frame ingestion and reconstruction remapping for hardware encoders"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one raw stream into hardware-ready input buffers.
    Convert {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, help = "Video resolution ('width'x'height')")]
        resolution: Resolution,
        #[arg(short, long, value_enum, default_value_t = SourceFormat::SemiPlanar420)]
        format: SourceFormat,
        #[arg(short, long = "num-frames", default_value_t = DEFAULT_NUM_FRAMES)]
        num_frames: usize,
        #[arg(long = "line-length")]
        line_length: Option<usize>,
        #[arg(long)]
        benchmark: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
    },
    /// Run a YAML job over every matched input.
    Run {
        job: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
        #[arg(long = "metrics-prometheus")]
        metrics_prometheus: Option<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long = "otlp-endpoint")]
        otlp_endpoint: Option<String>,
    },
    Validate {
        job: PathBuf,
    },
    ListSinks,
    /// Remap a dump of tiled reconstructed frames to packed 4:2:2.
    Recon {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        resolution: Resolution,
        #[arg(short, long = "num-frames")]
        num_frames: Option<usize>,
        #[arg(long)]
        benchmark: bool,
    },
}
