use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use frame_convert::frame::{FrameError, MacroblockPlane, SourceFormat};
use frame_convert::job::Resolution;
use frame_convert::observability::MetricsCollector;
use frame_convert::pipeline::{FramePipeline, OutputSpec, remap_recon_stream};
use frame_convert::sinks::{SinkParameters, SinkRegistry, SinkSpec};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::tempdir;

const ONE_MACROBLOCK: Resolution = Resolution {
    width: 16,
    height: 16,
};

fn sink_spec(name: &str, params: &[(&str, Value)]) -> SinkSpec {
    let mut map = SinkParameters::default();
    for (key, value) in params {
        map.insert((*key).to_string(), value.clone());
    }
    SinkSpec {
        sink: name.to_string(),
        params: Some(map),
    }
}

fn write_stream(path: &Path, frames: usize, frame_bytes: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..frames * frame_bytes).map(|i| (i % 239) as u8).collect();
    fs::write(path, &data).unwrap();
    data
}

fn pipeline(
    format: SourceFormat,
    line_length: Option<usize>,
    frame_limit: Option<usize>,
    sinks: &[SinkSpec],
    output_dir: PathBuf,
) -> FramePipeline {
    let registry = SinkRegistry::default();
    FramePipeline::new(
        format,
        ONE_MACROBLOCK,
        line_length,
        frame_limit,
        registry.build(sinks).unwrap(),
        OutputSpec {
            directory: output_dir,
            structure: "{stem}.{ext}".to_string(),
        },
    )
}

#[test]
fn pipeline_writes_padded_frames_and_digest() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("clip.yuv");
    write_stream(&input, 3, 384);
    let output_dir = temp.path().join("out");

    let mut pipeline = pipeline(
        SourceFormat::Planar420,
        Some(24),
        None,
        &[sink_spec("raw", &[]), sink_spec("digest", &[])],
        output_dir.clone(),
    );
    let results = pipeline.execute(&[input]).unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.frames, 3);
    assert_eq!(result.output, output_dir.join("clip.nv12"));

    let written = fs::read(&result.output).unwrap();
    assert_eq!(written.len(), 3 * 576);
    assert_eq!(
        result.metadata.get("output.size_bytes").and_then(Value::as_u64),
        Some(3 * 576)
    );
    assert_eq!(
        result.metadata.get("digest.sha256").and_then(Value::as_str),
        Some(format!("{:x}", Sha256::digest(&written)).as_str())
    );

    let snapshot = pipeline.metrics().snapshot();
    assert_eq!(snapshot.frames_read, 3);
    assert_eq!(snapshot.bytes_read, 3 * 576);
    assert!(snapshot.stages.contains_key("read"));
    assert!(snapshot.stages.contains_key("sink:raw"));
}

#[test]
fn visible_only_output_matches_semi_planar_input() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("clip.yuv");
    let source = write_stream(&input, 2, 384);

    let mut pipeline = pipeline(
        SourceFormat::SemiPlanar420,
        Some(32),
        None,
        &[sink_spec("raw", &[("visible_only", Value::Bool(true))])],
        temp.path().join("out"),
    );
    let results = pipeline.execute(&[input]).unwrap();

    assert_eq!(fs::read(&results[0].output).unwrap(), source);
}

#[test]
fn frame_limit_stops_early() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("clip.uyvy");
    write_stream(&input, 5, 512);

    let mut pipeline = pipeline(
        SourceFormat::Packed422,
        None,
        Some(2),
        &[sink_spec("raw", &[("extension", Value::String("bin".into()))])],
        temp.path().join("out"),
    );
    let results = pipeline.execute(&[input]).unwrap();

    assert_eq!(results[0].frames, 2);
    assert_eq!(results[0].output.extension().unwrap(), "bin");
    assert_eq!(fs::read(&results[0].output).unwrap().len(), 2 * 512);
}

#[test]
fn empty_stream_yields_no_frames() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("empty.yuv");
    fs::write(&input, b"").unwrap();

    let mut pipeline = pipeline(
        SourceFormat::SemiPlanar420,
        None,
        None,
        &[sink_spec("raw", &[])],
        temp.path().join("out"),
    );
    let results = pipeline.execute(&[input]).unwrap();

    assert_eq!(results[0].frames, 0);
    assert!(fs::read(&results[0].output).unwrap().is_empty());
}

#[test]
fn stream_ending_inside_a_frame_is_fatal() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("clip.yuv");
    fs::write(&input, vec![0u8; 384 * 2 + 100]).unwrap();

    let mut pipeline = pipeline(
        SourceFormat::SemiPlanar420,
        None,
        None,
        &[sink_spec("raw", &[])],
        temp.path().join("out"),
    );
    let err = pipeline.execute(&[input]).unwrap_err();

    assert!(format!("{err:#}").contains("Failed to read frame 2"));
    assert!(matches!(
        err.downcast_ref::<FrameError>(),
        Some(FrameError::ShortRead { .. })
    ));
    let snapshot = pipeline.metrics().snapshot();
    assert_eq!(snapshot.short_reads, 1);
    assert_eq!(snapshot.frames_read, 2);
}

#[test]
fn recon_stream_remaps_every_frame() {
    let frame_bytes =
        MacroblockPlane::luma_len(1, 1).unwrap() + MacroblockPlane::chroma_len(1, 1).unwrap();
    let mut reader = Cursor::new(vec![0u8; frame_bytes * 2]);
    let mut output: Vec<u8> = Vec::new();
    let metrics = MetricsCollector::new();

    let frames =
        remap_recon_stream(&mut reader, &mut output, ONE_MACROBLOCK, None, &metrics).unwrap();

    assert_eq!(frames, 2);
    assert_eq!(output.len(), 2 * 16 * 16 * 2);
    assert_eq!(metrics.snapshot().frames_remapped, 2);
}

#[test]
fn truncated_recon_dump_is_fatal() {
    let frame_bytes =
        MacroblockPlane::luma_len(1, 1).unwrap() + MacroblockPlane::chroma_len(1, 1).unwrap();
    let mut reader = Cursor::new(vec![0u8; frame_bytes + 10]);
    let mut output: Vec<u8> = Vec::new();
    let metrics = MetricsCollector::new();

    let err = remap_recon_stream(&mut reader, &mut output, ONE_MACROBLOCK, None, &metrics)
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<FrameError>(),
        Some(FrameError::ShortRead { .. })
    ));
    assert_eq!(metrics.snapshot().frames_remapped, 1);
    assert_eq!(metrics.snapshot().short_reads, 1);
}

#[test]
fn recon_rejects_unaligned_resolution() {
    let mut reader = Cursor::new(Vec::<u8>::new());
    let mut output: Vec<u8> = Vec::new();
    let resolution = Resolution {
        width: 24,
        height: 16,
    };
    let err = remap_recon_stream(
        &mut reader,
        &mut output,
        resolution,
        None,
        &MetricsCollector::new(),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FrameError>(),
        Some(FrameError::NotMacroblockAligned { .. })
    ));
}
