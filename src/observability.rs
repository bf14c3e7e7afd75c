use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub total_duration_ms: f64,
    pub frames_read: u64,
    pub bytes_read: u64,
    pub frames_remapped: u64,
    pub short_reads: u64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub calls: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsSnapshot::default())),
        }
    }

    pub fn start_stage(&self, stage_name: &str) -> StageTimer {
        StageTimer {
            stage: stage_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn record_frame_read(&self, bytes: usize) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.frames_read += 1;
            guard.bytes_read += bytes as u64;
        }
    }

    pub fn record_frame_remapped(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.frames_remapped += 1;
        }
    }

    pub fn record_short_read(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.short_reads += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

pub struct StageTimer {
    stage: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl StageTimer {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.stages.entry(self.stage.clone()).or_default();
            metrics.calls += 1;
            metrics.total_duration_ms += duration_ms;
            metrics.max_duration_ms = metrics.max_duration_ms.max(duration_ms);
        }
        debug!(stage = self.stage.as_str(), duration_ms, "Stage duration recorded");
        self.recorded = true;
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        frames_read = snapshot.frames_read,
        bytes_read = snapshot.bytes_read,
        frames_remapped = snapshot.frames_remapped,
        short_reads = snapshot.short_reads,
        "Frame metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        let average_ms = if metrics.calls > 0 {
            metrics.total_duration_ms / metrics.calls as f64
        } else {
            0.0
        };
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            total_ms = metrics.total_duration_ms,
            average_ms,
            max_ms = metrics.max_duration_ms,
            "Stage metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        push_counter(
            &mut output,
            "frameconv_frames_read_total",
            "Frames read into hardware input buffers",
            self.frames_read,
        );
        push_counter(
            &mut output,
            "frameconv_bytes_read_total",
            "Bytes reported used by filled input buffers",
            self.bytes_read,
        );
        push_counter(
            &mut output,
            "frameconv_frames_remapped_total",
            "Reconstructed frames remapped to raster order",
            self.frames_remapped,
        );
        push_counter(
            &mut output,
            "frameconv_short_reads_total",
            "Streams aborted by a short read",
            self.short_reads,
        );
        output.push_str("# HELP frameconv_stage_calls_total Stage invocation count\n");
        output.push_str("# TYPE frameconv_stage_calls_total counter\n");
        output.push_str(
            "# HELP frameconv_stage_duration_seconds_total Accumulated stage duration in seconds\n",
        );
        output.push_str("# TYPE frameconv_stage_duration_seconds_total counter\n");
        output.push_str(
            "# HELP frameconv_stage_duration_seconds_max Maximum stage duration in seconds\n",
        );
        output.push_str("# TYPE frameconv_stage_duration_seconds_max gauge\n");
        for (stage, metrics) in &self.stages {
            output.push_str(&format!(
                "frameconv_stage_calls_total{{stage=\"{}\"}} {}\n",
                stage, metrics.calls
            ));
            output.push_str(&format!(
                "frameconv_stage_duration_seconds_total{{stage=\"{}\"}} {:.6}\n",
                stage,
                metrics.total_duration_ms / 1_000.0
            ));
            output.push_str(&format!(
                "frameconv_stage_duration_seconds_max{{stage=\"{}\"}} {:.6}\n",
                stage,
                metrics.max_duration_ms / 1_000.0
            ));
        }
        output.push_str("# HELP frameconv_run_duration_seconds Total run duration\n");
        output.push_str("# TYPE frameconv_run_duration_seconds gauge\n");
        output.push_str(&format!(
            "frameconv_run_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}

fn push_counter(output: &mut String, name: &str, help: &str, value: u64) {
    output.push_str(&format!("# HELP {name} {help}\n"));
    output.push_str(&format!("# TYPE {name} counter\n"));
    output.push_str(&format!("{name} {value}\n"));
}
