pub mod frame;
pub mod job;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod sinks;
pub mod validation;

pub use frame::{FrameBuffer, FrameError, PlaneLayout, SourceFormat};
pub use job::{Job, Resolution};
pub use pipeline::{FramePipeline, PipelineResult};
pub use sinks::{FrameSink, SinkRegistry};
