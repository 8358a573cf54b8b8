pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod inputs;
pub mod mmap_utils;
pub mod output;
pub mod pipeline;
pub mod product;
pub mod profiling;
pub mod recording;
pub mod report;
pub mod spectrum;
pub mod types;
pub mod validate;

pub use bridge::MneBridge;
pub use engine::{Collaborators, MaxwellEngine, RecordingReader, RecordingWriter, SegmentOutput, SegmentRequest};
pub use error::{MaxfilterError, Result};
pub use filter::{FilterResult, CONDITION_THRESHOLD};
pub use inputs::{InputRole, InputSet};
pub use output::OutputLayout;
pub use pipeline::{execute, prepare, PreparedRun, RunSummary};
pub use recording::{Annotation, ChannelInfo, ChannelKind, Recording, SampleSpan};
pub use types::*;
