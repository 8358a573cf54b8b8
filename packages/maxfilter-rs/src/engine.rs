//! Narrow interfaces to the external collaborators: the numerical SSS/tSSS
//! routine and the recording codec.

use crate::error::Result;
use crate::inputs::InputSet;
use crate::recording::{Recording, SampleSpan};
use crate::types::{FilterConfig, FilterMode};
use std::path::Path;

/// One segment handed to the numerical routine.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRequest<'a> {
    /// Position of the segment in the run, starting at 0.
    pub index: usize,
    pub span: SampleSpan,
    pub recording: &'a Recording,
    pub config: &'a FilterConfig,
    pub inputs: &'a InputSet,
    pub mode: FilterMode,
}

impl SegmentRequest<'_> {
    /// Samples of the segment, all channels.
    pub fn data(&self) -> Vec<Vec<f64>> {
        self.recording.slice(self.span)
    }
}

/// Denoised samples for one segment, same shape as the request.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOutput {
    pub data: Vec<Vec<f64>>,
    /// Condition numbers of the SSS basis reported by the routine.
    pub condition_numbers: Vec<f64>,
}

/// External SSS/tSSS routine. Calls are synchronous and must not be
/// interrupted; the ill-conditioning policy is applied by the caller.
pub trait MaxwellEngine: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> Option<String> {
        None
    }

    fn filter_segment(&self, request: &SegmentRequest<'_>) -> Result<SegmentOutput>;
}

pub trait RecordingReader: Send + Sync {
    fn read_raw(&self, path: &Path) -> Result<Recording>;
}

pub trait RecordingWriter: Send + Sync {
    /// Write `recording` to `path`, replacing any existing file.
    fn write_raw(&self, recording: &Recording, path: &Path) -> Result<()>;
}

/// The three collaborators a run needs.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub reader: &'a dyn RecordingReader,
    pub engine: &'a dyn MaxwellEngine,
    pub writer: &'a dyn RecordingWriter,
}

impl<'a> Collaborators<'a> {
    /// Use one object for all three roles, as the MNE bridge does.
    pub fn uniform<T>(backend: &'a T) -> Self
    where
        T: RecordingReader + MaxwellEngine + RecordingWriter,
    {
        Self {
            reader: backend,
            engine: backend,
            writer: backend,
        }
    }
}
