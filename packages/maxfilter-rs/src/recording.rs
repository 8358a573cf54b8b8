use crate::error::{MaxfilterError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sensor type, as reported by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Mag,
    Grad,
    RefMeg,
    Eeg,
    Stim,
    Misc,
}

impl ChannelKind {
    /// Map an MNE channel type string.
    pub fn from_mne(kind: &str) -> Self {
        match kind {
            "mag" => Self::Mag,
            "grad" => Self::Grad,
            "ref_meg" => Self::RefMeg,
            "eeg" => Self::Eeg,
            "stim" => Self::Stim,
            _ => Self::Misc,
        }
    }

    pub fn is_meg(&self) -> bool {
        matches!(self, Self::Mag | Self::Grad)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub kind: ChannelKind,
    /// Sensor position in the device frame, meters.
    #[serde(default)]
    pub location: Option<[f64; 3]>,
}

/// Annotation with onset relative to the first sample, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub onset: f64,
    pub duration: f64,
    pub description: String,
}

/// Half-open sample range `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpan {
    pub start: usize,
    pub stop: usize,
}

impl SampleSpan {
    pub fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    pub fn len(&self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Continuous multichannel recording held in memory, channel-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub source: PathBuf,
    pub sample_rate: f64,
    pub channels: Vec<ChannelInfo>,
    pub data: Vec<Vec<f64>>,
    pub annotations: Vec<Annotation>,
    pub bads: Vec<String>,
    pub highpass: Option<f64>,
    pub lowpass: Option<f64>,
    /// Processing history already contains SSS or tSSS.
    pub maxwell_applied: bool,
}

impl Recording {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_samples(&self) -> usize {
        self.data.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.num_samples() as f64 / self.sample_rate
        } else {
            0.0
        }
    }

    pub fn is_bad(&self, name: &str) -> bool {
        self.bads.iter().any(|b| b == name)
    }

    /// Indices of MEG channels (magnetometers and gradiometers), bads included.
    pub fn meg_indices(&self) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.kind.is_meg())
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of MEG channels not marked bad.
    pub fn good_meg_indices(&self) -> Vec<usize> {
        self.meg_indices()
            .into_iter()
            .filter(|&i| !self.is_bad(&self.channels[i].name))
            .collect()
    }

    /// Channel descriptors and sample matrix must agree.
    pub fn check_shape(&self) -> Result<()> {
        if self.data.len() != self.channels.len() {
            return Err(MaxfilterError::Engine(format!(
                "Recording has {} channel descriptors but {} data rows",
                self.channels.len(),
                self.data.len()
            )));
        }
        let n = self.num_samples();
        if let Some((i, _)) = self.data.iter().enumerate().find(|(_, c)| c.len() != n) {
            return Err(MaxfilterError::Engine(format!(
                "Channel {} has {} samples, expected {}",
                self.channels[i].name,
                self.data[i].len(),
                n
            )));
        }
        Ok(())
    }

    /// Sample index for a time in seconds, clamped to the recording.
    pub fn sample_at(&self, seconds: f64) -> usize {
        let idx = (seconds * self.sample_rate).round();
        if idx <= 0.0 {
            0
        } else {
            (idx as usize).min(self.num_samples())
        }
    }

    fn matching_annotations<'a>(
        &'a self,
        labels: &'a [String],
    ) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.annotations
            .iter()
            .filter(move |a| labels.iter().any(|l| a.description.starts_with(l.as_str())))
    }

    /// Spans covered by skip annotations, sorted and merged.
    pub fn skipped_spans(&self, labels: &[String]) -> Vec<SampleSpan> {
        let mut spans: Vec<SampleSpan> = self
            .matching_annotations(labels)
            .map(|a| SampleSpan::new(self.sample_at(a.onset), self.sample_at(a.onset + a.duration)))
            .filter(|s| !s.is_empty())
            .collect();
        spans.sort_by_key(|s| s.start);

        let mut merged: Vec<SampleSpan> = Vec::with_capacity(spans.len());
        for span in spans {
            match merged.last_mut() {
                Some(last) if span.start <= last.stop => last.stop = last.stop.max(span.stop),
                _ => merged.push(span),
            }
        }
        merged
    }

    /// Partition into independently filtered segments. Annotations starting
    /// with a skip label exclude their span; zero-length ones only split.
    pub fn filter_segments(&self, labels: &[String]) -> Vec<SampleSpan> {
        let n = self.num_samples();
        let mut segments = Vec::new();
        let mut cursor = 0;
        for span in self.skipped_spans(labels) {
            if span.start > cursor {
                segments.push(SampleSpan::new(cursor, span.start));
            }
            cursor = cursor.max(span.stop);
        }
        if cursor < n {
            segments.push(SampleSpan::new(cursor, n));
        }

        let mut cuts: Vec<usize> = self
            .matching_annotations(labels)
            .filter(|a| self.sample_at(a.onset) == self.sample_at(a.onset + a.duration))
            .map(|a| self.sample_at(a.onset))
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        segments
            .into_iter()
            .flat_map(|segment| {
                let mut pieces = Vec::new();
                let mut start = segment.start;
                for &cut in cuts.iter().filter(|&&c| c > segment.start && c < segment.stop) {
                    pieces.push(SampleSpan::new(start, cut));
                    start = cut;
                }
                pieces.push(SampleSpan::new(start, segment.stop));
                pieces
            })
            .collect()
    }

    /// Copy of the samples in `span`, all channels.
    pub fn slice(&self, span: SampleSpan) -> Vec<Vec<f64>> {
        self.data
            .iter()
            .map(|channel| channel[span.start..span.stop].to_vec())
            .collect()
    }
}
