//! Filtering invoker: runs the external SSS/tSSS routine segment by segment
//! and applies the ill-conditioning policy.

use crate::engine::{MaxwellEngine, SegmentRequest};
use crate::error::{MaxfilterError, Result};
use crate::inputs::InputSet;
use crate::profile_scope;
use crate::recording::{Recording, SampleSpan};
use crate::types::{BadCondition, FilterConfig, FilterMode};
use serde::Serialize;

/// Condition numbers at or above this value are ill-conditioned.
pub const CONDITION_THRESHOLD: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub segment: usize,
    pub condition: f64,
    pub message: String,
}

/// Denoised recording plus everything learned while producing it.
#[derive(Debug, Clone)]
pub struct FilterResult {
    pub recording: Recording,
    pub mode: FilterMode,
    /// Spans passed to the engine, in temporal order.
    pub segments: Vec<SampleSpan>,
    /// Spans excluded by annotation and copied through unfiltered.
    pub skipped: Vec<SampleSpan>,
    pub condition_numbers: Vec<f64>,
    pub diagnostics: Vec<Diagnostic>,
    pub engine: String,
    pub engine_version: Option<String>,
}

/// Checks that must pass before the engine is called at all.
pub fn preflight(recording: &Recording, config: &FilterConfig) -> Result<()> {
    recording.check_shape()?;

    if recording.maxwell_applied {
        return Err(MaxfilterError::AlreadyProcessed(
            recording.source.display().to_string(),
        ));
    }

    if let Some(duration) = config.mode().buffer_duration() {
        if duration > recording.duration() {
            return Err(MaxfilterError::range(
                "param_st_duration",
                duration,
                format!(
                    "buffer is longer than the recording ({:.3} s)",
                    recording.duration()
                ),
            ));
        }
    }

    let n_meg = recording.meg_indices().len();
    if let Some(vector) = config.extended_proj.iter().find(|v| v.len() != n_meg) {
        return Err(MaxfilterError::range(
            "param_extended_proj",
            format!("vector of length {}", vector.len()),
            format!("expected one entry per MEG channel ({})", n_meg),
        ));
    }

    Ok(())
}

/// Run the engine over every segment of `recording`.
///
/// Segments are filtered independently and written back at their original
/// position; skipped spans keep their raw samples. Nothing is written to disk
/// here, so an aborted run leaves no output behind.
pub fn run_filter(
    engine: &dyn MaxwellEngine,
    recording: &Recording,
    config: &FilterConfig,
    inputs: &InputSet,
) -> Result<FilterResult> {
    profile_scope!("maxwell_filter");
    preflight(recording, config)?;

    let mode = config.mode();
    let segments = recording.filter_segments(&config.skip_by_annotation);
    let skipped = recording.skipped_spans(&config.skip_by_annotation);

    log::info!(
        "Applying {} with {} to {} segment(s), {} skipped span(s)",
        mode,
        engine.name(),
        segments.len(),
        skipped.len()
    );
    if segments.is_empty() {
        log::warn!("Every sample is excluded by annotations; nothing to filter");
    }

    let mut output = recording.clone();
    let mut condition_numbers = Vec::new();
    let mut diagnostics = Vec::new();

    for (index, &span) in segments.iter().enumerate() {
        if let Some(duration) = mode.buffer_duration() {
            if (span.len() as f64) < duration * recording.sample_rate {
                log::warn!(
                    "Segment {} ({} samples) is shorter than the {} s buffer",
                    index,
                    span.len(),
                    duration
                );
            }
        }

        let request = SegmentRequest {
            index,
            span,
            recording,
            config,
            inputs,
            mode,
        };
        log::debug!("Filtering segment {}: samples {}..{}", index, span.start, span.stop);
        let result = engine.filter_segment(&request)?;

        check_output_shape(&result.data, recording.num_channels(), span)?;

        for &condition in &result.condition_numbers {
            if let Some(diagnostic) = apply_policy(config.bad_condition, index, condition)? {
                diagnostics.push(diagnostic);
            }
        }
        condition_numbers.extend_from_slice(&result.condition_numbers);

        for (channel, row) in output.data.iter_mut().zip(result.data) {
            channel[span.start..span.stop].copy_from_slice(&row);
        }
    }

    let reconstructed: Vec<String> = output
        .bads
        .iter()
        .filter(|name| is_meg_channel(recording, name))
        .cloned()
        .collect();
    if !reconstructed.is_empty() {
        log::info!("Reconstructed bad MEG channels: {}", reconstructed.join(", "));
    }
    output.bads.retain(|name| !is_meg_channel(recording, name));
    output.maxwell_applied = true;

    Ok(FilterResult {
        recording: output,
        mode,
        segments,
        skipped,
        condition_numbers,
        diagnostics,
        engine: engine.name().to_string(),
        engine_version: engine.version(),
    })
}

fn is_meg_channel(recording: &Recording, name: &str) -> bool {
    recording
        .channels
        .iter()
        .any(|ch| ch.name == name && ch.kind.is_meg())
}

fn check_output_shape(data: &[Vec<f64>], n_channels: usize, span: SampleSpan) -> Result<()> {
    if data.len() != n_channels || data.iter().any(|row| row.len() != span.len()) {
        return Err(MaxfilterError::Engine(format!(
            "Engine returned {} x {} samples for a {} x {} segment",
            data.len(),
            data.first().map(|r| r.len()).unwrap_or(0),
            n_channels,
            span.len()
        )));
    }
    Ok(())
}

/// Apply the ill-conditioning policy to one reported condition number.
fn apply_policy(
    policy: BadCondition,
    segment: usize,
    condition: f64,
) -> Result<Option<Diagnostic>> {
    if condition < CONDITION_THRESHOLD {
        return Ok(None);
    }

    let message = format!(
        "Matrix is badly conditioned in segment {}: {:.0} >= {:.0}",
        segment, condition, CONDITION_THRESHOLD
    );
    let severity = match policy {
        BadCondition::Error => {
            return Err(MaxfilterError::IllConditionedMatrix {
                segment,
                condition,
                threshold: CONDITION_THRESHOLD,
            })
        }
        BadCondition::Ignore => return Ok(None),
        BadCondition::Warning => {
            log::warn!("{}", message);
            Severity::Warning
        }
        BadCondition::Info => {
            log::info!("{}", message);
            Severity::Info
        }
    };

    Ok(Some(Diagnostic {
        severity,
        segment,
        condition,
        message,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SegmentOutput;
    use crate::recording::{Annotation, ChannelInfo, ChannelKind};
    use crate::types::{CoordFrame, MagScale, Origin, Regularize};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Halves every sample and reports a fixed condition number.
    struct HalvingEngine {
        condition: f64,
        calls: Mutex<Vec<(usize, SampleSpan, FilterMode)>>,
    }

    impl HalvingEngine {
        fn new(condition: f64) -> Self {
            Self {
                condition,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl MaxwellEngine for HalvingEngine {
        fn name(&self) -> &str {
            "halving"
        }

        fn filter_segment(&self, request: &SegmentRequest<'_>) -> Result<SegmentOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((request.index, request.span, request.mode));
            Ok(SegmentOutput {
                data: request
                    .data()
                    .into_iter()
                    .map(|row| row.into_iter().map(|v| v * 0.5).collect())
                    .collect(),
                condition_numbers: vec![self.condition],
            })
        }
    }

    struct TruncatingEngine;

    impl MaxwellEngine for TruncatingEngine {
        fn name(&self) -> &str {
            "truncating"
        }

        fn filter_segment(&self, request: &SegmentRequest<'_>) -> Result<SegmentOutput> {
            let mut data = request.data();
            data.pop();
            Ok(SegmentOutput {
                data,
                condition_numbers: Vec::new(),
            })
        }
    }

    fn config() -> FilterConfig {
        FilterConfig {
            st_duration: None,
            st_correlation: 0.98,
            origin: Origin::Auto,
            int_order: 8,
            ext_order: 3,
            coord_frame: CoordFrame::Head,
            regularize: Regularize::In,
            ignore_ref: false,
            bad_condition: BadCondition::Error,
            st_fixed: true,
            st_only: false,
            mag_scale: MagScale::Value(100.0),
            skip_by_annotation: vec!["edge".to_string(), "bad_acq_skip".to_string()],
            extended_proj: Vec::new(),
            destination: None,
        }
    }

    fn recording() -> Recording {
        let channel = |name: &str, kind| ChannelInfo {
            name: name.to_string(),
            kind,
            location: None,
        };
        Recording {
            source: PathBuf::from("rest1-raw.fif"),
            sample_rate: 100.0,
            channels: vec![
                channel("MEG0111", ChannelKind::Mag),
                channel("MEG0112", ChannelKind::Grad),
                channel("EEG001", ChannelKind::Eeg),
            ],
            data: vec![vec![2.0; 1000]; 3],
            annotations: vec![Annotation {
                onset: 2.0,
                duration: 1.0,
                description: "bad_acq_skip".to_string(),
            }],
            bads: vec!["MEG0112".to_string(), "EEG001".to_string()],
            highpass: Some(0.1),
            lowpass: Some(330.0),
            maxwell_applied: false,
        }
    }

    #[test]
    fn test_segments_written_back_in_place() {
        let engine = HalvingEngine::new(10.0);
        let inputs = InputSet::new("rest1-raw.fif");
        let result = run_filter(&engine, &recording(), &config(), &inputs).unwrap();

        assert_eq!(
            result.segments,
            vec![SampleSpan::new(0, 200), SampleSpan::new(300, 1000)]
        );
        assert_eq!(result.skipped, vec![SampleSpan::new(200, 300)]);
        let row = &result.recording.data[0];
        assert_eq!(row.len(), 1000);
        assert_eq!(row[0], 1.0);
        assert_eq!(row[250], 2.0);
        assert_eq!(row[999], 1.0);
        assert_eq!(result.condition_numbers, vec![10.0, 10.0]);
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.engine, "halving");
    }

    #[test]
    fn test_bad_meg_channels_cleared_after_filtering() {
        let engine = HalvingEngine::new(10.0);
        let inputs = InputSet::new("rest1-raw.fif");
        let result = run_filter(&engine, &recording(), &config(), &inputs).unwrap();
        assert_eq!(result.recording.bads, vec!["EEG001".to_string()]);
        assert!(result.recording.maxwell_applied);
    }

    #[test]
    fn test_ill_conditioned_error_policy_aborts() {
        let engine = HalvingEngine::new(5000.0);
        let inputs = InputSet::new("rest1-raw.fif");
        match run_filter(&engine, &recording(), &config(), &inputs).unwrap_err() {
            MaxfilterError::IllConditionedMatrix {
                segment,
                condition,
                threshold,
            } => {
                assert_eq!(segment, 0);
                assert_eq!(condition, 5000.0);
                assert_eq!(threshold, CONDITION_THRESHOLD);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ill_conditioned_warning_and_info_record_diagnostics() {
        let inputs = InputSet::new("rest1-raw.fif");
        for (policy, severity) in [
            (BadCondition::Warning, Severity::Warning),
            (BadCondition::Info, Severity::Info),
        ] {
            let engine = HalvingEngine::new(5000.0);
            let mut config = config();
            config.bad_condition = policy;
            let result = run_filter(&engine, &recording(), &config, &inputs).unwrap();
            assert_eq!(result.diagnostics.len(), 2);
            assert!(result.diagnostics.iter().all(|d| d.severity == severity));
        }
    }

    #[test]
    fn test_ill_conditioned_ignore_is_silent() {
        let engine = HalvingEngine::new(5000.0);
        let mut config = config();
        config.bad_condition = BadCondition::Ignore;
        let inputs = InputSet::new("rest1-raw.fif");
        let result = run_filter(&engine, &recording(), &config, &inputs).unwrap();
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.condition_numbers, vec![5000.0, 5000.0]);
    }

    #[test]
    fn test_st_only_requests_projection_only() {
        let engine = HalvingEngine::new(10.0);
        let mut config = config();
        config.st_duration = Some(1.0);
        config.st_only = true;
        let inputs = InputSet::new("rest1-raw.fif");
        run_filter(&engine, &recording(), &config, &inputs).unwrap();
        let calls = engine.calls.lock().unwrap();
        assert!(calls
            .iter()
            .all(|(_, _, mode)| matches!(mode, FilterMode::TsssOnly { duration, .. } if *duration == 1.0)));
    }

    #[test]
    fn test_already_processed_rejected() {
        let engine = HalvingEngine::new(10.0);
        let mut rec = recording();
        rec.maxwell_applied = true;
        let inputs = InputSet::new("rest1-raw.fif");
        assert!(matches!(
            run_filter(&engine, &rec, &config(), &inputs),
            Err(MaxfilterError::AlreadyProcessed(_))
        ));
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_buffer_longer_than_recording() {
        let mut config = config();
        config.st_duration = Some(60.0);
        let err = preflight(&recording(), &config).unwrap_err();
        assert_eq!(err.field(), Some("param_st_duration"));
    }

    #[test]
    fn test_extended_proj_must_match_meg_channels() {
        let mut config = config();
        config.extended_proj = vec![vec![1.0, 0.0, 0.0]];
        let err = preflight(&recording(), &config).unwrap_err();
        assert_eq!(err.field(), Some("param_extended_proj"));

        config.extended_proj = vec![vec![1.0, 0.0]];
        assert!(preflight(&recording(), &config).is_ok());
    }

    #[test]
    fn test_engine_output_shape_checked() {
        let inputs = InputSet::new("rest1-raw.fif");
        assert!(matches!(
            run_filter(&TruncatingEngine, &recording(), &config(), &inputs),
            Err(MaxfilterError::Engine(_))
        ));
    }
}
