//! Output writer: filtered recording, effective-parameter metadata and copies
//! of the auxiliary inputs.

use crate::engine::RecordingWriter;
use crate::error::{MaxfilterError, Result};
use crate::filter::FilterResult;
use crate::inputs::InputSet;
use crate::recording::{Recording, SampleSpan};
use crate::types::{FilterConfig, FilterMode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const MAXFILTER_DIR: &str = "out_dir_maxwell_filter";
pub const REPORT_DIR: &str = "out_dir_report";
pub const RECORDING_FILE: &str = "meg.fif";
pub const PARAMS_FILE: &str = "maxfilter_params.json";
pub const REPORT_FILE: &str = "report_maxfilter.html";
pub const PRODUCT_FILE: &str = "product.json";

/// Where a run writes its outputs, relative to one root directory.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn maxfilter_dir(&self) -> PathBuf {
        self.root.join(MAXFILTER_DIR)
    }

    pub fn recording_path(&self) -> PathBuf {
        self.maxfilter_dir().join(RECORDING_FILE)
    }

    pub fn params_path(&self) -> PathBuf {
        self.maxfilter_dir().join(PARAMS_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join(REPORT_DIR).join(REPORT_FILE)
    }

    pub fn product_path(&self) -> PathBuf {
        self.root.join(PRODUCT_FILE)
    }
}

#[derive(Debug, Serialize)]
struct RecordingShape {
    n_channels: usize,
    n_samples: usize,
    sample_rate: f64,
    bads: Vec<String>,
}

/// Effective parameters of a run. Holds no timestamps so identical runs
/// produce identical bytes.
#[derive(Debug, Serialize)]
struct EffectiveParams<'a> {
    config: &'a FilterConfig,
    mode: FilterMode,
    inputs: BTreeMap<&'static str, Option<String>>,
    recording: RecordingShape,
    segments: &'a [SampleSpan],
    skipped: &'a [SampleSpan],
    engine: &'a str,
}

/// Files produced by [`write_outputs`].
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenOutputs {
    pub recording: PathBuf,
    pub params: PathBuf,
    pub copied: Vec<PathBuf>,
}

/// The filtered recording must keep the raw sampling rate and channel layout.
pub fn check_layout(raw: &Recording, filtered: &Recording) -> Result<()> {
    filtered.check_shape()?;
    let same_channels = raw.channels.len() == filtered.channels.len()
        && raw
            .channels
            .iter()
            .zip(&filtered.channels)
            .all(|(a, b)| a.name == b.name && a.kind == b.kind);
    if raw.sample_rate != filtered.sample_rate
        || !same_channels
        || raw.num_samples() != filtered.num_samples()
    {
        return Err(MaxfilterError::Engine(
            "Filtered recording does not preserve the raw sampling rate and channel layout"
                .to_string(),
        ));
    }
    Ok(())
}

pub fn write_outputs(
    raw: &Recording,
    result: &FilterResult,
    config: &FilterConfig,
    inputs: &InputSet,
    writer: &dyn RecordingWriter,
    layout: &OutputLayout,
) -> Result<WrittenOutputs> {
    crate::profile_scope!("write_outputs");
    check_layout(raw, &result.recording)?;

    let dir = layout.maxfilter_dir();
    std::fs::create_dir_all(&dir).map_err(|e| MaxfilterError::write(&dir, e))?;

    let recording = layout.recording_path();
    write_recording_atomic(writer, &result.recording, &recording)?;
    log::info!("Filtered recording written to {}", recording.display());

    let params = layout.params_path();
    let metadata = EffectiveParams {
        config,
        mode: result.mode,
        inputs: inputs.describe(),
        recording: RecordingShape {
            n_channels: result.recording.num_channels(),
            n_samples: result.recording.num_samples(),
            sample_rate: result.recording.sample_rate,
            bads: result.recording.bads.clone(),
        },
        segments: &result.segments,
        skipped: &result.skipped,
        engine: &result.engine,
    };
    let json = serde_json::to_string_pretty(&metadata)
        .map_err(|e| MaxfilterError::write(&params, e))?;
    std::fs::write(&params, json + "\n").map_err(|e| MaxfilterError::write(&params, e))?;

    let mut copied = Vec::new();
    for (role, source) in inputs.present() {
        let Some(name) = role.output_name() else {
            continue;
        };
        let target = dir.join(name);
        std::fs::copy(source, &target).map_err(|e| MaxfilterError::write(&target, e))?;
        log::debug!("Copied {} file to {}", role.label(), target.display());
        copied.push(target);
    }

    Ok(WrittenOutputs {
        recording,
        params,
        copied,
    })
}

/// Write through a temporary sibling and rename into place, so a failed
/// write never leaves a partial file at `path`.
fn write_recording_atomic(writer: &dyn RecordingWriter, recording: &Recording, path: &Path) -> Result<()> {
    let tmp = path.with_file_name(format!(".{}-{}.fif", RECORDING_FILE, Uuid::new_v4()));

    let written = writer.write_raw(recording, &tmp).map_err(|e| match e {
        MaxfilterError::Write { .. } => e,
        other => MaxfilterError::write(path, other),
    });
    if let Err(e) = written {
        if tmp.exists() {
            let _ = std::fs::remove_file(&tmp);
        }
        return Err(e);
    }

    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        MaxfilterError::write(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::InputRole;
    use crate::recording::{ChannelInfo, ChannelKind};
    use crate::types::{BadCondition, CoordFrame, MagScale, Origin, Regularize};
    use std::io::Write;

    /// Writes the sample matrix as JSON.
    struct JsonWriter;

    impl RecordingWriter for JsonWriter {
        fn write_raw(&self, recording: &Recording, path: &Path) -> Result<()> {
            let json = serde_json::to_string(&recording.data).unwrap();
            std::fs::write(path, json).map_err(|e| MaxfilterError::write(path, e))
        }
    }

    /// Leaves half a file behind, then fails.
    struct FailingWriter;

    impl RecordingWriter for FailingWriter {
        fn write_raw(&self, _recording: &Recording, path: &Path) -> Result<()> {
            let mut file = std::fs::File::create(path).unwrap();
            file.write_all(b"partial").unwrap();
            Err(MaxfilterError::Engine("disk full".to_string()))
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

    fn raw() -> Recording {
        Recording {
            source: PathBuf::from("rest1-raw.fif"),
            sample_rate: 1000.0,
            channels: vec![ChannelInfo {
                name: "MEG0111".to_string(),
                kind: ChannelKind::Mag,
                location: None,
            }],
            data: vec![vec![1.0, 2.0, 3.0]],
            annotations: Vec::new(),
            bads: Vec::new(),
            highpass: None,
            lowpass: None,
            maxwell_applied: false,
        }
    }

    fn result() -> FilterResult {
        let mut recording = raw();
        recording.data = vec![vec![0.5, 1.0, 1.5]];
        recording.maxwell_applied = true;
        FilterResult {
            recording,
            mode: FilterMode::Sss,
            segments: vec![SampleSpan::new(0, 3)],
            skipped: Vec::new(),
            condition_numbers: Vec::new(),
            diagnostics: Vec::new(),
            engine: "synthetic".to_string(),
            engine_version: None,
        }
    }

    #[test]
    fn test_outputs_written_and_inputs_copied() {
        let dir = tempfile::tempdir().unwrap();
        let ct = dir.path().join("ct_sparse.fif");
        std::fs::write(&ct, "crosstalk").unwrap();
        let inputs = InputSet::new("rest1-raw.fif").with(InputRole::Crosstalk, &ct);
        let layout = OutputLayout::new(dir.path());

        let written = write_outputs(&raw(), &result(), &config(), &inputs, &JsonWriter, &layout).unwrap();

        assert_eq!(
            std::fs::read_to_string(&written.recording).unwrap(),
            "[[0.5,1.0,1.5]]"
        );
        let copied = layout.maxfilter_dir().join("crosstalk_meg.fif");
        assert_eq!(written.copied, vec![copied.clone()]);
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "crosstalk");

        let params: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written.params).unwrap()).unwrap();
        assert_eq!(params["config"]["int_order"], 8);
        assert_eq!(params["mode"]["kind"], "sss");
        assert_eq!(params["inputs"]["crosstalk"], ct.display().to_string());
        assert_eq!(params["inputs"]["fine calibration"], serde_json::Value::Null);
        assert_eq!(params["recording"]["n_samples"], 3);
    }

    #[test]
    fn test_params_byte_identical_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let inputs = InputSet::new("rest1-raw.fif");
        write_outputs(&raw(), &result(), &config(), &inputs, &JsonWriter, &layout).unwrap();
        let first = std::fs::read(layout.params_path()).unwrap();
        write_outputs(&raw(), &result(), &config(), &inputs, &JsonWriter, &layout).unwrap();
        assert_eq!(first, std::fs::read(layout.params_path()).unwrap());
    }

    #[test]
    fn test_failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let err = write_outputs(
            &raw(),
            &result(),
            &config(),
            &InputSet::new("rest1-raw.fif"),
            &FailingWriter,
            &layout,
        )
        .unwrap_err();
        assert!(matches!(err, MaxfilterError::Write { .. }));
        assert!(!layout.recording_path().exists());
        assert_eq!(std::fs::read_dir(layout.maxfilter_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MAXFILTER_DIR), "blocker").unwrap();
        let layout = OutputLayout::new(dir.path());
        assert!(matches!(
            write_outputs(&raw(), &result(), &config(), &InputSet::new("rest1-raw.fif"), &JsonWriter, &layout),
            Err(MaxfilterError::Write { .. })
        ));
    }

    #[test]
    fn test_layout_change_rejected() {
        let mut bad = result();
        bad.recording.sample_rate = 500.0;
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        assert!(write_outputs(&raw(), &bad, &config(), &InputSet::new("rest1-raw.fif"), &JsonWriter, &layout).is_err());
        assert!(!layout.maxfilter_dir().exists());
    }
}
