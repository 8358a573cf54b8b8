//! MNE-Python backend.
//!
//! Every call spawns the bundled bridge script, sends one JSON request on
//! stdin and reads one JSON response from stdout. Sample data travels through
//! scratch files (channel-major little-endian float64) so that large
//! recordings never pass through the JSON channel.

use crate::engine::{MaxwellEngine, RecordingReader, RecordingWriter, SegmentOutput, SegmentRequest};
use crate::error::{MaxfilterError, Result};
use crate::inputs::InputRole;
use crate::mmap_utils::{read_f64_matrix, write_f64_matrix};
use crate::recording::{Annotation, ChannelInfo, ChannelKind, Recording};
use crate::types::{Destination, FilterMode, MagScale, Origin, Regularize};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use uuid::Uuid;

pub const BRIDGE_SCRIPT_NAME: &str = "maxwell_bridge.py";

/// Detected Python environment with MNE availability info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonEnvironment {
    pub python_path: String,
    pub has_mne: bool,
    pub mne_version: Option<String>,
}

/// Try common Python executable names and return the first that has MNE installed.
pub fn detect_python() -> Option<PythonEnvironment> {
    ["python3", "python"]
        .iter()
        .filter_map(|candidate| probe_python(candidate))
        .find(|env| env.has_mne)
}

/// Detect Python at a specific path.
pub fn detect_python_at(python_path: &str) -> Option<PythonEnvironment> {
    probe_python(python_path)
}

fn probe_python(python_path: &str) -> Option<PythonEnvironment> {
    let output = Command::new(python_path)
        .args(["-c", "import mne; print(mne.__version__)"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .ok()?;

    if output.status.success() {
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        return Some(PythonEnvironment {
            python_path: python_path.to_string(),
            has_mne: true,
            mne_version: Some(version),
        });
    }

    // Interpreter works but MNE is missing
    let status = Command::new(python_path)
        .args(["-c", "import sys"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .ok()?;
    status.success().then(|| PythonEnvironment {
        python_path: python_path.to_string(),
        has_mne: false,
        mne_version: None,
    })
}

/// Locate the bridge script: working directory first, then next to the
/// executable, then the crate's own resources.
pub fn locate_bridge_script() -> Result<PathBuf> {
    let mut candidates = vec![PathBuf::from("resources/python").join(BRIDGE_SCRIPT_NAME)];

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.push(exe_dir.join("python").join(BRIDGE_SCRIPT_NAME));
            candidates.push(exe_dir.join("resources").join("python").join(BRIDGE_SCRIPT_NAME));
        }
    }

    candidates.push(
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("resources")
            .join("python")
            .join(BRIDGE_SCRIPT_NAME),
    );

    candidates
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| {
            MaxfilterError::EngineNotFound(format!(
                "{} not found in any expected location",
                BRIDGE_SCRIPT_NAME
            ))
        })
}

/// Invoke the bridge script with a JSON request and return the parsed
/// response. Filtering is not interruptible, so there is no timeout.
pub fn invoke_bridge(
    python_env: &PythonEnvironment,
    bridge_script: &Path,
    request: &Value,
) -> Result<Value> {
    let mode = request.get("mode").and_then(Value::as_str).unwrap_or("?");
    let request_json = serde_json::to_string(request)
        .map_err(|e| MaxfilterError::Engine(format!("Failed to serialize bridge request: {}", e)))?;

    let mut child = Command::new(&python_env.python_path)
        .arg(bridge_script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            MaxfilterError::EngineNotFound(format!(
                "Failed to spawn Python process ({}): {}",
                python_env.python_path, e
            ))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(request_json.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .map_err(|e| MaxfilterError::Engine(format!("Failed to write to Python stdin: {}", e)))?;
        // dropping stdin signals EOF
    }

    let output = child
        .wait_with_output()
        .map_err(|e| MaxfilterError::Engine(format!("Failed to wait for Python process: {}", e)))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        log::debug!("[bridge:{}] {}", mode, line);
    }

    if !output.status.success() {
        return Err(MaxfilterError::Engine(format!(
            "Python bridge failed in mode '{}' (exit {}): {}",
            mode,
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let response: Value = serde_json::from_str(stdout.trim()).map_err(|e| {
        MaxfilterError::Engine(format!(
            "Failed to parse bridge response: {} (raw: {})",
            e,
            stdout.chars().take(200).collect::<String>()
        ))
    })?;

    if response.get("status").and_then(Value::as_str) == Some("error") {
        let message = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Unknown bridge error");
        return Err(MaxfilterError::Engine(format!("MNE bridge error: {}", message)));
    }

    Ok(response)
}

/// Scratch file removed on drop.
#[derive(Debug)]
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn new(stem: &str, extension: &str) -> Self {
        Self(std::env::temp_dir().join(format!("maxfilter_{}_{}.{}", stem, Uuid::new_v4(), extension)))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(e) = std::fs::remove_file(&self.0) {
                log::warn!("Failed to remove scratch file {}: {}", self.0.display(), e);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    name: String,
    kind: String,
    #[serde(default)]
    location: Option<[f64; 3]>,
}

#[derive(Debug, Deserialize)]
struct ReadRawResponse {
    sample_rate: f64,
    n_samples: usize,
    channels: Vec<RawChannel>,
    #[serde(default)]
    annotations: Vec<Annotation>,
    #[serde(default)]
    bads: Vec<String>,
    highpass: Option<f64>,
    lowpass: Option<f64>,
    #[serde(default)]
    maxwell_applied: bool,
}

#[derive(Debug, Deserialize)]
struct FilterResponse {
    n_channels: usize,
    n_samples: usize,
    #[serde(default)]
    condition_numbers: Vec<f64>,
}

/// Reader, writer and SSS engine backed by MNE-Python.
pub struct MneBridge {
    python: PythonEnvironment,
    script: PathBuf,
    /// Measurement info of the last filtered segment, carrying the SSS
    /// processing history into the written file.
    filtered_info: Mutex<Option<ScratchFile>>,
}

impl MneBridge {
    pub fn new(python: PythonEnvironment, script: impl Into<PathBuf>) -> Result<Self> {
        let script = script.into();
        if !python.has_mne {
            return Err(MaxfilterError::EngineNotFound(format!(
                "MNE-Python is not installed for {}",
                python.python_path
            )));
        }
        if !script.exists() {
            return Err(MaxfilterError::EngineNotFound(format!(
                "Bridge script not found: {}",
                script.display()
            )));
        }
        Ok(Self {
            python,
            script,
            filtered_info: Mutex::new(None),
        })
    }

    /// Discover the interpreter and bridge script, honoring explicit overrides.
    pub fn discover(python: Option<&str>, script: Option<&Path>) -> Result<Self> {
        let env = match python {
            Some(path) => detect_python_at(path),
            None => detect_python(),
        }
        .ok_or_else(|| {
            MaxfilterError::EngineNotFound(format!(
                "No Python interpreter with MNE found ({})",
                python.unwrap_or("python3, python")
            ))
        })?;

        let script = match script {
            Some(path) => path.to_path_buf(),
            None => locate_bridge_script()?,
        };

        log::info!(
            "Using MNE {} via {} ({})",
            env.mne_version.as_deref().unwrap_or("unknown"),
            env.python_path,
            script.display()
        );
        Self::new(env, script)
    }

    fn invoke(&self, request: &Value) -> Result<Value> {
        invoke_bridge(&self.python, &self.script, request)
    }
}

fn filter_params(request: &SegmentRequest<'_>) -> Value {
    let config = request.config;
    let (st_duration, st_only) = match request.mode {
        FilterMode::Sss => (None, false),
        FilterMode::Tsss { duration, .. } => (Some(duration), false),
        FilterMode::TsssOnly { duration, .. } => (Some(duration), true),
    };
    let origin = match config.origin {
        Origin::Auto => json!("auto"),
        Origin::Fixed(xyz) => json!(xyz),
    };
    let mag_scale = match config.mag_scale {
        MagScale::Auto => json!("auto"),
        MagScale::Value(v) => json!(v),
    };
    let destination = match &config.destination {
        None => Value::Null,
        Some(Destination::Coordinates(xyz)) => json!(xyz),
        Some(Destination::File(path)) => json!(path),
    };
    let regularize = match config.regularize {
        Regularize::In => json!("in"),
        Regularize::None => Value::Null,
    };
    let file = |role: InputRole| request.inputs.get(role).map(|p| p.display().to_string());

    json!({
        "origin": origin,
        "int_order": config.int_order,
        "ext_order": config.ext_order,
        "calibration": file(InputRole::FineCalibration),
        "cross_talk": file(InputRole::Crosstalk),
        "head_pos": file(InputRole::HeadPosition),
        "st_duration": st_duration,
        "st_correlation": config.st_correlation,
        "coord_frame": config.coord_frame.as_str(),
        "destination": destination,
        "regularize": regularize,
        "ignore_ref": config.ignore_ref,
        "st_fixed": config.st_fixed,
        "st_only": st_only,
        "mag_scale": mag_scale,
        "extended_proj": config.extended_proj,
    })
}

impl MaxwellEngine for MneBridge {
    fn name(&self) -> &str {
        "mne.preprocessing.maxwell_filter"
    }

    fn version(&self) -> Option<String> {
        self.python.mne_version.clone()
    }

    fn filter_segment(&self, request: &SegmentRequest<'_>) -> Result<SegmentOutput> {
        let recording = request.recording;
        let input = ScratchFile::new("segment_in", "f64");
        let output = ScratchFile::new("segment_out", "f64");
        let info = ScratchFile::new("info", "fif");

        write_f64_matrix(input.path(), &request.data())?;

        let response = self.invoke(&json!({
            "mode": "maxwell_filter",
            "source": recording.source,
            "data_path": input.path(),
            "output_path": output.path(),
            "info_path": info.path(),
            "n_channels": recording.num_channels(),
            "n_samples": request.span.len(),
            // offset into the recording, for head position alignment
            "first_samp": request.span.start,
            "bads": recording.bads,
            "params": filter_params(request),
        }))?;
        let response: FilterResponse = serde_json::from_value(response)
            .map_err(|e| MaxfilterError::Engine(format!("Malformed filter response: {}", e)))?;

        let data = read_f64_matrix(output.path(), response.n_channels, response.n_samples)?;

        if info.path().exists() {
            if let Ok(mut slot) = self.filtered_info.lock() {
                *slot = Some(info);
            }
        }

        Ok(SegmentOutput {
            data,
            condition_numbers: response.condition_numbers,
        })
    }
}

impl RecordingReader for MneBridge {
    fn read_raw(&self, path: &Path) -> Result<Recording> {
        let data_file = ScratchFile::new("raw", "f64");
        let response = self.invoke(&json!({
            "mode": "read_raw",
            "file_path": path,
            "output_path": data_file.path(),
        }))?;
        let meta: ReadRawResponse = serde_json::from_value(response)
            .map_err(|e| MaxfilterError::Engine(format!("Malformed read response: {}", e)))?;

        let data = read_f64_matrix(data_file.path(), meta.channels.len(), meta.n_samples)?;

        log::info!(
            "Read {}: {} channels, {} samples at {} Hz",
            path.display(),
            meta.channels.len(),
            meta.n_samples,
            meta.sample_rate
        );

        Ok(Recording {
            source: path.to_path_buf(),
            sample_rate: meta.sample_rate,
            channels: meta
                .channels
                .into_iter()
                .map(|ch| ChannelInfo {
                    kind: ChannelKind::from_mne(&ch.kind),
                    name: ch.name,
                    location: ch.location,
                })
                .collect(),
            data,
            annotations: meta.annotations,
            bads: meta.bads,
            highpass: meta.highpass,
            lowpass: meta.lowpass,
            maxwell_applied: meta.maxwell_applied,
        })
    }
}

impl RecordingWriter for MneBridge {
    fn write_raw(&self, recording: &Recording, path: &Path) -> Result<()> {
        let data_file = ScratchFile::new("write", "f64");
        write_f64_matrix(data_file.path(), &recording.data)?;

        let slot = self
            .filtered_info
            .lock()
            .map_err(|_| MaxfilterError::Engine("Filtered info lock poisoned".to_string()))?;
        let info_path = slot
            .as_ref()
            .filter(|_| recording.maxwell_applied)
            .map(|f| f.path().to_path_buf());

        self.invoke(&json!({
            "mode": "write_raw",
            "source": recording.source,
            "info_path": info_path,
            "data_path": data_file.path(),
            "output_path": path,
            "n_channels": recording.num_channels(),
            "n_samples": recording.num_samples(),
            "bads": recording.bads,
        }))
        .map_err(|e| MaxfilterError::write(path, e))?;
        Ok(())
    }
}
