//! Input resolution: maps declared auxiliary file paths to verified files.

use crate::config::RawConfig;
use crate::error::{MaxfilterError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Logical role of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRole {
    Recording,
    FineCalibration,
    Crosstalk,
    HeadPosition,
    Destination,
    Events,
    Channels,
}

impl InputRole {
    pub const OPTIONAL: [InputRole; 6] = [
        InputRole::FineCalibration,
        InputRole::Crosstalk,
        InputRole::HeadPosition,
        InputRole::Destination,
        InputRole::Events,
        InputRole::Channels,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::FineCalibration => "fine calibration",
            Self::Crosstalk => "crosstalk",
            Self::HeadPosition => "head position",
            Self::Destination => "destination",
            Self::Events => "events",
            Self::Channels => "channels",
        }
    }

    /// Configuration keys naming this role, highest precedence first.
    pub fn config_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Recording => &["fif"],
            Self::FineCalibration => &["calibration"],
            Self::Crosstalk => &["crosstalk", "cross_talk_correction"],
            Self::HeadPosition => &["headshape_override", "headshape", "head_position"],
            Self::Destination => &["destination_override", "destination"],
            Self::Events => &["events_override", "events"],
            Self::Channels => &["channels_override", "channels"],
        }
    }

    /// Name of the copy placed next to the filtered recording.
    pub fn output_name(&self) -> Option<&'static str> {
        match self {
            Self::Recording => None,
            Self::FineCalibration => Some("calibration_meg.dat"),
            Self::Crosstalk => Some("crosstalk_meg.fif"),
            Self::HeadPosition => Some("headshape.pos"),
            Self::Destination => Some("destination.fif"),
            Self::Events => Some("events.tsv"),
            Self::Channels => Some("channels.tsv"),
        }
    }

    /// The declared (key, path) for this role, if any.
    pub fn declared<'a>(&self, raw: &'a RawConfig) -> Option<(&'static str, &'a str)> {
        self.config_keys()
            .iter()
            .find_map(|key| raw.file(key).map(|path| (*key, path)))
    }
}

pub fn is_file_key(key: &str) -> bool {
    InputRole::OPTIONAL
        .iter()
        .any(|role| role.config_keys().contains(&key))
}

/// Verified input files for one run. The primary recording is always
/// present; every other role is independently optional.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSet {
    primary: PathBuf,
    optional: BTreeMap<InputRole, PathBuf>,
}

impl InputSet {
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            optional: BTreeMap::new(),
        }
    }

    pub fn with(mut self, role: InputRole, path: impl Into<PathBuf>) -> Self {
        match role {
            InputRole::Recording => self.primary = path.into(),
            _ => {
                self.optional.insert(role, path.into());
            }
        }
        self
    }

    pub fn primary(&self) -> &Path {
        &self.primary
    }

    pub fn get(&self, role: InputRole) -> Option<&Path> {
        match role {
            InputRole::Recording => Some(&self.primary),
            _ => self.optional.get(&role).map(|p| p.as_path()),
        }
    }

    pub fn is_present(&self, role: InputRole) -> bool {
        self.get(role).is_some()
    }

    /// Optional roles that resolved to a file, in role order.
    pub fn present(&self) -> impl Iterator<Item = (InputRole, &Path)> {
        self.optional.iter().map(|(role, path)| (*role, path.as_path()))
    }

    /// Role label → path (or null) for every role, for provenance records.
    pub fn describe(&self) -> BTreeMap<&'static str, Option<String>> {
        let mut out = BTreeMap::new();
        out.insert(
            InputRole::Recording.label(),
            Some(self.primary.display().to_string()),
        );
        for role in InputRole::OPTIONAL {
            out.insert(role.label(), self.get(role).map(|p| p.display().to_string()));
        }
        out
    }
}

/// Resolve every declared auxiliary file. Unset roles are absent; a declared
/// path that is not a readable file fails with `MissingInput`.
pub fn resolve_inputs(raw: &RawConfig) -> Result<InputSet> {
    let mut inputs = InputSet::new(raw.fif.clone());

    for role in InputRole::OPTIONAL {
        let Some((key, path)) = role.declared(raw) else {
            log::debug!("No {} file declared", role.label());
            continue;
        };

        let path = PathBuf::from(path);
        if !is_readable_file(&path) {
            return Err(MaxfilterError::MissingInput {
                role: role.label().to_string(),
                path: path.display().to_string(),
            });
        }

        log::info!("Resolved {} file ({}): {}", role.label(), key, path.display());
        inputs = inputs.with(role, path);
    }

    Ok(inputs)
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && std::fs::File::open(path).is_ok()
}

/// Channel names whose `status` column is `bad` in a tab-separated channels
/// table.
pub fn read_bad_channels(path: &Path) -> Result<Vec<String>> {
    let malformed = |reason: String| {
        MaxfilterError::Config(format!(
            "Malformed channels table {}: {}",
            path.display(),
            reason
        ))
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)
        .map_err(|e| malformed(e.to_string()))?;

    let headers = reader.headers().map_err(|e| malformed(e.to_string()))?.clone();
    let name_col = headers
        .iter()
        .position(|h| h == "name")
        .ok_or_else(|| malformed("no 'name' column".to_string()))?;
    let status_col = headers
        .iter()
        .position(|h| h == "status")
        .ok_or_else(|| malformed("no 'status' column".to_string()))?;

    let mut bads = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| malformed(e.to_string()))?;
        if record.get(status_col).map(str::trim) == Some("bad") {
            if let Some(name) = record.get(name_col) {
                bads.push(name.trim().to_string());
            }
        }
    }

    Ok(bads)
}
