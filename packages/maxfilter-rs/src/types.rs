use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Origin of the internal and external multipolar moment space, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// (0, 0, 0) in the MEG frame, or a sphere fit to the head digitization
    /// in the head frame.
    Auto,
    Fixed([f64; 3]),
}

/// Magnetometer scale factor bringing magnetometers (T) to the same order of
/// magnitude as gradiometers (T/m).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagScale {
    Auto,
    Value(f64),
}

/// Target head position for movement compensation or realignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Rigid translation to the given coordinates, no rotation.
    Coordinates([f64; 3]),
    /// MEG file whose device-to-head transform gives the target.
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordFrame {
    Meg,
    Head,
}

impl CoordFrame {
    pub const LITERALS: &'static [&'static str] = &["meg", "head"];

    pub fn from_literal(s: &str) -> Option<Self> {
        match s {
            "meg" => Some(Self::Meg),
            "head" => Some(Self::Head),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meg => "meg",
            Self::Head => "head",
        }
    }
}

/// Basis regularization. `None` serializes as JSON null, matching the
/// configuration literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regularize {
    In,
    None,
}

impl Serialize for Regularize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::In => serializer.serialize_str("in"),
            Self::None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Regularize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)?.as_deref() {
            None => Ok(Self::None),
            Some("in") => Ok(Self::In),
            Some(other) => Err(de::Error::invalid_value(
                de::Unexpected::Str(other),
                &"\"in\" or null",
            )),
        }
    }
}

impl Regularize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::None => "null",
        }
    }
}

/// Policy for ill-conditioned SSS matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadCondition {
    Error,
    Warning,
    Info,
    Ignore,
}

impl BadCondition {
    pub const LITERALS: &'static [&'static str] = &["error", "warning", "info", "ignore"];

    pub fn from_literal(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "info" => Some(Self::Info),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Ignore => "ignore",
        }
    }
}

/// Validated, immutable filter parameters for one run.
///
/// Built only by [`crate::validate::validate`]; the serialized form is the
/// effective-parameter record written next to the filtered recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterConfig {
    pub st_duration: Option<f64>,
    pub st_correlation: f64,
    pub origin: Origin,
    pub int_order: u32,
    pub ext_order: u32,
    pub coord_frame: CoordFrame,
    pub regularize: Regularize,
    pub ignore_ref: bool,
    pub bad_condition: BadCondition,
    pub st_fixed: bool,
    pub st_only: bool,
    pub mag_scale: MagScale,
    pub skip_by_annotation: Vec<String>,
    pub extended_proj: Vec<Vec<f64>>,
    pub destination: Option<Destination>,
}

impl FilterConfig {
    pub fn mode(&self) -> FilterMode {
        FilterMode::from_config(self)
    }
}

/// Which projection steps the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterMode {
    /// Static SSS only.
    Sss,
    /// SSS followed by the temporal projection.
    Tsss {
        duration: f64,
        correlation: f64,
        fixed: bool,
    },
    /// Temporal projection only; spatial content outside it is left as
    /// recorded.
    TsssOnly {
        duration: f64,
        correlation: f64,
        fixed: bool,
    },
}

impl FilterMode {
    pub fn from_config(config: &FilterConfig) -> Self {
        match (config.st_duration, config.st_only) {
            (None, _) => Self::Sss,
            (Some(duration), false) => Self::Tsss {
                duration,
                correlation: config.st_correlation,
                fixed: config.st_fixed,
            },
            (Some(duration), true) => Self::TsssOnly {
                duration,
                correlation: config.st_correlation,
                fixed: config.st_fixed,
            },
        }
    }

    pub fn buffer_duration(&self) -> Option<f64> {
        match self {
            Self::Sss => None,
            Self::Tsss { duration, .. } | Self::TsssOnly { duration, .. } => Some(*duration),
        }
    }

    pub fn applies_sss(&self) -> bool {
        !matches!(self, Self::TsssOnly { .. })
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sss => write!(f, "SSS"),
            Self::Tsss { duration, .. } => write!(f, "tSSS ({}s buffer)", duration),
            Self::TsssOnly { duration, .. } => {
                write!(f, "tSSS projection only ({}s buffer)", duration)
            }
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Fixed([x, y, z]) => write!(f, "[{}, {}, {}]", x, y, z),
        }
    }
}

impl fmt::Display for MagScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Value(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinates([x, y, z]) => write!(f, "[{}, {}, {}]", x, y, z),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}
