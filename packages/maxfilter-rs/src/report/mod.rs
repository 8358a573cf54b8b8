//! Self-contained HTML report comparing the raw and filtered recordings.
//!
//! Report problems never fail a run: a figure that cannot be produced
//! becomes a placeholder section, and a report that cannot be rendered or
//! written is logged and skipped.

pub mod figures;
mod templates;

use crate::error::{MaxfilterError, Result};
use crate::filter::{Diagnostic, FilterResult};
use crate::inputs::{InputRole, InputSet};
use crate::recording::Recording;
use crate::types::FilterConfig;
use serde::Serialize;
use std::path::Path;
use tera::{Context, Tera};

const TEMPLATE_NAME: &str = "report.html";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub label: String,
    pub value: String,
}

impl TableRow {
    fn new(label: impl Into<String>, value: impl ToString) -> Self {
        Self {
            label: label.into(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionBody {
    Table { rows: Vec<TableRow> },
    Figure { svg: String, caption: String },
    Placeholder { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub id: &'static str,
    pub title: String,
    pub body: SectionBody,
}

impl Section {
    fn figure(id: &'static str, title: &str, figure: std::result::Result<figures::Figure, String>) -> Self {
        let body = match figure {
            Ok(f) => SectionBody::Figure {
                svg: f.svg,
                caption: f.caption,
            },
            Err(reason) => {
                log::warn!("{} figure not available: {}", title, reason);
                SectionBody::Placeholder { reason }
            }
        };
        Self {
            id,
            title: title.to_string(),
            body,
        }
    }

    pub fn is_populated_figure(&self) -> bool {
        matches!(self.body, SectionBody::Figure { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub title: String,
    pub source: String,
    pub generated: String,
    pub sections: Vec<Section>,
    pub diagnostics: Vec<Diagnostic>,
}

fn hz(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2} Hz", v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn data_info_rows(raw: &Recording) -> Vec<TableRow> {
    let bads = if raw.bads.is_empty() {
        "none".to_string()
    } else {
        raw.bads.join(", ")
    };
    vec![
        TableRow::new("Input file", raw.source.display()),
        TableRow::new("Bad channels", bads),
        TableRow::new("Sampling frequency", format!("{:.2} Hz", raw.sample_rate)),
        TableRow::new("Highpass", hz(raw.highpass)),
        TableRow::new("Lowpass", hz(raw.lowpass)),
        TableRow::new("Channels", raw.num_channels()),
        TableRow::new("Duration", format!("{:.2} s", raw.duration())),
    ]
}

fn parameter_rows(config: &FilterConfig, inputs: &InputSet, result: &FilterResult) -> Vec<TableRow> {
    let optional = |v: Option<String>| v.unwrap_or_else(|| "none".to_string());
    let mut rows = vec![
        TableRow::new("Mode", result.mode),
        TableRow::new("st_duration", optional(config.st_duration.map(|d| format!("{} s", d)))),
        TableRow::new("st_correlation", config.st_correlation),
        TableRow::new("origin", config.origin),
        TableRow::new("int_order", config.int_order),
        TableRow::new("ext_order", config.ext_order),
        TableRow::new("coord_frame", config.coord_frame.as_str()),
        TableRow::new("regularize", config.regularize.as_str()),
        TableRow::new("ignore_ref", config.ignore_ref),
        TableRow::new("bad_condition", config.bad_condition.as_str()),
        TableRow::new("st_fixed", config.st_fixed),
        TableRow::new("st_only", config.st_only),
        TableRow::new("mag_scale", config.mag_scale),
        TableRow::new("skip_by_annotation", format!("[{}]", config.skip_by_annotation.join(", "))),
        TableRow::new("extended_proj", format!("{} vector(s)", config.extended_proj.len())),
        TableRow::new("destination", optional(config.destination.as_ref().map(|d| d.to_string()))),
    ];

    for role in InputRole::OPTIONAL {
        let value = match inputs.get(role) {
            Some(path) => format!(
                "provided ({})",
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            ),
            None => "not provided".to_string(),
        };
        rows.push(TableRow::new(format!("{} file", role.label()), value));
    }

    rows.push(TableRow::new("Engine", &result.engine));
    rows.push(TableRow::new(
        "Engine version",
        result.engine_version.as_deref().unwrap_or("unknown"),
    ));
    rows.push(TableRow::new(
        "Filtered segments",
        format!("{} ({} skipped span(s))", result.segments.len(), result.skipped.len()),
    ));
    if let Some(max) = result.condition_numbers.iter().copied().reduce(f64::max) {
        rows.push(TableRow::new("Max condition number", format!("{:.1}", max)));
    }
    rows
}

impl Report {
    /// Build every section. Figures are computed here; failures become
    /// placeholders.
    pub fn build(raw: &Recording, result: &FilterResult, config: &FilterConfig, inputs: &InputSet) -> Self {
        let filtered = &result.recording;
        let (psd, topo) = rayon::join(
            || figures::psd_figure(raw, filtered),
            || figures::topography_figure(raw, filtered),
        );

        let sections = vec![
            Section {
                id: "data-info",
                title: "Data info".to_string(),
                body: SectionBody::Table {
                    rows: data_info_rows(raw),
                },
            },
            Section::figure("psd", "Power spectral density: raw vs. filtered", psd),
            Section::figure("topography", "Sensor topography: raw vs. filtered", topo),
            Section {
                id: "parameters",
                title: "Parameters".to_string(),
                body: SectionBody::Table {
                    rows: parameter_rows(config, inputs, result),
                },
            },
        ];

        Self {
            title: format!("Maxwell filter report ({})", result.mode),
            source: raw.source.display().to_string(),
            generated: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            sections,
            diagnostics: result.diagnostics.clone(),
        }
    }

    /// Number of figure sections that rendered a figure.
    pub fn populated_figures(&self) -> usize {
        self.sections.iter().filter(|s| s.is_populated_figure()).count()
    }
}

pub struct ReportGenerator {
    tera: Tera,
}

impl ReportGenerator {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, templates::REPORT_HTML)
            .map_err(|e| MaxfilterError::Report(format!("Invalid report template: {}", e)))?;
        Ok(Self { tera })
    }

    pub fn render(&self, report: &Report) -> Result<String> {
        let mut context = Context::new();
        context.insert("report", report);
        context.insert("css", templates::REPORT_CSS);
        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| MaxfilterError::Report(format!("Failed to render report: {}", e)))
    }

    pub fn write(&self, report: &Report, path: &Path) -> Result<()> {
        let html = self.render(report)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MaxfilterError::Report(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, html)
            .map_err(|e| MaxfilterError::Report(format!("{}: {}", path.display(), e)))
    }
}

/// Build and write the report. Returns the report when the file was written;
/// every failure is logged and swallowed.
pub fn generate_report(
    raw: &Recording,
    result: &FilterResult,
    config: &FilterConfig,
    inputs: &InputSet,
    path: &Path,
) -> Option<Report> {
    crate::profile_scope!("report");
    let report = Report::build(raw, result, config, inputs);
    let written = ReportGenerator::new().and_then(|generator| generator.write(&report, path));
    match written {
        Ok(()) => {
            log::info!(
                "Report written to {} ({} of 2 figures populated)",
                path.display(),
                report.populated_figures()
            );
            Some(report)
        }
        Err(e) => {
            log::warn!("{}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{ChannelInfo, ChannelKind, SampleSpan};
    use crate::types::{BadCondition, CoordFrame, MagScale, Origin, Regularize};
    use std::f64::consts::PI;
    use std::path::PathBuf;

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
            sample_rate: 200.0,
            channels: vec![
                ChannelInfo {
                    name: "MEG0111".to_string(),
                    kind: ChannelKind::Mag,
                    location: None,
                },
                ChannelInfo {
                    name: "MEG0121".to_string(),
                    kind: ChannelKind::Mag,
                    location: None,
                },
            ],
            data: (0..2)
                .map(|c| {
                    (0..1024)
                        .map(|i| (c as f64 + 1.0) * (2.0 * PI * 12.0 * i as f64 / 200.0).sin())
                        .collect()
                })
                .collect(),
            annotations: Vec::new(),
            bads: Vec::new(),
            highpass: None,
            lowpass: None,
            maxwell_applied: false,
        }
    }

    fn result(recording: Recording) -> FilterResult {
        FilterResult {
            segments: vec![SampleSpan::new(0, recording.num_samples())],
            recording,
            mode: config().mode(),
            skipped: Vec::new(),
            condition_numbers: vec![12.5],
            diagnostics: Vec::new(),
            engine: "synthetic".to_string(),
            engine_version: None,
        }
    }

    #[test]
    fn test_report_has_two_figures() {
        let raw = raw();
        let report = Report::build(&raw, &result(raw.clone()), &config(), &InputSet::new("rest1-raw.fif"));
        assert_eq!(report.sections.len(), 4);
        assert_eq!(report.populated_figures(), 2);
        assert_eq!(report.sections[0].id, "data-info");
        assert_eq!(report.sections[3].id, "parameters");
    }

    #[test]
    fn test_flat_output_degrades_to_placeholders() {
        let raw = raw();
        let mut filtered = raw.clone();
        filtered.data = vec![vec![0.0; 1024]; 2];
        let report = Report::build(&raw, &result(filtered), &config(), &InputSet::new("rest1-raw.fif"));
        assert_eq!(report.populated_figures(), 0);
        assert!(matches!(
            report.sections[1].body,
            SectionBody::Placeholder { .. }
        ));

        let html = ReportGenerator::new().unwrap().render(&report).unwrap();
        assert!(html.contains("Figure not available"));
    }

    #[test]
    fn test_rendered_html_is_self_contained() {
        let raw = raw();
        let report = Report::build(&raw, &result(raw.clone()), &config(), &InputSet::new("rest1-raw.fif"));
        let html = ReportGenerator::new().unwrap().render(&report).unwrap();
        assert!(html.contains("<style>"));
        assert_eq!(html.matches("<svg").count(), 2);
        assert!(html.contains("rest1-raw.fif"));
        assert!(html.contains("crosstalk file"));
        assert!(html.contains("not provided"));
        assert!(!html.contains("<script"));
    }

    #[test]
    fn test_unwritable_report_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("out_dir_report");
        std::fs::write(&blocker, "not a directory").unwrap();
        let raw = raw();
        let report = generate_report(
            &raw,
            &result(raw.clone()),
            &config(),
            &InputSet::new("rest1-raw.fif"),
            &blocker.join("report_maxfilter.html"),
        );
        assert!(report.is_none());
    }

    #[test]
    fn test_parameter_rows_list_provided_files() {
        let raw = raw();
        let inputs = InputSet::new("rest1-raw.fif").with(InputRole::Crosstalk, "/data/ct_sparse.fif");
        let rows = parameter_rows(&config(), &inputs, &result(raw));
        let crosstalk = rows.iter().find(|r| r.label == "crosstalk file").unwrap();
        assert_eq!(crosstalk.value, "provided (ct_sparse.fif)");
        let cond = rows.iter().find(|r| r.label == "Max condition number").unwrap();
        assert_eq!(cond.value, "12.5");
    }
}
