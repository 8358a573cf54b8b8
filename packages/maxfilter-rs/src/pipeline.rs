//! End-to-end run: configuration → validation → input resolution → filtering
//! → outputs and report → product log.

use crate::config::{self, RawConfig};
use crate::engine::Collaborators;
use crate::error::Result;
use crate::filter::{run_filter, Severity};
use crate::inputs::{read_bad_channels, resolve_inputs, InputRole, InputSet};
use crate::output::{write_outputs, OutputLayout, WrittenOutputs};
use crate::product::{MessageKind, ProductLog};
use crate::recording::Recording;
use crate::report::generate_report;
use crate::types::{FilterConfig, FilterMode};
use crate::validate::validate;
use std::path::{Path, PathBuf};

/// Validated configuration and resolved inputs. Building it has no output
/// side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRun {
    pub config: FilterConfig,
    pub inputs: InputSet,
}

pub fn prepare(config_path: &Path) -> Result<PreparedRun> {
    crate::profile_scope!("prepare");
    let raw = config::load_config(config_path)?;
    prepare_from(&raw)
}

pub fn prepare_from(raw: &RawConfig) -> Result<PreparedRun> {
    let config = validate(raw)?;
    let inputs = resolve_inputs(raw)?;
    log::info!("Filter mode: {}", config.mode());
    Ok(PreparedRun { config, inputs })
}

#[derive(Debug)]
pub struct RunSummary {
    pub mode: FilterMode,
    pub outputs: WrittenOutputs,
    pub report: Option<PathBuf>,
    pub populated_figures: usize,
    pub product: ProductLog,
}

/// Replace the recording's bad list with the channels table, warning when
/// they disagree.
fn apply_channel_table(raw: &mut Recording, inputs: &InputSet, product: &mut ProductLog) -> Result<()> {
    let Some(path) = inputs.get(InputRole::Channels) else {
        return Ok(());
    };
    let table = read_bad_channels(path)?;

    let (known, unknown): (Vec<String>, Vec<String>) = table
        .into_iter()
        .partition(|name| raw.channels.iter().any(|ch| &ch.name == name));
    if !unknown.is_empty() {
        log::warn!(
            "Ignoring bad channels not present in the recording: {}",
            unknown.join(", ")
        );
    }

    let mut current = raw.bads.clone();
    let mut table_sorted = known.clone();
    current.sort();
    table_sorted.sort();
    if current != table_sorted {
        product.warn(format!(
            "Bad channels in the recording ({}) differ from the channels table ({}); using the channels table.",
            display_list(&raw.bads),
            display_list(&known)
        ));
    }
    raw.bads = known;
    Ok(())
}

fn display_list(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

/// Run a prepared configuration. Outputs are written only after filtering
/// succeeds; the recording writer and the report run concurrently.
pub fn execute(
    prepared: &PreparedRun,
    collaborators: Collaborators<'_>,
    layout: &OutputLayout,
) -> Result<RunSummary> {
    crate::profile_scope!("execute");
    let PreparedRun { config, inputs } = prepared;
    let mut product = ProductLog::new();

    let mut raw = {
        crate::profile_scope!("read_raw");
        collaborators.reader.read_raw(inputs.primary())?
    };
    apply_channel_table(&mut raw, inputs, &mut product)?;

    if raw.bads.is_empty() {
        product.warn(
            "No channels are marked as bad. Make sure to check (automated) bad channel detection before Maxwell filtering.",
        );
    } else {
        log::info!("Bad channels: {}", raw.bads.join(", "));
    }

    let result = run_filter(collaborators.engine, &raw, config, inputs)?;
    for diagnostic in &result.diagnostics {
        let kind = match diagnostic.severity {
            Severity::Warning => MessageKind::Warning,
            Severity::Info => MessageKind::Info,
        };
        product.push(kind, diagnostic.message.clone());
    }

    let report_path = layout.report_path();
    let (written, report) = rayon::join(
        || write_outputs(&raw, &result, config, inputs, collaborators.writer, layout),
        || generate_report(&raw, &result, config, inputs, &report_path),
    );
    let outputs = written?;

    product.success(format!("{} applied to {}.", result.mode, raw.source.display()));
    product.write(&layout.product_path())?;

    Ok(RunSummary {
        mode: result.mode,
        outputs,
        populated_figures: report.as_ref().map(|r| r.populated_figures()).unwrap_or(0),
        report: report.map(|_| report_path),
        product,
    })
}
