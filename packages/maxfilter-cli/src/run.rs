use crate::cli::Cli;
use crate::exit_codes;
use crate::output;
use maxfilter_rs::{Collaborators, FilterConfig, FilterMode, MaxfilterError, MneBridge, OutputLayout};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
struct CheckOutput<'a> {
    config: &'a FilterConfig,
    mode: FilterMode,
    inputs: BTreeMap<&'static str, Option<String>>,
}

fn fail(err: &MaxfilterError) -> i32 {
    eprintln!("Error: {}", err);
    exit_codes::for_error(err)
}

/// Validate configuration and inputs only; nothing is written.
pub fn check(cli: &Cli) -> i32 {
    let prepared = match maxfilter_rs::prepare(&cli.config) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let result = CheckOutput {
        config: &prepared.config,
        mode: prepared.config.mode(),
        inputs: prepared.inputs.describe(),
    };
    match output::to_json(&result, cli.compact).and_then(|json| output::write_output(&json)) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::WRITE_ERROR
        }
    }
}

pub fn execute(cli: &Cli) -> i32 {
    // Configuration problems are reported before looking for Python.
    let prepared = match maxfilter_rs::prepare(&cli.config) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let bridge = match MneBridge::discover(cli.python.as_deref(), cli.bridge_script.as_deref()) {
        Ok(b) => b,
        Err(e) => return fail(&e),
    };

    let layout = OutputLayout::new(&cli.output_dir);
    match maxfilter_rs::execute(&prepared, Collaborators::uniform(&bridge), &layout) {
        Ok(summary) => {
            println!(
                "{} complete: {}",
                summary.mode,
                summary.outputs.recording.display()
            );
            match summary.report {
                Some(report) => println!(
                    "Report: {} ({} of 2 figures)",
                    report.display(),
                    summary.populated_figures
                ),
                None => println!("Report: not written (see log)"),
            }
            exit_codes::SUCCESS
        }
        Err(e) => fail(&e),
    }
}
