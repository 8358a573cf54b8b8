use clap::Parser;

mod cli;
mod exit_codes;
mod output;
mod run;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let exit_code = if cli.check {
        run::check(&cli)
    } else {
        run::execute(&cli)
    };

    std::process::exit(exit_code);
}
