use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "maxfilter",
    version,
    about = "SSS/tSSS Maxwell filtering of MEG recordings",
    long_about = "Apply Signal Space Separation (SSS) or temporal SSS to a MEG recording.\n\
                  Reads ./config.json, writes out_dir_maxwell_filter/, out_dir_report/ and product.json.\n\
                  Requires Python with MNE installed. Set $MAXFILTER_PYTHON to choose the interpreter."
)]
pub struct Cli {
    /// Configuration file
    #[arg(long, default_value = maxfilter_rs::config::CONFIG_FILE)]
    pub config: PathBuf,

    /// Directory receiving the outputs
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Validate configuration and inputs, print the effective parameters and exit
    #[arg(long, default_value_t = false)]
    pub check: bool,

    /// Compact JSON output for --check
    #[arg(long, default_value_t = false, requires = "check")]
    pub compact: bool,

    /// Python interpreter with MNE installed
    #[arg(long, env = "MAXFILTER_PYTHON", hide = true)]
    pub python: Option<String>,

    /// Path to maxwell_bridge.py
    #[arg(long, env = "MAXFILTER_BRIDGE_SCRIPT", hide = true)]
    pub bridge_script: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_need_no_arguments() {
        let cli = Cli::try_parse_from(["maxfilter"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert_eq!(cli.output_dir, PathBuf::from("."));
        assert!(!cli.check);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_verbose_counts() {
        let cli = Cli::try_parse_from(["maxfilter", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_compact_requires_check() {
        assert!(Cli::try_parse_from(["maxfilter", "--compact"]).is_err());
        assert!(Cli::try_parse_from(["maxfilter", "--check", "--compact"]).is_ok());
    }
}
