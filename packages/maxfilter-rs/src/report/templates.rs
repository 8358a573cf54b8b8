/// Embedded report assets, compiled into the binary at build time.

pub const REPORT_HTML: &str = include_str!("../../templates/report.html");
pub const REPORT_CSS: &str = include_str!("../../templates/report.css");
