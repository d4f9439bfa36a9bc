//! Command-line interface of the `qmembed` binary.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::io::format::qmembed_output;

const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

/// Logs a nicely formatted `qmembed` heading to the `qmembed-output` logger.
pub fn log_heading() {
    let version = if let Some(ver) = VERSION {
        format!("v{ver}")
    } else {
        "v unknown".to_string()
    };
    qmembed_output!("╭─────────────────────────────────────────────────────────────────────────────╮");
    qmembed_output!("│                                                                             │");
    qmembed_output!("│                                  qmembed                                    │");
    qmembed_output!("│                                                                             │");
    qmembed_output!("│          Projection-based QM-in-QM embedding through an external            │");
    qmembed_output!("│                       electronic-structure engine                           │");
    qmembed_output!("│                                                                             │");
    qmembed_output!("│{version:>76} │");
    qmembed_output!("╰─────────────────────────────────────────────────────────────────────────────╯");
    qmembed_output!("");
}

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// The YAML input file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// The file receiving the report. If not given, the report is written to standard output.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Increases the verbosity of diagnostic messages on standard error.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
