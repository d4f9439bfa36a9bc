use std::path::Path;
use std::process;

use anyhow::{self, Context};
use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::append::Append;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

#[cfg(not(feature = "mpi"))]
use qmembed::comm::SerialContext;
#[cfg(feature = "mpi")]
use qmembed::comm::mpi::MpiContext;
use qmembed::comm::ExecutionContext;
use qmembed::interfaces::cli::{log_heading, Cli};
use qmembed::interfaces::input::Input;
use qmembed::interfaces::InputHandle;
use qmembed::io::read_qmembed_yaml;

/// Configures report output on the `qmembed-output` target and diagnostics on standard error.
///
/// # Arguments
///
/// * `output` - The report file. If `None`, the report goes to standard output.
/// * `verbose` - The number of `-v` flags given.
/// * `report` - Boolean indicating if this process writes the report.
fn init_logging(output: Option<&Path>, verbose: u8, report: bool) -> Result<(), anyhow::Error> {
    let report_appender: Box<dyn Append> = match output {
        Some(path) => Box::new(
            FileAppender::builder()
                .encoder(Box::new(PatternEncoder::new("{m}{n}")))
                .append(false)
                .build(path)
                .with_context(|| format!("Unable to create `{}`", path.display()))?,
        ),
        None => Box::new(
            ConsoleAppender::builder()
                .encoder(Box::new(PatternEncoder::new("{m}{n}")))
                .build(),
        ),
    };
    let diagnostics_appender = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S)} {h({l:<5})} {t} - {m}{n}",
        )))
        .build();
    let diagnostics_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let report_level = if report {
        LevelFilter::Info
    } else {
        LevelFilter::Off
    };
    let config = Config::builder()
        .appender(Appender::builder().build("report", report_appender))
        .appender(Appender::builder().build("diagnostics", Box::new(diagnostics_appender)))
        .logger(
            Logger::builder()
                .appender("report")
                .additive(false)
                .build("qmembed-output", report_level),
        )
        .build(
            Root::builder()
                .appender("diagnostics")
                .build(diagnostics_level),
        )?;
    log4rs::init_config(config)?;
    Ok(())
}

fn run(cli: &Cli, ctx: &dyn ExecutionContext) -> Result<(), anyhow::Error> {
    if ctx.is_root() {
        log_heading();
    }
    let inp: Input = read_qmembed_yaml(&cli.config)
        .with_context(|| format!("Unable to parse `{}`", cli.config.display()))?;
    inp.handle(ctx)
}

fn main() {
    let cli = Cli::parse();

    #[cfg(feature = "mpi")]
    let universe = match mpi::initialize() {
        Some(universe) => universe,
        None => {
            eprintln!("Unable to initialise MPI.");
            process::exit(1);
        }
    };
    #[cfg(feature = "mpi")]
    let ctx = MpiContext::new(universe.world());
    #[cfg(not(feature = "mpi"))]
    let ctx = SerialContext;

    if let Err(err) = init_logging(cli.output.as_deref(), cli.verbose, ctx.is_root()) {
        eprintln!("Unable to configure logging: {err:?}");
        process::exit(1);
    }

    if let Err(err) = run(&cli, &ctx) {
        log::error!("{err:?}");
        log::error!(target: "qmembed-output", "{err:?}");
        if ctx.size() > 1 {
            ctx.abort(1);
        }
        process::exit(1);
    }
}
