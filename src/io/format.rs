//! Report formatting on the `qmembed-output` log target.

use std::fmt;

use log;

const QMEMBED_BANNER_LENGTH: usize = 79;

/// Logs a warning to the `qmembed-output` logger.
macro_rules! qmembed_warn {
    ($fmt:expr $(, $($arg:tt)*)?) => { log::warn!(target: "qmembed-output", $fmt, $($($arg)*)?); }
}

/// Logs a main output line to the `qmembed-output` logger.
macro_rules! qmembed_output {
    ($fmt:expr $(, $($arg:tt)*)?) => { log::info!(target: "qmembed-output", $fmt, $($($arg)*)?); }
}

pub(crate) use {qmembed_output, qmembed_warn};

/// Logs a nicely formatted section title to the `qmembed-output` logger.
pub(crate) fn log_title(title: &str) {
    let length = title.chars().count().max(QMEMBED_BANNER_LENGTH - 6);
    let bar = "─".repeat(length);
    qmembed_output!("┌──{bar}──┐");
    qmembed_output!("│§ {title:^length$} §│");
    qmembed_output!("└──{bar}──┘");
}

/// Writes a nicely formatted subtitle.
pub(crate) fn write_subtitle(f: &mut fmt::Formatter<'_>, subtitle: &str) -> fmt::Result {
    let length = subtitle.chars().count();
    let bar = "═".repeat(length);
    writeln!(f, "{subtitle}")?;
    writeln!(f, "{bar}")?;
    Ok(())
}

/// Logs a nicely formatted subtitle to the `qmembed-output` logger.
pub(crate) fn log_subtitle(subtitle: &str) {
    let length = subtitle.chars().count();
    let bar = "═".repeat(length);
    qmembed_output!("{}", subtitle);
    qmembed_output!("{}", bar);
}

/// Logs the beginning of a workflow step to the `qmembed-output` logger.
pub(crate) fn log_macsec_begin(sectitle: &str) {
    let width = QMEMBED_BANNER_LENGTH - 14;
    let sectitle_space = sectitle.to_string() + " ";
    qmembed_output!("❬❬❬❬❬ [Begin] {sectitle_space:❬<width$}");
}

/// Logs the end of a workflow step to the `qmembed-output` logger.
pub(crate) fn log_macsec_end(sectitle: &str) {
    let width = QMEMBED_BANNER_LENGTH - 14;
    let sectitle_space = sectitle.to_string() + " ";
    qmembed_output!("❭❭❭❭❭ [ End ] {sectitle_space:❭<width$}");
}

/// Turns a boolean into a string of `yes` or `no`.
pub(crate) fn nice_bool(b: bool) -> String {
    if b {
        "yes".to_string()
    } else {
        "no".to_string()
    }
}

/// A trait for logging `qmembed` outputs nicely.
pub(crate) trait QmembedOutput: fmt::Debug + fmt::Display {
    /// Logs display output nicely.
    fn log_output_display(&self) {
        let lines = self.to_string();
        lines.lines().for_each(|line| {
            qmembed_output!("{line}");
        })
    }
}

// Blanket implementation
impl<T> QmembedOutput for T where T: fmt::Debug + fmt::Display {}
