//! Log output of the CLI: a fern dispatcher writing to stdout that hides the thumbnail progress bar while printing

use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use anyhow::anyhow;
use indicatif::{ProgressBar, WeakProgressBar};
use log::{LevelFilter, error, info};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::cli::VerbosityLevel;

/// Dependency targets that are capped at a maximum level, they log every decoded chunk otherwise
const TARGET_FILTERS: &[(&str, LevelFilter)] = &[
    ("png", LevelFilter::Warn),
    ("image", LevelFilter::Warn),
    ("walkdir", LevelFilter::Info),
];

/// Progress bar of the running stage, `None` outside of the thumbnail stage
static CURRENT_PROGRESS_BAR: Lazy<RwLock<Option<WeakProgressBar>>> =
    Lazy::new(|| RwLock::new(None));

/// Registers the progress bar that output has to suspend, `None` removes it
pub(crate) fn set_progress_bar(pb: Option<WeakProgressBar>) {
    *CURRENT_PROGRESS_BAR.write() = pb;
}

fn current_progress_bar() -> Option<ProgressBar> {
    CURRENT_PROGRESS_BAR.read().as_ref()?.upgrade()
}

/// Runs `f` with the current progress bar (if any) cleared from the terminal
pub(crate) fn with_progress_suspended<R, F: FnOnce() -> R>(f: F) -> R {
    match current_progress_bar() {
        Some(pb) => pb.suspend(f),
        None => f(),
    }
}

/// Writer that clears the progress bar for every write
struct SuspendingWriter<W: Write + Send>(W);

impl<W: Write + Send> Write for SuspendingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        with_progress_suspended(|| self.0.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        with_progress_suspended(|| self.0.flush())
    }
}

/// Layout of a log line
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    /// `[time][level] message`
    Compact,
    /// `[rfc3339 time][target][level] message`
    Detailed,
}

impl LogFormat {
    fn for_verbosity(verbosity: VerbosityLevel) -> Self {
        match verbosity {
            VerbosityLevel::None => LogFormat::Compact,
            _ => LogFormat::Detailed,
        }
    }

    fn format(
        self,
        out: fern::FormatCallback,
        message: &std::fmt::Arguments,
        record: &log::Record,
    ) {
        match self {
            LogFormat::Compact => out.finish(format_args!(
                "[{}][{}] {}",
                chrono::Local::now().format("%T%.3f"),
                record.level(),
                message
            )),
            LogFormat::Detailed => out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false),
                record.target(),
                record.level(),
                message
            )),
        }
    }
}

/// Resolves the global level filter
///
/// `-q` wins over `-v` flags, which win over `RUST_LOG`. Without any of them `info` is used.
/// Returns the unparsable `RUST_LOG` value if there was one.
fn resolve_level_filter(
    verbosity: VerbosityLevel,
    quiet_mode: bool,
    rust_log: Option<&str>,
) -> (LevelFilter, Option<String>) {
    if quiet_mode {
        return (LevelFilter::Off, None);
    }
    if let Some(level) = verbosity.into_filter() {
        return (level, None);
    }
    match rust_log.map(str::trim) {
        None | Some("") => (LevelFilter::Info, None),
        Some(value) => match LevelFilter::from_str(value) {
            Ok(level) => (level, None),
            Err(_) => (LevelFilter::Info, Some(value.to_string())),
        },
    }
}

/// Initializes logging to stdout with fern
pub(crate) fn initialize_logging(
    verbosity: VerbosityLevel,
    quiet_mode: bool,
) -> Result<(), anyhow::Error> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let (level, invalid_rust_log) =
        resolve_level_filter(verbosity, quiet_mode, rust_log.as_deref());
    let format = LogFormat::for_verbosity(verbosity);

    let dispatch = TARGET_FILTERS
        .iter()
        .fold(fern::Dispatch::new(), |dispatch, &(target, max)| {
            dispatch.level_for(target, level.min(max))
        });
    let stdout: Box<dyn Write + Send> = Box::new(SuspendingWriter(std::io::stdout()));
    dispatch
        .format(move |out, message, record| format.format(out, message, record))
        .level(level)
        .chain(stdout)
        .apply()
        .map_err(|e| anyhow!("Unable to apply logger configuration ({:?})", e))?;

    if let Some(value) = invalid_rust_log {
        error!(
            "Unknown log filter level '{}' defined in 'RUST_LOG' env variable, using INFO instead.",
            value
        );
    }

    Ok(())
}

/// Prints an anyhow error and its full error chain using the log::error macro
pub(crate) fn log_error(err: &anyhow::Error) {
    error!("Error occurred: {}", err);
    err.chain()
        .skip(1)
        .for_each(|cause| error!("  caused by: {}", cause));
}

/// Logs the program version and the job configuration that is processed
pub(crate) fn log_program_info(config_file: &Path) {
    info!(
        "{} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    let config_file = config_file
        .canonicalize()
        .unwrap_or_else(|_| config_file.to_path_buf());
    info!("Job configuration: \"{}\"", config_file.display());
}
