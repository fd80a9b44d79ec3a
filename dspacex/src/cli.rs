//! The `dspacex` dataset preprocessing CLI.
//!
//! The CLI reads a job configuration (JSON or YAML) and writes a complete dataset package for the
//! dSpaceX viewer into the output directory of the job. The individual processing stages are
//! provided by the [`dspacex_lib`] crate.

use crate::{logging, preprocess};
use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;

static HELP_TEMPLATE: &str = "{before-help}{name} (v{version}) - {author-with-newline}{about-with-newline}\n{usage-heading} {usage}\n\n{all-args}{after-help}";

#[derive(Clone, Debug, clap::Parser)]
#[command(
    name = "dspacex",
    about = "Preprocessing of design space datasets for the dSpaceX viewer",
    version,
    help_template = HELP_TEMPLATE,
)]
struct CommandlineArgs {
    /// Enable quiet mode (no log output, only the completion summary), overrides verbosity level
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
    /// Print more verbose output, use multiple "v"s for even more verbose output (-v, -vv)
    #[arg(short, action = clap::ArgAction::Count, global = true)]
    verbosity: u8,
    /// Path to the job configuration file (JSON, or YAML if the extension is "yaml" or "yml")
    #[arg(value_name = "CONFIG")]
    config_file: PathBuf,
    /// Enable multi-threading to compute the pairwise distances of the shapes
    #[arg(
        long = "mt",
        default_value = "off",
        value_name = "off|on",
        ignore_case = true,
        require_equals = true
    )]
    parallelize_distance: Switch,
    /// Set the number of threads for the worker thread pool
    #[arg(long, short = 'n')]
    num_threads: Option<usize>,
    /// Seed of the random initializations of the t-SNE and MDS embeddings
    #[arg(long, default_value = "0")]
    seed: u64,
}

/// A simple on/off switch for command line arguments.
///
/// For example an argument defined as:
/// ```rust ignore
/// /// Enable multi-threading to compute the pairwise distances
/// #[arg(
///     long = "mt",
///     default_value = "off",
///     value_name = "off|on",
///     ignore_case = true,
///     require_equals = true
/// )]
/// pub parallelize_distance: Switch,
/// ```
/// can be used in the CLI as `--mt=on` or `--mt=off`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Switch {
    Off,
    On,
}

impl Switch {
    pub(crate) fn into_bool(self) -> bool {
        match self {
            Switch::Off => false,
            Switch::On => true,
        }
    }
}

/// Runs the dspacex CLI with the provided command line arguments.
///
/// This function behaves like the binary `dspacex` command line tool including output to stdout
/// and stderr. It will also exit the process depending on the command line arguments, so it should
/// not be used in typical library contexts.
/// Note that the first argument is always ignored - this is typically the binary name when called using
/// `std::env::args()` from the terminal:
/// ```
/// dspacex::cli::run_dspacex(["dspacex", "--version"]);
/// ```
/// If no placeholder for the binary name is provided it will return an error (and print a help message):
/// ```should_panic
/// dspacex::cli::run_dspacex(["--version"]);
/// ```
pub fn run_dspacex<I, T>(args: I) -> Result<(), anyhow::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    run_dspacex_impl(args).inspect_err(logging::log_error)
}

fn run_dspacex_impl<I, T>(args: I) -> Result<(), anyhow::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cmd_args = CommandlineArgs::parse_from(args);

    let verbosity = VerbosityLevel::from(cmd_args.verbosity);
    let is_quiet = cmd_args.quiet;

    logging::initialize_logging(verbosity, is_quiet).context("Failed to initialize logging")?;
    logging::log_program_info(&cmd_args.config_file);

    let result = preprocess::preprocess_job(&cmd_args.config_file, &cmd_args.runner_parameters())
        .map(|result| {
            // Printed in quiet mode as well
            let summary = preprocess::completion_summary(&result);
            logging::with_progress_suspended(|| println!("{}", summary));
        });

    // Write profiling stats using log::info
    info!("Timings:");
    dspacex_lib::profiling::write_to_string()
        .unwrap_or_default()
        .split("\n")
        .filter(|l| !l.is_empty())
        .for_each(|l| info!("{}", l));

    info!(
        "Finished at {}.",
        chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
    );

    result
}

impl CommandlineArgs {
    fn runner_parameters(&self) -> preprocess::RunnerParameters {
        preprocess::RunnerParameters {
            parallelize_distance: self.parallelize_distance.into_bool(),
            num_threads: self.num_threads,
            seed: self.seed,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) enum VerbosityLevel {
    None,
    Verbose,
    VeryVerbose,
    VeryVeryVerbose,
}

impl From<u8> for VerbosityLevel {
    fn from(value: u8) -> Self {
        match value {
            0 => VerbosityLevel::None,
            1 => VerbosityLevel::Verbose,
            2 => VerbosityLevel::VeryVerbose,
            3 => VerbosityLevel::VeryVeryVerbose,
            _ => VerbosityLevel::VeryVeryVerbose,
        }
    }
}

impl VerbosityLevel {
    /// Maps this verbosity level to a log filter
    pub fn into_filter(self) -> Option<log::LevelFilter> {
        match self {
            VerbosityLevel::None => None,
            VerbosityLevel::Verbose => Some(log::LevelFilter::Info),
            VerbosityLevel::VeryVerbose => Some(log::LevelFilter::Debug),
            VerbosityLevel::VeryVeryVerbose => Some(log::LevelFilter::Trace),
        }
    }
}
