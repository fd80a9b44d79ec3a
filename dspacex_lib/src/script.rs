//! Invocation of user supplied distance and embedding scripts
//!
//! A script is an executable that is run once per request. It receives the method name as its
//! only command line argument and a JSON object `{"module", "method", "arguments"}` on stdin.
//! It has to print the resulting matrix as comma delimited rows to stdout.

use crate::io::csv_format;
use log::{debug, trace};
use nalgebra::DMatrix;
use serde_json::json;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error as ThisError;

/// Error type returned when running an external script fails
#[derive(Debug, ThisError)]
pub enum ScriptError {
    /// The script process could not be started
    #[error("failed to start script \"{}\"", program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    /// Communication with the running script process failed
    #[error("failed to communicate with script process")]
    Io(#[from] std::io::Error),
    /// The script terminated with a non-zero exit status
    #[error("script exited with {status}, stderr:\n{stderr}")]
    Failed { status: ExitStatus, stderr: String },
    /// The script output is not a valid numeric matrix
    #[error("script output is not a valid matrix, stderr:\n{stderr}")]
    InvalidOutput {
        source: Box<dyn std::error::Error + Send + Sync>,
        stderr: String,
    },
}

/// A user supplied script computing a distance matrix or an embedding
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalScript {
    /// Path of the script file or of a directory containing the script `module_name`
    pub script: PathBuf,
    /// Name of the script module, defaults to the file stem of `script`
    pub module_name: Option<String>,
    /// Name of the method to call, passed as the only command line argument
    pub method_name: String,
    /// Arbitrary arguments forwarded to the method
    pub arguments: Option<serde_json::Value>,
    /// Optional interpreter used to run the script (e.g. `python3`)
    pub interpreter: Option<PathBuf>,
}

impl ExternalScript {
    /// Returns the path of the file that is executed (or passed to the interpreter)
    pub fn executable(&self) -> PathBuf {
        match &self.module_name {
            Some(module_name) if self.script.is_dir() => self.script.join(module_name),
            _ => self.script.clone(),
        }
    }

    /// Returns the module name sent to the script
    pub fn module(&self) -> Option<String> {
        self.module_name.clone().or_else(|| {
            self.script
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
    }

    /// Runs the script and parses the matrix it prints to stdout
    pub fn run(&self) -> Result<DMatrix<f64>, ScriptError> {
        let executable = self.executable();
        let mut command = match &self.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&executable);
                command
            }
            None => Command::new(&executable),
        };
        command
            .arg(&self.method_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running script: {:?}", command);
        let mut child = command.spawn().map_err(|source| ScriptError::Spawn {
            program: executable.clone(),
            source,
        })?;

        let request = json!({
            "module": self.module(),
            "method": self.method_name,
            "arguments": self.arguments,
        });
        if let Some(mut stdin) = child.stdin.take() {
            // Scripts are free to ignore their input
            match writeln!(stdin, "{}", request) {
                Err(err) if err.kind() != ErrorKind::BrokenPipe => return Err(err.into()),
                _ => {}
            }
        }

        let output = child.wait_with_output()?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stderr.is_empty() {
            trace!("Script stderr: {}", stderr);
        }

        if !output.status.success() {
            return Err(ScriptError::Failed {
                status: output.status,
                stderr,
            });
        }

        csv_format::matrix_from_reader(output.stdout.as_slice())
            .map_err(|err| ScriptError::InvalidOutput {
                source: err.into(),
                stderr,
            })
    }
}
