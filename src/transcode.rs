//! External encoder invocation.
//!
//! The encoder is a black box: it is given the intermediate file and the
//! final path, and either produces the final file and exits successfully, or
//! fails. Failures are reported and never retried.

use std::{path::Path, process::Stdio};

use tokio::process::Command;

use crate::{
    config::EncoderConfig,
    error::{Error, Result},
};

/// Number of trailing stderr lines quoted in a failure.
const STDERR_TAIL_LINES: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Encoder {
    config: EncoderConfig,
}

impl Encoder {
    #[must_use]
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Returns the argument list for one run, placeholders substituted.
    #[must_use]
    pub fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();

        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace(EncoderConfig::INPUT_PLACEHOLDER, &input)
                    .replace(EncoderConfig::OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }

    /// Encodes `input` into `output` and waits for the encoder to exit.
    /// Dropping the future kills the encoder.
    ///
    /// # Errors
    ///
    /// Returns `Transcode` if the encoder cannot be started or exits with a
    /// non-zero status.
    pub async fn encode(&self, input: &Path, output: &Path) -> Result<()> {
        let program = self.config.program.display().to_string();
        let args = self.args(input, output);
        debug!("running {program} {}", args.join(" "));

        let result = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::transcode(format!("failed to start {program}: {e}")))?;

        let stderr = String::from_utf8_lossy(&result.stderr);
        if !stderr.is_empty() {
            trace!("{program}: {stderr}");
        }

        if !result.status.success() {
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(Error::transcode(format!(
                "{program} exited with {}: {}",
                result.status,
                tail.trim()
            )));
        }

        Ok(())
    }
}
