//! Repair by delegating to an external CSV-cleaning process.

use super::{RepairAttempt, RepairStrategy};
use crate::config::ExternalToolConfig;
use crate::reader::FormatReader;
use crate::types::ValidationResult;
use anyhow::{Context, Result, anyhow, bail};
use polars::prelude::*;
use std::fs::File;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs `<program> <args...> <input.csv>` and reads the cleaned CSV from its
/// standard output.
///
/// The table is written to a private temporary directory that is removed
/// when the attempt finishes, whatever the outcome.
pub struct ExternalToolRepair {
    config: ExternalToolConfig,
}

impl ExternalToolRepair {
    pub const NAME: &'static str = "external-tool";

    pub fn new(config: ExternalToolConfig) -> Self {
        Self { config }
    }

    fn run_tool(&self, input: &std::path::Path, output: &std::path::Path) -> Result<()> {
        let stdout = File::create(output).context("failed to create tool output file")?;

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start '{}'", self.config.program))?;

        let timeout = self.config.timeout();
        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= timeout {
                // Already exited or already killed are both fine here.
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "'{}' timed out after {}s",
                    self.config.program,
                    self.config.timeout_secs
                );
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            bail!("'{}' exited with {}", self.config.program, status);
        }
        Ok(())
    }
}

impl RepairStrategy for ExternalToolRepair {
    fn repair(&self, table: &DataFrame, _validation: &ValidationResult) -> Result<RepairAttempt> {
        let dir = tempfile::tempdir().context("failed to create temporary directory")?;
        let input = dir.path().join("input.csv");
        let output = dir.path().join("output.csv");

        let mut file = File::create(&input).context("failed to create tool input file")?;
        let mut df = table.clone();
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(b',')
            .finish(&mut df)
            .context("failed to write tool input")?;
        drop(file);

        debug!(
            "Running '{}' on {} rows",
            self.config.program,
            table.height()
        );
        self.run_tool(&input, &output)?;

        let bytes = std::fs::read(&output).context("failed to read tool output")?;
        let reader = FormatReader::new(
            vec!["utf-8".to_string(), "latin-1".to_string()],
            vec![',', ';', '\t'],
        );
        let (cleaned, _) = reader
            .read(&bytes)
            .map_err(|e| anyhow!("unreadable tool output: {}", e))?;

        let log = vec![format!(
            "Cleaned with '{}': {} rows in, {} rows out",
            self.config.program,
            table.height(),
            cleaned.height()
        )];

        Ok(RepairAttempt {
            table: cleaned,
            log,
        })
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}
