//! Output layer shared by every `tn` command.
//!
//! Each handler receives an [`OutputMode`] and formats its result for humans
//! (pretty), for pipes (text) or as stable JSON.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. `--format` / `--json`
//! 2. `TENURE_FORMAT` env var: `"pretty"` | `"text"` | `"json"`
//! 3. Default: [`OutputMode::Pretty`] on a TTY, [`OutputMode::Text`] when piped.

use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::io::{self, IsTerminal, Write};
use tenure_core::batch::RunAbort;
use tenure_core::error::{ErrorCode, SyncError};
use tenure_core::lock::LockError;

pub const PRETTY_RULE_WIDTH: usize = 72;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Left-aligned key/value line for pretty output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<16} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-oriented sections and tables.
    Pretty,
    /// Tab-separated rows for scripts and pipes.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputMode {
    #[must_use]
    pub const fn is_pretty(self) -> bool {
        matches!(self, Self::Pretty)
    }
}

fn resolve_output_mode_inner(
    format_flag: Option<OutputMode>,
    json_flag: bool,
    format_env: Option<&str>,
    is_tty: bool,
) -> OutputMode {
    if let Some(mode) = format_flag {
        return mode;
    }

    if json_flag {
        return OutputMode::Json;
    }

    if let Some(val) = format_env {
        match val.to_lowercase().as_str() {
            "json" => return OutputMode::Json,
            "text" => return OutputMode::Text,
            "pretty" => return OutputMode::Pretty,
            _ => {}
        }
    }

    if is_tty {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

/// Resolve the output mode from flags, `TENURE_FORMAT` and TTY detection.
pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let env_val = std::env::var("TENURE_FORMAT").ok();
    let is_tty = io::stdout().is_terminal();
    resolve_output_mode_inner(format_flag, json_flag, env_val.as_deref(), is_tty)
}

/// Render a serializable value: JSON in JSON mode, otherwise through
/// `human_fn`, which receives the mode so it can pick pretty or text layout.
///
/// # Errors
///
/// Returns an error if writing to stdout or serializing fails.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, OutputMode, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => human_fn(value, mode, &mut out)?,
    }
    Ok(())
}

/// A structured error with an optional suggestion and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Stable `E####` code from [`ErrorCode`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            error_code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            suggestion: code.hint().map(str::to_string),
            error_code: Some(code.code().to_string()),
        }
    }
}

impl From<&anyhow::Error> for CliError {
    fn from(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        if let Some(abort) = err.downcast_ref::<RunAbort>() {
            let mut cli = Self::with_code(message, abort.error.code());
            let resume = format!(
                "resume with `tn backfill --from {}`",
                abort.resume_from()
            );
            cli.suggestion = Some(match cli.suggestion {
                Some(hint) => format!("{hint} ({resume})"),
                None => resume,
            });
            return cli;
        }
        if let Some(sync) = err.downcast_ref::<SyncError>() {
            return Self::with_code(message, sync.code());
        }
        if let Some(lock) = err.downcast_ref::<LockError>() {
            return Self::with_code(message, lock.code());
        }
        if let Some(coded) = err.downcast_ref::<Coded>() {
            return Self::with_code(message, coded.code);
        }
        Self::new(message)
    }
}

/// CLI-side failure tagged with an [`ErrorCode`]. Usable as a root error or
/// as context on top of an `anyhow` chain.
#[derive(Debug)]
pub struct Coded {
    pub code: ErrorCode,
    pub message: String,
}

impl Coded {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Coded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Coded {}

pub fn coded(code: ErrorCode, message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(Coded::new(code, message))
}

/// Render an error to stderr in the requested format.
///
/// # Errors
///
/// Returns an error if writing to stderr fails.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({ "error": error });
            serde_json::to_writer_pretty(&mut out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            if let Some(ref suggestion) = error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenure_core::batch::RunReport;
    use tenure_core::fixtures::date;
    use tenure_core::model::AttributeType;

    #[test]
    fn format_flag_wins_over_json_and_env() {
        let mode = resolve_output_mode_inner(Some(OutputMode::Text), true, Some("pretty"), true);
        assert_eq!(mode, OutputMode::Text);
    }

    #[test]
    fn json_flag_wins_over_env() {
        let mode = resolve_output_mode_inner(None, true, Some("text"), true);
        assert_eq!(mode, OutputMode::Json);
    }

    #[test]
    fn env_is_case_insensitive_and_unknown_values_fall_through() {
        assert_eq!(
            resolve_output_mode_inner(None, false, Some("JSON"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode_inner(None, false, Some("yaml"), false),
            OutputMode::Text
        );
    }

    #[test]
    fn tty_defaults_to_pretty() {
        assert_eq!(
            resolve_output_mode_inner(None, false, None, true),
            OutputMode::Pretty
        );
    }

    #[test]
    fn sync_errors_carry_their_code() {
        let err = anyhow::Error::new(SyncError::ConsistencyFault {
            entity_id: "005930".to_string(),
            attribute: AttributeType::Sector,
        });
        let cli = CliError::from(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E3002"));
        assert!(cli.message.contains("005930"));
        assert!(cli.suggestion.is_some());
    }

    #[test]
    fn invalid_range_is_reported_with_code() {
        let err = anyhow::Error::new(SyncError::InvalidRange {
            start: date(2020, 2, 1),
            end: date(2020, 1, 1),
        });
        assert_eq!(CliError::from(&err).error_code.as_deref(), Some("E2002"));
    }

    #[test]
    fn coded_errors_keep_only_the_context_message() {
        let err = coded(ErrorCode::NotInitialized, "no history database at /tmp/x");
        let cli = CliError::from(&err);
        assert_eq!(cli.message, "no history database at /tmp/x");
        assert_eq!(cli.error_code.as_deref(), Some("E1001"));
    }

    #[test]
    fn coded_context_keeps_the_underlying_cause() {
        let err = anyhow::anyhow!("disk full").context(Coded::new(
            ErrorCode::StoreUnavailable,
            "open history database",
        ));
        let cli = CliError::from(&err);
        assert_eq!(cli.message, "open history database: disk full");
        assert_eq!(cli.error_code.as_deref(), Some("E5001"));
    }

    #[test]
    fn aborted_run_names_each_cause_once() {
        let cause = anyhow::anyhow!("CHECK constraint failed")
            .context("close open SECTOR record for 005930");
        let err = anyhow::Error::new(RunAbort {
            date: date(2020, 1, 3),
            last_committed: Some(date(2020, 1, 2)),
            report: RunReport::default(),
            error: SyncError::StoreUnavailable(cause),
        });

        let cli = CliError::from(&err);
        assert_eq!(
            cli.message,
            "run aborted on 2020-01-03: history store unavailable: \
             close open SECTOR record for 005930: CHECK constraint failed"
        );
        assert_eq!(cli.message.matches("CHECK constraint failed").count(), 1);
        assert_eq!(cli.message.matches("history store unavailable").count(), 1);
        assert_eq!(cli.error_code.as_deref(), Some("E5001"));
        assert!(
            cli.suggestion
                .as_deref()
                .is_some_and(|s| s.contains("tn backfill --from 2020-01-03"))
        );
    }

    #[test]
    fn plain_errors_have_no_code() {
        let err = anyhow::anyhow!("boom");
        let cli = CliError::from(&err);
        assert_eq!(cli.message, "boom");
        assert!(cli.error_code.is_none());
    }
}
