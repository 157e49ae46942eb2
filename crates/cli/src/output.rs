// How command results reach the terminal.
//
// Results go to stdout as text for a person at a terminal and as one JSON
// object per line otherwise; `--json` always picks JSON. Errors and warnings
// go to stderr in the same format as the result would have.

use crate::client::{daemon_unavailable, OperationFailed};

use serde::Serialize;
use serde_json::json;
use std::io::{self, IsTerminal, Write};

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Print a command result; `human` is only called for text output.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let line = render(format, value, human)?;
    writeln!(io::stdout().lock(), "{line}")
}

fn render<T, F>(format: OutputFormat, value: &T, human: F) -> io::Result<String>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => Ok(human(value)),
        OutputFormat::Json => serde_json::to_string(value).map_err(io::Error::other),
    }
}

pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    print_notice(format, Notice::Error, code, message);
}

pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    print_notice(format, Notice::Warning, code, message);
}

#[derive(Debug, Clone, Copy)]
enum Notice {
    Error,
    Warning,
}

impl Notice {
    fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Error => ANSI_RED,
            Self::Warning => ANSI_YELLOW,
        }
    }
}

fn print_notice(format: OutputFormat, notice: Notice, code: &str, message: &str) {
    let line = match format {
        OutputFormat::Human => render_human_stderr_line(
            notice.label(),
            message,
            io::stderr().is_terminal(),
            notice.color(),
        ),
        OutputFormat::Json => {
            json!({ notice.label(): { "code": code, "message": message } }).to_string()
        }
    };
    // Nothing useful is left to do when stderr itself is gone.
    let _ = writeln!(io::stderr().lock(), "{line}");
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");
    let lower = message.to_ascii_lowercase();

    if daemon_unavailable(error) {
        return (
            "DAEMON_NOT_RUNNING",
            "Daemon is not running. Open the browser extension or run: tably start".to_string(),
        );
    }

    if lower.contains("timed out") {
        return (
            "DAEMON_TIMEOUT",
            "Daemon did not answer in time. Check it with: tably status".to_string(),
        );
    }

    if lower.contains("workspace not found") {
        return (
            "WORKSPACE_NOT_FOUND",
            "Workspace not found. Check the code or create one with: tably create".to_string(),
        );
    }

    if lower.contains("workspace code") {
        return ("INVALID_CODE", format!("{message}. Codes are six letters or digits, e.g. AB12C9"));
    }

    if error.chain().any(|cause| cause.downcast_ref::<OperationFailed>().is_some()) {
        return ("OPERATION_FAILED", message);
    }

    ("RPC_ERROR", message)
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}
