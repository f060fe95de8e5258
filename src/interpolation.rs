use anyhow::Result;
use async_trait::async_trait;
use colored::*;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::extract::{distinct_commands, extract_commands, marker, replace_markers};
use crate::logging::{with_logger, LogCategory, LogContext};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Yes/no gate consulted once before any embedded command runs.
///
/// An `Err` means the question could not be asked at all (e.g. stdin closed)
/// and aborts the interpolation; `Ok(false)` is an ordinary decline.
#[async_trait]
pub trait Confirm: Send {
    async fn confirm(&mut self, question: &str) -> Result<bool>;
}

/// How one embedded command finished
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Exit status 0, trimmed stdout
    Success(String),
    /// Non-zero exit status, trimmed stderr
    Failure(String),
    Timeout(Duration),
    /// The command could not be started or waited on
    ExecutionError(String),
}

impl CommandResult {
    /// Tag name used to wrap the result. Only spaces are rewritten; other
    /// characters from the command are kept as-is.
    pub fn tag_id(command: &str) -> String {
        command.replace(' ', "_")
    }

    /// Render the result as the tagged text substituted into the prompt
    pub fn render(&self, command: &str) -> String {
        let id = Self::tag_id(command);
        match self {
            CommandResult::Success(stdout) => format!("<{id}_output>_{stdout}_</{id}_output>"),
            CommandResult::Failure(stderr) => format!("<{id}_error>_{stderr}_</{id}_error>"),
            CommandResult::Timeout(limit) => format!(
                "<{id}_error>_Command timed out after {} seconds_</{id}_error>",
                limit.as_secs()
            ),
            CommandResult::ExecutionError(message) => {
                format!("<{id}_error>_Exception: {message}_</{id}_error>")
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandResult::Success(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            CommandResult::Success(_) => "succeeded",
            CommandResult::Failure(_) => "failed",
            CommandResult::Timeout(_) => "timed out",
            CommandResult::ExecutionError(_) => "errored",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterpolationStatus {
    /// The text held no markers; nothing was asked or run
    NoCommands,
    /// The user refused; the text is returned untouched
    Declined,
    /// Each distinct command in first-seen order with its result
    Executed(Vec<(String, CommandResult)>),
}

/// Result of resolving a prompt
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub text: String,
    pub status: InterpolationStatus,
}

/// Runs the commands embedded in a prompt and splices their output back in
#[derive(Debug, Clone)]
pub struct Interpolator {
    timeout: Duration,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl Interpolator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve every `$(command)` in `text`.
    ///
    /// Command failures never surface as `Err`; they are written into the
    /// returned text so the model can read them.
    pub async fn process(&self, text: &str, confirm: &mut dyn Confirm) -> Result<Interpolation> {
        let commands = extract_commands(text);
        if commands.is_empty() {
            return Ok(Interpolation {
                text: text.to_string(),
                status: InterpolationStatus::NoCommands,
            });
        }

        let distinct = distinct_commands(&commands);
        println!(
            "{} {}",
            "Found commands to execute:".bold(),
            distinct.join(", ").cyan()
        );

        if !confirm.confirm("Do you want to run these commands? (y/n):").await? {
            println!("{}", "Commands not executed.".dimmed());
            with_logger(|logger| logger.log_interpolation("declined", distinct.len(), None));
            return Ok(Interpolation {
                text: text.to_string(),
                status: InterpolationStatus::Declined,
            });
        }

        let mut results = Vec::with_capacity(distinct.len());
        for command in distinct {
            println!("{} {}", "Executing:".bold().green(), command);
            let result = self.run_command(&command).await;
            results.push((command, result));
        }

        let by_command: HashMap<&str, &CommandResult> = results
            .iter()
            .map(|(command, result)| (command.as_str(), result))
            .collect();
        let resolved = replace_markers(text, |command| match by_command.get(command) {
            Some(result) => result.render(command),
            None => marker(command),
        });

        log_results(&results);

        Ok(Interpolation {
            text: resolved,
            status: InterpolationStatus::Executed(results),
        })
    }

    /// Run one command through the host shell with the configured time limit
    pub async fn run_command(&self, command: &str) -> CommandResult {
        let mut cmd = shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return CommandResult::ExecutionError(e.to_string()),
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => CommandResult::Timeout(self.timeout),
            Ok(Err(e)) => CommandResult::ExecutionError(e.to_string()),
            Ok(Ok(output)) if output.status.success() => {
                CommandResult::Success(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(Ok(output)) => {
                CommandResult::Failure(String::from_utf8_lossy(&output.stderr).trim().to_string())
            }
        }
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

fn log_results(results: &[(String, CommandResult)]) {
    let mut counts: Vec<(&'static str, usize)> = Vec::new();
    for (_, result) in results {
        match counts.iter_mut().find(|(kind, _)| *kind == result.kind()) {
            Some((_, n)) => *n += 1,
            None => counts.push((result.kind(), 1)),
        }
    }
    let summary = counts
        .iter()
        .map(|(kind, n)| format!("{} {}", n, kind))
        .collect::<Vec<_>>()
        .join(", ");

    with_logger(|logger| {
        logger.log_interpolation("executed", results.len(), Some(&summary))?;
        if results.iter().any(|(_, result)| !result.is_success()) {
            let context = LogContext::new()
                .with_component("interpolation")
                .with_count(results.iter().filter(|(_, r)| !r.is_success()).count())
                .with_success(false);
            logger.log_warning(
                LogCategory::Interpolation,
                "Some embedded commands did not succeed".to_string(),
                Some(context),
            )?;
        }
        Ok(())
    });
}
