//! The interactive session: reads a line, resolves it against the command
//! table and runs the matching handler against the Ollama server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::client::OllamaClient;
use crate::error_handling::enhance_error;
use crate::input::TerminalInput;
use crate::interpolation::{InterpolationStatus, Interpolator};
use crate::logging::{with_logger, LogCategory, LogContext};
use crate::log_info;
use crate::stream::{render_pull_stream, render_stream, StreamSummary};

pub const PROMPT: &str = "cocollama> ";

const CLEAR_SCREEN: &str = "\x1B[2J\x1B[1;1H";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    Chat,
    Model,
    List,
    Save,
    Clear,
    Pull,
    Remove,
    Help,
    Exit,
}

struct CommandEntry {
    names: &'static [&'static str],
    command: ShellCommand,
    usage: &'static str,
    summary: &'static str,
}

const COMMANDS: &[CommandEntry] = &[
    CommandEntry {
        names: &["chat"],
        command: ShellCommand::Chat,
        usage: "chat <message>",
        summary: "Send a message; $(cmd) markers are replaced by command output",
    },
    CommandEntry {
        names: &["model"],
        command: ShellCommand::Model,
        usage: "model [name]",
        summary: "Show or switch the active model",
    },
    CommandEntry {
        names: &["list", "ls"],
        command: ShellCommand::List,
        usage: "list",
        summary: "List installed models",
    },
    CommandEntry {
        names: &["save"],
        command: ShellCommand::Save,
        usage: "save <file>",
        summary: "Write the last response to a file",
    },
    CommandEntry {
        names: &["clear"],
        command: ShellCommand::Clear,
        usage: "clear",
        summary: "Clear the screen",
    },
    CommandEntry {
        names: &["pull"],
        command: ShellCommand::Pull,
        usage: "pull <model>",
        summary: "Download a model",
    },
    CommandEntry {
        names: &["remove", "rm"],
        command: ShellCommand::Remove,
        usage: "remove <model>",
        summary: "Delete a model",
    },
    CommandEntry {
        names: &["help", "?"],
        command: ShellCommand::Help,
        usage: "help",
        summary: "Show this list",
    },
    CommandEntry {
        names: &["exit", "quit"],
        command: ShellCommand::Exit,
        usage: "exit",
        summary: "Leave the shell",
    },
];

impl ShellCommand {
    pub fn lookup(verb: &str) -> Option<Self> {
        COMMANDS
            .iter()
            .find(|entry| entry.names.contains(&verb))
            .map(|entry| entry.command)
    }
}

/// One input line resolved against the command table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine<'a> {
    Empty,
    Command(ShellCommand, &'a str),
    Unknown(&'a str),
}

/// Split a line into verb and argument. The argument is trimmed at both ends
/// but otherwise kept verbatim.
pub fn parse_line(line: &str) -> ParsedLine<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ParsedLine::Empty;
    }

    let (verb, arg) = match line.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (line, ""),
    };

    match ShellCommand::lookup(verb) {
        Some(command) => ParsedLine::Command(command, arg),
        None => ParsedLine::Unknown(verb),
    }
}

/// Where user interrupts (Ctrl-C) come from
#[async_trait]
pub trait Interrupts: Send {
    /// Resolves when the next interrupt arrives
    async fn interrupted(&mut self);
}

/// Interrupts delivered by the terminal's Ctrl-C
pub struct CtrlC;

#[async_trait]
impl Interrupts for CtrlC {
    async fn interrupted(&mut self) {
        if tokio::signal::ctrl_c().await.is_err() {
            // No handler could be installed; never report an interrupt.
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// State carried between commands of one interactive run
pub struct Session<W: Write> {
    client: OllamaClient,
    model: String,
    last_response: String,
    interpolator: Interpolator,
    out: W,
}

impl<W: Write> Session<W> {
    pub fn new(client: OllamaClient, model: String, interpolator: Interpolator, out: W) -> Self {
        Self {
            client,
            model,
            last_response: String::new(),
            interpolator,
            out,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn last_response(&self) -> &str {
        &self.last_response
    }

    pub fn intro(&self) -> String {
        format!(
            "Ollama CLI - Connected to {} - Using {}",
            self.client.base_url(),
            self.model
        )
    }

    /// Read and run commands until `exit`, end of input or Ctrl-C at the prompt.
    ///
    /// Ctrl-C while a command is running abandons only that command.
    pub async fn run(
        &mut self,
        input: &mut TerminalInput,
        interrupts: &mut dyn Interrupts,
    ) -> Result<()> {
        writeln!(self.out, "{}", self.intro().bold())?;
        writeln!(self.out, "Type 'help' to list commands.")?;
        let prompt = PROMPT.cyan().to_string();

        loop {
            let line = tokio::select! {
                line = input.read_line(&prompt) => line?,
                _ = interrupts.interrupted() => {
                    writeln!(self.out, "\nExiting")?;
                    return Ok(());
                }
            };

            let Some(line) = line else {
                writeln!(self.out, "\nGoodbye!")?;
                return Ok(());
            };

            let flow = tokio::select! {
                result = self.execute_line(&line, input) => match result {
                    Ok(flow) => flow,
                    Err(e) => {
                        enhance_error(&e).display();
                        Flow::Continue
                    }
                },
                _ = interrupts.interrupted() => {
                    writeln!(self.out, "\nPrompt interrupted")?;
                    log_info!(
                        LogCategory::Shell,
                        "Command interrupted",
                        LogContext::new().with_component("shell").with_success(false)
                    );
                    Flow::Continue
                }
            };

            if flow == Flow::Exit {
                return Ok(());
            }
        }
    }

    /// Run one input line. Errors are returned for the caller to display.
    pub async fn execute_line(&mut self, line: &str, input: &mut TerminalInput) -> Result<Flow> {
        let (command, arg) = match parse_line(line) {
            ParsedLine::Empty => return Ok(Flow::Continue),
            ParsedLine::Unknown(verb) => {
                writeln!(
                    self.out,
                    "Unknown command: {}. Type 'help' to list commands.",
                    verb
                )?;
                return Ok(Flow::Continue);
            }
            ParsedLine::Command(command, arg) => (command, arg),
        };

        match command {
            ShellCommand::Chat => self.chat(arg, input).await?,
            ShellCommand::Model => self.change_model(arg).await?,
            ShellCommand::List => self.list_models().await?,
            ShellCommand::Save => self.save(arg)?,
            ShellCommand::Clear => {
                write!(self.out, "{}", CLEAR_SCREEN)?;
                self.out.flush()?;
            }
            ShellCommand::Pull => self.pull(arg).await?,
            ShellCommand::Remove => self.remove(arg).await?,
            ShellCommand::Help => self.help()?,
            ShellCommand::Exit => {
                writeln!(self.out, "Goodbye!")?;
                return Ok(Flow::Exit);
            }
        }

        Ok(Flow::Continue)
    }

    async fn chat(&mut self, message: &str, input: &mut TerminalInput) -> Result<()> {
        if message.is_empty() {
            writeln!(self.out, "Please provide a message")?;
            return Ok(());
        }

        let interpolation = self.interpolator.process(message, input).await?;
        if let InterpolationStatus::Executed(results) = &interpolation.status {
            let failed = results.iter().filter(|(_, r)| !r.is_success()).count();
            if failed > 0 {
                writeln!(
                    self.out,
                    "{}",
                    format!("{} of {} command(s) did not succeed", failed, results.len()).yellow()
                )?;
            }
        }

        let started = Instant::now();
        let spinner = Spinner::thinking()?;
        let stream = self
            .client
            .generate_stream(&self.model, &interpolation.text)
            .await;
        drop(spinner);
        let stream = stream?;

        self.last_response.clear();
        let summary = render_stream(stream, &mut self.out, &mut self.last_response).await?;
        log_exchange(&self.model, &summary, started.elapsed());

        Ok(())
    }

    async fn change_model(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            writeln!(self.out, "Current model: {}", self.model)?;
            return Ok(());
        }

        let models = self.client.list_models().await?;
        if !models.iter().any(|m| m.name == name) {
            writeln!(self.out, "Model '{}' not found. Available models:", name)?;
            for model in &models {
                writeln!(self.out, "  {}", model.name)?;
            }
            return Ok(());
        }

        let previous = std::mem::replace(&mut self.model, name.to_string());
        with_logger(|logger| logger.log_config_change("model", &previous, &self.model));
        writeln!(self.out, "Model changed to: {}", self.model.green())?;
        Ok(())
    }

    async fn list_models(&mut self) -> Result<()> {
        let models = self.client.list_models().await?;
        if models.is_empty() {
            writeln!(self.out, "No models found")?;
            return Ok(());
        }

        writeln!(self.out, "{}", "Available models:".bold())?;
        for model in &models {
            writeln!(self.out, "{:<15} - {}", model.name, model.modified_date())?;
        }
        Ok(())
    }

    fn save(&mut self, filename: &str) -> Result<()> {
        if filename.is_empty() {
            writeln!(self.out, "Please provide a filename")?;
            return Ok(());
        }
        if self.last_response.is_empty() {
            writeln!(self.out, "No response to save")?;
            return Ok(());
        }

        std::fs::write(Path::new(filename), &self.last_response)
            .with_context(|| format!("Failed to write response to {}", filename))?;
        writeln!(self.out, "Response saved to {}", filename)?;
        Ok(())
    }

    async fn pull(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            writeln!(self.out, "Please provide a model name")?;
            return Ok(());
        }

        let stream = self.client.pull_stream(name).await?;
        render_pull_stream(stream, &mut self.out).await?;
        Ok(())
    }

    async fn remove(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            writeln!(self.out, "Please provide a model name")?;
            return Ok(());
        }

        let body = self.client.delete_model(name).await?;
        if body.trim().is_empty() {
            writeln!(self.out, "Model '{}' removed", name)?;
        } else {
            writeln!(self.out, "{}", body.trim())?;
        }
        Ok(())
    }

    fn help(&mut self) -> Result<()> {
        writeln!(self.out, "{}", "Commands:".bold())?;
        for entry in COMMANDS {
            let aliases = if entry.names.len() > 1 {
                format!(" (also: {})", entry.names[1..].join(", "))
            } else {
                String::new()
            };
            writeln!(
                self.out,
                "  {:<16} {}{}",
                entry.usage.cyan(),
                entry.summary,
                aliases.dimmed()
            )?;
        }
        Ok(())
    }
}

/// Progress spinner that is cleared from the terminal when dropped, including
/// when the command it belongs to is abandoned.
struct Spinner(ProgressBar);

impl Spinner {
    fn thinking() -> Result<Self> {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈")
                .template("{spinner:.cyan} {msg}")?,
        );
        pb.set_message("Thinking...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Ok(Self(pb))
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.0.finish_and_clear();
    }
}

fn log_exchange(model: &str, summary: &StreamSummary, elapsed: Duration) {
    let mut context = LogContext::new()
        .with_component("shell")
        .with_operation("chat")
        .with_model(model)
        .with_count(summary.chunks)
        .with_duration_ms(elapsed.as_millis() as u64)
        .with_success(summary.completed && summary.server_error.is_none());
    if summary.malformed > 0 {
        context = context.with_error_code("malformed_chunks");
    }

    log_info!(
        LogCategory::Stream,
        format!(
            "Response finished: {} chunk(s), {} malformed, eval_count {:?}",
            summary.chunks, summary.malformed, summary.eval_count
        ),
        context
    );
}
