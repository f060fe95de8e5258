use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use colored::*;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::thread;
use tokio::sync::mpsc;

use crate::interpolation::Confirm;

/// Line-oriented terminal input shared by the prompt loop and the
/// confirmation gate.
///
/// Lines are read on a dedicated thread and handed over through a channel, so
/// a pending read never holds up the runtime when the shell exits.
pub struct TerminalInput {
    lines: mpsc::Receiver<io::Result<String>>,
}

impl TerminalInput {
    pub fn stdin() -> Self {
        Self::from_reader(io::stdin())
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);

        thread::spawn(move || {
            for line in BufReader::new(reader).lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        });

        Self { lines: rx }
    }

    /// Show `prompt` and wait for one line. `None` means input has ended.
    pub async fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        print!("{}", prompt);
        io::stdout().flush()?;

        match self.lines.recv().await {
            Some(line) => line.map(Some).context("Failed to read from terminal"),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Confirm for TerminalInput {
    async fn confirm(&mut self, question: &str) -> Result<bool> {
        let prompt = format!("{} ", question.bold());
        match self.read_line(&prompt).await? {
            Some(answer) => Ok(is_affirmative(&answer)),
            None => Err(anyhow!("Input closed before the commands were confirmed")),
        }
    }
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
