use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::io::Write;

use crate::log_warning;
use crate::logging::{LogCategory, LogContext};

/// One decoded line of a `/api/generate` stream
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GenerateChunk {
    /// Absent means final: every text-bearing chunk carries `"done": false`.
    #[serde(default = "default_done")]
    pub done: bool,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    /// Nanoseconds
    #[serde(default)]
    pub total_duration: Option<u64>,
}

fn default_done() -> bool {
    true
}

/// Splits raw body chunks into newline-terminated lines
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: BytesMut,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a body chunk and return every line it completed, without the
    /// line terminator.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            lines.push(line.freeze());
        }
        lines
    }

    /// Whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Streaming,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Blank,
    /// Payload text to show and accumulate
    Text(String),
    /// The first final chunk; moves the decoder to `Done`
    Finished(GenerateChunk),
    /// The line was not a JSON chunk; carries the raw line
    Malformed(String),
    /// A well-formed chunk that arrived after the stream finished
    Ignored,
}

#[derive(Debug)]
pub struct StreamDecoder {
    state: DecoderState,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Streaming,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn decode_line(&mut self, line: &[u8]) -> LineEvent {
        let line = line.trim_ascii();
        if line.is_empty() {
            return LineEvent::Blank;
        }

        let chunk = match serde_json::from_slice::<GenerateChunk>(line) {
            Ok(chunk) => chunk,
            Err(_) => return LineEvent::Malformed(String::from_utf8_lossy(line).into_owned()),
        };

        match (self.state, chunk.done) {
            (DecoderState::Done, _) => LineEvent::Ignored,
            (DecoderState::Streaming, true) => {
                self.state = DecoderState::Done;
                LineEvent::Finished(chunk)
            }
            (DecoderState::Streaming, false) => LineEvent::Text(chunk.response.unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    /// Text-bearing chunks shown
    pub chunks: usize,
    pub malformed: usize,
    /// A final chunk was seen before the body ended
    pub completed: bool,
    pub eval_count: Option<u64>,
    pub total_duration_ms: Option<u64>,
    pub server_error: Option<String>,
}

/// Feed every line of a byte stream to `on_line`, flushing a trailing
/// unterminated line at the end.
async fn drain_lines<S, E, F>(mut stream: S, mut on_line: F) -> Result<()>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut splitter = LineSplitter::new();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.context("Response stream interrupted")?;
        for line in splitter.push(&bytes) {
            on_line(&line)?;
        }
    }

    if let Some(rest) = splitter.finish() {
        on_line(&rest)?;
    }

    Ok(())
}

/// Show a `/api/generate` stream as it arrives.
///
/// Text is written without newlines and flushed per chunk, and appended to
/// `buffer`. Exactly one newline terminates the block. If the transport
/// fails the text received so far stays in `buffer` and the error is returned.
pub async fn render_stream<S, E, W>(
    stream: S,
    out: &mut W,
    buffer: &mut String,
) -> Result<StreamSummary>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
    W: Write,
{
    let mut decoder = StreamDecoder::new();
    let mut summary = StreamSummary::default();

    let drained = drain_lines(stream, |line| {
        match decoder.decode_line(line) {
            LineEvent::Blank | LineEvent::Ignored => {}
            LineEvent::Text(text) => {
                write!(out, "{}", text)?;
                out.flush()?;
                buffer.push_str(&text);
                summary.chunks += 1;
            }
            LineEvent::Malformed(raw) => {
                writeln!(out, "\nError decoding response: {}", raw)?;
                summary.malformed += 1;
                log_warning!(
                    LogCategory::Stream,
                    "Skipped a line that was not a JSON chunk",
                    LogContext::new().with_component("stream").with_error_code("decode")
                );
            }
            LineEvent::Finished(chunk) => {
                if let Some(message) = &chunk.error {
                    write!(out, "\nServer error: {}", message)?;
                }
                summary.completed = true;
                summary.eval_count = chunk.eval_count;
                summary.total_duration_ms = chunk.total_duration.map(|ns| ns / 1_000_000);
                summary.server_error = chunk.error;
            }
        }
        Ok(())
    })
    .await;

    writeln!(out)?;
    out.flush()?;
    drained?;

    Ok(summary)
}

/// Print each `status` of a `/api/pull` stream on its own line.
/// Returns how many status lines were shown.
pub async fn render_pull_stream<S, E, W>(stream: S, out: &mut W) -> Result<usize>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
    W: Write,
{
    let mut shown = 0;

    drain_lines(stream, |line| {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(());
        }

        match serde_json::from_slice::<JsonValue>(line) {
            Ok(update) => {
                if let Some(message) = update.get("error").and_then(|e| e.as_str()) {
                    writeln!(out, "Error: {}", message)?;
                } else if let Some(status) = update.get("status").and_then(|s| s.as_str()) {
                    writeln!(out, "{}", status)?;
                    shown += 1;
                }
            }
            Err(_) => writeln!(out, "Error parsing response")?,
        }
        out.flush()?;
        Ok(())
    })
    .await?;

    Ok(shown)
}
