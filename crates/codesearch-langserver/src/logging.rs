//! Log sink for language server output streams

use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

/// Receives the server's output streams and launcher progress lines.
///
/// Implemented by the embedding application; the launcher and process wiring
/// only ever write to it.
pub trait LogSink: Send + Sync {
    /// A line the server wrote to stdout
    fn stdout(&self, line: &str);
    /// A line the server wrote to stderr
    fn stderr(&self, line: &str);
    /// Launcher progress worth surfacing to the user
    fn info(&self, line: &str);
}

/// Routes server output into the `tracing` subscriber
pub struct TracingLogSink {
    language: String,
}

impl TracingLogSink {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

impl LogSink for TracingLogSink {
    fn stdout(&self, line: &str) {
        debug!(language = %self.language, "{}", line);
    }

    fn stderr(&self, line: &str) {
        // stderr chatter is diagnostic, not a failure
        warn!(language = %self.language, "{}", line);
    }

    fn info(&self, line: &str) {
        info!(language = %self.language, "{}", line);
    }
}

/// Which stream a captured line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChannel {
    Stdout,
    Stderr,
    Info,
}

/// Buffers log lines in memory; test support
#[derive(Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<(LogChannel, String)>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured lines in arrival order
    pub fn lines(&self) -> Vec<(LogChannel, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Captured lines for one channel
    pub fn channel_lines(&self, channel: LogChannel) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, line)| line)
            .collect()
    }

    fn push(&self, channel: LogChannel, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel, line.to_string()));
    }
}

impl LogSink for MemoryLogSink {
    fn stdout(&self, line: &str) {
        self.push(LogChannel::Stdout, line);
    }

    fn stderr(&self, line: &str) {
        self.push(LogChannel::Stderr, line);
    }

    fn info(&self, line: &str) {
        self.push(LogChannel::Info, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_captures_by_channel() {
        let sink = MemoryLogSink::new();
        sink.stdout("out line");
        sink.stderr("err line");
        sink.info("progress");

        assert_eq!(sink.lines().len(), 3);
        assert_eq!(sink.channel_lines(LogChannel::Stdout), vec!["out line"]);
        assert_eq!(sink.channel_lines(LogChannel::Stderr), vec!["err line"]);
        assert_eq!(sink.channel_lines(LogChannel::Info), vec!["progress"]);
    }
}
