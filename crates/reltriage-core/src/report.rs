//! Severity-tagged report lines.
//!
//! The pipeline never emits raw color codes. Producers tag each line with
//! a [`Severity`] and push it, already ordered, into a [`Reporter`]; how a
//! severity is rendered (colors, prefixes, nothing at all) is the
//! consumer's decision.

use serde::{Deserialize, Serialize};
use std::io::Write;

/// Semantic weight of one report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Failure,
    /// Disruption-test failures are tracked separately from ordinary
    /// failures because they have distinct noise characteristics.
    Disruption,
}

/// One ordered line of the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportLine {
    pub severity: Severity,
    pub text: String,
}

impl ReportLine {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Severity::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(Severity::Warning, text)
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self::new(Severity::Failure, text)
    }
}

/// Consumer of ordered report lines.
///
/// Implementations must write lines in the order they are emitted and
/// must not reorder or drop them.
pub trait Reporter: Send {
    fn emit(&mut self, line: ReportLine);
}

/// Writes each line's text to a stream, in order, unmodified.
pub struct StreamReporter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> StreamReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> Reporter for StreamReporter<W> {
    fn emit(&mut self, line: ReportLine) {
        // A broken output pipe is not worth failing a triage run over.
        let _ = writeln!(self.out, "{}", line.text);
    }
}

/// Collects lines in memory; used by tests and by callers that need to
/// post-process a report.
#[derive(Debug, Default)]
pub struct BufferReporter {
    pub lines: Vec<ReportLine>,
}

impl BufferReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All line texts joined for substring assertions.
    pub fn joined(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Reporter for BufferReporter {
    fn emit(&mut self, line: ReportLine) {
        self.lines.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_reporter_preserves_order() {
        let mut reporter = BufferReporter::new();
        reporter.emit(ReportLine::info("first"));
        reporter.emit(ReportLine::failure("second"));
        reporter.emit(ReportLine::warning("third"));

        let texts: Vec<_> = reporter.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(reporter.lines[1].severity, Severity::Failure);
    }

    #[test]
    fn test_stream_reporter_writes_unmodified() {
        let mut buf = Vec::new();
        {
            let mut reporter = StreamReporter::new(&mut buf);
            reporter.emit(ReportLine::info("    indented stays indented"));
        }
        assert_eq!(String::from_utf8(buf).unwrap(), "    indented stays indented\n");
    }
}
