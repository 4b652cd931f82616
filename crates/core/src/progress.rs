//! Incremental parser for worker standard output.
//!
//! Workers report progress with lines of the form
//! `Progress: <0-100>% <description>`. Output arrives in arbitrary chunks,
//! so [`ProgressParser`] buffers any trailing partial line until the rest of
//! it shows up. Anything that does not look like a progress line is handed
//! back as plain text; malformed output never produces an error.

use std::sync::LazyLock;

use regex::Regex;

const PROGRESS_PATTERN: &str = r"Progress:\s*(\d{1,3})%\s+(.+)";

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PROGRESS_PATTERN).expect("valid regex"));

/// One complete line of worker output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Progress { percent: u8, step: String },
    Text(String),
}

impl OutputLine {
    /// Classify a single line (without its terminator).
    pub fn classify(line: &str) -> Self {
        if let Some(caps) = PROGRESS_RE.captures(line) {
            let percent = caps[1].parse::<u8>().ok().filter(|p| *p <= 100);
            let step = caps[2].trim();
            if let (Some(percent), false) = (percent, step.is_empty()) {
                return Self::Progress {
                    percent,
                    step: step.to_string(),
                };
            }
        }
        Self::Text(line.to_string())
    }
}

#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: Vec<u8>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<OutputLine> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<OutputLine> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode(&raw))
    }
}

fn decode(raw: &[u8]) -> OutputLine {
    let text = String::from_utf8_lossy(raw);
    OutputLine::classify(text.trim_end_matches('\r'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
