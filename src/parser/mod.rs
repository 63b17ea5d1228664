//! Turns raw worker output into classified console lines.
//!
//! Output arrives as arbitrary byte chunks from two pipes. [`LogClassifier`]
//! holds back an incomplete trailing line per pipe until it is finished, so
//! stderr text never lands inside a half-written stdout line. It cuts the
//! complete text into
//! logical lines at every `[HH:MM:SS] [thread/` tag (so an exception trace
//! printed in the same burst stays with the line that introduced it), then
//! assigns each line a [`LogLevel`] and at most one lifecycle [`Marker`].

use std::sync::LazyLock;

use regex::Regex;

use crate::{
    config::stream::{LogEntry, LogLevel},
    instance::{RuntimeState, StreamSource},
};

static THREAD_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d+:\d+:\d+\] \[[^\]\n/]+/").unwrap());
static WARN_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)/WARN\]").unwrap());
static ERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)/ERROR\]").unwrap());

const SERVER_INFO: &str = r"(?i)\[\d+:\d+:\d+\] \[(?:ServerMain|Server thread)/INFO\]: ";

/// Lifecycle events recognisable in worker output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    StartupComplete,
    Stopping,
    LicenseRequired,
}

/// One row of the marker table: what to look for and which state change it
/// drives.
#[derive(Debug)]
pub struct MarkerRule {
    pub marker: Marker,
    pub pattern: Regex,
    /// States in which the transition applies; elsewhere the marker is
    /// still reported but the state is left alone.
    pub from: &'static [RuntimeState],
    pub to: RuntimeState,
}

/// Evaluated top to bottom; the first matching row wins.
///
/// | marker           | matches                                        | transition                    |
/// |------------------|------------------------------------------------|-------------------------------|
/// | StartupComplete  | `... [Server thread/INFO]: Done (1.23s)!`      | Starting -> Running           |
/// | Stopping         | `... [Server thread/INFO]: Stopping server`    | Starting, Running -> Stopping |
/// | LicenseRequired  | `... You need to agree to the EULA ...`        | Starting, Running -> Stopping |
static MARKERS: LazyLock<Vec<MarkerRule>> = LazyLock::new(|| {
    vec![
        MarkerRule {
            marker: Marker::StartupComplete,
            pattern: Regex::new(&format!(r"{SERVER_INFO}Done \([^)]+\)!")).unwrap(),
            from: &[RuntimeState::Starting],
            to: RuntimeState::Running,
        },
        MarkerRule {
            marker: Marker::Stopping,
            pattern: Regex::new(&format!(r"{SERVER_INFO}Stopping server")).unwrap(),
            from: &[RuntimeState::Starting, RuntimeState::Running],
            to: RuntimeState::Stopping,
        },
        MarkerRule {
            marker: Marker::LicenseRequired,
            pattern: Regex::new(&format!(
                r"{SERVER_INFO}You need to agree to the EULA in order to run the server\. Go to eula\.txt for more info\."
            ))
            .unwrap(),
            from: &[RuntimeState::Starting, RuntimeState::Running],
            to: RuntimeState::Stopping,
        },
    ]
});

pub fn markers() -> &'static [MarkerRule] {
    &MARKERS
}

impl Marker {
    pub fn rule(self) -> &'static MarkerRule {
        // Every variant has exactly one row.
        match markers().iter().find(|rule| rule.marker == self) {
            Some(rule) => rule,
            None => unreachable!("marker table is missing {self:?}"),
        }
    }

    /// The state this marker moves an instance to when observed in `current`.
    pub fn transition(self, current: RuntimeState) -> Option<RuntimeState> {
        let rule = self.rule();
        rule.from.contains(&current).then_some(rule.to)
    }
}

pub fn detect(line: &str) -> Option<Marker> {
    markers()
        .iter()
        .find(|rule| rule.pattern.is_match(line))
        .map(|rule| rule.marker)
}

pub fn classify(line: &str) -> LogLevel {
    if WARN_PATTERN.is_match(line) {
        LogLevel::Warn
    } else if ERROR_PATTERN.is_match(line) {
        LogLevel::Error
    } else {
        LogLevel::Info
    }
}

/// Splits complete output text into logical lines.
///
/// Text preceding the first thread tag is split on newlines; from the first
/// tag on, each tag starts a new line and untagged physical lines stay
/// attached to the tagged line before them.
///
/// Only text handed over in one call is grouped this way. Continuation lines
/// that arrive in a later read stand alone and are classified on their own,
/// so the tail of a long `/ERROR]` trace split across reads comes out `Info`.
pub fn split_logical(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n");
    let starts: Vec<usize> = THREAD_TAG.find_iter(&text).map(|m| m.start()).collect();
    let first_tag = starts.first().copied().unwrap_or(text.len());

    let mut lines: Vec<String> = text[..first_tag]
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        let segment = text[start..end].trim_end_matches(['\n', '\r']);
        if !segment.is_empty() {
            lines.push(segment.to_string());
        }
    }

    lines
}

/// A logical line, ready to be appended to an instance log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine {
    pub entry: LogEntry,
    pub marker: Option<Marker>,
}

impl ClassifiedLine {
    pub fn new(line: String) -> Self {
        let level = classify(&line);
        let marker = detect(&line);
        Self {
            entry: LogEntry::new(level, line),
            marker,
        }
    }
}

/// Stateful chunk reassembler for one worker's stdout and stderr.
#[derive(Debug, Default)]
pub struct LogClassifier {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LogClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw chunk read from `source` and returns the lines it
    /// completed.
    pub fn push(&mut self, source: StreamSource, chunk: &[u8]) -> Vec<ClassifiedLine> {
        let pending = self.pending(source);
        pending.extend_from_slice(chunk);

        let Some(last_newline) = pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = pending.split_off(last_newline + 1);
        let complete = std::mem::replace(pending, rest);
        Self::classify_text(&String::from_utf8_lossy(&complete))
    }

    /// Flushes whatever is left once both pipes have ended, stdout first.
    pub fn finish(&mut self) -> Vec<ClassifiedLine> {
        let mut lines = Vec::new();
        for source in [StreamSource::Stdout, StreamSource::Stderr] {
            let rest = std::mem::take(self.pending(source));
            lines.extend(Self::classify_text(&String::from_utf8_lossy(&rest)));
        }
        lines
    }

    fn pending(&mut self, source: StreamSource) -> &mut Vec<u8> {
        match source {
            StreamSource::Stdout => &mut self.stdout,
            StreamSource::Stderr => &mut self.stderr,
        }
    }

    fn classify_text(text: &str) -> Vec<ClassifiedLine> {
        split_logical(text)
            .into_iter()
            .map(ClassifiedLine::new)
            .collect()
    }
}
