use std::{
    collections::VecDeque,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::{NaiveDate, NaiveDateTime};
use const_format::concatcp;
use regex::{Captures, Regex};

use crate::error::ScanError;

const IP_PATTERN: &str = r"[0-9]{1,3}(?:\.[0-9]{1,3}){3}";
const STAMP_PATTERN: &str = r"(?P<month>\w{3})\s+(?P<day>[0-9]{1,2})\s+(?P<hour>[0-9]{2}):(?P<minute>[0-9]{2}):(?P<second>[0-9]{2})";
const FAILED_PATTERN: &str = concatcp!(
    r"^(?P<stamp>",
    STAMP_PATTERN,
    r")\s+\S+\s+sshd\[[0-9]+\]:\s+Failed\spassword\sfor\s(?:invalid\suser\s)?.*?from\s(?P<ip>",
    IP_PATTERN,
    r")"
);

static FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FAILED_PATTERN).expect("FAILED_PATTERN is a valid regex"));

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// One failed password attempt seen in the log
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureEvent {
    pub timestamp: NaiveDateTime,
    /// Source address exactly as written in the log
    pub source_ip: String,
}

/// Map a syslog month abbreviation to 1..=12, case-sensitively
fn month_number(abbr: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| *m == abbr)
        .and_then(|i| u32::try_from(i + 1).ok())
}

/// Keep the valid UTF-8 runs of `bytes` and drop everything else
fn decode_ignoring_errors(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Stream failure events out of a syslog-style auth log
pub struct FailureEvents<R> {
    reader: R,
    /// Where `reader` came from, for error messages
    path: PathBuf,
    /// Year assumed for every timestamp
    year: i32,
    /// 1-based number of the last line read
    line_no: usize,
    buf: Vec<u8>,
    /// Lines split off the last chunk at a lone `\r`, not yet consumed
    pending: VecDeque<String>,
    /// Set after an error so the stream stays fused
    failed: bool,
}

impl<R: BufRead> FailureEvents<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>, year: i32) -> Self {
        Self {
            reader,
            path: path.into(),
            year,
            line_no: 0,
            buf: Vec::new(),
            pending: VecDeque::new(),
            failed: false,
        }
    }

    /// Read and decode the next line, without its terminator
    ///
    /// `\n`, `\r\n` and a lone `\r` all end a line.
    fn next_line(&mut self) -> Result<Option<String>, ScanError> {
        while self.pending.is_empty() {
            self.buf.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .map_err(|source| ScanError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            if n == 0 {
                return Ok(None);
            }
            let mut chunk: &[u8] = &self.buf;
            if let Some(rest) = chunk.strip_suffix(b"\n") {
                chunk = rest;
            }
            if let Some(rest) = chunk.strip_suffix(b"\r") {
                chunk = rest;
            }
            self.pending
                .extend(chunk.split(|&b| b == b'\r').map(decode_ignoring_errors));
        }
        self.line_no += 1;
        Ok(self.pending.pop_front())
    }

    /// Build the timestamp of a matched line
    fn timestamp_from(&self, caps: &Captures<'_>) -> Result<NaiveDateTime, ScanError> {
        let month = month_number(&caps["month"]).ok_or_else(|| ScanError::UnknownMonth {
            line: self.line_no,
            month: caps["month"].to_string(),
        })?;
        let invalid = || ScanError::InvalidTimestamp {
            line: self.line_no,
            text: caps["stamp"].to_string(),
        };
        let field = |name: &str| caps[name].parse::<u32>().map_err(|_| invalid());
        let (hour, minute, second) = (field("hour")?, field("minute")?, field("second")?);
        NaiveDate::from_ymd_opt(self.year, month, field("day")?)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .ok_or_else(invalid)
    }

    /// Turn one line into an event, or `None` if it is not a failed password line
    fn event_from_line(&self, line: &str) -> Result<Option<FailureEvent>, ScanError> {
        let Some(caps) = FAILED_RE.captures(line) else {
            return Ok(None);
        };
        let timestamp = self.timestamp_from(&caps)?;
        Ok(Some(FailureEvent {
            timestamp,
            source_ip: caps["ip"].to_string(),
        }))
    }
}

impl<R: BufRead> Iterator for FailureEvents<R> {
    type Item = Result<FailureEvent, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = match self.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };
            match self.event_from_line(&line) {
                Ok(Some(event)) => {
                    log::trace!("line {}: failure from {}", self.line_no, event.source_ip);
                    return Some(Ok(event));
                }
                Ok(None) => {
                    log::trace!("line {}: no match", self.line_no);
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Read every failure event from the log file at `path`, in file order
pub fn load_fail_events(path: &Path, year: i32) -> Result<Vec<FailureEvent>, ScanError> {
    let file = File::open(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let events = FailureEvents::new(BufReader::new(file), path, year)
        .collect::<Result<Vec<_>, _>>()?;
    log::info!("extracted {} failure events from {}", events.len(), path.display());
    Ok(events)
}
