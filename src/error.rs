/// Errors that abort a scan
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The log file could not be opened or read
    #[error("cannot read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A matched line carried a month abbreviation outside Jan..Dec
    #[error("line {line}: unknown month abbreviation {month:?}")]
    UnknownMonth { line: usize, month: String },
    /// A matched line does not name a real calendar date or time of day
    #[error("line {line}: invalid timestamp {text:?}")]
    InvalidTimestamp { line: usize, text: String },
}

/// sysexits(3) EX_DATAERR
const EX_DATAERR: u8 = 65;
/// sysexits(3) EX_NOINPUT
const EX_NOINPUT: u8 = 66;

impl ScanError {
    /// Process exit status for this failure
    pub fn exit_status(&self) -> u8 {
        match self {
            Self::Io { .. } => EX_NOINPUT,
            Self::UnknownMonth { .. } | Self::InvalidTimestamp { .. } => EX_DATAERR,
        }
    }
}
