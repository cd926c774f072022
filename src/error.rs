//! Error types for capfile.
//!
//! Errors are classified as close to the failing operation as possible and
//! keep their kind all the way up, so callers can branch on the kind without
//! matching on message text. User cancellation is never an error; see
//! [`crate::capture::Outcome`].

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for capfile operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The capture file could not be opened
    #[error(transparent)]
    Open(#[from] OpenError),

    /// A record could not be read
    #[error(transparent)]
    Read(#[from] ReadError),

    /// A capture file could not be written
    #[error(transparent)]
    Write(#[from] WriteError),

    /// A filter expression did not compile
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The final rename of a safe save failed
    #[error(transparent)]
    Rename(#[from] RenameError),

    /// Merging several capture files failed
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// No frame with this number exists
    #[error("There is no packet number {0}.")]
    NoSuchFrame(u64),

    /// The frame exists but is filtered out of the display
    #[error("Packet number {0} isn't displayed.")]
    FrameNotDisplayed(u64),

    /// The operation needs an open capture file
    #[error("No capture file is open")]
    NoFileOpen,

    /// A packet range such as "1-5,9" did not parse
    #[error("\"{0}\" isn't a valid packet range")]
    InvalidRange(String),

    /// A search string (regex or hex bytes) did not parse
    #[error("\"{pattern}\" isn't a valid search pattern: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias using capfile's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a capture file could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenErrorKind {
    /// Directory, socket, device or other non-file
    NotRegularFile,
    /// A FIFO cannot be read with random access
    PipeUnsupported,
    /// No reader recognizes the file
    UnknownFormat,
    /// The format is known but its records are not supported
    UnsupportedRecordData,
    /// The file is damaged or corrupt
    BadFile,
    /// The file header is truncated
    ShortRead,
    /// The compressed stream is damaged
    Decompress,
    /// The OS refused to open the file
    CantOpen(io::ErrorKind),
}

impl fmt::Display for OpenErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenErrorKind::NotRegularFile => write!(f, "is not a regular file"),
            OpenErrorKind::PipeUnsupported => {
                write!(f, "is a pipe or FIFO; random access is not supported")
            }
            OpenErrorKind::UnknownFormat => {
                write!(f, "isn't a capture file in a format capfile understands")
            }
            OpenErrorKind::UnsupportedRecordData => {
                write!(f, "contains record data that capfile doesn't support")
            }
            OpenErrorKind::BadFile => write!(f, "appears to be damaged or corrupt"),
            OpenErrorKind::ShortRead => write!(f, "appears to have been cut short in the header"),
            OpenErrorKind::Decompress => write!(f, "is compressed and cannot be decompressed"),
            OpenErrorKind::CantOpen(kind) => write!(f, "could not be opened: {kind}"),
        }
    }
}

/// Failure to open a capture file for reading.
#[derive(Error, Debug)]
#[error("The file \"{}\" {kind}{}", .path.display(), detail_suffix(.detail))]
pub struct OpenError {
    pub path: PathBuf,
    pub kind: OpenErrorKind,
    pub detail: Option<String>,
}

impl OpenError {
    pub fn new(path: impl AsRef<Path>, kind: OpenErrorKind) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            kind,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Classify an I/O error raised while opening `path`.
    pub fn from_io(path: impl AsRef<Path>, err: &io::Error) -> Self {
        Self::new(path, OpenErrorKind::CantOpen(err.kind())).with_detail(err.to_string())
    }
}

/// Why a record could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorKind {
    /// The record contains data the reader doesn't support
    UnsupportedRecord,
    /// The file ended in the middle of a record
    ShortRead,
    /// The record is malformed
    BadFile,
    /// The compressed stream is damaged
    Decompress,
    /// Any other failure, usually an OS error
    Other,
}

impl fmt::Display for ReadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadErrorKind::UnsupportedRecord => write!(f, "unsupported record data"),
            ReadErrorKind::ShortRead => write!(f, "file appears to have been cut short"),
            ReadErrorKind::BadFile => write!(f, "file appears to be damaged or corrupt"),
            ReadErrorKind::Decompress => write!(f, "compressed data is damaged"),
            ReadErrorKind::Other => write!(f, "read error"),
        }
    }
}

/// Failure while reading records, sequentially or at an offset.
#[derive(Error, Debug, Clone)]
#[error("{kind}{}{}", frame_suffix(.frame), detail_suffix(.detail))]
pub struct ReadError {
    pub kind: ReadErrorKind,
    pub frame: Option<u64>,
    pub detail: Option<String>,
}

impl ReadError {
    pub fn new(kind: ReadErrorKind) -> Self {
        Self {
            kind,
            frame: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the number of the frame being read.
    pub fn at_frame(mut self, frame: u64) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn bad_file(detail: impl Into<String>) -> Self {
        Self::new(ReadErrorKind::BadFile).with_detail(detail)
    }

    pub fn short_read() -> Self {
        Self::new(ReadErrorKind::ShortRead)
    }

    pub fn is_short_read(&self) -> bool {
        self.kind == ReadErrorKind::ShortRead
    }
}

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::UnexpectedEof => ReadErrorKind::ShortRead,
            io::ErrorKind::InvalidData => ReadErrorKind::Decompress,
            _ => ReadErrorKind::Other,
        };
        ReadError::new(kind).with_detail(err.to_string())
    }
}

/// Why a capture file could not be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteErrorKind {
    /// The output file could not be created
    CantCreate(io::ErrorKind),
    /// The output file could not be opened for writing
    CantOpen(io::ErrorKind),
    /// The format cannot hold this link-layer type (or a mix of types)
    UnwritableEncapsulation,
    /// The format cannot hold this kind of record
    UnwritableRecordType,
    /// The record is larger than the format allows
    PacketTooLarge { frame: u64, len: u32 },
    /// The requested compression has no encoder
    CompressionNotSupported,
    /// Fewer bytes were written than requested
    ShortWrite,
    /// OS-level write failure
    Os(io::ErrorKind),
    /// Flushing or closing the output failed
    CantClose(io::ErrorKind),
}

impl fmt::Display for WriteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteErrorKind::CantCreate(kind) => write!(f, "could not be created: {kind}"),
            WriteErrorKind::CantOpen(kind) => write!(f, "could not be opened for writing: {kind}"),
            WriteErrorKind::UnwritableEncapsulation => write!(
                f,
                "can't be written in that format; the link-layer type isn't supported by it"
            ),
            WriteErrorKind::UnwritableRecordType => {
                write!(f, "can't hold a record of that type in that format")
            }
            WriteErrorKind::PacketTooLarge { frame, len } => write!(
                f,
                "can't be written: frame {frame} is {len} bytes, larger than the format allows"
            ),
            WriteErrorKind::CompressionNotSupported => {
                write!(f, "can't be written compressed in that format")
            }
            WriteErrorKind::ShortWrite => write!(f, "got a short write; is the disk full?"),
            WriteErrorKind::Os(kind) => write!(f, "got an OS error while writing: {kind}"),
            WriteErrorKind::CantClose(kind) => write!(f, "could not be closed: {kind}"),
        }
    }
}

/// Failure to write a capture file.
#[derive(Error, Debug)]
#[error("The file \"{}\" {kind}", .path.display())]
pub struct WriteError {
    pub path: PathBuf,
    pub kind: WriteErrorKind,
}

impl WriteError {
    pub fn new(path: impl AsRef<Path>, kind: WriteErrorKind) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            kind,
        }
    }

    /// Classify an I/O error raised while writing records.
    pub fn from_io(path: impl AsRef<Path>, err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::WriteZero => WriteErrorKind::ShortWrite,
            other => WriteErrorKind::Os(other),
        };
        Self::new(path, kind)
    }
}

/// Why a rename failed; the recovery advice differs per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameErrorKind {
    NotFound,
    PermissionDenied,
    Other(io::ErrorKind),
}

impl From<io::ErrorKind> for RenameErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => RenameErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => RenameErrorKind::PermissionDenied,
            other => RenameErrorKind::Other(other),
        }
    }
}

/// Failure to move a finished file over its destination.
#[derive(Error, Debug)]
#[error("{}", rename_message(.from, .to, .kind))]
pub struct RenameError {
    pub from: PathBuf,
    pub to: PathBuf,
    pub kind: RenameErrorKind,
}

impl RenameError {
    pub fn new(from: impl AsRef<Path>, to: impl AsRef<Path>, err: &io::Error) -> Self {
        Self {
            from: from.as_ref().to_path_buf(),
            to: to.as_ref().to_path_buf(),
            kind: err.kind().into(),
        }
    }
}

fn rename_message(from: &Path, to: &Path, kind: &RenameErrorKind) -> String {
    match *kind {
        RenameErrorKind::NotFound => format!(
            "The path to the file \"{}\" doesn't exist.",
            to.display()
        ),
        RenameErrorKind::PermissionDenied => format!(
            "You don't have permission to move the capture file to \"{}\".",
            to.display()
        ),
        RenameErrorKind::Other(kind) => format!(
            "The file \"{}\" could not be moved to \"{}\": {kind}.",
            from.display(),
            to.display()
        ),
    }
}

/// A display or read filter that did not compile.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("\"{text}\" isn't a valid display filter{}", detail_suffix(.diagnostic))]
pub struct FilterError {
    pub text: String,
    pub diagnostic: Option<String>,
}

impl FilterError {
    pub fn new(text: impl Into<String>, diagnostic: Option<String>) -> Self {
        Self {
            text: text.into(),
            diagnostic,
        }
    }
}

/// Errors from merging capture files. Indexes refer to the input list.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Input file {index} could not be opened: {source}")]
    CantOpenInput { index: usize, source: OpenError },

    #[error("The merge output could not be opened: {0}")]
    CantOpenOutput(WriteError),

    #[error("Input file {index} could not be read: {source}")]
    CantReadInput { index: usize, source: ReadError },

    #[error("Input file {index} has a record for interface {id}, which it never described")]
    BadInterfaceId { index: usize, id: u32 },

    #[error("The merge output could not be written: {0}")]
    CantWriteOutput(WriteError),

    #[error("The merge output could not be closed: {0}")]
    CantCloseOutput(WriteError),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) if !d.is_empty() => format!(": {d}"),
        _ => String::new(),
    }
}

fn frame_suffix(frame: &Option<u64>) -> String {
    match frame {
        Some(n) => format!(" (frame {n})"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_error_without_diagnostic() {
        let err = FilterError::new("tcp and", None);
        assert_eq!(err.to_string(), "\"tcp and\" isn't a valid display filter");
    }

    #[test]
    fn test_filter_error_with_diagnostic() {
        let err = FilterError::new("port x", Some("expected a port number".into()));
        assert_eq!(
            err.to_string(),
            "\"port x\" isn't a valid display filter: expected a port number"
        );
    }

    #[test]
    fn test_read_error_mentions_frame() {
        let err = ReadError::bad_file("bogus length").at_frame(7);
        let msg = err.to_string();
        assert!(msg.contains("frame 7"), "{msg}");
        assert!(msg.contains("bogus length"), "{msg}");
    }

    #[test]
    fn test_read_error_from_unexpected_eof() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(ReadError::from(io_err).kind, ReadErrorKind::ShortRead);
    }

    #[test]
    fn test_rename_error_kinds() {
        let nf = io::Error::from(io::ErrorKind::NotFound);
        let err = RenameError::new("/tmp/a~", "/nope/a", &nf);
        assert_eq!(err.kind, RenameErrorKind::NotFound);
        assert!(err.to_string().contains("doesn't exist"));

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let err = RenameError::new("/tmp/a~", "/root/a", &denied);
        assert_eq!(err.kind, RenameErrorKind::PermissionDenied);
        assert!(err.to_string().contains("permission"));
    }

    #[test]
    fn test_write_error_short_write() {
        let io_err = io::Error::from(io::ErrorKind::WriteZero);
        let err = WriteError::from_io("out.pcap", &io_err);
        assert_eq!(err.kind, WriteErrorKind::ShortWrite);
    }
}
