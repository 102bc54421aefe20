use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    Decode(&'static str, io::Error),
    Encode(&'static str, io::Error),
    ChecksumMismatch,
    CorruptedSegment(String), // AL segment file does not match its metadata
    InvalidRecord(String),
    LockError(io::Error),
    TaskFailed(String),
    InvalidState(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::Encode(field, err) => write!(f, "Failed to encode {}: {}", field, err),
            Error::ChecksumMismatch => write!(f, "Checksum mismatch"),
            Error::CorruptedSegment(msg) => write!(f, "Corrupted segment: {}", msg),
            Error::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
            Error::LockError(err) => write!(f, "Lock error: {}", err),
            Error::TaskFailed(msg) => write!(f, "Task failed: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err)
            | Error::Decode(_, err)
            | Error::Encode(_, err)
            | Error::LockError(err) => Some(err),
            _ => None,
        }
    }
}
