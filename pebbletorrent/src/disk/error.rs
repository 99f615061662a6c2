use std::{fmt, io, path::PathBuf};

/// Error type returned on failed torrent file allocations.
///
/// Allocation of a torrent's backing files is all or nothing: any file
/// that cannot be opened or sized aborts the allocation, and files opened
/// earlier in the same call are closed before the error is returned.
#[derive(Debug)]
pub struct AllocationError {
    /// The file that could not be allocated.
    pub path: PathBuf,
    pub error: io::Error,
}

impl fmt::Display for AllocationError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "failed to allocate {:?}: {}", self.path, self.error)
    }
}

impl std::error::Error for AllocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Error type returned on failed piece reads.
///
/// This error is non-fatal so it should not be grouped with the global
/// `Error` type as it may be recovered from.
#[derive(Debug)]
pub enum ReadError {
    /// The piece index is invalid.
    InvalidPieceIndex,
    /// The destination buffer cannot hold the piece.
    BufferTooSmall {
        /// The length of the piece.
        needed: usize,
        /// The length of the buffer provided.
        len: usize,
    },
    /// An IO error occurred. A read that transfers fewer bytes than the
    /// piece map calls for is an IO error too, never silently accepted.
    Io(io::Error),
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidPieceIndex => write!(fmt, "invalid piece index"),
            Self::BufferTooSmall { needed, len } => write!(
                fmt,
                "piece buffer too small: need {} bytes, got {}",
                needed, len
            ),
            Self::Io(e) => write!(fmt, "{}", e),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Error type returned on failed piece writes.
///
/// This error is non-fatal so it should not be grouped with the global
/// `Error` type as it may be recovered from.
#[derive(Debug)]
pub enum WriteError {
    /// The piece index is invalid.
    InvalidPieceIndex,
    /// The payload's length doesn't match the piece's length.
    InvalidPieceLen {
        /// The length of the piece.
        expected: u32,
        /// The length of the payload provided.
        len: usize,
    },
    /// The payload's hash doesn't match the expected piece hash. The
    /// write was rejected without touching the filesystem, so the caller
    /// is free to redownload the piece from the same or another peer.
    HashMismatch,
    /// An IO error occurred.
    Io(io::Error),
}

impl From<io::Error> for WriteError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidPieceIndex => write!(fmt, "invalid piece index"),
            Self::InvalidPieceLen { expected, len } => write!(
                fmt,
                "invalid piece length: expected {} bytes, got {}",
                expected, len
            ),
            Self::HashMismatch => write!(fmt, "piece hash mismatch"),
            Self::Io(e) => write!(fmt, "{}", e),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// The errors collected while closing a torrent's files.
///
/// Closing continues past individual failures so that every descriptor is
/// released; all failures are reported together.
#[derive(Debug)]
pub struct CloseError {
    /// The files that failed to close, with their errors.
    pub errors: Vec<(PathBuf, io::Error)>,
}

impl fmt::Display for CloseError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "failed to close {} file(s)", self.errors.len())
    }
}

impl std::error::Error for CloseError {}
