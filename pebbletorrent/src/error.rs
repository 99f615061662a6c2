pub use serde_bencode::Error as BencodeError;
pub use std::io::Error as IoError;

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type for fatal, construction-time failures: a torrent session
/// cannot be started from metadata that produces any of these. Recoverable
/// disk IO failures have their own error types in [`crate::disk::error`].
#[derive(Debug)]
pub enum Error {
    /// The bencode encoding of the metainfo could not be (de)serialized.
    Bencode(BencodeError),
    /// The metainfo is syntactically correct but semantically invalid (e.g.
    /// it contains both a `length` and a `files` key, or neither).
    InvalidMetainfo,
    /// The metainfo's `pieces` field is not a multiple of the hash length.
    InvalidPieces,
    /// A piece index beyond the last piece of the torrent.
    InvalidPieceIndex,
    /// A bitfield wire buffer whose byte length cannot encode the claimed
    /// number of bits.
    InvalidBitfield,
    /// The piece map construction sweep did not account for every byte of
    /// every file exactly once. This surfaces a corrupt or inconsistent
    /// metadata bundle.
    PieceMapMismatch {
        /// The number of bytes the sweep accounted for.
        counted: u64,
        /// The total download length the sweep should have accounted for.
        expected: u64,
    },
    Io(IoError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;
        match self {
            Bencode(e) => write!(f, "{}", e),
            InvalidMetainfo => write!(f, "invalid metainfo"),
            InvalidPieces => {
                write!(f, "piece hashes must be a multiple of 20 bytes")
            }
            InvalidPieceIndex => write!(f, "invalid piece index"),
            InvalidBitfield => write!(f, "invalid bitfield buffer"),
            PieceMapMismatch { counted, expected } => write!(
                f,
                "piece map only accounted for {}/{} bytes",
                counted, expected
            ),
            Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use Error::*;
        match self {
            Bencode(e) => Some(e),
            Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}

impl From<BencodeError> for Error {
    fn from(e: BencodeError) -> Self {
        Self::Bencode(e)
    }
}
