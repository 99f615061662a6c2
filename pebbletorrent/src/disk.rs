//! The file handler layer: translates piece level operations into one or
//! more positioned file IO calls, using the torrent's piece map as the
//! sole source of geometry.
//!
//! The handler itself holds the only mutable shared state of the engine,
//! the open file descriptors and the bitfield, each behind a lock, so all
//! operations take `&self` and may be called concurrently from however
//! many threads the caller uses (e.g. one per peer connection). All
//! blocking here is ordinary filesystem IO; there is no internal retry and
//! no cancellation, both belong to higher layers.

pub mod error;
mod file;

use std::sync::{Arc, Mutex, MutexGuard};

use sha1::{Digest, Sha1};

use self::{
    error::{AllocationError, CloseError, ReadError, WriteError},
    file::TorrentFile,
};

use crate::{
    bitfield::Bitfield, storage_info::StorageInfo, PieceIndex,
};

/// A torrent's file handler: owns the open descriptors of the torrent's
/// backing files and performs verified piece reads and writes against
/// them.
///
/// The single file variant skips the fragment list indirection of the
/// general multi-file algorithm, since a piece of a single file torrent is
/// always one contiguous range of the one file.
pub enum FileHandler {
    Single(SingleFileHandler),
    Multi(MultiFileHandler),
}

impl FileHandler {
    /// Opens, creating and resizing where necessary, every backing file
    /// of the torrent at its exact declared length, and sets up an
    /// all-false bitfield. Use [`FileHandler::validate`] afterwards to
    /// resume from whatever data is already on disk.
    pub fn new(info: Arc<StorageInfo>) -> Result<Self, AllocationError> {
        if info.is_single_file {
            SingleFileHandler::new(info).map(Self::Single)
        } else {
            MultiFileHandler::new(info).map(Self::Multi)
        }
    }

    /// Reads the piece at the given index into the buffer, returning the
    /// number of bytes read. This is less than the nominal piece length
    /// only for the torrent's last piece.
    pub fn read_piece(
        &self,
        index: PieceIndex,
        buf: &mut [u8],
    ) -> Result<usize, ReadError> {
        match self {
            Self::Single(h) => h.read_piece(index, buf),
            Self::Multi(h) => h.read_piece(index, buf),
        }
    }

    /// Verifies the payload against the expected piece hash and, only if
    /// it matches, writes it to the backing file(s) and marks the piece
    /// present in the bitfield. On a hash mismatch nothing is written, so
    /// the piece can safely be redownloaded and retried.
    ///
    /// Writing to an already present piece is permitted: the write is
    /// gated by the same verification, so it can only replace the piece's
    /// bytes with identical ones.
    pub fn write_piece(
        &self,
        index: PieceIndex,
        data: &[u8],
    ) -> Result<(), WriteError> {
        match self {
            Self::Single(h) => h.write_piece(index, data),
            Self::Multi(h) => h.write_piece(index, data),
        }
    }

    /// Reads and hashes every piece, setting each bitfield bit to whether
    /// the on-disk bytes match the expected hash. This is how a partially
    /// downloaded torrent is resumed across process restarts: there is no
    /// separate manifest, the backing files are the only persisted state.
    ///
    /// Mismatching pieces are the expected steady state of a partial
    /// download, so they simply mark the piece absent; only real IO
    /// failures abort the scan.
    pub fn validate(&self) -> Result<(), ReadError> {
        let info = self.storage_info();
        log::info!(
            "Validating {} piece(s) of torrent {}",
            info.piece_count,
            info.name
        );

        let mut buf = vec![0; info.piece_len as usize];
        for index in 0..info.piece_count {
            let n = self.read_piece(index, &mut buf)?;
            let expected = info
                .expected_hash(index)
                .expect("piece index in range");
            let present = Sha1::digest(&buf[..n]).as_slice() == expected;
            self.bitfield().set(index, present);
        }

        log::info!(
            "{}/{} piece(s) verified present",
            self.bitfield().nset(),
            info.piece_count
        );
        Ok(())
    }

    /// Locked access to the torrent's bitfield of verified pieces.
    pub fn bitfield(&self) -> MutexGuard<'_, Bitfield> {
        let bitfield = match self {
            Self::Single(h) => &h.bitfield,
            Self::Multi(h) => &h.bitfield,
        };
        bitfield.lock().expect("bitfield lock poisoned")
    }

    pub fn storage_info(&self) -> &StorageInfo {
        match self {
            Self::Single(h) => &h.info,
            Self::Multi(h) => &h.info,
        }
    }

    /// Flushes and closes every backing file, collecting all failures
    /// rather than stopping at the first, so that every descriptor is
    /// released.
    pub fn close(self) -> Result<(), CloseError> {
        let files = match self {
            Self::Single(h) => vec![h.file],
            Self::Multi(h) => h.files,
        };

        let mut errors = Vec::new();
        for file in files {
            let file = file
                .into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(error) = file.handle.sync_all() {
                log::warn!(
                    "Failed to sync file {:?}: {}",
                    file.info.path,
                    error
                );
                errors.push((file.info.path, error));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CloseError { errors })
        }
    }
}

/// The file handler of a torrent with a single backing file.
pub struct SingleFileHandler {
    info: Arc<StorageInfo>,
    file: Mutex<TorrentFile>,
    bitfield: Mutex<Bitfield>,
}

impl SingleFileHandler {
    fn new(info: Arc<StorageInfo>) -> Result<Self, AllocationError> {
        debug_assert_eq!(info.files().len(), 1);
        let file = TorrentFile::open(info.files().files()[0].clone())?;
        Ok(Self {
            bitfield: Mutex::new(Bitfield::new(info.piece_count)),
            file: Mutex::new(file),
            info,
        })
    }

    fn read_piece(
        &self,
        index: PieceIndex,
        buf: &mut [u8],
    ) -> Result<usize, ReadError> {
        let len = piece_buf_len(&self.info, index, buf.len())?;
        let offset = index as u64 * u64::from(self.info.piece_len);
        let file = self.file.lock().expect("file lock poisoned");
        file.read_at(offset, &mut buf[..len])?;
        Ok(len)
    }

    fn write_piece(
        &self,
        index: PieceIndex,
        data: &[u8],
    ) -> Result<(), WriteError> {
        verify_piece(&self.info, index, data)?;
        let offset = index as u64 * u64::from(self.info.piece_len);
        {
            let file = self.file.lock().expect("file lock poisoned");
            file.write_at(offset, data)?;
        }
        self.bitfield
            .lock()
            .expect("bitfield lock poisoned")
            .set(index, true);
        Ok(())
    }
}

/// The file handler of a torrent whose pieces may straddle any number of
/// backing files.
pub struct MultiFileHandler {
    info: Arc<StorageInfo>,
    /// One lock per open file: concurrent piece operations touching
    /// disjoint files proceed in parallel, while positioned IO against the
    /// same descriptor is serialized.
    files: Vec<Mutex<TorrentFile>>,
    bitfield: Mutex<Bitfield>,
}

impl MultiFileHandler {
    fn new(info: Arc<StorageInfo>) -> Result<Self, AllocationError> {
        let mut files = Vec::with_capacity(info.files().len());
        for file_info in info.files().files() {
            // an early failure drops, and thereby closes, the files
            // already opened by this call
            files.push(Mutex::new(TorrentFile::open(file_info.clone())?));
        }
        Ok(Self {
            bitfield: Mutex::new(Bitfield::new(info.piece_count)),
            files,
            info,
        })
    }

    fn read_piece(
        &self,
        index: PieceIndex,
        buf: &mut [u8],
    ) -> Result<usize, ReadError> {
        let len = piece_buf_len(&self.info, index, buf.len())?;
        let fragments = self
            .info
            .piece_lookup(index)
            .expect("piece index in range");

        let mut cursor = 0;
        for frag in fragments {
            let end = cursor + frag.len as usize;
            // a fragment referencing a nonexistent file is a piece map
            // construction bug, not bad input
            let file = self.files[frag.file_index]
                .lock()
                .expect("file lock poisoned");
            file.read_at(frag.offset, &mut buf[cursor..end])?;
            cursor = end;
        }
        debug_assert_eq!(cursor, len);
        Ok(cursor)
    }

    fn write_piece(
        &self,
        index: PieceIndex,
        data: &[u8],
    ) -> Result<(), WriteError> {
        verify_piece(&self.info, index, data)?;
        let fragments = self
            .info
            .piece_lookup(index)
            .expect("piece index in range");

        let mut cursor = 0;
        for frag in fragments {
            let end = cursor + frag.len as usize;
            let file = self.files[frag.file_index]
                .lock()
                .expect("file lock poisoned");
            file.write_at(frag.offset, &data[cursor..end])?;
            cursor = end;
        }

        self.bitfield
            .lock()
            .expect("bitfield lock poisoned")
            .set(index, true);
        Ok(())
    }
}

/// Checks the piece index and that the buffer can hold the piece,
/// returning the piece's length.
fn piece_buf_len(
    info: &StorageInfo,
    index: PieceIndex,
    buf_len: usize,
) -> Result<usize, ReadError> {
    let needed = info
        .piece_len(index)
        .map_err(|_| ReadError::InvalidPieceIndex)? as usize;
    if buf_len < needed {
        return Err(ReadError::BufferTooSmall {
            needed,
            len: buf_len,
        });
    }
    Ok(needed)
}

/// Checks the payload's length and hash against the expected piece hash.
/// Nothing may be written to disk unless this passes: a write is all or
/// nothing at piece granularity.
fn verify_piece(
    info: &StorageInfo,
    index: PieceIndex,
    data: &[u8],
) -> Result<(), WriteError> {
    let expected_len = info
        .piece_len(index)
        .map_err(|_| WriteError::InvalidPieceIndex)?;
    if data.len() != expected_len as usize {
        return Err(WriteError::InvalidPieceLen {
            expected: expected_len,
            len: data.len(),
        });
    }

    let digest = Sha1::digest(data);
    let expected = info
        .expected_hash(index)
        .map_err(|_| WriteError::InvalidPieceIndex)?;
    if digest.as_slice() != expected {
        log::warn!(
            "Piece {} hash mismatch: got {}, expected {}",
            index,
            hex::encode(&digest),
            hex::encode(expected)
        );
        return Err(WriteError::HashMismatch);
    }

    Ok(())
}
