use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use sha1::{Digest, Sha1};

use crate::{
    conf::StorageConf,
    error::*,
    metainfo::{FsStructure, Metainfo},
    piece_map::{Fragment, PieceMap},
    PieceIndex, HASH_LEN,
};

/// Information about one of the torrent's files, including its extent in
/// the torrent's piece address space.
///
/// The extent fields describe the closed interval of pieces the file's
/// bytes fall into: the file's first byte is at `start_offset` within piece
/// `start_piece`, and its last byte is at `end_offset` (inclusive) within
/// piece `end_piece`. They are computed once, when the [`FileList`] is
/// built, and are immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    /// The file's relative path as declared in the torrent metainfo.
    pub torrent_path: PathBuf,
    /// The file's path on disk.
    pub path: PathBuf,
    /// The file's length, in bytes.
    pub len: u64,
    /// The index of the piece containing the file's first byte.
    pub start_piece: PieceIndex,
    /// The index of the piece containing the file's last byte (inclusive).
    pub end_piece: PieceIndex,
    /// The byte offset of the file's first byte within `start_piece`.
    pub start_offset: u64,
    /// The byte offset of the file's last byte within `end_piece`
    /// (inclusive).
    pub end_offset: u64,
}

impl FileInfo {
    /// Returns the byte range this file contributes to the given piece, as
    /// a seek offset into the file and a byte count. Returns `None` if the
    /// piece does not intersect the file.
    ///
    /// Consider a torrent of four pieces of length 3 spanning three files:
    /// `[A|A|A] [A|B|B] [B|B|B] [B|C|C]`. Asking file B about piece 2, we
    /// must seek past the two bytes B holds of piece 1, and B contributes
    /// all 3 bytes. Asking B about piece 3, we seek past 5 bytes and B
    /// contributes a single byte; the rest of the piece is in file C.
    pub(crate) fn piece_slice(
        &self,
        index: PieceIndex,
        piece_len: u32,
    ) -> Option<(u64, u32)> {
        if self.len == 0 || index < self.start_piece || index > self.end_piece
        {
            return None;
        }

        let piece_len = u64::from(piece_len);
        // the cursor is this file's first byte belonging to the piece
        let (seek, cursor_offset) = if index == self.start_piece {
            (0, self.start_offset)
        } else {
            (
                (index - self.start_piece) as u64 * piece_len
                    - self.start_offset,
                0,
            )
        };

        let read = if index < self.end_piece {
            // the file spans past this piece, so it owes the rest of it
            piece_len - cursor_offset
        } else {
            // the file's last byte is in this piece
            self.end_offset - cursor_offset + 1
        };

        Some((seek, read as u32))
    }
}

/// The ordered list of the torrent's files.
///
/// The order is the declaration order in the torrent metainfo and is
/// semantically significant: it defines the concatenation of file bytes
/// that the piece address space is laid over. Entries are contiguous in
/// piece space, each one starting exactly where the previous one ended.
#[derive(Debug)]
pub struct FileList {
    files: Vec<FileInfo>,
    piece_len: u32,
    total_len: u64,
}

impl FileList {
    /// Builds the list from the declared `(torrent path, length)` pairs,
    /// computing each file's piece-space extent with a running piece
    /// cursor. Each file's on-disk path is the torrent path joined onto
    /// `root`.
    ///
    /// Zero-length files are legal; they get a degenerate extent equal to
    /// the cursor position and never contribute bytes to any piece.
    pub fn new(
        root: &Path,
        declared: &[(PathBuf, u64)],
        piece_len: u32,
    ) -> Self {
        debug_assert!(piece_len > 0);

        let piece_len64 = u64::from(piece_len);
        let mut files = Vec::with_capacity(declared.len());
        let mut total_len = 0;
        // the piece cursor: the piece index and intra-piece byte offset at
        // which the next file starts
        let mut index: PieceIndex = 0;
        let mut offset: u64 = 0;

        for (torrent_path, len) in declared {
            let (start_piece, start_offset) = (index, offset);
            let (end_piece, end_offset) = if *len == 0 {
                (index, offset)
            } else {
                let mut end_piece = index + ((len - 1) / piece_len64) as usize;
                let mut end_offset = offset + (len - 1) % piece_len64;
                // the file's last byte may have wrapped into a later piece
                if end_offset >= piece_len64 {
                    end_piece += (end_offset / piece_len64) as usize;
                    end_offset %= piece_len64;
                }

                // advance the cursor one byte past this file's last byte
                index = end_piece;
                offset = end_offset + 1;
                if offset == piece_len64 {
                    index += 1;
                    offset = 0;
                }

                (end_piece, end_offset)
            };

            total_len += len;
            files.push(FileInfo {
                torrent_path: torrent_path.clone(),
                path: root.join(torrent_path),
                len: *len,
                start_piece,
                end_piece,
                start_offset,
                end_offset,
            });
        }

        Self {
            files,
            piece_len,
            total_len,
        }
    }

    /// Returns the contiguous run of files whose piece-space extent
    /// contains the given piece. Empty if the index is past the last
    /// piece.
    pub fn files_in_piece(&self, index: PieceIndex) -> &[FileInfo] {
        let start = match self
            .files
            .iter()
            .position(|f| f.start_piece <= index && index <= f.end_piece)
        {
            Some(start) => start,
            None => return &[],
        };
        let count = self.files[start..]
            .iter()
            .take_while(|f| f.start_piece <= index && index <= f.end_piece)
            .count();
        &self.files[start..start + count]
    }

    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn piece_len(&self) -> u32 {
        self.piece_len
    }

    /// The total length of all files, in bytes.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }
}

/// Information about a torrent's storage: the piece geometry, the expected
/// piece hashes, the file list and the piece map derived from them.
///
/// This is the single source of truth for piece geometry. It is built once
/// per torrent session, either from parsed metainfo or synthesized from
/// local files, and is immutable for the life of the session, so it can be
/// shared by read-only reference across any number of threads.
#[derive(Debug)]
pub struct StorageInfo {
    /// The name of the torrent.
    pub name: String,
    /// The nominal length of a piece.
    pub piece_len: u32,
    /// The number of pieces in the torrent.
    pub piece_count: usize,
    /// The length of the last piece, which may differ from the nominal
    /// piece length if the download size is not an exact multiple of it.
    pub last_piece_len: u32,
    /// The sum of the length of all files in the torrent.
    pub download_len: u64,
    /// Whether the torrent is a single file download.
    pub is_single_file: bool,
    /// The concatenation of the expected 20 byte hash of each piece.
    piece_hashes: Vec<u8>,
    files: FileList,
    piece_map: PieceMap,
}

impl StorageInfo {
    /// Extracts storage related information from the torrent metainfo.
    ///
    /// A single file torrent is downloaded directly into the download
    /// directory; a multi-file torrent gets a subdirectory named after the
    /// torrent, as the paths declared in the metainfo don't include it.
    pub fn new(metainfo: &Metainfo, conf: &StorageConf) -> Result<Self> {
        let (root, declared, is_single_file) = match &metainfo.structure {
            FsStructure::File { len } => (
                conf.download_dir.clone(),
                vec![(PathBuf::from(&metainfo.name), *len)],
                true,
            ),
            FsStructure::Archive { files } => (
                conf.download_dir.join(&metainfo.name),
                files.iter().map(|f| (f.path.clone(), f.len)).collect(),
                false,
            ),
        };

        Self::build(
            metainfo.name.clone(),
            metainfo.piece_len,
            metainfo.pieces.clone(),
            &root,
            &declared,
            is_single_file,
        )
    }

    /// Synthesizes storage information from existing local files, hashing
    /// their contents to build the piece hash table. This is used when
    /// creating a new torrent to seed, rather than downloading a known
    /// one.
    ///
    /// The given paths are relative; as with a downloaded torrent, a
    /// multi-file listing is rooted in a subdirectory of `workdir` named
    /// after the torrent, while a single file lives directly in `workdir`.
    /// Pieces are hashed across file boundaries, exactly as the piece
    /// address space is laid over the concatenation of all files.
    pub fn from_paths(
        paths: &[PathBuf],
        workdir: &Path,
        name: &str,
        piece_len: u32,
    ) -> Result<Self> {
        if paths.is_empty() || piece_len == 0 {
            return Err(Error::InvalidMetainfo);
        }

        let is_single_file = paths.len() == 1;
        let root = if is_single_file {
            workdir.to_path_buf()
        } else {
            workdir.join(name)
        };

        let mut declared = Vec::with_capacity(paths.len());
        let mut piece_hashes = Vec::new();
        let mut hasher = Sha1::new();
        // the number of bytes fed into the hash of the piece under the
        // cursor
        let mut hashed: u64 = 0;
        let mut buf = vec![0; 1 << 20];

        for torrent_path in paths {
            let path = root.join(torrent_path);
            let mut file = File::open(&path)?;
            let len = file.metadata()?.len();
            log::debug!("Hashing {} byte file {:?}", len, path);
            declared.push((torrent_path.clone(), len));

            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                let mut chunk = &buf[..n];
                while !chunk.is_empty() {
                    let rem = u64::from(piece_len) - hashed;
                    let take = chunk.len().min(rem as usize);
                    hasher.update(&chunk[..take]);
                    hashed += take as u64;
                    chunk = &chunk[take..];
                    if hashed == u64::from(piece_len) {
                        piece_hashes.extend_from_slice(&hasher.finalize_reset());
                        hashed = 0;
                    }
                }
            }
        }

        // the last piece is allowed to be shorter than the piece length
        if hashed > 0 {
            piece_hashes.extend_from_slice(&hasher.finalize_reset());
        }

        Self::build(
            name.to_owned(),
            piece_len,
            piece_hashes,
            &root,
            &declared,
            is_single_file,
        )
    }

    pub(crate) fn build(
        name: String,
        piece_len: u32,
        piece_hashes: Vec<u8>,
        root: &Path,
        declared: &[(PathBuf, u64)],
        is_single_file: bool,
    ) -> Result<Self> {
        if piece_len == 0 {
            return Err(Error::InvalidMetainfo);
        }
        if piece_hashes.len() % HASH_LEN != 0 {
            return Err(Error::InvalidPieces);
        }

        let piece_count = piece_hashes.len() / HASH_LEN;
        let files = FileList::new(root, declared, piece_len);
        let download_len = files.total_len();

        // there must be a hash for every piece needed to cover the
        // download, and no more
        let piece_len64 = u64::from(piece_len);
        let needed = ((download_len + piece_len64 - 1) / piece_len64) as usize;
        if piece_count != needed {
            log::warn!(
                "Metainfo has {} piece hashes, download needs {}",
                piece_count,
                needed
            );
            return Err(Error::InvalidMetainfo);
        }

        let piece_map =
            PieceMap::build(&files, piece_count, piece_len, download_len)?;

        let last_piece_len = if piece_count == 0 {
            0
        } else {
            (download_len - piece_len64 * (piece_count as u64 - 1)) as u32
        };

        Ok(Self {
            name,
            piece_len,
            piece_count,
            last_piece_len,
            download_len,
            is_single_file,
            piece_hashes,
            files,
            piece_map,
        })
    }

    /// Returns the length of the piece at the given index.
    pub fn piece_len(&self, index: PieceIndex) -> Result<u32> {
        if self.piece_count == 0 || index > self.piece_count - 1 {
            log::error!("Piece {} is invalid for torrent {}", index, self.name);
            return Err(Error::InvalidPieceIndex);
        }
        if index == self.piece_count - 1 {
            Ok(self.last_piece_len)
        } else {
            Ok(self.piece_len)
        }
    }

    /// Returns the expected hash of the piece at the given index.
    pub fn expected_hash(&self, index: PieceIndex) -> Result<&[u8]> {
        if index >= self.piece_count {
            return Err(Error::InvalidPieceIndex);
        }
        Ok(&self.piece_hashes[index * HASH_LEN..(index + 1) * HASH_LEN])
    }

    /// Returns the ordered fragments that together reconstitute the piece
    /// at the given index. This lets a peer request handler know where a
    /// piece's bytes live without touching the file handler's internals.
    pub fn piece_lookup(&self, index: PieceIndex) -> Result<&[Fragment]> {
        self.piece_map
            .fragments(index)
            .ok_or(Error::InvalidPieceIndex)
    }

    /// Returns the files that intersect the piece at the given index.
    pub fn files_in_piece(&self, index: PieceIndex) -> Result<&[FileInfo]> {
        if index >= self.piece_count {
            return Err(Error::InvalidPieceIndex);
        }
        Ok(self.files.files_in_piece(index))
    }

    pub fn files(&self) -> &FileList {
        &self.files
    }

    /// The concatenation of all expected piece hashes.
    pub fn piece_hashes(&self) -> &[u8] {
        &self.piece_hashes
    }
}
