use crate::{error::*, storage_info::FileList, FileIndex, PieceIndex};

/// One file's contribution to one piece: where to seek within the file and
/// how many bytes to transfer.
///
/// The file is referred to by its index in the torrent's [`FileList`]
/// rather than by reference, so the map can be shared read-only across
/// threads without aliasing concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fragment {
    /// The index of the file in the torrent's file list.
    pub file_index: FileIndex,
    /// The byte offset into the file at which the fragment starts.
    pub offset: u64,
    /// The number of bytes the file contributes to the piece.
    pub len: u32,
}

/// For every piece index, the ordered list of fragments that together
/// reconstitute that piece.
///
/// Built once from a [`FileList`] and immutable afterwards. For every
/// piece except possibly the last, the fragment lengths sum to the piece
/// length; the last piece may be shorter.
#[derive(Debug)]
pub struct PieceMap {
    pieces: Vec<Vec<Fragment>>,
}

impl PieceMap {
    /// Builds the map with a linear sweep over files and pieces: the
    /// current file is asked how much of the current piece it still owes,
    /// advancing to the next piece when the piece is filled and to the
    /// next file when the file is exhausted.
    ///
    /// After the sweep, every byte of every file must have been accounted
    /// for exactly once; a mismatch against `download_len` means the
    /// metadata bundle is corrupt or inconsistent and fails construction.
    /// The final piece legitimately ending short of the piece length is
    /// the normal terminal condition, not an error.
    pub fn build(
        files: &FileList,
        piece_count: usize,
        piece_len: u32,
        download_len: u64,
    ) -> Result<Self> {
        let piece_len64 = u64::from(piece_len);
        let mut pieces = vec![Vec::new(); piece_count];
        let mut piece_index: PieceIndex = 0;
        // how many bytes of the current piece are still unaccounted for
        let mut piece_rem = piece_len64;
        let mut counted: u64 = 0;

        'files: for (file_index, file) in files.files().iter().enumerate() {
            if piece_index == piece_count {
                break;
            }

            // collect this file's fragments piece by piece until the file
            // is exhausted
            while piece_index < piece_count {
                let (offset, len) =
                    match file.piece_slice(piece_index, piece_len) {
                        Some(slice) => slice,
                        // a zero-length file, or a file that has no bytes
                        // in this piece
                        None => continue 'files,
                    };

                pieces[piece_index].push(Fragment {
                    file_index,
                    offset,
                    len,
                });
                piece_rem -= u64::from(len);
                counted += u64::from(len);

                if piece_rem == 0 {
                    piece_rem = piece_len64;
                    piece_index += 1;
                } else {
                    // the rest of the piece is owed by the next file
                    continue 'files;
                }
            }
        }

        if counted != download_len {
            log::error!(
                "Piece map accounted for {}/{} bytes",
                counted,
                download_len
            );
            return Err(Error::PieceMapMismatch {
                counted,
                expected: download_len,
            });
        }

        Ok(Self { pieces })
    }

    /// Returns the ordered fragments of the piece at the given index, or
    /// `None` if the index is out of bounds.
    pub fn fragments(&self, index: PieceIndex) -> Option<&[Fragment]> {
        self.pieces.get(index).map(Vec::as_slice)
    }

    /// The number of pieces in the map.
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;

    use super::*;

    fn file_list(files: &[(&str, u64)], piece_len: u32) -> FileList {
        let declared: Vec<_> = files
            .iter()
            .map(|(path, len)| (PathBuf::from(path), *len))
            .collect();
        FileList::new(Path::new(""), &declared, piece_len)
    }

    fn fragment(file_index: FileIndex, offset: u64, len: u32) -> Fragment {
        Fragment {
            file_index,
            offset,
            len,
        }
    }

    #[test]
    fn test_three_files_piece_len_three() {
        // files "abcd", "e", "fghijkl" concatenate to "abcdefghijkl",
        // whose pieces of length 3 are "abc", "def", "ghi", "jkl"
        let files = file_list(&[("f1", 4), ("f2", 1), ("f3", 7)], 3);
        let map = PieceMap::build(&files, 4, 3, 12).unwrap();

        assert_eq!(map.piece_count(), 4);
        assert_eq!(map.fragments(0).unwrap(), &[fragment(0, 0, 3)]);
        // "def" straddles all three files
        assert_eq!(
            map.fragments(1).unwrap(),
            &[fragment(0, 3, 1), fragment(1, 0, 1), fragment(2, 0, 1)]
        );
        assert_eq!(map.fragments(2).unwrap(), &[fragment(2, 1, 3)]);
        assert_eq!(map.fragments(3).unwrap(), &[fragment(2, 4, 3)]);
        assert!(map.fragments(4).is_none());
    }

    #[test]
    fn test_truncated_last_piece() {
        let files = file_list(&[("f1", 14)], 4);
        let map = PieceMap::build(&files, 4, 4, 14).unwrap();

        // 14 mod 4 bytes remain for the final piece
        assert_eq!(map.fragments(3).unwrap(), &[fragment(0, 12, 2)]);

        // an exact multiple leaves the final piece at full length
        let files = file_list(&[("f1", 12)], 4);
        let map = PieceMap::build(&files, 3, 4, 12).unwrap();
        assert_eq!(map.fragments(2).unwrap(), &[fragment(0, 8, 4)]);
    }

    #[test]
    fn test_zero_length_file_emits_no_fragment() {
        let files = file_list(&[("f1", 3), ("empty", 0), ("f2", 3)], 3);
        let map = PieceMap::build(&files, 2, 3, 6).unwrap();

        assert_eq!(map.fragments(0).unwrap(), &[fragment(0, 0, 3)]);
        // the sweep must not desynchronize around the empty file
        assert_eq!(map.fragments(1).unwrap(), &[fragment(2, 0, 3)]);
    }

    // The union of fragments referencing a file, laid end-to-end in piece
    // order, must exactly reconstitute the file with no gaps or overlaps.
    #[test]
    fn test_fragments_cover_files_exactly() {
        let lens: &[u64] = &[3, 5, 2, 13, 2];
        let files = file_list(
            &[("f1", 3), ("f2", 5), ("f3", 2), ("f4", 13), ("f5", 2)],
            5,
        );
        let map = PieceMap::build(&files, 5, 5, 25).unwrap();

        let mut cursors = vec![0u64; lens.len()];
        for index in 0..map.piece_count() {
            for frag in map.fragments(index).unwrap() {
                assert_eq!(
                    frag.offset, cursors[frag.file_index],
                    "gap or overlap in file {}",
                    frag.file_index
                );
                cursors[frag.file_index] += u64::from(frag.len);
            }
        }
        assert_eq!(&cursors[..], lens);
    }

    #[test]
    fn test_per_piece_fragment_sums() {
        let files = file_list(&[("f1", 5), ("f2", 5), ("f3", 10), ("f4", 2)], 5);
        let map = PieceMap::build(&files, 5, 5, 22).unwrap();

        for index in 0..map.piece_count() {
            let sum: u64 = map
                .fragments(index)
                .unwrap()
                .iter()
                .map(|f| u64::from(f.len))
                .sum();
            let want = if index == 4 { 2 } else { 5 };
            assert_eq!(sum, want, "piece {} fragment sum", index);
        }
    }

    #[test]
    fn test_unaccounted_bytes_fail_construction() {
        // two pieces of length 3 cannot account for 10 bytes of files
        let files = file_list(&[("f1", 10)], 3);
        let res = PieceMap::build(&files, 2, 3, 10);
        assert!(matches!(
            res,
            Err(Error::PieceMapMismatch {
                counted: 6,
                expected: 10
            })
        ));
    }
}
