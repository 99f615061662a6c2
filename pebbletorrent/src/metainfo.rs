use std::path::PathBuf;

use crate::{error::*, Sha1Hash, HASH_LEN};

/// The parsed and validated torrent metainfo file, containing everything
/// the storage engine needs to know about the torrent's piece geometry and
/// file structure.
#[derive(Debug)]
pub struct Metainfo {
    /// The name of the torrent, which is usually used to form the download
    /// path.
    pub name: String,
    /// This hash is used to identify a torrent with trackers and peers.
    pub info_hash: Sha1Hash,
    /// The concatenation of the 20 byte SHA-1 hash of each piece in
    /// torrent. This is used to verify the data sent to us by peers.
    pub pieces: Vec<u8>,
    /// The nominal length of a piece, that is, the length of all but
    /// potentially the last piece, which may be smaller.
    pub piece_len: u32,
    /// The paths and lengths of the downloaded files.
    pub structure: FsStructure,
}

impl Metainfo {
    /// Parses from a byte buffer a new [`Metainfo`] instance, or aborts
    /// with an error.
    ///
    /// If the encoding itself is correct, the constructor may still fail
    /// if the metadata is not semantically correct (e.g. if the length of
    /// the `pieces` field is not a multiple of 20, or no valid files are
    /// encoded, etc).
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        // parse metainfo, but correctly parsing is not enough, we need to
        // verify it afterwards
        let metainfo: raw::Metainfo = serde_bencode::from_bytes(buf)?;

        // the pieces field is a concatenation of 20 byte SHA-1 hashes, so
        // it must be a multiple of 20
        if metainfo.info.pieces.len() % HASH_LEN != 0 {
            return Err(Error::InvalidPieces);
        }

        // a torrent without pieces, or whose piece size is zero, has no
        // piece address space to map
        if metainfo.info.pieces.is_empty() || metainfo.info.piece_len == 0 {
            log::warn!("Metainfo has no pieces or a zero piece length");
            return Err(Error::InvalidMetainfo);
        }

        // verify download structure: exactly one of the `length` and
        // `files` keys must be present
        let structure = if let Some(len) = metainfo.info.len {
            if metainfo.info.files.is_some() {
                log::warn!("Metainfo cannot contain both `length` and `files`");
                return Err(Error::InvalidMetainfo);
            }
            FsStructure::File { len }
        } else if let Some(files) = &metainfo.info.files {
            if files.is_empty() {
                log::warn!("Metainfo files must not be empty");
                return Err(Error::InvalidMetainfo);
            }

            let files = files
                .iter()
                .map(|f| {
                    if f.path.is_empty()
                        || f.path.iter().any(|c| c.is_empty() || c == "..")
                    {
                        log::warn!("Metainfo file has invalid path");
                        return Err(Error::InvalidMetainfo);
                    }
                    Ok(FsFile {
                        path: f.path.iter().collect(),
                        len: f.len,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            FsStructure::Archive { files }
        } else {
            log::warn!("No `length` or `files` key present in metainfo");
            return Err(Error::InvalidMetainfo);
        };

        // create info hash as a last step
        let info_hash = metainfo.create_info_hash()?;

        Ok(Self {
            name: metainfo.info.name,
            info_hash,
            pieces: metainfo.info.pieces,
            piece_len: metainfo.info.piece_len,
            structure,
        })
    }

    /// Returns the number of pieces in this torrent.
    pub fn piece_count(&self) -> usize {
        self.pieces.len() / HASH_LEN
    }
}

/// Defines the file system structure of the download.
#[derive(Clone, Debug)]
pub enum FsStructure {
    /// This is a single file download.
    File { len: u64 },
    /// The download is for multiple files, possibly with nested
    /// directories.
    Archive { files: Vec<FsFile> },
}

impl FsStructure {
    /// Returns the total download size in bytes.
    ///
    /// Note that this is an O(n) operation for archive downloads, where
    /// n is the number of files, so this value should ideally be cached.
    pub fn download_len(&self) -> u64 {
        match self {
            Self::File { len } => *len,
            Self::Archive { files } => files.iter().map(|f| f.len).sum(),
        }
    }
}

/// A file declaration in a multi-file torrent's `files` list.
#[derive(Clone, Debug)]
pub struct FsFile {
    /// The file's relative path as declared in the metainfo, with the path
    /// components joined.
    pub path: PathBuf,
    /// The file's length, in bytes.
    pub len: u64,
}

/// Contains the types that we directly deserialize into, but is not to be
/// used by the rest of the crate, as the validity of the parsed structure
/// is not ensured at this level. The semantic validation happens in the
/// [`Metainfo`] type, which is essentially a mapping of [`raw::Metainfo`],
/// but with semantic requirements encoded in the type system.
mod raw {
    use sha1::{Digest, Sha1};

    use super::{Result, Sha1Hash};

    #[derive(Debug, Deserialize)]
    pub struct Metainfo {
        pub info: Info,
    }

    impl Metainfo {
        /// Creates a SHA-1 hash of the encoded `info` field's value.
        pub fn create_info_hash(&self) -> Result<Sha1Hash> {
            let info = serde_bencode::to_bytes(&self.info)?;
            let digest = Sha1::digest(&info);
            let mut info_hash = [0; 20];
            info_hash.copy_from_slice(&digest);
            Ok(info_hash)
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Info {
        pub name: String,
        #[serde(with = "serde_bytes")]
        pub pieces: Vec<u8>,
        #[serde(rename = "piece length")]
        pub piece_len: u32,
        #[serde(rename = "length")]
        pub len: Option<u64>,
        pub files: Option<Vec<File>>,
        /// This is not currently used but needs to be kept in here so that
        /// we can encode back a valid info hash for hashing.
        pub private: Option<u8>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct File {
        pub path: Vec<String>,
        #[serde(rename = "length")]
        pub len: u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Builds the bencoding of a single file torrent with the given number
    // of piece hashes.
    fn single_file_buf(len: u64, piece_len: u32, piece_count: usize) -> Vec<u8> {
        let mut buf = format!(
            "d4:infod6:lengthi{}e4:name3:foo12:piece lengthi{}e6:pieces{}:",
            len,
            piece_len,
            piece_count * HASH_LEN
        )
        .into_bytes();
        buf.extend(std::iter::repeat(b'x').take(piece_count * HASH_LEN));
        buf.extend_from_slice(b"ee");
        buf
    }

    #[test]
    fn test_parse_single_file() {
        let metainfo = Metainfo::from_bytes(&single_file_buf(12, 3, 4)).unwrap();
        assert_eq!(metainfo.name, "foo");
        assert_eq!(metainfo.piece_len, 3);
        assert_eq!(metainfo.piece_count(), 4);
        assert_eq!(metainfo.structure.download_len(), 12);
        assert!(matches!(metainfo.structure, FsStructure::File { len: 12 }));
    }

    #[test]
    fn test_parse_multi_file() {
        let mut buf = b"d4:infod5:files\
            ld6:lengthi4e4:pathl2:f1ee\
            d6:lengthi8e4:pathl3:sub2:f2eee\
            4:name3:foo12:piece lengthi4e6:pieces60:"
            .to_vec();
        buf.extend(std::iter::repeat(b'x').take(60));
        buf.extend_from_slice(b"ee");

        let metainfo = Metainfo::from_bytes(&buf).unwrap();
        assert_eq!(metainfo.piece_count(), 3);
        assert_eq!(metainfo.structure.download_len(), 12);
        match &metainfo.structure {
            FsStructure::Archive { files } => {
                assert_eq!(files.len(), 2);
                assert_eq!(files[0].path, PathBuf::from("f1"));
                assert_eq!(files[0].len, 4);
                assert_eq!(files[1].path, PathBuf::from("sub/f2"));
                assert_eq!(files[1].len, 8);
            }
            _ => panic!("expected multi file structure"),
        }
    }

    #[test]
    fn test_reject_invalid_pieces_len() {
        // 10 piece hash bytes is not a multiple of 20
        let mut buf =
            b"d4:infod6:lengthi12e4:name3:foo12:piece lengthi3e6:pieces10:"
                .to_vec();
        buf.extend(std::iter::repeat(b'x').take(10));
        buf.extend_from_slice(b"ee");
        assert!(matches!(
            Metainfo::from_bytes(&buf),
            Err(Error::InvalidPieces)
        ));
    }

    #[test]
    fn test_reject_missing_length_and_files() {
        let mut buf =
            b"d4:infod4:name3:foo12:piece lengthi3e6:pieces20:".to_vec();
        buf.extend(std::iter::repeat(b'x').take(20));
        buf.extend_from_slice(b"ee");
        assert!(matches!(
            Metainfo::from_bytes(&buf),
            Err(Error::InvalidMetainfo)
        ));
    }
}
