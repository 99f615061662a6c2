#[macro_use]
extern crate serde_derive;

pub mod bitfield;
pub mod conf;
pub mod disk;
pub mod error;
pub mod metainfo;
pub mod piece_map;
pub mod storage_info;

pub use bitfield::Bitfield;

/// The type of a piece's index in the torrent.
pub type PieceIndex = usize;

/// The type of a file's index in the torrent's file list.
pub type FileIndex = usize;

/// A SHA-1 digest, the content addressing unit of the protocol. Each piece
/// of a torrent is identified by one of these, as is the torrent itself (the
/// info hash).
pub type Sha1Hash = [u8; 20];

/// The number of bytes in a SHA-1 digest.
pub const HASH_LEN: usize = 20;
