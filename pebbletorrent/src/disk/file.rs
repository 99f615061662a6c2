use std::{
    fs::{self, File, OpenOptions},
    io,
    os::unix::fs::FileExt,
};

use super::error::AllocationError;
use crate::storage_info::FileInfo;

/// The number of zero bytes written per syscall when extending a file.
const ZERO_CHUNK_LEN: usize = 1 << 20;

/// An open backing file of a torrent.
pub(super) struct TorrentFile {
    pub info: FileInfo,
    pub handle: File,
}

impl TorrentFile {
    /// Opens the file read-write, creating it and any missing parent
    /// directories, and sizes it to exactly the declared length: a missing
    /// file is created and zero-filled, a too-long file is truncated, a
    /// too-short file is zero-extended. On an already correctly sized file
    /// this only opens the descriptor, so the operation is idempotent
    /// across process restarts.
    pub fn open(info: FileInfo) -> Result<Self, AllocationError> {
        log::trace!("Opening and allocating file {:?}", info.path);
        match Self::open_sized(&info) {
            Ok(handle) => Ok(Self { info, handle }),
            Err(error) => {
                log::warn!("Failed to allocate file {:?}: {}", info.path, error);
                Err(AllocationError {
                    path: info.path,
                    error,
                })
            }
        }
    }

    fn open_sized(info: &FileInfo) -> io::Result<File> {
        if let Some(parent) = info.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let handle = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&info.path)?;

        let on_disk = handle.metadata()?.len();
        if on_disk > info.len {
            log::debug!(
                "Truncating {:?} from {} to {} bytes",
                info.path,
                on_disk,
                info.len
            );
            handle.set_len(info.len)?;
        } else if on_disk < info.len {
            log::debug!(
                "Zero extending {:?} from {} to {} bytes",
                info.path,
                on_disk,
                info.len
            );
            append_zeros(&handle, on_disk, info.len - on_disk)?;
        }

        Ok(handle)
    }

    /// Reads exactly `buf.len()` bytes at the given offset. A short read
    /// surfaces as an error.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.handle.read_exact_at(buf, offset)
    }

    /// Writes all of `data` at the given offset.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.handle.write_all_at(data, offset)
    }
}

/// Appends `amount` zero bytes starting at offset `from`, in bounded
/// chunks.
fn append_zeros(handle: &File, from: u64, amount: u64) -> io::Result<()> {
    let zeros = vec![0; ZERO_CHUNK_LEN.min(amount as usize)];
    let mut offset = from;
    let end = from + amount;
    while offset < end {
        let n = zeros.len().min((end - offset) as usize);
        handle.write_all_at(&zeros[..n], offset)?;
        offset += n as u64;
    }
    Ok(())
}
