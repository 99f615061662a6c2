use std::path::PathBuf;

/// Configuration for a torrent's storage.
///
/// This is passed explicitly to the components that need it; the engine
/// keeps no process-wide mutable state.
#[derive(Clone, Debug)]
pub struct StorageConf {
    /// The directory in which the torrent's backing files are placed. For
    /// a single file torrent the file is created directly in this
    /// directory, for a multi-file torrent a subdirectory with the
    /// torrent's name is created here.
    pub download_dir: PathBuf,
}
