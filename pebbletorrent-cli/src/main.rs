use std::{fs, path::PathBuf, sync::Arc};

use structopt::StructOpt;

use pebbletorrent::{
    conf::StorageConf, disk::FileHandler, metainfo::Metainfo,
    storage_info::StorageInfo,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(StructOpt, Debug)]
pub struct Args {
    /// The path to the torrent metainfo file. Mutually exclusive with
    /// --seed-files.
    #[structopt(short, long)]
    metainfo: Option<PathBuf>,

    /// The path of the folder where the torrent's files live or will be
    /// downloaded to.
    #[structopt(short, long)]
    download_dir: PathBuf,

    /// Existing files, relative to the download folder, to hash into a new
    /// torrent instead of reading a metainfo file.
    #[structopt(long)]
    seed_files: Option<Vec<PathBuf>>,

    /// The torrent name to use with --seed-files.
    #[structopt(long, default_value = "torrent")]
    name: String,

    /// The piece length, in bytes, to use with --seed-files.
    #[structopt(long, default_value = "262144")]
    piece_len: u32,
}

fn main() -> Result<()> {
    flexi_logger::Logger::try_with_env_or_str("info")?.start()?;

    let args = Args::from_args();

    let info = match (&args.metainfo, &args.seed_files) {
        (Some(metainfo_path), None) => {
            let contents = fs::read(metainfo_path)?;
            let metainfo = Metainfo::from_bytes(&contents)?;
            log::info!(
                "Torrent {} with info hash {}",
                metainfo.name,
                hex::encode(&metainfo.info_hash)
            );
            let conf = StorageConf {
                download_dir: args.download_dir.clone(),
            };
            StorageInfo::new(&metainfo, &conf)?
        }
        (None, Some(paths)) => StorageInfo::from_paths(
            paths,
            &args.download_dir,
            &args.name,
            args.piece_len,
        )?,
        _ => {
            return Err(
                "exactly one of --metainfo and --seed-files is required"
                    .into(),
            )
        }
    };

    log::info!(
        "{}: {} file(s), {} bytes, {} piece(s) of {} bytes",
        info.name,
        info.files().len(),
        info.download_len,
        info.piece_count,
        info.piece_len,
    );

    // allocate the backing files at their full size and find out which
    // pieces are already present on disk
    let handler = FileHandler::new(Arc::new(info))?;
    handler.validate()?;

    {
        let bitfield = handler.bitfield();
        println!("{}/{} pieces verified", bitfield.nset(), bitfield.nbits());
    }

    handler.close()?;
    Ok(())
}
