//! `vcachefs` — mount a cached pass-through view of a source directory.

use clap::Parser;
use easy_fuser::mount_options::MountOption;
use easy_fuser::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use vcachefs::adapter::VcacheFsAdapter;
use vcachefs::config::ConfigBuilder;
use vcachefs::mount::Mount;

/// A pass-through FUSE filesystem that mirrors a source tree onto a bounded
/// local cache.
#[derive(Parser, Debug)]
#[command(name = "vcachefs", version, about)]
struct Args {
    /// Directory to mirror.
    source: PathBuf,

    /// Mount point.
    mountpoint: PathBuf,

    /// Where cached copies are stored. Defaults to `~/.cache/vcachefs/<hash>`.
    #[arg(long)]
    cache_root: Option<PathBuf>,

    /// Cache budget in bytes.
    #[arg(long, default_value_t = vcachefs::types::DEFAULT_MAX_CACHE_SIZE)]
    max_cache_size: u64,

    /// Bypass the cache entirely; reads always hit the source.
    #[arg(long)]
    pass_through: bool,

    /// Append a CSV operation log to this path.
    #[arg(long)]
    stats_path: Option<PathBuf>,

    /// Mount read-only in the kernel as well.
    #[arg(long)]
    read_only: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut builder = ConfigBuilder::new(&args.source)
        .max_cache_size(args.max_cache_size)
        .pass_through(args.pass_through);
    if let Some(cache_root) = args.cache_root {
        builder = builder.cache_root(cache_root);
    }
    if let Some(stats_path) = args.stats_path {
        builder = builder.stats_path(stats_path);
    }

    let config = match builder.build() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("vcachefs: invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mount = match Mount::init(config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("vcachefs: failed to initialize mount: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut options = vec![MountOption::FSName("vcachefs".to_string())];
    if args.read_only {
        options.push(MountOption::RO);
    }

    let handler = VcacheFsAdapter::new(mount);
    if let Err(e) = easy_fuser::mount(handler, &args.mountpoint, &options, 1) {
        eprintln!("vcachefs: mount failed: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
