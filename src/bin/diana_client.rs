//! Standalone Diana client demo. Builds/loads an encrypted index and runs
//! searches against a local Diana server instance. The real deployment
//! talks to the server over a network transport (out of scope here, an
//! external collaborator); this binary opens the same on-disk token map
//! directly so the core can be exercised end-to-end from one process.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use forward_private_sse::crypto::Key;
use forward_private_sse::diana::{DianaClient, DianaServer};
use forward_private_sse::kv::{RocksCounterStore, RocksTokenStore};

#[derive(Parser)]
#[command(about = "Diana client demo")]
struct Args {
    /// Storage directory shared with the Diana server instance.
    #[arg(short = 'b', long = "db")]
    db_path: PathBuf,

    /// JSON index file: `{"keyword": [doc_index, ...], ...}`.
    #[arg(short = 'l', long = "load")]
    index_path: Option<PathBuf>,

    /// Generate a random database of N documents instead of loading one.
    #[arg(short = 'r', long = "random")]
    random_count: Option<u32>,

    /// Suppress result printing.
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Keywords to search for.
    keywords: Vec<String>,
}

fn random_index(n: u32) -> HashMap<String, Vec<u32>> {
    let mut index: HashMap<String, Vec<u32>> = HashMap::new();
    for doc in 0..n {
        let keyword = format!("kw{}", doc % 50);
        index.entry(keyword).or_default().push(doc);
    }
    index
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let counters = RocksCounterStore::open(args.db_path.join("counters"))?;
    let client = DianaClient::new(Key::random(), Key::random(), counters);

    let tokens = RocksTokenStore::open(args.db_path.join("pairs.dat"))?;
    let server = DianaServer::new(&args.db_path, tokens);
    if server.setup(&Key::random()).is_err() {
        log::info!("server storage already initialised");
    }

    let index = if let Some(path) = &args.index_path {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice::<HashMap<String, Vec<u32>>>(&bytes)?
    } else if let Some(n) = args.random_count {
        random_index(n)
    } else {
        HashMap::new()
    };

    if !index.is_empty() {
        let mut session = client.start_update_session()?;
        for (keyword, docs) in &index {
            for &doc in docs {
                session.insert_in_session(keyword.as_bytes(), doc)?;
            }
        }
        let requests = session.end_update_session();
        server.bulk_insert(requests)?;
        log::info!("loaded {} keywords", index.len());
    }

    for keyword in &args.keywords {
        let req = client.search_request(keyword.as_bytes())?;
        let mut matches = Vec::new();
        server.search(&req, |idx| matches.push(idx))?;
        matches.sort_unstable();
        if !args.quiet {
            println!("{keyword}: {matches:?}");
        }
    }

    Ok(())
}
