//! Diana server: a persistent `update_token -> masked index` map plus the
//! search pipeline that expands a constrained RC-PRF and streams matches
//! back.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::crypto::Key;
use crate::diana::client::{SearchRequest, UpdateRequest};
use crate::diana::tokens::{derive_update_token, mask_index};
use crate::error::{Result, SseError};
use crate::kv::TokenStore;
use crate::rcprf::expand_subtree;

const WRAPPING_KEY_FILE: &str = "wrapping.key";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Uninitialised,
    Initialised,
    Serving,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Uninitialised,
            1 => State::Initialised,
            _ => State::Serving,
        }
    }
}

/// Owns the token map and the `Uninitialised -> Initialised -> Serving`
/// lifecycle. `setup` must run exactly once before `insert`/`search`.
pub struct DianaServer<T: TokenStore> {
    tokens: T,
    state: AtomicU8,
    directory: PathBuf,
}

impl<T: TokenStore> DianaServer<T> {
    /// Wraps an already-open token store. The server itself is
    /// `Uninitialised` until `setup` runs.
    pub fn new(directory: impl AsRef<Path>, tokens: T) -> Self {
        Self {
            tokens,
            state: AtomicU8::new(State::Uninitialised as u8),
            directory: directory.as_ref().to_path_buf(),
        }
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Creates the storage directory and persists `wrapping_key`. Fails
    /// with `InvalidState` if called twice.
    pub fn setup(&self, wrapping_key: &Key<32>) -> Result<()> {
        if self.state() != State::Uninitialised {
            return Err(SseError::InvalidState("server already initialised".into()));
        }
        std::fs::create_dir_all(&self.directory)?;
        std::fs::write(self.directory.join(WRAPPING_KEY_FILE), wrapping_key.as_bytes())?;
        self.state.store(State::Initialised as u8, Ordering::Release);
        Ok(())
    }

    fn enter_serving(&self) -> Result<()> {
        match self.state() {
            State::Uninitialised => {
                Err(SseError::InvalidState("server has not been set up".into()))
            }
            State::Initialised => {
                self.state.store(State::Serving as u8, Ordering::Release);
                Ok(())
            }
            State::Serving => Ok(()),
        }
    }

    /// Atomic put into the token map. Duplicate update tokens are
    /// impossible with honest clients; on collision the later write wins.
    pub fn insert(&self, req: UpdateRequest) -> Result<()> {
        self.enter_serving()?;
        self.tokens.put(req.token, req.index.to_le_bytes().to_vec())
    }

    /// Drains `requests` with no lock contention between items; flushes
    /// the store on completion.
    pub fn bulk_insert(&self, requests: impl IntoIterator<Item = UpdateRequest>) -> Result<()> {
        self.enter_serving()?;
        for req in requests {
            self.tokens.put(req.token, req.index.to_le_bytes().to_vec())?;
        }
        self.tokens.flush()
    }

    fn lookup_leaf(&self, leaf: &[u8; 32]) -> Result<Option<u32>> {
        let (token, mask) = derive_update_token(leaf, 4);
        match self.tokens.get(&token)? {
            Some(bytes) => {
                let masked = u32::from_le_bytes(
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| SseError::CorruptData("stored index is not 4 bytes".into()))?,
                );
                Ok(Some(mask_index(masked, &mask)?))
            }
            None => Ok(None),
        }
    }

    /// Sequential search: expand the constrained tree into exactly
    /// `add_count` leaves in increasing order, probing the token map for
    /// each. Unknown leaves are silently skipped.
    pub fn search(&self, req: &SearchRequest, mut on_match: impl FnMut(u32)) -> Result<()> {
        self.enter_serving()?;
        if req.add_count == 0 {
            return Ok(());
        }
        let mut seen = 0u32;
        for leaf in req.constrained.expand_all_leaves() {
            if seen >= req.add_count {
                break;
            }
            seen += 1;
            if let Some(index) = self.lookup_leaf(&leaf)? {
                on_match(index);
            }
        }
        Ok(())
    }

    /// Same as `search`, but the constrained subtree roots are distributed
    /// one rayon task per top-level subtree. `on_match` is invoked
    /// concurrently and the caller must synchronise it; the server performs
    /// no ordering.
    pub fn search_parallel(
        &self,
        req: &SearchRequest,
        on_match: impl Fn(u32) + Sync + Send,
    ) -> Result<()> {
        self.enter_serving()?;
        if req.add_count == 0 {
            return Ok(());
        }

        let on_match = Mutex::new(on_match);
        let result: Result<()> = req
            .constrained
            .subtree_roots()
            .par_iter()
            .try_for_each(|(root, depth)| -> Result<()> {
                for leaf in expand_subtree(root.as_bytes(), *depth) {
                    if let Some(index) = self.lookup_leaf(&leaf)? {
                        (on_match.lock())(index);
                    }
                }
                Ok(())
            });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diana::client::DianaClient;
    use crate::kv::{RocksCounterStore, RocksTokenStore};

    fn server() -> (DianaServer<RocksTokenStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let tokens = RocksTokenStore::open(dir.path().join("tokens")).unwrap();
        (DianaServer::new(dir.path().join("state"), tokens), dir)
    }

    #[test]
    fn refuses_operations_before_setup() {
        let (s, _dir) = server();
        let req = crate::diana::client::UpdateRequest { token: [0u8; 16], index: 1 };
        assert!(s.insert(req).is_err());
    }

    #[test]
    fn refuses_double_setup() {
        let (s, _dir) = server();
        s.setup(&Key::random()).unwrap();
        assert!(s.setup(&Key::random()).is_err());
    }

    #[test]
    fn insert_then_search_round_trip() {
        let (s, _sdir) = server();
        s.setup(&Key::random()).unwrap();

        let cdir = tempfile::tempdir().unwrap();
        let counters = RocksCounterStore::open(cdir.path()).unwrap();
        let client = DianaClient::new(Key::random(), Key::random(), counters);

        for i in [1u32, 2, 3] {
            let req = client.insertion_request(b"alpha", i).unwrap();
            s.insert(req).unwrap();
        }

        let search = client.search_request(b"alpha").unwrap();
        let mut got = Vec::new();
        s.search(&search, |idx| got.push(idx)).unwrap();
        got.sort();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn empty_search_short_circuits() {
        let (s, _dir) = server();
        s.setup(&Key::random()).unwrap();

        let cdir = tempfile::tempdir().unwrap();
        let counters = RocksCounterStore::open(cdir.path()).unwrap();
        let client = DianaClient::new(Key::random(), Key::random(), counters);

        let search = client.search_request(b"alpha").unwrap();
        assert_eq!(search.add_count, 0);
        let mut called = false;
        s.search(&search, |_| called = true).unwrap();
        assert!(!called);
    }

    #[test]
    fn search_parallel_matches_sequential_results() {
        let (s, _sdir) = server();
        s.setup(&Key::random()).unwrap();

        let cdir = tempfile::tempdir().unwrap();
        let counters = RocksCounterStore::open(cdir.path()).unwrap();
        let client = DianaClient::new(Key::random(), Key::random(), counters);

        for i in 0..20u32 {
            let req = client.insertion_request(b"alpha", i).unwrap();
            s.insert(req).unwrap();
        }

        let search = client.search_request(b"alpha").unwrap();
        let found = Mutex::new(Vec::new());
        s.search_parallel(&search, |idx| found.lock().push(idx)).unwrap();
        let mut found = found.into_inner();
        found.sort();
        assert_eq!(found, (0..20u32).collect::<Vec<_>>());
    }

    #[test]
    fn multi_keyword_isolation() {
        let (s, _sdir) = server();
        s.setup(&Key::random()).unwrap();

        let cdir = tempfile::tempdir().unwrap();
        let counters = RocksCounterStore::open(cdir.path()).unwrap();
        let client = DianaClient::new(Key::random(), Key::random(), counters);

        s.insert(client.insertion_request(b"alpha", 1).unwrap()).unwrap();
        s.insert(client.insertion_request(b"beta", 2).unwrap()).unwrap();
        s.insert(client.insertion_request(b"alpha", 3).unwrap()).unwrap();

        let mut alpha = Vec::new();
        s.search(&client.search_request(b"alpha").unwrap(), |i| alpha.push(i)).unwrap();
        alpha.sort();
        assert_eq!(alpha, vec![1, 3]);

        let mut beta = Vec::new();
        s.search(&client.search_request(b"beta").unwrap(), |i| beta.push(i)).unwrap();
        assert_eq!(beta, vec![2]);
    }
}
