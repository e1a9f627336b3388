//! Diana client: owns the two derivation PRFs and the persistent
//! per-keyword counter map, and emits search/update requests.

use parking_lot::Mutex;

use crate::crypto::{Hash, Key, Prf};
use crate::diana::tokens::{derive_update_token, mask_index};
use crate::error::{Result, SseError};
use crate::kv::CounterStore;
use crate::rcprf::{ConstrainedRcPrf, RcPrfTree};

/// Depth of the per-keyword RC-PRF tree. 2^48 updates per keyword is far
/// beyond any realistic counter, and fixing the depth keeps
/// `search_request`/`insertion_request` from needing to agree on a dynamic
/// depth out of band.
pub const TREE_DEPTH: u8 = 48;

/// What the client sends the server to run a search.
pub struct SearchRequest {
    pub kw_token: [u8; 16],
    pub constrained: ConstrainedRcPrf,
    pub add_count: u32,
}

/// What the client sends the server to record one insertion.
pub struct UpdateRequest {
    pub token: [u8; 16],
    pub index: u32,
}

fn keyword_index(kw: &[u8]) -> [u8; 16] {
    Hash::digest16(kw)
}

/// Owns `root_prf` (derives per-keyword RC-PRF roots), `kw_token_prf`
/// (derives per-keyword server-side lookup tokens), and a counter store
/// keyed by keyword string.
pub struct DianaClient<C: CounterStore> {
    root_prf: Prf<32>,
    kw_token_prf: Prf<16>,
    counters: C,
    session_open: Mutex<bool>,
}

impl<C: CounterStore> DianaClient<C> {
    pub fn new(derivation_master_key: Key<32>, kw_token_master_key: Key<32>, counters: C) -> Self {
        Self {
            root_prf: Prf::new(derivation_master_key),
            kw_token_prf: Prf::new(kw_token_master_key),
            counters,
            session_open: Mutex::new(false),
        }
    }

    /// Marks a session open; fails with `InvalidState` if one is already
    /// open. Sessions are not nestable.
    pub(crate) fn try_open_session(&self) -> Result<()> {
        let mut open = self.session_open.lock();
        if *open {
            return Err(SseError::InvalidState("update session already open".into()));
        }
        *open = true;
        Ok(())
    }

    pub(crate) fn close_session(&self) {
        *self.session_open.lock() = false;
    }

    fn root_key_for(&self, kw_index: &[u8; 16]) -> Key<32> {
        self.root_prf.derive_key(kw_index)
    }

    pub fn get_match_count(&self, kw: &[u8]) -> Result<u32> {
        Ok(self.counters.get(kw)?.unwrap_or(0))
    }

    /// An empty request (`add_count = 0`) for an unknown keyword is not a
    /// failure — the server short-circuits it.
    pub fn search_request(&self, kw: &[u8]) -> Result<SearchRequest> {
        let kw_index = keyword_index(kw);
        let count = self.counters.get(kw)?;
        let Some(c) = count else {
            return Ok(SearchRequest {
                kw_token: self.kw_token_prf.eval(&kw_index),
                constrained: ConstrainedRcPrf::empty(),
                add_count: 0,
            });
        };

        let root_key = self.root_key_for(&kw_index);
        let tree = RcPrfTree::new(root_key, TREE_DEPTH)?;
        let constrained = tree.constrain(0, c as u64)?;
        Ok(SearchRequest { kw_token: self.kw_token_prf.eval(&kw_index), constrained, add_count: c })
    }

    pub fn insertion_request(&self, kw: &[u8], index: u32) -> Result<UpdateRequest> {
        let kw_index = keyword_index(kw);
        let c = self.counters.get_and_increment(kw)?;
        let root_key = self.root_key_for(&kw_index);
        let tree = RcPrfTree::new(root_key, TREE_DEPTH)?;
        let leaf = tree.eval(c as u64)?;
        let (token, mask) = derive_update_token(&leaf, 4);
        let masked = mask_index(index, &mask)?;
        Ok(UpdateRequest { token, index: masked })
    }

    /// Semantically identical to calling `insertion_request` for each
    /// `(kw, index)` pair, but guarantees per-keyword increments are
    /// applied in list order.
    pub fn bulk_insertion_request(&self, items: &[(Vec<u8>, u32)]) -> Result<Vec<UpdateRequest>> {
        items
            .iter()
            .map(|(kw, index)| self.insertion_request(kw, *index))
            .collect()
    }

    /// Drops the client-side counter entry. Server-side entries remain but
    /// become unreachable because their leaf tokens cannot be re-derived.
    pub fn remove_keyword(&self, kw: &[u8]) -> Result<()> {
        self.counters.remove(kw)
    }

}
