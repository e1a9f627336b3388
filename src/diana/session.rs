//! Client-side update session batching: many `insertion_request`s streamed
//! to the server over one logical channel, with linearizable per-keyword
//! counter increments and a non-nestable open/close contract.

use crate::diana::client::{DianaClient, UpdateRequest};
use crate::error::Result;
use crate::kv::CounterStore;

/// An open update session. Dropping without calling `end_update_session`
/// still releases the session slot (via `Drop`), but the accumulated
/// requests are lost — callers should always call `end_update_session`.
pub struct UpdateSession<'a, C: CounterStore> {
    client: &'a DianaClient<C>,
    pending: Vec<UpdateRequest>,
    closed: bool,
}

impl<C: CounterStore> DianaClient<C> {
    /// Opens a stream for batched insertions. Fails with `InvalidState` if
    /// a session is already open on this client.
    pub fn start_update_session(&self) -> Result<UpdateSession<'_, C>> {
        self.try_open_session()?;
        Ok(UpdateSession { client: self, pending: Vec::new(), closed: false })
    }
}

impl<'a, C: CounterStore> UpdateSession<'a, C> {
    /// Enqueues one insertion. Counter increments within a session are
    /// applied in call order, same as `bulk_insertion_request`.
    pub fn insert_in_session(&mut self, kw: &[u8], index: u32) -> Result<()> {
        let req = self.client.insertion_request(kw, index)?;
        self.pending.push(req);
        Ok(())
    }

    /// Closes the stream and returns the accumulated requests, ready to
    /// hand to the server's `bulk_insert`.
    pub fn end_update_session(mut self) -> Vec<UpdateRequest> {
        self.closed = true;
        self.client.close_session();
        std::mem::take(&mut self.pending)
    }
}

impl<'a, C: CounterStore> Drop for UpdateSession<'a, C> {
    fn drop(&mut self) {
        if !self.closed {
            self.client.close_session();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Key;
    use crate::diana::server::DianaServer;
    use crate::kv::{RocksCounterStore, RocksTokenStore};

    fn client() -> (DianaClient<RocksCounterStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let counters = RocksCounterStore::open(dir.path()).unwrap();
        (DianaClient::new(Key::random(), Key::random(), counters), dir)
    }

    #[test]
    fn session_is_not_nestable() {
        let (c, _dir) = client();
        let _s1 = c.start_update_session().unwrap();
        assert!(c.start_update_session().is_err());
    }

    #[test]
    fn closing_a_session_allows_reopening() {
        let (c, _dir) = client();
        let s1 = c.start_update_session().unwrap();
        s1.end_update_session();
        assert!(c.start_update_session().is_ok());
    }

    #[test]
    fn dropping_a_session_without_closing_releases_the_slot() {
        let (c, _dir) = client();
        {
            let _s1 = c.start_update_session().unwrap();
        }
        assert!(c.start_update_session().is_ok());
    }

    #[test]
    fn session_batches_increments_in_call_order() {
        let (c, _dir) = client();
        let mut session = c.start_update_session().unwrap();
        session.insert_in_session(b"alpha", 1).unwrap();
        session.insert_in_session(b"alpha", 2).unwrap();
        session.insert_in_session(b"beta", 9).unwrap();
        let reqs = session.end_update_session();
        assert_eq!(reqs.len(), 3);
        assert_eq!(c.get_match_count(b"alpha").unwrap(), 2);
        assert_eq!(c.get_match_count(b"beta").unwrap(), 1);
    }

    #[test]
    fn session_requests_feed_directly_into_server_bulk_insert() {
        let (c, _cdir) = client();
        let sdir = tempfile::tempdir().unwrap();
        let tokens = RocksTokenStore::open(sdir.path().join("tokens")).unwrap();
        let server = DianaServer::new(sdir.path().join("state"), tokens);
        server.setup(&Key::random()).unwrap();

        let mut session = c.start_update_session().unwrap();
        session.insert_in_session(b"alpha", 1).unwrap();
        session.insert_in_session(b"alpha", 2).unwrap();
        let reqs = session.end_update_session();
        server.bulk_insert(reqs).unwrap();

        let mut found = Vec::new();
        server.search(&c.search_request(b"alpha").unwrap(), |i| found.push(i)).unwrap();
        found.sort();
        assert_eq!(found, vec![1, 2]);
    }
}
