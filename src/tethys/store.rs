//! `TethysStoreBuilder` / `TethysStore`: the static encrypted multi-map
//! container built on top of `TethysAllocator`, writing each vertex's page
//! as its incoming-edge entries, then its outgoing-edge entries, then a
//! terminator, and reading a key back out via its two-bucket lookup with a
//! stash fallback.
//!
//! Posting-list entries are 4-byte document indices (`u32`), so
//! `page_items` is an item count: the allocator's `list_length` passed to
//! `insert_list` is `items.len()`, which keeps a `Placement`'s
//! `at_start`/`at_end`/`stashed` counts item-aligned so a list can always be
//! split into contiguous item slices without touching a partial entry's
//! bytes.
//!
//! Physical page size is `page_items * ITEM_BYTES` plus a fixed reserve for
//! the `[length][key]` headers of however many distinct lists a single
//! bucket ends up holding (`max_entries_per_page`, a deployment parameter
//! analogous to the allocator's epsilon slack).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::crypto::Hash;
use crate::error::{Result, SseError};
use crate::io::{PageScheduler, ThreadPoolScheduler};
use crate::tethys::allocator::{Placement, TethysAllocator};
use crate::tethys::encode::{EncodeSeparate, EncryptEncoder, LENGTH_PREFIX_BYTES};

pub const ITEM_BYTES: usize = 4;

fn items_to_bytes(items: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(items.len() * ITEM_BYTES);
    for item in items {
        out.extend_from_slice(&item.to_le_bytes());
    }
    out
}

fn bytes_to_items(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % ITEM_BYTES != 0 {
        return Err(SseError::CorruptData("item slice is not a multiple of 4 bytes".into()));
    }
    Ok(bytes
        .chunks_exact(ITEM_BYTES)
        .map(|c| u32::from_le_bytes(c.try_into().expect("chunk is 4 bytes")))
        .collect())
}

fn hash_halves(key: &[u8]) -> (u64, u64) {
    let digest = Hash::digest(key);
    let h0 = u64::from_le_bytes(digest[0..8].try_into().expect("slice is exactly 8 bytes"));
    let h1 = u64::from_le_bytes(digest[8..16].try_into().expect("slice is exactly 8 bytes"));
    (h0, h1)
}

/// On-disk layout produced by `TethysStoreBuilder::build`, enough for a
/// reader to reopen the table.
#[derive(Clone, Copy, Debug)]
pub struct TethysLayout {
    pub table_size: u64,
    pub page_bytes: usize,
    pub key_len: usize,
}

pub struct TethysStoreBuilder {
    allocator: TethysAllocator,
    codec: EncodeSeparate,
    encryptor: Option<EncryptEncoder>,
    entries: Vec<(Vec<u8>, Vec<u32>)>,
    page_bytes: usize,
    table_size: u64,
    key_len: usize,
}

impl TethysStoreBuilder {
    pub fn new(
        table_size: u64,
        page_items: u64,
        key_len: usize,
        max_entries_per_page: usize,
        encryption_key: Option<[u8; 32]>,
    ) -> Result<Self> {
        let header_reserve = max_entries_per_page * (key_len + LENGTH_PREFIX_BYTES);
        let page_bytes = page_items as usize * ITEM_BYTES + header_reserve + LENGTH_PREFIX_BYTES;
        Ok(Self {
            allocator: TethysAllocator::new(table_size, page_items)?,
            codec: EncodeSeparate::new(key_len),
            encryptor: encryption_key.map(EncryptEncoder::new),
            entries: Vec::new(),
            page_bytes,
            table_size,
            key_len,
        })
    }

    /// Insert one `(key, posting list)` pair. `key` must be exactly
    /// `key_len` bytes, and the list plus its two-bucket control overhead
    /// must fit within one page.
    pub fn insert_list(&mut self, key: Vec<u8>, items: Vec<u32>) -> Result<()> {
        if key.len() != self.key_len {
            return Err(SseError::CorruptData(format!(
                "key is {} bytes, expected {}",
                key.len(),
                self.key_len
            )));
        }
        let entry_bytes = items.len() * ITEM_BYTES + self.codec.list_control_values();
        if entry_bytes > self.page_bytes {
            return Err(SseError::OutOfRange(format!(
                "list of {} items plus control overhead needs {entry_bytes} bytes, page holds {}",
                items.len(),
                self.page_bytes
            )));
        }
        let (h0, h1) = hash_halves(&key);
        let index = self.entries.len();
        self.allocator.insert(h0, h1, items.len() as u64, index)?;
        self.entries.push((key, items));
        Ok(())
    }

    /// Run the allocation, write the page table and the stash to disk, and
    /// return the layout a reader needs to reopen the store.
    pub fn build(mut self, table_path: impl AsRef<Path>, stash_path: impl AsRef<Path>) -> Result<TethysLayout> {
        self.allocator.allocate()?;

        let placements: Vec<Placement> = (0..self.entries.len())
            .map(|i| self.allocator.placement(i))
            .collect::<Result<_>>()?;

        let mut table = vec![0u8; self.table_size as usize * self.page_bytes];
        let mut stash: HashMap<Vec<u8>, Vec<u32>> = HashMap::new();

        for v in 0..self.table_size as usize {
            let mut buf = Vec::with_capacity(self.page_bytes);

            for &e_idx in self.allocator.graph().in_edges(v) {
                let edge = self.allocator.graph().edge(e_idx);
                if !edge.is_list_edge() {
                    continue;
                }
                let p = placements[edge.value_index];
                if p.at_end == 0 {
                    continue;
                }
                let (key, items) = &self.entries[edge.value_index];
                let start = p.at_start as usize;
                let end = start + p.at_end as usize;
                let slice = items_to_bytes(&items[start..end]);
                self.codec.encode_entry(&mut buf, key, &slice)?;
            }

            for &e_idx in self.allocator.graph().out_edges(v) {
                let edge = self.allocator.graph().edge(e_idx);
                if !edge.is_list_edge() {
                    continue;
                }
                let p = placements[edge.value_index];
                if p.at_start == 0 {
                    continue;
                }
                let (key, items) = &self.entries[edge.value_index];
                let slice = items_to_bytes(&items[0..p.at_start as usize]);
                self.codec.encode_entry(&mut buf, key, &slice)?;
            }

            self.codec.write_terminator(&mut buf);
            if buf.len() > self.page_bytes {
                return Err(SseError::OutOfRange(format!(
                    "vertex {v} page overflowed reserved page size ({} > {})",
                    buf.len(),
                    self.page_bytes
                )));
            }
            buf.resize(self.page_bytes, 0);
            if let Some(enc) = &self.encryptor {
                enc.encrypt_page(&mut buf, v as u64);
            }
            let offset = v * self.page_bytes;
            table[offset..offset + self.page_bytes].copy_from_slice(&buf);
        }

        for (index, p) in placements.iter().enumerate() {
            if p.stashed == 0 {
                continue;
            }
            let (key, items) = &self.entries[index];
            let start = (p.at_start + p.at_end) as usize;
            stash.entry(key.clone()).or_default().extend_from_slice(&items[start..]);
        }

        std::fs::write(table_path.as_ref(), &table).map_err(SseError::IoFailure)?;
        let stash_file = std::fs::File::create(stash_path.as_ref()).map_err(SseError::IoFailure)?;
        let stash_entries: Vec<(Vec<u8>, Vec<u32>)> = stash.into_iter().collect();
        serde_json::to_writer(stash_file, &stash_entries)
            .map_err(|e| SseError::CorruptData(format!("failed to serialise stash: {e}")))?;

        Ok(TethysLayout { table_size: self.table_size, page_bytes: self.page_bytes, key_len: self.key_len })
    }
}

/// Read-side of the static store: two concurrent page fetches plus a stash
/// fallback.
pub struct TethysStore {
    scheduler: Arc<dyn PageScheduler>,
    stash: HashMap<Vec<u8>, Vec<u32>>,
    codec: EncodeSeparate,
    decryptor: Option<EncryptEncoder>,
    table_size: u64,
    page_bytes: usize,
}

impl TethysStore {
    pub fn open(
        table_path: impl AsRef<Path>,
        stash_path: impl AsRef<Path>,
        layout: TethysLayout,
        encryption_key: Option<[u8; 32]>,
    ) -> Result<Self> {
        let stash_bytes = std::fs::read(stash_path.as_ref()).map_err(SseError::IoFailure)?;
        let stash_entries: Vec<(Vec<u8>, Vec<u32>)> = serde_json::from_slice(&stash_bytes)
            .map_err(|e| SseError::CorruptData(format!("failed to parse stash: {e}")))?;

        Ok(Self {
            scheduler: Arc::new(ThreadPoolScheduler::new(table_path.as_ref())),
            stash: stash_entries.into_iter().collect(),
            codec: EncodeSeparate::new(layout.key_len),
            decryptor: encryption_key.map(EncryptEncoder::new),
            table_size: layout.table_size,
            page_bytes: layout.page_bytes,
        })
    }

    fn buckets_for(&self, key: &[u8]) -> (usize, usize) {
        let (h0, h1) = hash_halves(key);
        let half = self.table_size / 2;
        let remaining = self.table_size - half;
        let a = (h0 % half) as usize;
        let b = (half + h1 % remaining) as usize;
        (a, b)
    }

    /// Fetch both candidate pages concurrently, decode the key's segments
    /// out of each, and append any stashed residual.
    pub async fn get_list(&self, key: &[u8]) -> Result<Vec<u32>> {
        let (a, b) = self.buckets_for(key);
        let read_a = self.scheduler.submit_pread(a as u64 * self.page_bytes as u64, self.page_bytes);
        let read_b = self.scheduler.submit_pread(b as u64 * self.page_bytes as u64, self.page_bytes);
        let (page_a, page_b) = tokio::join!(read_a, read_b);
        let mut page_a = page_a
            .map_err(|e| SseError::CorruptData(format!("page fetch task failed: {e}")))??;
        let mut page_b = page_b
            .map_err(|e| SseError::CorruptData(format!("page fetch task failed: {e}")))??;

        if let Some(dec) = &self.decryptor {
            dec.decrypt_page(&mut page_a, a as u64);
            dec.decrypt_page(&mut page_b, b as u64);
        }

        let bytes = self.codec.decode_buckets(key, &page_a, &page_b)?;
        let mut items = bytes_to_items(&bytes)?;
        if let Some(extra) = self.stash.get(key) {
            items.extend_from_slice(extra);
        }
        Ok(items)
    }
}
