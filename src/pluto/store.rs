//! Pluto composition: splits each posting list into full blocks packed into
//! the bulk cuckoo table and a short residual packed into Tethys, padding
//! the cuckoo table with one dummy block so its filled-slot count reveals
//! only the running total block count. Search probes `core_key_1,
//! core_key_2, …` until the first miss, then appends the residual stored
//! under `core_key_0`.

use std::path::Path;

use crate::error::Result;
use crate::pluto::cuckoo::{core_key, CuckooTable};
use crate::tethys::store::{TethysLayout, TethysStore, TethysStoreBuilder};

const RESIDUAL_KEY_LEN: usize = 32;

pub struct PlutoBuilder {
    cuckoo: CuckooTable,
    tethys: TethysStoreBuilder,
    page_items: u64,
    total_full_blocks: u64,
}

impl PlutoBuilder {
    /// `estimated_total_blocks` sizes the cuckoo table up front (it must be
    /// the true sum of `floor(len(list) / page_items)` over every list this
    /// builder will see — the table cannot grow once allocated).
    pub fn new(
        estimated_total_blocks: u64,
        epsilon: f64,
        page_items: u64,
        tethys_table_size: u64,
        tethys_epsilon: f64,
        encryption_key: Option<[u8; 32]>,
    ) -> Result<Self> {
        Ok(Self {
            cuckoo: CuckooTable::new(estimated_total_blocks, epsilon),
            tethys: TethysStoreBuilder::new(
                tethys_table_size,
                residual_capacity(page_items, tethys_epsilon),
                RESIDUAL_KEY_LEN,
                8,
                encryption_key,
            )?,
            page_items,
            total_full_blocks: 0,
        })
    }

    /// Splits `items` into `k = items.len() / page_items` full blocks plus
    /// one residual of `items.len() % page_items` items.
    pub fn insert_list(&mut self, keyword_token: [u8; 16], items: Vec<u32>) -> Result<()> {
        let p = self.page_items as usize;
        let k = items.len() / p.max(1);

        for i in 1..=k {
            let block = &items[(i - 1) * p..i * p];
            let block_bytes: Vec<u8> = block.iter().flat_map(|v| v.to_le_bytes()).collect();
            self.cuckoo.insert(core_key(&keyword_token, i as u64), block_bytes)?;
            self.total_full_blocks += 1;
        }

        let residual = items[k * p..].to_vec();
        let key0 = core_key(&keyword_token, 0);
        self.tethys.insert_list(key0.to_vec(), residual)?;
        Ok(())
    }

    /// Finalise both tables. Pads the cuckoo table with one random-keyed
    /// dummy block so the filled-slot count reveals only the running total,
    /// never which keyword contributed how many blocks.
    pub fn build(
        mut self,
        cuckoo_path: impl AsRef<Path>,
        tethys_table_path: impl AsRef<Path>,
        tethys_stash_path: impl AsRef<Path>,
    ) -> Result<PlutoLayout> {
        self.cuckoo.insert_dummy_padding(self.page_items as usize * 4)?;
        self.cuckoo.save(cuckoo_path.as_ref())?;
        let tethys_layout = self.tethys.build(tethys_table_path.as_ref(), tethys_stash_path.as_ref())?;
        Ok(PlutoLayout { page_items: self.page_items, tethys_layout })
    }
}

fn residual_capacity(page_items: u64, epsilon: f64) -> u64 {
    ((1.0 + epsilon) * page_items as f64).ceil() as u64
}

#[derive(Clone, Copy, Debug)]
pub struct PlutoLayout {
    pub page_items: u64,
    pub tethys_layout: TethysLayout,
}

pub struct PlutoStore {
    cuckoo: CuckooTable,
    tethys: TethysStore,
}

impl PlutoStore {
    pub fn open(
        cuckoo_path: impl AsRef<Path>,
        tethys_table_path: impl AsRef<Path>,
        tethys_stash_path: impl AsRef<Path>,
        layout: PlutoLayout,
        encryption_key: Option<[u8; 32]>,
    ) -> Result<Self> {
        Ok(Self {
            cuckoo: CuckooTable::load(cuckoo_path.as_ref())?,
            tethys: TethysStore::open(tethys_table_path, tethys_stash_path, layout.tethys_layout, encryption_key)?,
        })
    }

    /// Probes `core_key_1, core_key_2, …` until the first miss, then
    /// appends the Tethys-resident residual under `core_key_0`.
    pub async fn get_list(&self, keyword_token: [u8; 16]) -> Result<Vec<u32>> {
        let mut items = Vec::new();
        let mut i = 1u64;
        loop {
            let key = core_key(&keyword_token, i);
            match self.cuckoo.get(&key) {
                Some(bytes) => {
                    for chunk in bytes.chunks_exact(4) {
                        items.push(u32::from_le_bytes(chunk.try_into().expect("chunk is 4 bytes")));
                    }
                    i += 1;
                }
                None => break,
            }
        }
        let residual = self.tethys.get_list(&core_key(&keyword_token, 0)).await?;
        items.extend(residual);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_list_lives_entirely_in_the_residual() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PlutoBuilder::new(4, 0.3, 8, 8, 0.3, None).unwrap();
        builder.insert_list([1u8; 16], vec![1, 2, 3]).unwrap();
        let layout = builder
            .build(dir.path().join("cuckoo.bin"), dir.path().join("table.bin"), dir.path().join("stash.json"))
            .unwrap();
        let store = PlutoStore::open(
            dir.path().join("cuckoo.bin"),
            dir.path().join("table.bin"),
            dir.path().join("stash.json"),
            layout,
            None,
        )
        .unwrap();

        let mut got = store.get_list([1u8; 16]).await.unwrap();
        got.sort();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn long_list_splits_across_blocks_and_residual() {
        let dir = tempfile::tempdir().unwrap();
        // page_items = 4: 10 items -> two full blocks + a residual of 2.
        let mut builder = PlutoBuilder::new(4, 0.3, 4, 8, 0.3, None).unwrap();
        let items: Vec<u32> = (0..10).collect();
        builder.insert_list([2u8; 16], items.clone()).unwrap();
        let layout = builder
            .build(dir.path().join("cuckoo.bin"), dir.path().join("table.bin"), dir.path().join("stash.json"))
            .unwrap();
        let store = PlutoStore::open(
            dir.path().join("cuckoo.bin"),
            dir.path().join("table.bin"),
            dir.path().join("stash.json"),
            layout,
            None,
        )
        .unwrap();

        let mut got = store.get_list([2u8; 16]).await.unwrap();
        got.sort();
        assert_eq!(got, items);
    }

    #[tokio::test]
    async fn unknown_keyword_yields_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = PlutoBuilder::new(2, 0.3, 4, 8, 0.3, None).unwrap();
        builder.insert_list([3u8; 16], vec![1]).unwrap();
        let layout = builder
            .build(dir.path().join("cuckoo.bin"), dir.path().join("table.bin"), dir.path().join("stash.json"))
            .unwrap();
        let store = PlutoStore::open(
            dir.path().join("cuckoo.bin"),
            dir.path().join("table.bin"),
            dir.path().join("stash.json"),
            layout,
            None,
        )
        .unwrap();

        let got = store.get_list([9u8; 16]).await.unwrap();
        assert!(got.is_empty());
    }
}
