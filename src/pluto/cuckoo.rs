//! The bulk cuckoo hash table Pluto packs full posting-list blocks into:
//! two candidate slots per key taken from the 64-bit halves of a 32-byte
//! core key, bounded-kick eviction on insert, probe-free lookup (a key is
//! either at one of its two candidate slots or absent).

use std::path::Path;

use rand::RngCore;

use crate::crypto::Hash;
use crate::error::{Result, SseError};

const MAX_KICKS: usize = 512;

fn candidate_slots(core_key: &[u8; 32], table_size: usize) -> (usize, usize) {
    let h0 = u64::from_le_bytes(core_key[0..8].try_into().expect("slice is exactly 8 bytes"));
    let h1 = u64::from_le_bytes(core_key[8..16].try_into().expect("slice is exactly 8 bytes"));
    ((h0 as usize) % table_size, (h1 as usize) % table_size)
}

/// `⌈(1 + epsilon/2) * capacity_hint⌉` slots, each holding one full block.
pub fn table_size(capacity_hint: u64, epsilon: f64) -> usize {
    (((1.0 + epsilon / 2.0) * capacity_hint.max(1) as f64).ceil() as u64).max(1) as usize
}

struct Slot {
    core_key: [u8; 32],
    value: Vec<u8>,
}

pub struct CuckooTable {
    slots: Vec<Option<Slot>>,
}

impl CuckooTable {
    pub fn new(capacity_hint: u64, epsilon: f64) -> Self {
        let size = table_size(capacity_hint, epsilon);
        Self { slots: (0..size).map(|_| None).collect() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn filled_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Insert `(core_key, value)`, evicting the occupant of a candidate slot
    /// and re-homing it to its *other* candidate slot as needed. Fails with
    /// `OutOfRange` if no placement is found within `MAX_KICKS` — the caller
    /// sized the table too small for its load factor.
    pub fn insert(&mut self, core_key: [u8; 32], value: Vec<u8>) -> Result<()> {
        let mut current = Slot { core_key, value };
        let mut pos = candidate_slots(&current.core_key, self.slots.len()).0;

        for _ in 0..MAX_KICKS {
            match self.slots[pos].take() {
                None => {
                    self.slots[pos] = Some(current);
                    return Ok(());
                }
                Some(occupant) => {
                    self.slots[pos] = Some(current);
                    let (a, b) = candidate_slots(&occupant.core_key, self.slots.len());
                    let next = if a == pos { b } else { a };
                    current = occupant;
                    pos = next;
                }
            }
        }
        Err(SseError::OutOfRange("cuckoo table insertion exceeded max kicks".into()))
    }

    pub fn get(&self, core_key: &[u8; 32]) -> Option<&[u8]> {
        let (a, b) = candidate_slots(core_key, self.slots.len());
        for pos in [a, b] {
            if let Some(slot) = &self.slots[pos] {
                if &slot.core_key == core_key {
                    return Some(&slot.value);
                }
            }
        }
        None
    }

    /// Insert one block under a freshly-random key, to hide the true total
    /// block count behind a fixed `filled_slots() = total_full_blocks + 1`.
    pub fn insert_dummy_padding(&mut self, block_bytes: usize) -> Result<()> {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        let mut value = vec![0u8; block_bytes];
        rand::thread_rng().fill_bytes(&mut value);
        self.insert(key, value)
    }

    /// Flat binary layout: `u64` slot count, then per slot a presence byte
    /// followed by `[core_key; 32]` and a length-prefixed value when present.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.slots.len() as u64).to_le_bytes());
        for slot in &self.slots {
            match slot {
                None => buf.push(0),
                Some(s) => {
                    buf.push(1);
                    buf.extend_from_slice(&s.core_key);
                    buf.extend_from_slice(&(s.value.len() as u64).to_le_bytes());
                    buf.extend_from_slice(&s.value);
                }
            }
        }
        std::fs::write(path.as_ref(), &buf).map_err(SseError::IoFailure)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let buf = std::fs::read(path.as_ref()).map_err(SseError::IoFailure)?;
        let mut offset = 0usize;
        let read_u64 = |buf: &[u8], offset: &mut usize| -> Result<u64> {
            let bytes: [u8; 8] = buf
                .get(*offset..*offset + 8)
                .ok_or_else(|| SseError::CorruptData("truncated cuckoo table file".into()))?
                .try_into()
                .expect("slice is exactly 8 bytes");
            *offset += 8;
            Ok(u64::from_le_bytes(bytes))
        };

        let count = read_u64(&buf, &mut offset)? as usize;
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let flag = *buf
                .get(offset)
                .ok_or_else(|| SseError::CorruptData("truncated cuckoo table file".into()))?;
            offset += 1;
            if flag == 0 {
                slots.push(None);
                continue;
            }
            let core_key: [u8; 32] = buf
                .get(offset..offset + 32)
                .ok_or_else(|| SseError::CorruptData("truncated cuckoo table file".into()))?
                .try_into()
                .expect("slice is exactly 32 bytes");
            offset += 32;
            let len = read_u64(&buf, &mut offset)? as usize;
            let value = buf
                .get(offset..offset + len)
                .ok_or_else(|| SseError::CorruptData("truncated cuckoo table file".into()))?
                .to_vec();
            offset += len;
            slots.push(Some(Slot { core_key, value }));
        }
        Ok(Self { slots })
    }
}

/// `Hash(keyword_token || block_index)` as a 32-byte core key.
pub fn core_key(keyword_token: &[u8; 16], block_index: u64) -> [u8; 32] {
    let mut buf = Vec::with_capacity(24);
    buf.extend_from_slice(keyword_token);
    buf.extend_from_slice(&block_index.to_le_bytes());
    Hash::digest(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let mut t = CuckooTable::new(4, 0.2);
        let k1 = core_key(&[1u8; 16], 1);
        let k2 = core_key(&[2u8; 16], 1);
        t.insert(k1, vec![1, 2, 3]).unwrap();
        t.insert(k2, vec![4, 5, 6]).unwrap();
        assert_eq!(t.get(&k1), Some(&[1u8, 2, 3][..]));
        assert_eq!(t.get(&k2), Some(&[4u8, 5, 6][..]));
    }

    #[test]
    fn missing_key_returns_none() {
        let t = CuckooTable::new(4, 0.2);
        assert_eq!(t.get(&core_key(&[9u8; 16], 1)), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cuckoo.bin");
        let k1 = core_key(&[1u8; 16], 1);
        let mut t = CuckooTable::new(4, 0.2);
        t.insert(k1, vec![9, 9, 9]).unwrap();
        t.save(&path).unwrap();

        let loaded = CuckooTable::load(&path).unwrap();
        assert_eq!(loaded.len(), t.len());
        assert_eq!(loaded.get(&k1), Some(&[9u8, 9, 9][..]));
    }

    #[test]
    fn dummy_padding_increases_filled_slots_by_one() {
        let mut t = CuckooTable::new(8, 0.5);
        t.insert(core_key(&[1u8; 16], 1), vec![0; 8]).unwrap();
        t.insert(core_key(&[1u8; 16], 2), vec![0; 8]).unwrap();
        let before = t.filled_slots();
        t.insert_dummy_padding(8).unwrap();
        assert_eq!(t.filled_slots(), before + 1);
    }
}
