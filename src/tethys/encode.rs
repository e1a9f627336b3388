//! Page wire format and the optional encryption wrapper: a page holds a
//! sequence of `[length][key][values]` entries terminated by a zero-length
//! marker, written vertex-by-vertex with incoming-edge entries before
//! outgoing-edge entries.

use crate::crypto::ChaCha20Xor;
use crate::error::{Result, SseError};

pub const LENGTH_PREFIX_BYTES: usize = 8;

/// The default `Encoder`: one `[u64 length][key][values]` segment per list
/// placed in a bucket, terminated by a zero-length u64.
pub struct EncodeSeparate {
    key_len: usize,
}

impl EncodeSeparate {
    pub fn new(key_len: usize) -> Self {
        Self { key_len }
    }

    /// Both buckets of a two-bucket list carry the control header, so the
    /// overhead a list's two placements reserve is twice one header.
    pub fn list_control_values(&self) -> usize {
        2 * (self.key_len + LENGTH_PREFIX_BYTES)
    }

    pub fn encode_entry(&self, buf: &mut Vec<u8>, key: &[u8], values: &[u8]) -> Result<()> {
        if key.len() != self.key_len {
            return Err(SseError::CorruptData(format!(
                "key is {} bytes, expected {}",
                key.len(),
                self.key_len
            )));
        }
        buf.extend_from_slice(&(values.len() as u64).to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(values);
        Ok(())
    }

    pub fn write_terminator(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&0u64.to_le_bytes());
    }

    /// Parse every `[length][key][values]` entry out of a decrypted page,
    /// stopping at the zero-length terminator (or page end).
    pub fn decode_page(&self, page: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        let mut offset = 0usize;
        loop {
            if offset + LENGTH_PREFIX_BYTES > page.len() {
                break;
            }
            let len_bytes: [u8; 8] = page[offset..offset + LENGTH_PREFIX_BYTES]
                .try_into()
                .expect("slice is exactly 8 bytes");
            let len = u64::from_le_bytes(len_bytes) as usize;
            offset += LENGTH_PREFIX_BYTES;
            if len == 0 {
                break;
            }
            if offset + self.key_len + len > page.len() {
                return Err(SseError::CorruptData("truncated page entry".into()));
            }
            let key = page[offset..offset + self.key_len].to_vec();
            offset += self.key_len;
            let values = page[offset..offset + len].to_vec();
            offset += len;
            entries.push((key, values));
        }
        Ok(entries)
    }

    /// Decode both buckets of a key's two-bucket placement and concatenate
    /// the matching segments in bucket order (`page_a` then `page_b`).
    pub fn decode_buckets(&self, key: &[u8], page_a: &[u8], page_b: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for page in [page_a, page_b] {
            for (entry_key, values) in self.decode_page(page)? {
                if entry_key == key {
                    out.extend_from_slice(&values);
                }
            }
        }
        Ok(out)
    }
}

/// Wraps a page-sized buffer with positional ChaCha20 XOR after encoding.
/// The nonce is the vertex index, so a page is only ever encrypted once
/// under a given key/nonce pair.
pub struct EncryptEncoder {
    key: [u8; 32],
}

impl EncryptEncoder {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt_page(&self, page: &mut [u8], vertex_index: u64) {
        ChaCha20Xor::apply(&self.key, vertex_index, page);
    }

    pub fn decrypt_page(&self, page: &mut [u8], vertex_index: u64) {
        ChaCha20Xor::apply(&self.key, vertex_index, page);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_single_entry_round_trips() {
        let codec = EncodeSeparate::new(4);
        let mut buf = Vec::new();
        codec.encode_entry(&mut buf, b"abcd", b"hello").unwrap();
        codec.write_terminator(&mut buf);
        let entries = codec.decode_page(&buf).unwrap();
        assert_eq!(entries, vec![(b"abcd".to_vec(), b"hello".to_vec())]);
    }

    #[test]
    fn encode_rejects_wrong_key_length() {
        let codec = EncodeSeparate::new(4);
        let mut buf = Vec::new();
        assert!(codec.encode_entry(&mut buf, b"ab", b"hello").is_err());
    }

    #[test]
    fn decode_buckets_concatenates_in_order() {
        let codec = EncodeSeparate::new(4);
        let mut page_a = Vec::new();
        codec.encode_entry(&mut page_a, b"abcd", b"12").unwrap();
        codec.write_terminator(&mut page_a);
        let mut page_b = Vec::new();
        codec.encode_entry(&mut page_b, b"abcd", b"34").unwrap();
        codec.write_terminator(&mut page_b);

        let result = codec.decode_buckets(b"abcd", &page_a, &page_b).unwrap();
        assert_eq!(result, b"1234");
    }

    #[test]
    fn encryption_is_involutive_on_a_page() {
        let enc = EncryptEncoder::new([1u8; 32]);
        let original = vec![7u8; 256];
        let mut page = original.clone();
        enc.encrypt_page(&mut page, 3);
        assert_ne!(page, original);
        enc.decrypt_page(&mut page, 3);
        assert_eq!(page, original);
    }
}
