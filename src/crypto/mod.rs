//! Cryptographic primitives: keyed pseudorandom derivation, hashing, and
//! positional stream encryption, built on the `RustCrypto` crates
//! (`sha2`, `blake2`, `hmac`, `chacha20`).

use blake2::Digest;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// A secret key of exactly `N` bytes, zeroised on drop.
///
/// Matches the `Key<32>` row of the data model: never serialised except
/// through an authenticated write of key files, created either by RNG or by
/// PRF derivation from another key.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Key<const N: usize>([u8; N]);

impl<const N: usize> Key<N> {
    pub fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; N];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> std::fmt::Debug for Key<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key<{}>(..)", N)
    }
}

impl<const N: usize> PartialEq for Key<N> {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.0.ct_eq(&other.0).into()
    }
}
impl<const N: usize> Eq for Key<N> {}

/// Keyed pseudorandom function producing `N` output bytes from a 32-byte
/// key and a variable-length label, backed by HMAC-SHA256.
pub struct Prf<const N: usize> {
    key: Key<32>,
}

impl<const N: usize> Prf<N> {
    pub fn new(key: Key<32>) -> Self {
        Self { key }
    }

    /// Evaluate the PRF on `label`, producing exactly `N` bytes.
    pub fn eval(&self, label: &[u8]) -> [u8; N] {
        let mut out = [0u8; N];
        let mut produced = 0usize;
        let mut counter: u32 = 0;
        while produced < N {
            let mut mac = HmacSha256::new_from_slice(self.key.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(label);
            mac.update(&counter.to_be_bytes());
            let block = mac.finalize().into_bytes();
            let take = std::cmp::min(32, N - produced);
            out[produced..produced + take].copy_from_slice(&block[..take]);
            produced += take;
            counter += 1;
        }
        out
    }

    /// Derive a fresh 32-byte key from this PRF, keyed on `label`. Used to
    /// turn the client's per-keyword index into the root key of an
    /// RC-PRF subtree.
    pub fn derive_key(&self, label: &[u8]) -> Key<32> {
        let prf32 = Prf::<32> { key: self.key.clone() };
        Key::new(prf32.eval(label))
    }
}

/// Keyed, length-doubling pseudorandom generator: a 32-byte key expands to
/// 64 pseudorandom bytes, the two halves being the left/right children of
/// an RC-PRF node. `expand` also supports evaluating an arbitrary
/// sub-range of the (conceptually infinite) keystream, which the
/// update-token/mask derivation uses to pull `16 + index_size` bytes out
/// of a single leaf token.
pub struct Prg;

impl Prg {
    pub const KEY_SIZE: usize = 32;
    pub const OUTPUT_SIZE: usize = 64;

    /// Produce the `len` bytes of keystream starting at `offset`, keyed by
    /// `key`.
    pub fn expand(key: &[u8; 32], offset: usize, len: usize) -> Vec<u8> {
        use chacha20::cipher::{KeyIvInit, StreamCipher};
        use chacha20::{ChaCha20, Key as CipherKey, Nonce};

        let nonce = [0u8; 12];
        let mut cipher =
            ChaCha20::new(CipherKey::from_slice(key), Nonce::from_slice(&nonce));
        let mut buf = vec![0u8; offset + len];
        cipher.apply_keystream(&mut buf);
        buf.split_off(offset)
    }

    /// The two 32-byte children of an internal RC-PRF node keyed by `key`.
    pub fn children(key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
        let out = Self::expand(key, 0, Self::OUTPUT_SIZE);
        let mut left = [0u8; 32];
        let mut right = [0u8; 32];
        left.copy_from_slice(&out[0..32]);
        right.copy_from_slice(&out[32..64]);
        (left, right)
    }
}

/// Collision-resistant hash used for keyword indices and Tethys/Pluto core
/// keys, backed by BLAKE2s-256.
pub struct Hash;

impl Hash {
    pub fn digest(data: &[u8]) -> [u8; 32] {
        blake2::Blake2s256::digest(data).into()
    }

    /// First 16 bytes of `digest`, used as the keyword-index label fed into
    /// both Diana PRFs.
    pub fn digest16(data: &[u8]) -> [u8; 16] {
        let full = Self::digest(data);
        let mut out = [0u8; 16];
        out.copy_from_slice(&full[..16]);
        out
    }
}

/// Raw ChaCha20 page XOR used by the Tethys `EncryptEncoder`/`EncryptDecoder`
/// wrapper. The nonce is purely positional (the bucket's vertex index), so
/// a bucket is only ever encrypted once under a given key/nonce pair.
pub struct ChaCha20Xor;

impl ChaCha20Xor {
    pub fn apply(key: &[u8; 32], vertex_index: u64, buffer: &mut [u8]) {
        use chacha20::cipher::{KeyIvInit, StreamCipher};
        use chacha20::{ChaCha20, Key as CipherKey, Nonce};

        let mut nonce = [0u8; 12];
        nonce[0..8].copy_from_slice(&vertex_index.to_le_bytes());
        let mut cipher =
            ChaCha20::new(CipherKey::from_slice(key), Nonce::from_slice(&nonce));
        cipher.apply_keystream(buffer);
    }
}

/// Constant-time equality, used when comparing derived tokens or keys.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Zeroise a buffer in place; used for transient key material that does
/// not own its own `Key<N>` wrapper (e.g. leaf tokens after use).
pub fn zeroize_bytes(buf: &mut [u8]) {
    buf.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prg_is_deterministic_and_length_doubling() {
        let key = [7u8; 32];
        let (l1, r1) = Prg::children(&key);
        let (l2, r2) = Prg::children(&key);
        assert_eq!(l1, l2);
        assert_eq!(r1, r2);
        assert_ne!(l1, r1);
    }

    #[test]
    fn prg_expand_matches_children_halves() {
        let key = [1u8; 32];
        let (l, r) = Prg::children(&key);
        let left = Prg::expand(&key, 0, 32);
        let right = Prg::expand(&key, 32, 32);
        assert_eq!(&left[..], &l[..]);
        assert_eq!(&right[..], &r[..]);
    }

    #[test]
    fn prf_is_deterministic() {
        let prf: Prf<16> = Prf::new(Key::new([9u8; 32]));
        assert_eq!(prf.eval(b"alpha"), prf.eval(b"alpha"));
        assert_ne!(prf.eval(b"alpha"), prf.eval(b"beta"));
    }

    #[test]
    fn hash_digest16_is_prefix_of_digest() {
        let full = Hash::digest(b"keyword");
        let short = Hash::digest16(b"keyword");
        assert_eq!(&full[..16], &short[..]);
    }

    #[test]
    fn chacha_xor_is_involutive() {
        let key = [3u8; 32];
        let mut buf = vec![0xAAu8; 128];
        let original = buf.clone();
        ChaCha20Xor::apply(&key, 42, &mut buf);
        assert_ne!(buf, original);
        ChaCha20Xor::apply(&key, 42, &mut buf);
        assert_eq!(buf, original);
    }
}
