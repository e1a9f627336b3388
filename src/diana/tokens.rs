//! Update-token/mask derivation: one PRG call over the leaf token produces
//! both the 16-byte update token and the index mask in a single pass.

use crate::crypto::Prg;

pub const UPDATE_TOKEN_SIZE: usize = 16;

/// `(update_token, index_mask)` derived from a leaf token. `index_size` is
/// the byte width of the stored index type (4 for the `u32` indices this
/// crate stores).
pub fn derive_update_token(leaf_token: &[u8; 32], index_size: usize) -> ([u8; 16], Vec<u8>) {
    let prg_out = Prg::expand(leaf_token, 0, UPDATE_TOKEN_SIZE + index_size);
    let mut update_token = [0u8; 16];
    update_token.copy_from_slice(&prg_out[..UPDATE_TOKEN_SIZE]);
    let index_mask = prg_out[UPDATE_TOKEN_SIZE..].to_vec();
    (update_token, index_mask)
}

/// Mask (or unmask — XOR is its own inverse) a `u32` index with a 4-byte
/// mask derived from `derive_update_token`.
pub fn mask_index(index: u32, mask: &[u8]) -> Result<u32, crate::error::SseError> {
    let mask_arr: [u8; 4] = mask.try_into().map_err(|_| {
        crate::error::SseError::CorruptData(format!(
            "index mask is {} bytes, expected 4",
            mask.len()
        ))
    })?;
    Ok(index ^ u32::from_le_bytes(mask_arr))
}
