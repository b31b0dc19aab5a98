use aes::Aes128;
use block_modes::block_padding::NoPadding;
use block_modes::{BlockMode, Ecb};

use crate::error::{NcmError, Result};

type Aes128EcbRaw = Ecb<Aes128, NoPadding>;

/// Fixed AES key wrapping the per-file audio key. Baked into every
/// encoder build, not user-supplied.
pub const CORE_KEY: [u8; 16] = [
    0x68, 0x7A, 0x48, 0x52, 0x41, 0x6D, 0x73, 0x6F, 0x35, 0x6B, 0x49, 0x6E, 0x62, 0x61, 0x78, 0x57,
];

/// Fixed AES key wrapping the metadata blob.
pub const META_KEY: [u8; 16] = [
    0x23, 0x31, 0x34, 0x6C, 0x6A, 0x6B, 0x5F, 0x21, 0x5C, 0x5D, 0x26, 0x30, 0x55, 0x3C, 0x27, 0x28,
];

/// XOR mask applied to the key blob before the cipher layer.
pub const KEY_MASK: u8 = 0x64;

/// XOR mask applied to the metadata blob before the cipher layer.
pub const META_MASK: u8 = 0x63;

/// Length of the `neteasecloudmusic` prefix in front of the unwrapped key.
const KEY_PREFIX_LEN: usize = 17;

/// 256-entry byte permutation used as keystream state.
pub type KeyBox = [u8; 256];

/// Raw AES-128-ECB decryption; padding is handled separately because
/// metadata blobs in the wild are sometimes not validly padded.
pub fn aes_ecb_decrypt(data: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    let cipher = Aes128EcbRaw::new_from_slices(key, &[])
        .map_err(|e| NcmError::KeyUnwrapFailed(e.to_string()))?;
    cipher
        .decrypt_vec(data)
        .map_err(|e| NcmError::KeyUnwrapFailed(e.to_string()))
}

/// PKCS#7 removal that never fails: a last byte of 0, or one larger
/// than the buffer, leaves the buffer unchanged.
pub fn unpad(mut data: Vec<u8>) -> Vec<u8> {
    match data.last() {
        Some(&p) if p != 0 && (p as usize) <= data.len() => {
            let keep = data.len() - p as usize;
            data.truncate(keep);
            data
        }
        _ => data,
    }
}

/// Reverses the wrapping on the key blob: XOR mask, AES-ECB under
/// [`CORE_KEY`], padding removal, then the fixed 17-byte prefix is
/// discarded. Without a valid key no audio can be produced, so every
/// failure here is terminal for the file.
pub fn unwrap_key(blob: &[u8]) -> Result<Vec<u8>> {
    let masked: Vec<u8> = blob.iter().map(|b| b ^ KEY_MASK).collect();
    let plain = unpad(aes_ecb_decrypt(&masked, &CORE_KEY)?);
    if plain.len() <= KEY_PREFIX_LEN {
        return Err(NcmError::KeyUnwrapFailed(format!(
            "unwrapped key is {} bytes, need more than {}",
            plain.len(),
            KEY_PREFIX_LEN
        )));
    }
    Ok(plain[KEY_PREFIX_LEN..].to_vec())
}

/// Expands the raw key into the permutation box. This is close to a
/// classic RC4 key schedule but carries a running accumulator through
/// the swap index; reproduce the formula exactly or every later byte
/// silently corrupts.
pub fn build_key_box(key: &[u8]) -> KeyBox {
    let mut key_box: KeyBox = [0u8; 256];
    for (i, slot) in key_box.iter_mut().enumerate() {
        *slot = i as u8;
    }

    let mut last = 0usize;
    let mut key_offset = 0usize;
    for i in 0..256 {
        let swap = key_box[i];
        let c = (swap as usize + last + key[key_offset] as usize) & 0xff;
        key_offset += 1;
        if key_offset >= key.len() {
            key_offset = 0;
        }
        key_box[i] = key_box[c];
        key_box[c] = swap;
        last = c;
    }
    key_box
}
