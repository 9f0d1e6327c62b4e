//! Frame codec: length-prefix framing plus an 8-byte block cipher in ECB
//! mode.

use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use des::Des;

use crate::error::{EngineError, EngineResult};

/// Block size of the underlying cipher; also the wire cipher's key length.
pub const BLOCK_LEN: usize = 8;

type DesEcbEnc = ecb::Encryptor<Des>;
type DesEcbDec = ecb::Decryptor<Des>;

/// An 8-byte, parity-adjusted symmetric key.
///
/// Construction mirrors `des_key_t`: the password is copied into an 8-byte
/// buffer (truncated or zero-padded), then each byte's low bit is set so the
/// byte carries odd parity, the same convention `des_setparity` applies.
#[derive(Clone)]
pub struct Key([u8; BLOCK_LEN]);

impl Key {
    /// Derive a key from a password string. At least 8 bytes are required;
    /// passwords longer than 8 bytes are truncated to the first 8.
    pub fn from_password(password: &str) -> EngineResult<Self> {
        let bytes = password.as_bytes();
        if bytes.len() < BLOCK_LEN {
            return Err(EngineError::KeyTooShort {
                need: BLOCK_LEN,
                got: bytes.len(),
            });
        }
        let mut buf = [0u8; BLOCK_LEN];
        buf.copy_from_slice(&bytes[..BLOCK_LEN]);
        for b in buf.iter_mut() {
            *b = set_parity(*b);
        }
        Ok(Key(buf))
    }

    pub fn from_raw(bytes: [u8; BLOCK_LEN]) -> Self {
        let mut buf = bytes;
        for b in buf.iter_mut() {
            *b = set_parity(*b);
        }
        Key(buf)
    }
}

/// Sets a byte's low bit so the byte has odd parity, the convention
/// `des_setparity` uses for DES key material.
fn set_parity(byte: u8) -> u8 {
    let ones = (byte & 0xfe).count_ones();
    if ones % 2 == 0 {
        byte | 1
    } else {
        byte & !1
    }
}

/// Computes the padded length for a payload of `payload_len` bytes: the next
/// multiple of 8 strictly greater than `payload_len + 4`. When
/// `(payload_len + 4) % 8 == 0` a full extra block is added rather than
/// leaving zero padding, so a receiver always finds at least one padding
/// byte after the declared length.
fn padded_len(payload_len: usize) -> usize {
    let with_header = payload_len + 4;
    let rem = with_header % BLOCK_LEN;
    if rem == 0 {
        with_header + BLOCK_LEN
    } else {
        with_header + (BLOCK_LEN - rem)
    }
}

/// Encrypts `payload` under `key`. With no key, this is the identity
/// function and no length prefix is added (passthrough mode).
pub fn encrypt(payload: &[u8], key: Option<&Key>) -> EngineResult<Vec<u8>> {
    let Some(key) = key else {
        return Ok(payload.to_vec());
    };

    let total = padded_len(payload.len());
    let mut buf = vec![0u8; total];
    let len_be = (payload.len() as u32).to_be_bytes();
    buf[..4].copy_from_slice(&len_be);
    buf[4..4 + payload.len()].copy_from_slice(payload);
    // Remaining bytes are already zeroed by `vec![0u8; total]`.

    // `buf` is already padded to its final, block-aligned length by hand
    // (the header-plus-payload bytes, zero-filled out to `total`), so
    // `NoPadding` is given the buffer's own length as `msg_len` rather than
    // `payload.len() + 4`, otherwise it would treat everything past the
    // unpadded header+payload as spare capacity and leave it unencrypted.
    let mut enc = DesEcbEnc::new(&key.0.into());
    enc.encrypt_padded_mut::<NoPadding>(&mut buf, total)
        .map_err(|e| EngineError::CipherError(e.to_string()))?;

    Ok(buf)
}

/// Decrypts `ciphertext` under `key`, returning the original payload. With
/// no key, this is the identity function.
pub fn decrypt(ciphertext: &[u8], key: Option<&Key>) -> EngineResult<Vec<u8>> {
    let Some(key) = key else {
        return Ok(ciphertext.to_vec());
    };

    if ciphertext.len() < BLOCK_LEN || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(EngineError::CodecError(format!(
            "ciphertext length {} is not a positive multiple of {}",
            ciphertext.len(),
            BLOCK_LEN
        )));
    }

    let mut buf = ciphertext.to_vec();
    let mut dec = DesEcbDec::new(&key.0.into());
    let plain = dec
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| EngineError::CipherError(e.to_string()))?;

    if plain.len() < 4 {
        return Err(EngineError::CodecError(
            "decrypted buffer too short for length prefix".to_string(),
        ));
    }

    let declared = u32::from_be_bytes([plain[0], plain[1], plain[2], plain[3]]) as usize;
    if declared > plain.len() - 4 {
        return Err(EngineError::CodecError(format!(
            "declared length {} exceeds decrypted buffer ({} bytes available)",
            declared,
            plain.len() - 4
        )));
    }

    Ok(plain[4..4 + declared].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Key {
        Key::from_password("SECRET__").unwrap()
    }

    #[test]
    fn passthrough_is_identity() {
        let payload = b"hello world".to_vec();
        let ct = encrypt(&payload, None).unwrap();
        assert_eq!(ct, payload);
        let pt = decrypt(&ct, None).unwrap();
        assert_eq!(pt, payload);
    }

    #[test]
    fn round_trip_various_lengths() {
        let k = key();
        for len in [0usize, 1, 7, 8, 9, 60, 1500, 2044] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let ct = encrypt(&payload, Some(&k)).unwrap();
            assert_eq!(ct.len() % BLOCK_LEN, 0);
            assert!(ct.len() > 0);
            let pt = decrypt(&ct, Some(&k)).unwrap();
            assert_eq!(pt, payload, "round trip failed for len {}", len);
        }
    }

    #[test]
    fn padding_boundary_adds_full_block() {
        // (payload_len + 4) % 8 == 0 at payload_len == 4, 12, 20, ...
        let payload = vec![0xAAu8; 4];
        assert_eq!((payload.len() + 4) % 8, 0);
        let ct = encrypt(&payload, Some(&key())).unwrap();
        // 4 (len) + 4 (payload) = 8, which is already a multiple of 8;
        // the padded length must still exceed it by a full block.
        assert_eq!(ct.len(), 16);
    }

    #[test]
    fn decrypt_rejects_short_ciphertext() {
        let k = key();
        let err = decrypt(&[0u8; 4], Some(&k)).unwrap_err();
        assert!(matches!(err, EngineError::CodecError(_)));
    }

    #[test]
    fn decrypt_rejects_non_block_multiple() {
        let k = key();
        let err = decrypt(&[0u8; 10], Some(&k)).unwrap_err();
        assert!(matches!(err, EngineError::CodecError(_)));
    }

    #[test]
    fn key_too_short_is_rejected() {
        let err = Key::from_password("short").unwrap_err();
        assert!(matches!(err, EngineError::KeyTooShort { .. }));
    }

    #[test]
    fn key_parity_is_odd_per_byte() {
        let k = Key::from_raw([0u8; 8]);
        for b in k.0.iter() {
            assert_eq!(b.count_ones() % 2, 1);
        }
    }
}
