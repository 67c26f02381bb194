//! At-rest protection for the device password stored in the config file.

use aes::Aes128;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK: usize = 16;

/// Derives a 16-byte key from hostname and login name, stable per machine
/// and user.
fn machine_key() -> [u8; BLOCK] {
    let host = hostname::get().map_or_else(
        |_| "unknown-host".to_string(),
        |h| h.to_string_lossy().into_owned(),
    );

    let mut hasher = Sha256::new();
    hasher.update(host.as_bytes());
    hasher.update(b":");
    hasher.update(whoami::username().as_bytes());
    hasher.update(b":playback-dl-device-password");
    let digest = hasher.finalize();

    let mut key = [0u8; BLOCK];
    key.copy_from_slice(&digest[..BLOCK]);
    key
}

/// Encrypts `plaintext` and returns it base64-encoded.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn seal(plaintext: &str) -> String {
    let key = machine_key();
    let bytes = plaintext.as_bytes();

    // PKCS7: always append between 1 and 16 padding bytes
    let padded_len = (bytes.len() / BLOCK + 1) * BLOCK;
    let pad = (padded_len - bytes.len()) as u8;
    let mut buf = vec![pad; padded_len];
    buf[..bytes.len()].copy_from_slice(bytes);

    let cipher = Aes128CbcEnc::new(&key.into(), &key.into());
    match cipher.encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buf, padded_len) {
        Ok(sealed) => BASE64.encode(sealed),
        // Unreachable with a block-aligned buffer; fall back to an empty seal.
        Err(_) => String::new(),
    }
}

/// Reverses [`seal`]. Returns `None` when the input was not produced on this
/// machine or is malformed.
#[must_use]
pub fn open(sealed: &str) -> Option<String> {
    let key = machine_key();

    let mut data = BASE64.decode(sealed).ok()?;
    if data.is_empty() || data.len() % BLOCK != 0 {
        return None;
    }

    let cipher = Aes128CbcDec::new(&key.into(), &key.into());
    let plain = cipher
        .decrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut data)
        .ok()?;

    let pad = *plain.last()? as usize;
    if pad == 0 || pad > BLOCK {
        return None;
    }
    let len = plain.len().checked_sub(pad)?;
    if !plain[len..].iter().all(|&b| b as usize == pad) {
        return None;
    }

    String::from_utf8(plain[..len].to_vec()).ok()
}
