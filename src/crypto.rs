//! Query codec for the politikontroller backend.
//!
//! Every request query string is an AES-128-CBC encrypted, base64-encoded
//! blob. The key and IV are fixed and embedded in the shipped app; this is
//! obfuscation of the wire contract, not confidentiality. Both values must
//! be kept bit-exact to interoperate with the real backend.
//!
//! # Padding footgun
//!
//! `encrypt` pads the plaintext to the AES block size before encrypting,
//! but `decrypt` returns the plaintext *with the padding bytes still
//! attached*. The backend contract was built on top of this asymmetry, so
//! it is preserved here instead of being fixed. Use [`strip_padding`] when
//! you need the original string back.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Base64 of the fixed 128-bit initialization vector.
const CRYPTO_K1: &str = "aGFua19lcl9ob21vX3Bvbw==";
/// Base64 of the fixed 128-bit key.
const CRYPTO_K2: &str = "ZGlsZG9zZXJ2aWNlX3N1eA==";

/// Codec error types.
#[derive(Debug)]
pub enum DecodingError {
    /// Input was not valid base64
    Base64(String),
    /// Ciphertext length is not a multiple of the AES block size
    BlockSize(usize),
    /// Decrypted bytes were not valid UTF-8
    Utf8(String),
}

impl std::fmt::Display for DecodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodingError::Base64(e) => write!(f, "Invalid base64: {e}"),
            DecodingError::BlockSize(n) => {
                write!(f, "Ciphertext length {n} is not a multiple of {BLOCK_SIZE}")
            }
            DecodingError::Utf8(e) => write!(f, "Decrypted data is not UTF-8: {e}"),
        }
    }
}

impl std::error::Error for DecodingError {}

fn key_iv() -> ([u8; BLOCK_SIZE], [u8; BLOCK_SIZE]) {
    let key: [u8; BLOCK_SIZE] = BASE64
        .decode(CRYPTO_K2)
        .expect("static key material")
        .try_into()
        .expect("static key material");
    let iv: [u8; BLOCK_SIZE] = BASE64
        .decode(CRYPTO_K1)
        .expect("static key material")
        .try_into()
        .expect("static key material");
    (key, iv)
}

/// Encrypt a plaintext string into a base64 query blob.
///
/// The UTF-8 bytes are padded to the next multiple of 16 with bytes whose
/// value equals the padding length (1..=16, always at least one), then
/// AES-CBC encrypted and base64-encoded.
pub fn encrypt(plaintext: &str) -> String {
    let (key, iv) = key_iv();
    let mut data = plaintext.as_bytes().to_vec();
    let pad = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    data.extend(std::iter::repeat(pad as u8).take(pad));

    let ciphertext =
        Aes128CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<NoPadding>(&data);
    BASE64.encode(ciphertext)
}

/// Decrypt a base64 query blob back into plaintext.
///
/// The returned string still carries the padding suffix added by
/// [`encrypt`]; see the module docs. Fails on malformed base64, on
/// ciphertext that is not a whole number of blocks, and on plaintext that
/// is not UTF-8.
pub fn decrypt(blob: &str) -> Result<String, DecodingError> {
    let data = BASE64
        .decode(blob.trim())
        .map_err(|e| DecodingError::Base64(e.to_string()))?;
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(DecodingError::BlockSize(data.len()));
    }

    let (key, iv) = key_iv();
    let plaintext = Aes128CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<NoPadding>(&data)
        .map_err(|_| DecodingError::BlockSize(data.len()))?;
    String::from_utf8(plaintext).map_err(|e| DecodingError::Utf8(e.to_string()))
}

/// Strip the padding suffix left behind by [`decrypt`].
///
/// The last byte names the padding length; a well-formed decryption always
/// has one. Returns the input unchanged when the suffix does not look like
/// padding.
pub fn strip_padding(decrypted: &str) -> &str {
    let bytes = decrypted.as_bytes();
    match bytes.last() {
        Some(&pad) if (1..=BLOCK_SIZE as u8).contains(&pad) => {
            let pad = pad as usize;
            if bytes.len() >= pad && bytes[bytes.len() - pad..].iter().all(|&b| b == pad as u8) {
                &decrypted[..bytes.len() - pad]
            } else {
                decrypted
            }
        }
        _ => decrypted,
    }
}
