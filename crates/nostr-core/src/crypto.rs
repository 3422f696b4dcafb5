//! Payload transform applied to encrypted direct messages before signing.
//!
//! The relay client treats the transform as opaque: anything implementing
//! [`PayloadCodec`] can stand in for the real scheme.

use std::env;
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand_core::{OsRng, RngCore};
use thiserror::Error;
use xsalsa20poly1305::aead::{Aead, KeyInit};
use xsalsa20poly1305::{Nonce, XSalsa20Poly1305};

const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("missing payload key in {0}")]
    MissingKey(String),
    #[error("payload key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("sealed payload too short: {0} bytes")]
    Truncated(usize),
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("hex error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("payload is not valid utf-8")]
    Utf8,
    #[error("payload authentication failed")]
    Aead,
}

/// Reversible byte transform for encrypted payloads.
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decode(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn name(&self) -> &'static str;
}

/// Leaves bytes untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCodec;

impl PayloadCodec for NoopCodec {
    fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(plaintext.to_vec())
    }

    fn decode(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(sealed.to_vec())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// XSalsa20-Poly1305 under a shared key; sealed bytes are
/// `nonce (24) || ciphertext`.
pub struct SecretBoxCodec {
    cipher: XSalsa20Poly1305,
}

impl SecretBoxCodec {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher =
            XSalsa20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Read the key from `var`. Accepts the formats [`FromStr`] does.
    pub fn from_env(var: &str) -> Result<Self, CryptoError> {
        let value = env::var(var).map_err(|_| CryptoError::MissingKey(var.to_string()))?;
        value.parse()
    }
}

/// Parse a key given as `hex:<hex>`, `base64:<b64>`, 64 bare hex digits, or
/// bare base64.
impl FromStr for SecretBoxCodec {
    type Err = CryptoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let key = match (value.strip_prefix("hex:"), value.strip_prefix("base64:")) {
            (Some(hex_key), _) => hex::decode(hex_key)?,
            (_, Some(b64_key)) => BASE64.decode(b64_key)?,
            _ if value.len() == KEY_LEN * 2 && value.bytes().all(|b| b.is_ascii_hexdigit()) => {
                hex::decode(value)?
            }
            _ => BASE64.decode(value)?,
        };
        Self::new(&key)
    }
}

impl fmt::Debug for SecretBoxCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBoxCodec(..)")
    }
}

impl PayloadCodec for SecretBoxCodec {
    fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut sealed = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut sealed);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&sealed), plaintext)
            .map_err(|_| CryptoError::Aead)?;
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    fn decode(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::Truncated(sealed.len()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Aead)
    }

    fn name(&self) -> &'static str {
        "secretbox-v1"
    }
}

/// Event content for an encrypted message: base64 of the codec output.
pub fn encrypt_content(codec: &dyn PayloadCodec, content: &str) -> Result<String, CryptoError> {
    Ok(BASE64.encode(codec.encode(content.as_bytes())?))
}

/// Inverse of [`encrypt_content`].
pub fn decrypt_content(codec: &dyn PayloadCodec, content: &str) -> Result<String, CryptoError> {
    let plaintext = codec.decode(&BASE64.decode(content)?)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Utf8)
}
