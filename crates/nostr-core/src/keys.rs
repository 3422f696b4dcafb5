use std::env;
use std::fmt;

use rand_core::{OsRng, RngCore};
use secp256k1::{Keypair, Secp256k1, SecretKey, XOnlyPublicKey};

use crate::Error;

const SECRET_KEY_LEN: usize = 32;

/// A secp256k1 key pair used to author events.
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    public_key: XOnlyPublicKey,
}

impl Keys {
    pub fn new(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let (public_key, _parity) = keypair.x_only_public_key();
        Self {
            keypair,
            public_key,
        }
    }

    /// Fresh keys from the operating system RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_KEY_LEN];
        loop {
            OsRng.fill_bytes(&mut bytes);
            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(secret_key) = SecretKey::from_slice(&bytes) {
                return Self::new(secret_key);
            }
        }
    }

    /// Parse a hex secret key, optionally prefixed with `hex:`.
    pub fn parse(value: &str) -> Result<Self, Error> {
        let trimmed = value.trim();
        let hex_value = trimmed.strip_prefix("hex:").unwrap_or(trimmed);
        let bytes = hex::decode(hex_value)?;
        if bytes.len() != SECRET_KEY_LEN {
            return Err(Error::InvalidKeyLength(bytes.len()));
        }
        Ok(Self::new(SecretKey::from_slice(&bytes)?))
    }

    /// Read `NOSTR_SECRET_KEY`.
    pub fn from_env() -> Result<Self, Error> {
        let value =
            env::var("NOSTR_SECRET_KEY").map_err(|_| Error::MissingEnv("NOSTR_SECRET_KEY"))?;
        Self::parse(&value)
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> XOnlyPublicKey {
        self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}
