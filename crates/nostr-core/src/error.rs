use thiserror::Error;

use crate::crypto::CryptoError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("serde json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hex error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("invalid secret key length: {0}")]
    InvalidKeyLength(usize),
    #[error("missing env var: {0}")]
    MissingEnv(&'static str),
    #[error("encrypted direct message requires a payload codec")]
    MissingCodec,
    #[error("invalid tag filter key: {0}")]
    InvalidTagKey(String),
}
