//! Event model, integrity checks and filter evaluation for relay clients.
//!
//! # Integrity
//!
//! An event id is the sha256 of the canonical array
//! `[0, pubkey, created_at, kind, tags, content]`; the signature is a BIP-340
//! Schnorr signature over the raw digest.
//!
//! ```rust,ignore
//! use nostr_core::{finalize, verify, EventTemplate, Keys, KIND_SHORT_TEXT_NOTE};
//!
//! let keys = Keys::generate();
//! let event = finalize(EventTemplate::new(KIND_SHORT_TEXT_NOTE, "gm"), &keys, None)?;
//! assert!(verify(&event));
//! ```
//!
//! # Filters
//!
//! ```rust,ignore
//! use nostr_core::{query, Filter, StoredEvent};
//!
//! let filter = Filter::new().kind(1).authors([pubkey]).limit(20);
//! let recent = query(&candidates, &filter, false);
//! ```
//!
//! Encrypted direct messages (kind 4) run through a [`PayloadCodec`] before
//! their id is computed.

mod crypto;
mod error;
mod event;
mod filter;
mod integrity;
mod keys;
mod matching;

pub use crypto::{decrypt_content, encrypt_content, CryptoError, NoopCodec, PayloadCodec, SecretBoxCodec};
pub use error::Error;
pub use event::{
    unix_timestamp, Event, EventTemplate, IdSlot, StoredEvent, Tag, KIND_CONTACTS, KIND_DELETION,
    KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_METADATA, KIND_SHORT_TEXT_NOTE,
};
pub use filter::Filter;
pub use integrity::{compute_id, compute_id_and_sign, event_digest, finalize, sign, verify};
pub use keys::Keys;
pub use matching::{apply_limit, matches, matches_any, matches_single, query};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
