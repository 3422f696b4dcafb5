//! Event id derivation, signing and verification.
//!
//! The id is always derived from the canonical array with slot 0 set to the
//! literal `0`, never from the event's current `id` field, so signing an
//! already-signed event yields the same id.

use secp256k1::{schnorr, Message, Secp256k1, XOnlyPublicKey};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::crypto::{encrypt_content, PayloadCodec};
use crate::event::{Event, EventTemplate, IdSlot, KIND_ENCRYPTED_DIRECT_MESSAGE};
use crate::keys::Keys;
use crate::Error;

const SCHNORR_SIGNATURE_LEN: usize = 64;

/// Raw sha256 digest of the canonical serialization.
pub fn event_digest(event: &Event) -> Result<[u8; 32], Error> {
    let serialized = event.canonical_json(IdSlot::Zero)?;
    Ok(Sha256::digest(serialized.as_bytes()).into())
}

/// Hex id for `event`, independent of its stored `id` and `sig`.
pub fn compute_id(event: &Event) -> Result<String, Error> {
    Ok(hex::encode(event_digest(event)?))
}

/// Schnorr signature over the raw digest, hex encoded.
pub fn sign(event: &Event, keys: &Keys) -> Result<String, Error> {
    let message = Message::from_digest(event_digest(event)?);
    let secp = Secp256k1::signing_only();
    let signature = secp.sign_schnorr_no_aux_rand(&message, keys.keypair());
    Ok(hex::encode(signature.serialize()))
}

/// Populate `pubkey`, `id` and `sig` in place.
///
/// Encrypted direct messages have their content rewritten by `codec` first;
/// signing one without a codec is an error.
pub fn compute_id_and_sign(
    event: &mut Event,
    keys: &Keys,
    codec: Option<&dyn PayloadCodec>,
) -> Result<(), Error> {
    if event.kind == KIND_ENCRYPTED_DIRECT_MESSAGE {
        let codec = codec.ok_or(Error::MissingCodec)?;
        event.content = encrypt_content(codec, &event.content)?;
        debug!(codec = codec.name(), bytes = event.content.len(), "Encrypted direct message payload");
    }

    event.pubkey = keys.public_key_hex();
    event.id = compute_id(event)?;
    event.sig = sign(event, keys)?;
    Ok(())
}

/// Turn a template into a signed event authored by `keys`.
pub fn finalize(
    template: EventTemplate,
    keys: &Keys,
    codec: Option<&dyn PayloadCodec>,
) -> Result<Event, Error> {
    let mut event = template.into_unsigned(keys.public_key_hex());
    compute_id_and_sign(&mut event, keys, codec)?;
    Ok(event)
}

/// Check that `id` matches the content and `sig` is valid under `pubkey`.
///
/// Malformed hex, wrong lengths and invalid curve points all yield `false`.
pub fn verify(event: &Event) -> bool {
    let digest = match event_digest(event) {
        Ok(digest) => digest,
        Err(err) => {
            debug!(event_id = %event.id, error = %err, "Failed to serialize event for verification");
            return false;
        }
    };

    if hex::encode(digest) != event.id {
        return false;
    }

    let Ok(sig_bytes) = hex::decode(&event.sig) else {
        return false;
    };
    if sig_bytes.len() != SCHNORR_SIGNATURE_LEN {
        return false;
    }
    let Ok(signature) = schnorr::Signature::from_slice(&sig_bytes) else {
        return false;
    };

    let Ok(pubkey_bytes) = hex::decode(&event.pubkey) else {
        return false;
    };
    let Ok(public_key) = XOnlyPublicKey::from_slice(&pubkey_bytes) else {
        return false;
    };

    let secp = Secp256k1::verification_only();
    secp.verify_schnorr(&signature, &Message::from_digest(digest), &public_key)
        .is_ok()
}
