use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const KIND_METADATA: u64 = 0;
pub const KIND_SHORT_TEXT_NOTE: u64 = 1;
pub const KIND_CONTACTS: u64 = 3;
pub const KIND_ENCRYPTED_DIRECT_MESSAGE: u64 = 4;
pub const KIND_DELETION: u64 = 5;

/// One tag attached to an event.
///
/// Element 0 is the identifier; the remaining elements are positional data,
/// so `data(0)` is element 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Vec<String>);

impl Tag {
    pub fn new(identifier: impl Into<String>, data: Vec<String>) -> Self {
        let mut parts = Vec::with_capacity(1 + data.len());
        parts.push(identifier.into());
        parts.extend(data);
        Self(parts)
    }

    /// `["e", <event id>]`
    pub fn event(event_id: impl Into<String>) -> Self {
        Self::new("e", vec![event_id.into()])
    }

    /// `["p", <public key>]`
    pub fn pubkey(public_key: impl Into<String>) -> Self {
        Self::new("p", vec![public_key.into()])
    }

    pub fn identifier(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn data(&self, index: usize) -> Option<&str> {
        self.0.get(index + 1).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for Tag {
    fn from(parts: Vec<String>) -> Self {
        Self(parts)
    }
}

impl<const N: usize> From<[&str; N]> for Tag {
    fn from(parts: [&str; N]) -> Self {
        Self(parts.iter().map(|part| part.to_string()).collect())
    }
}

/// A relay event as it travels on the wire.
///
/// `id` and `sig` are only meaningful for a signed event; mutating any other
/// field invalidates both and the event has to be signed again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Lowercase hex sha256 of the canonical serialization.
    pub id: String,
    /// Lowercase hex x-only public key of the author.
    pub pubkey: String,
    /// Seconds since the unix epoch.
    pub created_at: u64,
    pub kind: u64,
    pub tags: Vec<Tag>,
    pub content: String,
    /// Lowercase hex Schnorr signature over the id digest.
    pub sig: String,
}

/// Which value occupies slot 0 of the canonical array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSlot {
    /// The literal `0`, used whenever the id is being derived.
    Zero,
    /// The event's stored id.
    Stored,
}

impl Event {
    /// Build the fixed six element array
    /// `[id_slot, pubkey, created_at, kind, tags, content]`.
    pub fn canonical_json(&self, slot: IdSlot) -> Result<String, serde_json::Error> {
        match slot {
            IdSlot::Zero => serde_json::to_string(&(
                0,
                &self.pubkey,
                self.created_at,
                self.kind,
                &self.tags,
                &self.content,
            )),
            IdSlot::Stored => serde_json::to_string(&(
                &self.id,
                &self.pubkey,
                self.created_at,
                self.kind,
                &self.tags,
                &self.content,
            )),
        }
    }

    /// First tag with the given identifier.
    pub fn tag(&self, identifier: &str) -> Option<&Tag> {
        self.tags
            .iter()
            .find(|tag| tag.identifier() == Some(identifier))
    }

    pub fn tag_value(&self, identifier: &str) -> Option<&str> {
        self.tag(identifier).and_then(|tag| tag.data(0))
    }

    pub fn as_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Everything needed to build an event except the author, which comes from
/// the signing keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u64,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl EventTemplate {
    /// Template stamped with the current time.
    pub fn new(kind: u64, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_timestamp(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// An event with empty `id` and `sig`, authored by `pubkey`.
    pub fn into_unsigned(self, pubkey: impl Into<String>) -> Event {
        Event {
            id: String::new(),
            pubkey: pubkey.into(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: String::new(),
        }
    }
}

/// A filter candidate together with its deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub event: Event,
    pub deleted: bool,
}

impl StoredEvent {
    pub fn deleted(event: Event) -> Self {
        Self {
            event,
            deleted: true,
        }
    }
}

impl From<Event> for StoredEvent {
    fn from(event: Event) -> Self {
        Self {
            event,
            deleted: false,
        }
    }
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
