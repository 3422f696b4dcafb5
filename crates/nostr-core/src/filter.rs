use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Error;

/// A relay query.
///
/// Every field is optional; an empty list or `None` places no constraint on
/// the candidate. `e` and `p` references live in their own fields, any other
/// single-letter tag goes into `tags`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireFilter", into = "WireFilter")]
pub struct Filter {
    /// Id prefixes.
    pub ids: Vec<String>,
    pub kinds: Vec<u64>,
    /// Exclusive lower bound on `created_at`.
    pub since: Option<u64>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<u64>,
    /// Public key prefixes.
    pub authors: Vec<String>,
    /// Accepted `data[0]` values of `e` tags.
    pub event_refs: Vec<String>,
    /// Accepted `data[0]` values of `p` tags.
    pub pubkey_refs: Vec<String>,
    /// Accepted tag values keyed by tag identifier.
    pub tags: BTreeMap<char, Vec<String>>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u64>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn kind(self, kind: u64) -> Self {
        self.kinds([kind])
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    pub fn event_refs<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_refs.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn pubkey_refs<I, S>(mut self, pubkeys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pubkey_refs.extend(pubkeys.into_iter().map(Into::into));
        self
    }

    /// Constrain an arbitrary single-letter tag. `e` and `p` are routed to
    /// their dedicated fields. An empty value set adds no constraint.
    pub fn tag<I, S>(mut self, identifier: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return self;
        }
        match identifier {
            'e' => self.event_refs.extend(values),
            'p' => self.pubkey_refs.extend(values),
            other => self.tags.entry(other).or_default().extend(values),
        }
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// On-the-wire shape: `#x` keys for tag constraints, empty fields omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    kinds: Vec<u64>,
    #[serde(rename = "#e", default, skip_serializing_if = "Vec::is_empty")]
    event_refs: Vec<String>,
    #[serde(rename = "#p", default, skip_serializing_if = "Vec::is_empty")]
    pubkey_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(flatten)]
    tags: BTreeMap<String, Vec<String>>,
}

impl TryFrom<WireFilter> for Filter {
    type Error = Error;

    fn try_from(wire: WireFilter) -> Result<Self, Self::Error> {
        let mut tags = BTreeMap::new();
        for (key, values) in wire.tags {
            let identifier = parse_tag_key(&key).ok_or(Error::InvalidTagKey(key))?;
            tags.insert(identifier, values);
        }

        Ok(Self {
            ids: wire.ids,
            kinds: wire.kinds,
            since: wire.since,
            until: wire.until,
            authors: wire.authors,
            event_refs: wire.event_refs,
            pubkey_refs: wire.pubkey_refs,
            tags,
            limit: wire.limit,
        })
    }
}

impl From<Filter> for WireFilter {
    fn from(filter: Filter) -> Self {
        let mut event_refs = filter.event_refs;
        let mut pubkey_refs = filter.pubkey_refs;
        let mut tags = BTreeMap::new();
        for (identifier, values) in filter.tags {
            match identifier {
                _ if values.is_empty() => {}
                'e' => event_refs.extend(values),
                'p' => pubkey_refs.extend(values),
                other => {
                    tags.insert(format!("#{other}"), values);
                }
            }
        }

        Self {
            ids: filter.ids,
            authors: filter.authors,
            kinds: filter.kinds,
            event_refs,
            pubkey_refs,
            since: filter.since,
            until: filter.until,
            limit: filter.limit,
            tags,
        }
    }
}

fn parse_tag_key(key: &str) -> Option<char> {
    let mut chars = key.strip_prefix('#')?.chars();
    match (chars.next(), chars.next()) {
        (Some(identifier), None) if identifier.is_ascii_alphabetic() => Some(identifier),
        _ => None,
    }
}
