//! Filter evaluation over in-memory candidates.
//!
//! Two entry points exist for tag constraints and they are intentionally not
//! unified: [`matches`] compares a tag's `data[0]` against the accepted set,
//! [`matches_single`] compares `data[1]`.

use std::borrow::Borrow;

use crate::event::{Event, StoredEvent, Tag};
use crate::filter::Filter;

/// Evaluate `filter` against a candidate drawn from a query sequence.
pub fn matches(candidate: &StoredEvent, filter: &Filter, include_deleted: bool) -> bool {
    matches_common(candidate, filter, include_deleted)
        && extra_tags_match(&candidate.event, filter, |tag, values| {
            tag.data(0)
                .is_some_and(|value| values.iter().any(|accepted| accepted == value))
        })
}

/// Evaluate `filter` against a single event on its own.
///
/// Differs from [`matches`] only in the additional tag constraints, which
/// look at `data[1]` of the tag.
pub fn matches_single(candidate: &StoredEvent, filter: &Filter, include_deleted: bool) -> bool {
    matches_common(candidate, filter, include_deleted)
        && extra_tags_match(&candidate.event, filter, |tag, values| match tag.data(1) {
            Some(value) => values.iter().any(|accepted| accepted.as_str() == value),
            None => false,
        })
}

/// Keep the `limit` most recent events, returned oldest first.
///
/// The sort is stable so events sharing a timestamp keep their input order.
/// Without a limit the input is returned unchanged.
pub fn apply_limit<E: Borrow<Event>>(mut events: Vec<E>, limit: Option<usize>) -> Vec<E> {
    let Some(limit) = limit else {
        return events;
    };
    events.sort_by_key(|event| event.borrow().created_at);
    let start = events.len().saturating_sub(limit);
    events.split_off(start)
}

/// Run `filter` over `candidates` and apply its limit.
pub fn query<'a>(
    candidates: &'a [StoredEvent],
    filter: &Filter,
    include_deleted: bool,
) -> Vec<&'a Event> {
    let hits = candidates
        .iter()
        .filter(|candidate| matches(candidate, filter, include_deleted))
        .map(|candidate| &candidate.event)
        .collect();
    apply_limit(hits, filter.limit)
}

/// True when any of `filters` accepts the candidate.
pub fn matches_any(candidate: &StoredEvent, filters: &[Filter], include_deleted: bool) -> bool {
    filters
        .iter()
        .any(|filter| matches(candidate, filter, include_deleted))
}

fn matches_common(candidate: &StoredEvent, filter: &Filter, include_deleted: bool) -> bool {
    let event = &candidate.event;

    if candidate.deleted && !include_deleted {
        return false;
    }

    if !filter.ids.is_empty() && !filter.ids.iter().any(|id| event.id.starts_with(id.as_str())) {
        return false;
    }

    if !filter.kinds.is_empty() && !filter.kinds.contains(&event.kind) {
        return false;
    }

    if filter.since.is_some_and(|since| event.created_at <= since) {
        return false;
    }

    if filter.until.is_some_and(|until| event.created_at >= until) {
        return false;
    }

    let mut authors = filter
        .authors
        .iter()
        .filter(|author| !author.is_empty())
        .peekable();
    if authors.peek().is_some() && !authors.any(|author| event.pubkey.starts_with(author.as_str()))
    {
        return false;
    }

    if !filter.event_refs.is_empty() && !has_reference(event, "e", &filter.event_refs) {
        return false;
    }

    if !filter.pubkey_refs.is_empty() && !has_reference(event, "p", &filter.pubkey_refs) {
        return false;
    }

    true
}

fn has_reference(event: &Event, identifier: &str, accepted: &[String]) -> bool {
    event.tags.iter().any(|tag| {
        tag.identifier() == Some(identifier)
            && tag
                .data(0)
                .is_some_and(|value| accepted.iter().any(|id| id == value))
    })
}

fn extra_tags_match<F>(event: &Event, filter: &Filter, accepts: F) -> bool
where
    F: Fn(&Tag, &[String]) -> bool,
{
    filter
        .tags
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .all(|(identifier, values)| {
            let identifier = identifier.to_string();
            event.tags.iter().any(|tag| {
                tag.identifier() == Some(identifier.as_str()) && accepts(tag, values)
            })
        })
}
