use nostr_core::{
    compute_id, finalize, query, verify, Event, EventTemplate, Filter, Keys, StoredEvent, Tag,
    KIND_SHORT_TEXT_NOTE,
};

fn signed(keys: &Keys, created_at: u64, content: &str) -> Event {
    let template = EventTemplate::new(KIND_SHORT_TEXT_NOTE, content)
        .created_at(created_at)
        .tag(Tag::pubkey(keys.public_key_hex()));
    finalize(template, keys, None).unwrap()
}

#[test]
fn signed_event_verifies_after_wire_roundtrip() {
    let keys = Keys::generate();
    let event = signed(&keys, 1_700_000_000, "line one\nline \"two\" \u{1F680}");

    let wire = serde_json::to_string(&serde_json::json!(["EVENT", event])).unwrap();
    let frame: Vec<serde_json::Value> = serde_json::from_str(&wire).unwrap();
    let parsed: Event = serde_json::from_value(frame[1].clone()).unwrap();

    assert_eq!(parsed, event);
    assert!(verify(&parsed));
}

#[test]
fn flipped_content_character_fails_verification() {
    let keys = Keys::generate();
    let mut event = signed(&keys, 1_700_000_000, "hello");
    event.content = "hellp".to_string();
    assert!(!verify(&event));
}

#[test]
fn id_depends_only_on_signed_fields() {
    let keys = Keys::generate();
    let a = signed(&keys, 42, "same");
    let mut b = a.clone();
    b.id = String::new();
    b.sig = "00".repeat(64);
    assert_eq!(compute_id(&a).unwrap(), compute_id(&b).unwrap());
}

#[test]
fn limit_returns_two_most_recent_of_five() {
    let keys = Keys::generate();
    let candidates: Vec<StoredEvent> = (1..=5)
        .map(|ts| StoredEvent::from(signed(&keys, ts, &format!("note {ts}"))))
        .collect();

    let filter = Filter::new().kinds([KIND_SHORT_TEXT_NOTE]).limit(2);
    let result = query(&candidates, &filter, false);

    let stamps: Vec<u64> = result.iter().map(|event| event.created_at).collect();
    assert_eq!(stamps, vec![4, 5]);
}

#[test]
fn empty_filter_and_deleted_events() {
    let keys = Keys::generate();
    let candidates = vec![
        StoredEvent::from(signed(&keys, 1, "kept")),
        StoredEvent::deleted(signed(&keys, 2, "removed")),
    ];

    assert_eq!(query(&candidates, &Filter::new(), false).len(), 1);
    assert_eq!(query(&candidates, &Filter::new(), true).len(), 2);
}
