//! Relay wire frames.
//!
//! Every frame is a JSON array whose first element names the message.

use nostr_core::{Event, Filter};
use serde_json::Value;

use crate::error::Error;

/// Frames sent from client to relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["EVENT", event]`
    Event(Event),
    /// `["REQ", subscription_id, filter, ...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    /// `["CLOSE", subscription_id]`
    Close { subscription_id: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, Error> {
        let value = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = Vec::with_capacity(filters.len() + 2);
                frame.push(Value::from("REQ"));
                frame.push(Value::from(subscription_id.as_str()));
                for filter in filters {
                    frame.push(serde_json::to_value(filter)?);
                }
                Value::Array(frame)
            }
            ClientMessage::Close { subscription_id } => serde_json::json!(["CLOSE", subscription_id]),
        };
        Ok(value.to_string())
    }
}

/// Frames received from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", subscription_id, event]`
    Event {
        subscription_id: String,
        event: Event,
    },
    /// `["NOTICE", message]`
    Notice { message: String },
    /// `["EOSE", subscription_id]`
    Eose { subscription_id: String },
    /// `["OK", event_id, accepted, message]`
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// `["CLOSED", subscription_id, message]`
    Closed {
        subscription_id: String,
        message: String,
    },
    /// `["AUTH", challenge]`
    Auth { challenge: String },
    /// Any frame whose tag is not recognised, or an OK/CLOSED/AUTH frame
    /// that does not have the expected shape. Carries the tag.
    Other(String),
}

impl RelayMessage {
    /// Decode one frame. The tag is matched case-insensitively.
    ///
    /// EVENT, NOTICE and EOSE frames must be complete; anything that is not
    /// a JSON array led by a string is rejected.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let frame: Vec<Value> = serde_json::from_str(text)
            .map_err(|err| Error::InvalidFrame(format!("not a JSON array: {err}")))?;

        let tag = frame
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidFrame("first element is not a string".to_string()))?;

        match tag.to_ascii_uppercase().as_str() {
            "EVENT" => {
                let subscription_id = string_at(&frame, 1, "subscription id")?;
                let raw = frame
                    .get(2)
                    .ok_or_else(|| Error::InvalidFrame("EVENT without event".to_string()))?;
                let event: Event = serde_json::from_value(raw.clone())
                    .map_err(|err| Error::InvalidFrame(format!("malformed event: {err}")))?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "NOTICE" => Ok(RelayMessage::Notice {
                message: string_at(&frame, 1, "notice message")?,
            }),
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: string_at(&frame, 1, "subscription id")?,
            }),
            "OK" => Ok(parse_ok(&frame).unwrap_or_else(|| RelayMessage::Other(tag.to_string()))),
            "CLOSED" => Ok(match (str_at(&frame, 1), str_at(&frame, 2)) {
                (Some(subscription_id), message) => RelayMessage::Closed {
                    subscription_id: subscription_id.to_string(),
                    message: message.unwrap_or_default().to_string(),
                },
                _ => RelayMessage::Other(tag.to_string()),
            }),
            "AUTH" => Ok(match str_at(&frame, 1) {
                Some(challenge) => RelayMessage::Auth {
                    challenge: challenge.to_string(),
                },
                None => RelayMessage::Other(tag.to_string()),
            }),
            _ => Ok(RelayMessage::Other(tag.to_string())),
        }
    }
}

fn parse_ok(frame: &[Value]) -> Option<RelayMessage> {
    Some(RelayMessage::Ok {
        event_id: str_at(frame, 1)?.to_string(),
        accepted: frame.get(2)?.as_bool()?,
        message: str_at(frame, 3).unwrap_or_default().to_string(),
    })
}

fn str_at(frame: &[Value], index: usize) -> Option<&str> {
    frame.get(index).and_then(Value::as_str)
}

fn string_at(frame: &[Value], index: usize, what: &str) -> Result<String, Error> {
    str_at(frame, index)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidFrame(format!("missing {what}")))
}
