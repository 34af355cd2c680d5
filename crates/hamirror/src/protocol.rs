// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of HaMirror.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Wire shapes of the Home Assistant websocket API — only the subset this
//! mirror speaks, not the full command vocabulary.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use hamirror_core::EntityState;

pub const CMD_GET_STATES: &str = "get_states";
pub const CMD_SUBSCRIBE_EVENTS: &str = "subscribe_events";
pub const EVENT_STATE_CHANGED: &str = "state_changed";

/// `{type: "auth", access_token}` — the only message sent without an id.
pub fn auth_message(token: &str) -> Value {
    json!({ "type": "auth", "access_token": token })
}

/// Builds the `{id, type, ...payload}` command envelope. The payload's keys
/// are flattened into the envelope, matching the hub's command format.
pub fn command_envelope(id: u64, cmd_type: &str, payload: &Value) -> Value {
    let mut envelope = Map::new();
    envelope.insert("id".to_string(), json!(id));
    envelope.insert("type".to_string(), json!(cmd_type));
    if let Some(fields) = payload.as_object() {
        for (key, value) in fields {
            envelope.insert(key.clone(), value.clone());
        }
    }
    Value::Object(envelope)
}

/// Inbound messages, dispatched on the `type` tag. Anything the mirror does
/// not consume parses as `Unknown` and is ignored — never a protocol error.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthRequired,
    AuthOk,
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        #[serde(default)]
        id: Option<u64>,
        #[serde(default)]
        success: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<Value>,
    },
    Event {
        event: EventPayload,
    },
    #[serde(other)]
    Unknown,
}

/// A change notification. `data` stays raw JSON for subscriber callbacks;
/// `state_changed` data is additionally parsed into [`StateChange`].
#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

/// Parsed payload of a `state_changed` event. `new_state: null` means the
/// hub removed the entity.
#[derive(Debug, Deserialize)]
pub struct StateChange {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub new_state: Option<EntityState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_envelope_flattens_payload_keys() {
        let envelope = command_envelope(
            7,
            CMD_SUBSCRIBE_EVENTS,
            &json!({ "event_type": "state_changed" }),
        );
        assert_eq!(
            envelope,
            json!({ "id": 7, "type": "subscribe_events", "event_type": "state_changed" })
        );
    }

    #[test]
    fn command_envelope_without_payload() {
        let envelope = command_envelope(1, CMD_GET_STATES, &Value::Null);
        assert_eq!(envelope, json!({ "id": 1, "type": "get_states" }));
    }

    #[test]
    fn auth_message_shape() {
        assert_eq!(
            auth_message("secret"),
            json!({ "type": "auth", "access_token": "secret" })
        );
    }

    #[test]
    fn parses_auth_flow_messages() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"auth_required","ha_version":"2025.1"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::AuthRequired));

        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"auth_ok","ha_version":"2025.1"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::AuthOk));

        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"auth_invalid","message":"bad token"}"#).unwrap();
        match msg {
            ServerMessage::AuthInvalid { message } => {
                assert_eq!(message.as_deref(), Some("bad token"));
            }
            other => panic!("expected auth_invalid, got {other:?}"),
        }
    }

    #[test]
    fn parses_snapshot_result() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{
                "id": 1,
                "type": "result",
                "success": true,
                "result": [
                    {"entity_id": "sensor.a6_co2", "state": "600", "attributes": {}}
                ]
            }"#,
        )
        .unwrap();
        match msg {
            ServerMessage::Result { id, success, result, .. } => {
                assert_eq!(id, Some(1));
                assert!(success);
                let states: Vec<EntityState> = serde_json::from_value(result).unwrap();
                assert_eq!(states.len(), 1);
                assert_eq!(states[0].entity_id, "sensor.a6_co2");
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn parses_state_changed_event() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{
                "type": "event",
                "event": {
                    "event_type": "state_changed",
                    "data": {
                        "entity_id": "sensor.b4_temp",
                        "new_state": {"entity_id": "sensor.b4_temp", "state": "20", "attributes": {}}
                    }
                }
            }"#,
        )
        .unwrap();
        let ServerMessage::Event { event } = msg else {
            panic!("expected event");
        };
        assert_eq!(event.event_type, EVENT_STATE_CHANGED);
        let change: StateChange = serde_json::from_value(event.data).unwrap();
        assert_eq!(change.entity_id.as_deref(), Some("sensor.b4_temp"));
        assert_eq!(change.new_state.unwrap().state, "20");
    }

    #[test]
    fn removal_event_has_null_new_state() {
        let change: StateChange = serde_json::from_str(
            r#"{"entity_id": "sensor.gone", "new_state": null}"#,
        )
        .unwrap();
        assert_eq!(change.entity_id.as_deref(), Some("sensor.gone"));
        assert!(change.new_state.is_none());
    }

    #[test]
    fn unconsumed_message_types_parse_as_unknown() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"pong","id":3}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Unknown));
    }
}
