//! Device channel wire protocol.
//!
//! JSON messages exchanged over a device's duplex channel. Coordinator→
//! device messages use a fixed `type` tag; the two device→coordinator
//! messages that answer a specific outstanding request (`chunk:data`,
//! `chunk:deleted`) carry the chunk id folded into the `type` string
//! itself (`chunk:data:<uuid>`), so the connection registry can
//! correlate a reply without first parsing its body.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A message received from a device over its duplex channel.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    DeviceRegister(DeviceRegisterPayload),
    DevicePing(DevicePingPayload),
    DeviceStorageUpdate(DeviceStorageUpdatePayload),
    ChunkConfirm(ChunkConfirmPayload),
    ChunkData {
        chunk_id: Uuid,
        success: bool,
        data_base64: Option<String>,
        error: Option<String>,
    },
    ChunkDeleted {
        chunk_id: Uuid,
        success: bool,
        error: Option<String>,
    },
    Disconnect(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRegisterPayload {
    pub logical_device_id: String,
    pub device_type: String,
    pub owner_id: Option<Uuid>,
    pub total_capacity_bytes: i64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevicePingPayload {
    pub logical_device_id: String,
    pub available_capacity_bytes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStorageUpdatePayload {
    pub available_capacity_bytes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkConfirmPayload {
    pub chunk_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// A parse failure for a raw inbound frame. Unlike most of this crate's
/// errors this one never crosses the connection registry boundary; a
/// malformed frame is logged and the connection otherwise continues.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing or invalid 'type' field")]
    MissingType,
    #[error("unrecognized message type: {0}")]
    Unknown(String),
    #[error("malformed chunk id in type string: {0}")]
    BadChunkId(String),
}

impl InboundMessage {
    /// Parse a raw text frame into a typed inbound message.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(text)?;
        let ty = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingType)?;

        if let Some(rest) = ty.strip_prefix("chunk:data:") {
            let chunk_id = rest
                .parse()
                .map_err(|_| ParseError::BadChunkId(rest.to_string()))?;
            let success = value.get("success").and_then(Value::as_bool).unwrap_or(false);
            let data_base64 = value
                .get("data_base64")
                .and_then(Value::as_str)
                .map(str::to_string);
            let error = value.get("error").and_then(Value::as_str).map(str::to_string);
            return Ok(InboundMessage::ChunkData {
                chunk_id,
                success,
                data_base64,
                error,
            });
        }

        if let Some(rest) = ty.strip_prefix("chunk:deleted:") {
            let chunk_id = rest
                .parse()
                .map_err(|_| ParseError::BadChunkId(rest.to_string()))?;
            let success = value.get("success").and_then(Value::as_bool).unwrap_or(false);
            let error = value.get("error").and_then(Value::as_str).map(str::to_string);
            return Ok(InboundMessage::ChunkDeleted {
                chunk_id,
                success,
                error,
            });
        }

        match ty {
            "device:register" => Ok(InboundMessage::DeviceRegister(serde_json::from_value(value)?)),
            "device:ping" => Ok(InboundMessage::DevicePing(serde_json::from_value(value)?)),
            "device:storage:update" => {
                Ok(InboundMessage::DeviceStorageUpdate(serde_json::from_value(value)?))
            }
            "chunk:confirm" => Ok(InboundMessage::ChunkConfirm(serde_json::from_value(value)?)),
            "disconnect" => {
                let reason = value
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified")
                    .to_string();
                Ok(InboundMessage::Disconnect(reason))
            }
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

/// A message the coordinator sends to a device.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "device:registered")]
    DeviceRegistered {
        success: bool,
        device: Option<DeviceSummary>,
        message: String,
    },
    #[serde(rename = "device:pong")]
    DevicePong {
        success: bool,
        timestamp_ms: u64,
        state: String,
    },
    #[serde(rename = "chunk:assign")]
    ChunkAssign {
        chunk_id: Uuid,
        file_id: Uuid,
        sequence_num: i32,
        size_bytes: i64,
        iv: String,
        auth_tag: String,
        aad: String,
        checksum: String,
        ciphertext_base64: String,
    },
    #[serde(rename = "chunk:request")]
    ChunkRequest { chunk_id: Uuid },
    #[serde(rename = "chunk:delete")]
    ChunkDelete { chunk_id: Uuid, reason: String },
}

/// The device-facing view of a registered device, echoed back on
/// `device:registered`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub logical_device_id: String,
    pub state: String,
    pub total_capacity_bytes: i64,
    pub available_capacity_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_register() {
        let json = r#"{"type":"device:register","logical_device_id":"d1","device_type":"phone","owner_id":null,"total_capacity_bytes":1000}"#;
        match InboundMessage::parse(json).unwrap() {
            InboundMessage::DeviceRegister(p) => {
                assert_eq!(p.logical_device_id, "d1");
                assert_eq!(p.total_capacity_bytes, 1000);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_parse_chunk_data_with_embedded_id() {
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"chunk:data:{id}","success":true,"data_base64":"YWJj"}}"#,
        );
        match InboundMessage::parse(&json).unwrap() {
            InboundMessage::ChunkData { chunk_id, success, data_base64, .. } => {
                assert_eq!(chunk_id, id);
                assert!(success);
                assert_eq!(data_base64.unwrap(), "YWJj");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_parse_chunk_deleted() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"type":"chunk:deleted:{id}","success":false,"error":"not found"}}"#);
        match InboundMessage::parse(&json).unwrap() {
            InboundMessage::ChunkDeleted { chunk_id, success, error } => {
                assert_eq!(chunk_id, id);
                assert!(!success);
                assert_eq!(error.unwrap(), "not found");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_parse_unknown_type() {
        let json = r#"{"type":"something:else"}"#;
        assert!(matches!(InboundMessage::parse(json), Err(ParseError::Unknown(_))));
    }

    #[test]
    fn test_parse_missing_type() {
        let json = r#"{"foo":"bar"}"#;
        assert!(matches!(InboundMessage::parse(json), Err(ParseError::MissingType)));
    }

    #[test]
    fn test_outbound_chunk_assign_serializes_with_type_tag() {
        let msg = OutboundMessage::ChunkAssign {
            chunk_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            sequence_num: 0,
            size_bytes: 1024,
            iv: "iv".to_string(),
            auth_tag: "tag".to_string(),
            aad: "aad".to_string(),
            checksum: "sum".to_string(),
            ciphertext_base64: "Y3Q=".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"chunk:assign""#));
    }
}
