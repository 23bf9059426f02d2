use serde::{Deserialize, Serialize};

use crate::pose::PoseSnapshot;

/// Outbound coordinator events. Serialized once per broadcast and fanned out
/// to every connected client.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Fixed-rate tick: render this frame using this pose snapshot.
    #[serde(rename = "startFrame")]
    StartFrame {
        frame: u64,
        time: f64,
        #[serde(rename = "deltaTime")]
        delta_time: f64,
        #[serde(rename = "trackingData")]
        tracking_data: PoseSnapshot,
    },
    /// Barrier release: every client acknowledged this frame, present it now.
    #[serde(rename = "displayFrame")]
    DisplayFrame { frame: u64 },
}

/// Inbound client events.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// The client finished rendering `frame` and is ready to present it.
    #[serde(rename = "frameReady")]
    FrameReady { frame: u64 },
}

/// Why an inbound payload was dropped. Neither case closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("unknown message type {0:?}")]
    UnknownType(String),
}

/// Decode an inbound text frame, distinguishing an unrecognized `type` from a
/// payload that does not parse at all so the caller can log them differently.
pub fn decode_client_message(raw: &str) -> Result<ClientMessage, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    match serde_json::from_value(value.clone()) {
        Ok(message) => Ok(message),
        Err(e) => match value.get("type").and_then(|t| t.as_str()) {
            Some(kind) if kind != "frameReady" => Err(DecodeError::UnknownType(kind.to_string())),
            _ => Err(DecodeError::Malformed(e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::TrackedBody;

    #[test]
    fn start_frame_wire_shape() {
        let message = ServerMessage::StartFrame {
            frame: 12,
            time: 0.2,
            delta_time: 1.0 / 60.0,
            tracking_data: PoseSnapshot {
                frame: 900,
                time: 15.3,
                bodies: vec![TrackedBody::untracked(0)],
            },
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "startFrame");
        assert_eq!(json["frame"], 12);
        assert_eq!(json["time"], 0.2);
        assert_eq!(json["deltaTime"].as_f64().unwrap(), 1.0 / 60.0);
        assert_eq!(json["trackingData"]["frame"], 900);
        assert_eq!(json["trackingData"]["bodies"][0]["isTracked"], false);
    }

    #[test]
    fn display_frame_wire_shape() {
        let json = serde_json::to_value(ServerMessage::DisplayFrame { frame: 7 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "displayFrame", "frame": 7}));
    }

    #[test]
    fn decodes_frame_ready() {
        let message = decode_client_message(r#"{"type":"frameReady","frame":41}"#).unwrap();
        assert_eq!(message, ClientMessage::FrameReady { frame: 41 });
    }

    #[test]
    fn unknown_type_is_distinguished() {
        let err = decode_client_message(r#"{"type":"helloServer","frame":1}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(kind) if kind == "helloServer"));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = decode_client_message("not json at all").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn frame_ready_with_missing_frame_is_malformed() {
        let err = decode_client_message(r#"{"type":"frameReady"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn payload_without_type_is_malformed() {
        let err = decode_client_message(r#"{"frame":3}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }
}
