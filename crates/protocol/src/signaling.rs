use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One ICE candidate as exchanged over the signaling socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidateData {
    pub candidate: String,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default)]
    pub sdp_mid: Option<String>,
}

/// The backend sends either a single candidate object or an array of them
/// under `SET_REMOTE_ICE_CANDIDATES`; the reference client only ever produced
/// arrays, but a conformant peer accepts both shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceCandidatePayload {
    Many(Vec<IceCandidateData>),
    One(IceCandidateData),
}

impl IceCandidatePayload {
    pub fn into_vec(self) -> Vec<IceCandidateData> {
        match self {
            IceCandidatePayload::Many(v) => v,
            IceCandidatePayload::One(c) => vec![c],
        }
    }
}

/// Message type discriminant on the WebRTC signaling socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalingType {
    #[serde(rename = "CREATE_PEER_CONNECTION")]
    CreatePeerConnection,
    #[serde(rename = "CREATE_OFFER")]
    CreateOffer,
    #[serde(rename = "CREATE_ANSWER")]
    CreateAnswer,
    #[serde(rename = "SET_REMOTE_OFFER")]
    SetRemoteOffer,
    #[serde(rename = "SET_REMOTE_ANSWER")]
    SetRemoteAnswer,
    #[serde(rename = "SET_REMOTE_ICE_CANDIDATES")]
    SetRemoteIceCandidates,
    #[serde(rename = "LOCAL_ICE_CANDIDATES")]
    LocalIceCandidates,
    #[serde(rename = "PEER_CONNECTION_STATE")]
    PeerConnectionState,
    #[serde(rename = "CLOSE_PEER_CONNECTION")]
    ClosePeerConnection,
}

/// Envelope for every message exchanged on the signaling socket. `data` is
/// left as a raw JSON value because its shape depends on `r#type` (an SDP
/// string, an ICE candidate payload, a connection-state string, or nothing).
/// `session_id` is always the camelCase `sessionId` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    #[serde(rename = "type")]
    pub kind: SignalingType,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Correlation id echoed back when the backend includes one.
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<i64>,
}

impl SignalingEnvelope {
    pub fn reply(kind: SignalingType, session_id: Option<String>) -> Self {
        Self {
            kind,
            session_id,
            data: None,
            error: None,
            event_id: None,
            message_id: None,
        }
    }

    /// Copy correlation fields from an incoming message onto a reply,
    /// matching the reference peer's "echo event_id/message_id when present"
    /// behavior.
    pub fn with_correlation_from(mut self, incoming: &SignalingEnvelope) -> Self {
        self.event_id = incoming.event_id.clone();
        self.message_id = incoming.message_id.clone();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_candidate_payload_accepts_single_object() {
        let json = r#"{"candidate": "candidate:1 1 UDP 1 1.2.3.4 1000 typ host", "sdpMLineIndex": 0, "sdpMid": "0"}"#;
        let payload: IceCandidatePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.into_vec().len(), 1);
    }

    #[test]
    fn ice_candidate_payload_accepts_array() {
        let json = r#"[
            {"candidate": "candidate:1", "sdpMLineIndex": 0, "sdpMid": "0"},
            {"candidate": "candidate:2", "sdpMLineIndex": 1, "sdpMid": "1"}
        ]"#;
        let payload: IceCandidatePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.into_vec().len(), 2);
    }

    #[test]
    fn envelope_round_trips_session_id_as_camel_case() {
        let env = SignalingEnvelope::reply(SignalingType::CreatePeerConnection, Some("sess-1".into()));
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""sessionId":"sess-1""#));
        assert!(json.contains(r#""type":"CREATE_PEER_CONNECTION""#));
    }

    #[test]
    fn reply_echoes_correlation_fields() {
        let mut incoming = SignalingEnvelope::reply(SignalingType::CreatePeerConnection, Some("s".into()));
        incoming.event_id = Some("evt-1".into());
        incoming.message_id = Some(42);

        let reply = SignalingEnvelope::reply(SignalingType::CreatePeerConnection, Some("s".into()))
            .with_correlation_from(&incoming);
        assert_eq!(reply.event_id.as_deref(), Some("evt-1"));
        assert_eq!(reply.message_id, Some(42));
    }
}
