//! WebRTC peer for two-way-talk / push-AV verification: a receive-only media
//! participant that negotiates with a remote controller over the signaling
//! socket and reports an audio level meter for the "speaker" side.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use th_protocol::signaling::{IceCandidatePayload, SignalingEnvelope, SignalingType};
use tracing::{info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

const STUN_SERVERS: &[&str] = &["stun:stun.l.google.com:19302", "stun:stun1.l.google.com:19302"];

/// Receive-only WebRTC peer. One per two-way-talk / push-AV prompt (or
/// pre-warmed once per session — see DESIGN.md).
pub struct VerificationPeer {
    pub connection: Arc<RTCPeerConnection>,
    connected: Arc<AtomicBool>,
    /// 0-100 "speaker" (remote audio) level, computed from RTP payload RMS.
    speaker_level: Arc<AtomicU32>,
    session_id: std::sync::Mutex<Option<String>>,
}

impl VerificationPeer {
    pub async fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_OPUS.to_owned(),
                        clock_rate: 48000,
                        channels: 2,
                        ..Default::default()
                    },
                    payload_type: 111,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )
            .context("failed to register opus codec")?;
        media_engine
            .register_codec(
                webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_H264.to_owned(),
                        clock_rate: 90000,
                        ..Default::default()
                    },
                    payload_type: 102,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .context("failed to register h264 codec")?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .context("failed to register default interceptors")?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let connection = Arc::new(api.new_peer_connection(config).await.context("failed to create peer connection")?);

        // Both transceivers are receive-only: the CLI observes the browser's
        // camera/mic, it never sends media of its own.
        connection
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .context("failed to add audio transceiver")?;
        connection
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .context("failed to add video transceiver")?;

        let connected = Arc::new(AtomicBool::new(false));
        let speaker_level = Arc::new(AtomicU32::new(0));

        {
            let connected = connected.clone();
            connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let connected = connected.clone();
                Box::pin(async move {
                    match state {
                        RTCPeerConnectionState::Connected => connected.store(true, Ordering::SeqCst),
                        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                            connected.store(false, Ordering::SeqCst)
                        }
                        _ => {}
                    }
                    info!(?state, "verification peer connection state changed");
                })
            }));
        }

        {
            let speaker_level = speaker_level.clone();
            connection.on_track(Box::new(move |track, _receiver, _transceiver| {
                let speaker_level = speaker_level.clone();
                Box::pin(async move {
                    if track.kind() == RTPCodecType::Audio {
                        run_audio_level_meter(track, speaker_level).await;
                    } else {
                        run_video_telemetry(track).await;
                    }
                })
            }));
        }

        Ok(Self {
            connection,
            connected,
            speaker_level,
            session_id: std::sync::Mutex::new(None),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Speaker (remote audio) level 0-100. Local mic level is always 0 since
    /// this peer never sends audio of its own.
    pub fn audio_levels(&self) -> (u32, u32) {
        (self.speaker_level.load(Ordering::SeqCst), 0)
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().unwrap().clone()
    }

    /// Dispatch one inbound signaling message, returning the reply envelope
    /// to send back, if any.
    pub async fn handle_signaling(&self, incoming: SignalingEnvelope) -> Result<Option<SignalingEnvelope>> {
        if let Some(sid) = incoming.session_id.clone() {
            *self.session_id.lock().unwrap() = Some(sid);
        }
        let session_id = self.session_id();

        match incoming.kind {
            SignalingType::CreatePeerConnection => {
                let reply = SignalingEnvelope::reply(SignalingType::CreatePeerConnection, session_id)
                    .with_correlation_from(&incoming);
                Ok(Some(reply))
            }
            SignalingType::CreateOffer => {
                let offer = self.connection.create_offer(None).await.context("failed to create offer")?;
                self.connection.set_local_description(offer.clone()).await.context("failed to set local description")?;
                let mut reply = SignalingEnvelope::reply(SignalingType::CreateOffer, session_id).with_correlation_from(&incoming);
                reply.data = Some(serde_json::Value::String(offer.sdp));
                Ok(Some(reply))
            }
            SignalingType::SetRemoteOffer => {
                let sdp = incoming
                    .data
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .context("SET_REMOTE_OFFER missing sdp data")?;
                let desc = RTCSessionDescription::offer(sdp.to_string()).context("invalid offer sdp")?;
                self.connection.set_remote_description(desc).await.context("failed to set remote offer")?;
                let answer = self.connection.create_answer(None).await.context("failed to create answer")?;
                self.connection.set_local_description(answer.clone()).await.context("failed to set local description")?;
                let mut reply = SignalingEnvelope::reply(SignalingType::CreateAnswer, session_id).with_correlation_from(&incoming);
                reply.data = Some(serde_json::Value::String(answer.sdp));
                Ok(Some(reply))
            }
            SignalingType::SetRemoteAnswer => {
                let sdp = incoming
                    .data
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .context("SET_REMOTE_ANSWER missing sdp data")?;
                let desc = RTCSessionDescription::answer(sdp.to_string()).context("invalid answer sdp")?;
                self.connection.set_remote_description(desc).await.context("failed to set remote answer")?;
                Ok(None)
            }
            SignalingType::SetRemoteIceCandidates => {
                let data = incoming.data.clone().unwrap_or(serde_json::Value::Null);
                let payload: IceCandidatePayload =
                    serde_json::from_value(data).context("invalid ICE candidate payload")?;
                for candidate in payload.into_vec() {
                    let init = RTCIceCandidateInit {
                        candidate: candidate.candidate,
                        sdp_mid: candidate.sdp_mid.or_else(|| Some("0".to_string())),
                        sdp_mline_index: candidate.sdp_m_line_index.or(Some(0)),
                        username_fragment: None,
                    };
                    self.connection.add_ice_candidate(init).await.context("failed to add ICE candidate")?;
                }
                Ok(None)
            }
            SignalingType::PeerConnectionState => Ok(None),
            SignalingType::ClosePeerConnection => {
                warn!("received CLOSE_PEER_CONNECTION; keeping signaling socket alive for renegotiation");
                Ok(None)
            }
            SignalingType::LocalIceCandidates => Ok(None),
        }
    }

    /// Build the outbound `LOCAL_ICE_CANDIDATES` message for a locally
    /// gathered ICE candidate.
    pub fn local_candidate_message(&self, candidate: RTCIceCandidate) -> Result<SignalingEnvelope> {
        let init = candidate.to_json().context("failed to serialize local ICE candidate")?;
        let mut envelope = SignalingEnvelope::reply(SignalingType::LocalIceCandidates, self.session_id());
        envelope.data = Some(serde_json::json!({
            "candidate": init.candidate,
            "sdpMLineIndex": init.sdp_mline_index,
            "sdpMid": init.sdp_mid,
        }));
        Ok(envelope)
    }

    pub async fn close(&self) -> Result<()> {
        self.connection.close().await.context("failed to close peer connection")
    }

    /// Connect to the signaling socket and run the negotiate/ICE loop until
    /// the socket closes or errors. Locally gathered ICE candidates are
    /// pushed back over the same socket as `LOCAL_ICE_CANDIDATES` messages.
    ///
    /// Takes `self` behind an `Arc` so the ICE candidate callback can hold a
    /// reference back into the peer; the resulting reference cycle is
    /// accepted here since a peer lives for the process's lifetime.
    pub async fn run_signaling(self: Arc<Self>, url: &str) -> Result<()> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .context("failed to connect to WebRTC signaling socket")?;
        let (mut write, mut read) = ws_stream.split();
        let (outbox_tx, mut outbox_rx) = tokio::sync::mpsc::unbounded_channel::<SignalingEnvelope>();

        {
            let peer = self.clone();
            let outbox_tx = outbox_tx.clone();
            self.connection.on_ice_candidate(Box::new(move |candidate| {
                let peer = peer.clone();
                let outbox_tx = outbox_tx.clone();
                Box::pin(async move {
                    if let Some(candidate) = candidate {
                        match peer.local_candidate_message(candidate) {
                            Ok(envelope) => {
                                let _ = outbox_tx.send(envelope);
                            }
                            Err(err) => warn!(%err, "failed to build local ICE candidate message"),
                        }
                    }
                })
            }));
        }

        loop {
            tokio::select! {
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<SignalingEnvelope>(&text) {
                                Ok(envelope) => match self.handle_signaling(envelope).await {
                                    Ok(Some(reply)) => {
                                        let payload = serde_json::to_string(&reply).context("failed to serialize signaling reply")?;
                                        write.send(Message::Text(payload.into())).await.context("failed to send signaling reply")?;
                                    }
                                    Ok(None) => {}
                                    Err(err) => warn!(%err, "failed to handle signaling message"),
                                },
                                Err(err) => warn!(%err, "received invalid signaling message"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(err).context("WebRTC signaling socket error"),
                    }
                }
                Some(envelope) = outbox_rx.recv() => {
                    let payload = serde_json::to_string(&envelope).context("failed to serialize local ICE candidate")?;
                    write.send(Message::Text(payload.into())).await.context("failed to send local ICE candidate")?;
                }
            }
        }
    }
}

/// RMS-based audio level meter, matching the reference session's formula:
/// `level = min(100, int(rms(samples) * 200))`.
async fn run_audio_level_meter(
    track: Arc<webrtc::track::track_remote::TrackRemote>,
    speaker_level: Arc<AtomicU32>,
) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _attrs)) => {
                let level = rms_level(&packet.payload);
                speaker_level.store(level, Ordering::SeqCst);
            }
            Err(_) => break,
        }
    }
}

/// Decoded video frames are observed for telemetry only in this client; the
/// actual frame isn't retained or re-encoded.
async fn run_video_telemetry(track: Arc<webrtc::track::track_remote::TrackRemote>) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _attrs)) => {
                tracing::trace!(bytes = packet.payload.len(), "received remote video RTP packet");
            }
            Err(_) => break,
        }
    }
}

/// Compute an 0-100 level from raw bytes treated as signed 16-bit PCM-ish
/// samples, matching `min(100, int(rms * 200))` where `rms` is normalized to
/// [0.0, 1.0] range. RTP payloads here carry encoded (Opus) audio, not raw
/// PCM, so this is a coarse energy proxy rather than a true PCM RMS; it
/// reproduces the reference client's formula on whatever bytes it is fed.
fn rms_level(payload: &[u8]) -> u32 {
    if payload.is_empty() {
        return 0;
    }
    let sum_sq: f64 = payload
        .iter()
        .map(|&b| {
            let v = (b as f64 - 128.0) / 128.0;
            v * v
        })
        .sum();
    let rms = (sum_sq / payload.len() as f64).sqrt();
    let level = (rms * 200.0).round() as i64;
    level.clamp(0, 100) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_level_is_zero_for_silence() {
        let silence = vec![128u8; 100];
        assert_eq!(rms_level(&silence), 0);
    }

    #[test]
    fn rms_level_is_bounded_at_100() {
        let loud: Vec<u8> = (0..100).map(|i| if i % 2 == 0 { 0 } else { 255 }).collect();
        assert!(rms_level(&loud) <= 100);
    }

    #[test]
    fn rms_level_empty_payload_is_zero() {
        assert_eq!(rms_level(&[]), 0);
    }
}
