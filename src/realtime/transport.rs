//! WebRTC transport assembly and the outbound media pump
//!
//! Builds the peer connection, the single ordered event channel, and the
//! local Opus track, and runs the pump that turns captured PCM chunks into
//! timed 20ms track samples. Teardown here owns the one ordering rule that
//! matters: media stops first, then the event channel, then the peer.

use super::error::ConnectError;
use super::signaling::{RealtimeCredential, SignalingClient};
use crate::audio::{AudioChunk, CaptureHandle, CAPTURE_SAMPLE_RATE};
use audiopus::coder::Encoder;
use audiopus::{Application, Channels, SampleRate};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Transcript channel label expected by the realtime service
const EVENTS_CHANNEL_LABEL: &str = "oai-events";

/// Samples per 20ms Opus frame at the capture rate
const OPUS_FRAME_SAMPLES: usize = (CAPTURE_SAMPLE_RATE as usize / 1000) * 20;

/// Duration of one encoded frame
const OPUS_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Upper bound for one encoded Opus packet
const MAX_OPUS_PACKET: usize = 4000;

/// Build a peer connection with default codecs and interceptors.
pub(crate) async fn build_peer_connection() -> Result<RTCPeerConnection, ConnectError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let peer = api.new_peer_connection(RTCConfiguration::default()).await?;
    Ok(peer)
}

/// Create the single ordered, binary-safe transcript channel.
///
/// Must happen before the offer is generated so the channel is negotiated
/// in the initial media description exchange.
pub(crate) async fn create_event_channel(
    peer: &RTCPeerConnection,
) -> Result<Arc<RTCDataChannel>, ConnectError> {
    let init = RTCDataChannelInit {
        ordered: Some(true),
        ..Default::default()
    };
    let channel = peer
        .create_data_channel(EVENTS_CHANNEL_LABEL, Some(init))
        .await?;
    Ok(channel)
}

/// Create the local Opus track carrying microphone audio.
///
/// The RTP clock for Opus is always 48kHz stereo regardless of the
/// encoder's input rate.
pub(crate) fn build_audio_track() -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        "microphone".to_owned(),
        "intervox".to_owned(),
    ))
}

/// Run the offer/answer exchange against the realtime service.
///
/// The event channel and audio track must already be attached so they are
/// part of the generated offer.
pub(crate) async fn negotiate(
    peer: &RTCPeerConnection,
    signaling: &SignalingClient,
    credential: &RealtimeCredential,
) -> Result<(), ConnectError> {
    let offer = peer.create_offer(None).await?;

    // Wait for ICE gathering so the posted offer carries candidates
    let mut gather_complete = peer.gathering_complete_promise().await;
    peer.set_local_description(offer).await?;
    let _ = gather_complete.recv().await;

    let local = peer
        .local_description()
        .await
        .ok_or_else(|| ConnectError::Negotiation("local description missing".into()))?;

    let answer_sdp = signaling.exchange_sdp(credential, &local.sdp).await?;
    let answer = RTCSessionDescription::answer(answer_sdp)?;
    peer.set_remote_description(answer).await?;

    info!("Remote answer applied");
    Ok(())
}

/// Release transport resources: stop media, close the event channel, close
/// the peer, always in that order. Safe with partially allocated state and
/// safe to call more than once.
pub(crate) async fn teardown(
    capture: Option<CaptureHandle>,
    channel: Option<Arc<RTCDataChannel>>,
    peer: Option<Arc<RTCPeerConnection>>,
) {
    if let Some(mut handle) = capture {
        handle.stop();
    }
    if let Some(channel) = channel {
        if let Err(e) = channel.close().await {
            debug!("Event channel close: {}", e);
        }
    }
    if let Some(peer) = peer {
        if let Err(e) = peer.close().await {
            debug!("Peer connection close: {}", e);
        }
    }
}

/// Frames PCM into 20ms Opus packets for the track.
pub(crate) struct OpusStreamer {
    encoder: Encoder,
    frame_buf: Vec<i16>,
}

impl OpusStreamer {
    pub(crate) fn new() -> Result<Self, ConnectError> {
        let encoder = Encoder::new(SampleRate::Hz24000, Channels::Mono, Application::Voip)
            .map_err(|e| ConnectError::Encoder(e.to_string()))?;
        Ok(Self {
            encoder,
            frame_buf: Vec::with_capacity(OPUS_FRAME_SAMPLES * 4),
        })
    }

    /// Append captured PCM and encode every complete frame.
    ///
    /// Trailing samples short of a frame stay buffered for the next chunk.
    pub(crate) fn encode_chunk(&mut self, samples: &[i16]) -> Vec<Bytes> {
        self.frame_buf.extend_from_slice(samples);

        let mut packets = Vec::new();
        while self.frame_buf.len() >= OPUS_FRAME_SAMPLES {
            let frame: Vec<i16> = self.frame_buf.drain(..OPUS_FRAME_SAMPLES).collect();
            let mut packet = vec![0u8; MAX_OPUS_PACKET];
            match self.encoder.encode(&frame, &mut packet) {
                Ok(len) => {
                    packet.truncate(len);
                    packets.push(Bytes::from(packet));
                }
                Err(e) => {
                    warn!("Opus encode failed, frame dropped: {}", e);
                }
            }
        }
        packets
    }
}

/// Forward captured PCM to the outbound track as timed Opus samples.
///
/// Exits when the capture channel closes (microphone stopped) or the first
/// track write fails (transport closing).
pub(crate) fn spawn_media_pump(
    mut audio_rx: mpsc::Receiver<AudioChunk>,
    track: Arc<TrackLocalStaticSample>,
    mut streamer: OpusStreamer,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut frames_written = 0u64;
        while let Some(chunk) = audio_rx.recv().await {
            for payload in streamer.encode_chunk(&chunk.samples) {
                let sample = Sample {
                    data: payload,
                    duration: OPUS_FRAME_DURATION,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    debug!("Track write failed, media pump stopping: {}", e);
                    return;
                }
                frames_written += 1;
                if frames_written == 1 {
                    info!("First audio frame written to track");
                }
            }
        }
        debug!("Media pump exiting after {} frames", frames_written);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opus_streamer_frames_full_chunks() {
        let mut streamer = OpusStreamer::new().unwrap();

        // One 100ms capture chunk yields five 20ms frames
        let chunk = vec![0i16; OPUS_FRAME_SAMPLES * 5];
        let packets = streamer.encode_chunk(&chunk);
        assert_eq!(packets.len(), 5);
        assert!(packets.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn test_opus_streamer_buffers_remainder() {
        let mut streamer = OpusStreamer::new().unwrap();

        let first = vec![0i16; OPUS_FRAME_SAMPLES + 100];
        let packets = streamer.encode_chunk(&first);
        assert_eq!(packets.len(), 1);

        // The 100 leftover samples complete a frame with the next chunk
        let second = vec![0i16; OPUS_FRAME_SAMPLES - 100];
        let packets = streamer.encode_chunk(&second);
        assert_eq!(packets.len(), 1);
    }

    #[tokio::test]
    async fn test_peer_assembly_and_teardown() {
        let peer = build_peer_connection().await.unwrap();
        let channel = create_event_channel(&peer).await.unwrap();
        assert_eq!(channel.label(), EVENTS_CHANNEL_LABEL);

        let peer = Arc::new(peer);
        teardown(None, Some(channel), Some(peer.clone())).await;
        assert_eq!(
            peer.connection_state(),
            webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState::Closed
        );

        // Tearing down an already-closed peer is a no-op
        teardown(None, None, Some(peer)).await;
    }
}
