//! Realtime transcription session over WebRTC
//!
//! One connection attempt to the speech-to-text service. `open` runs the
//! negotiation steps strictly in order: mint a short-lived credential,
//! build the peer connection, create the event channel, acquire the
//! microphone and attach its track, then exchange session descriptions.
//! Transcript events arrive on the data channel and are published to
//! subscribers after alias normalization. There is no reconnection: a lost
//! or failed session is closed and a new one opened by the caller.

mod error;
mod events;
mod signaling;
mod transport;

pub use error::ConnectError;
pub use signaling::RetryTrigger;

use crate::audio::{self, CaptureHandle};
use crate::transcript::TranscriptEvent;
use bytes::Bytes;
use signaling::SignalingClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// How long close() waits for the pumps to drain before detaching them
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifecycle of a realtime session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Open,
    Closed,
    Failed,
}

/// Events published to subscribers
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// Event channel opened (emitted at most once per session)
    Connected,
    /// Event channel closed (emitted at most once per session)
    Disconnected,
    /// Normalized transcript event
    Transcript(TranscriptEvent),
    /// Non-fatal error reported by the service or transport
    ServiceError { message: String },
}

/// Connection settings for one session attempt
#[derive(Debug, Clone, Default)]
pub struct RealtimeOptions {
    /// Backend that mints realtime credentials
    pub backend_base_url: String,
    /// Bearer token for the backend, if it requires one
    pub auth_token: Option<String>,
    /// Language hint forwarded to the transcription service
    pub language: Option<String>,
    /// Model hint forwarded to the transcription service
    pub model: Option<String>,
    /// What counts as a rejected SDP exchange
    pub retry_trigger: RetryTrigger,
}

/// Internal signals funneled from the channel callbacks into one queue so
/// frames are processed one at a time, in arrival order
enum ChannelSignal {
    Open,
    Frame(Bytes),
    TransportError(String),
    Close,
}

/// An open realtime session
pub struct RealtimeSession {
    peer: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
    capture: Mutex<Option<CaptureHandle>>,
    event_tx: broadcast::Sender<RealtimeEvent>,
    state: Arc<Mutex<SessionState>>,
    closed: AtomicBool,
    event_pump: Mutex<Option<JoinHandle<()>>>,
    media_pump: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeSession {
    /// Open a realtime session for `session_id`.
    ///
    /// Any failure before the answer is applied releases every resource
    /// acquired so far; an error return never leaks a running microphone
    /// or a half-built transport.
    pub async fn open(
        session_id: &str,
        options: RealtimeOptions,
    ) -> Result<Self, ConnectError> {
        let signaling = SignalingClient::new(
            &options.backend_base_url,
            options.auth_token.clone(),
            options.retry_trigger,
        )?;

        // Credential first: a mint failure aborts before anything is allocated
        let credential = signaling
            .mint_credential(
                session_id,
                options.language.as_deref(),
                options.model.as_deref(),
            )
            .await?;

        let state = Arc::new(Mutex::new(SessionState::Negotiating));
        let (event_tx, _) = broadcast::channel(100);

        info!(session_id = %session_id, "Negotiating realtime transport");

        let peer = Arc::new(transport::build_peer_connection().await?);
        let mut guard = NegotiationGuard::new(peer.clone());

        // The event channel must exist before the offer so it is part of
        // the initial media description exchange
        let channel = transport::create_event_channel(&peer).await?;
        guard.channel = Some(channel.clone());

        let (signal_tx, signal_rx) = mpsc::channel(256);
        wire_channel_callbacks(&channel, signal_tx);

        let streamer = transport::OpusStreamer::new()?;

        // Microphone and track attach before the local offer is generated
        let (capture, audio_rx) = audio::start_capture()?;
        guard.capture = Some(capture);

        let track = transport::build_audio_track();
        peer.add_track(track.clone()).await?;

        transport::negotiate(&peer, &signaling, &credential).await?;

        // Negotiation complete: the session owns the resources now
        let capture = guard.disarm();

        let media_pump = transport::spawn_media_pump(audio_rx, track, streamer);
        let event_pump = spawn_event_pump(signal_rx, event_tx.clone(), state.clone());

        set_state(&state, SessionState::Open);
        info!(session_id = %session_id, "Realtime session open");

        Ok(Self {
            peer,
            channel,
            capture: Mutex::new(capture),
            event_tx,
            state,
            closed: AtomicBool::new(false),
            event_pump: Mutex::new(Some(event_pump)),
            media_pump: Mutex::new(Some(media_pump)),
        })
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.event_tx.subscribe()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state.lock().map(|s| *s).unwrap_or(SessionState::Failed)
    }

    /// Close the session: stop media, close the event channel, close the
    /// transport, then wait for the pumps to drain.
    ///
    /// Idempotent, callable from any state, never fails.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing realtime session");
        set_state(&self.state, SessionState::Closed);

        let capture = self.capture.lock().ok().and_then(|mut c| c.take());
        transport::teardown(capture, Some(self.channel.clone()), Some(self.peer.clone())).await;

        for pump in [&self.event_pump, &self.media_pump] {
            let handle = pump.lock().ok().and_then(|mut p| p.take());
            if let Some(handle) = handle {
                if timeout(CLOSE_TIMEOUT, handle).await.is_err() {
                    warn!("Pump did not drain in time, detaching");
                }
            }
        }
        debug!("Realtime session closed");
    }
}

/// Releases half-negotiated resources if open() fails or is dropped
/// mid-negotiation. Disarmed once the session takes ownership.
struct NegotiationGuard {
    peer: Option<Arc<RTCPeerConnection>>,
    channel: Option<Arc<RTCDataChannel>>,
    capture: Option<CaptureHandle>,
}

impl NegotiationGuard {
    fn new(peer: Arc<RTCPeerConnection>) -> Self {
        Self {
            peer: Some(peer),
            channel: None,
            capture: None,
        }
    }

    fn disarm(mut self) -> Option<CaptureHandle> {
        self.peer = None;
        self.channel = None;
        self.capture.take()
    }
}

impl Drop for NegotiationGuard {
    fn drop(&mut self) {
        if self.peer.is_none() && self.channel.is_none() && self.capture.is_none() {
            return;
        }
        debug!("Releasing partially-negotiated transport");
        let capture = self.capture.take();
        let channel = self.channel.take();
        let peer = self.peer.take();
        tokio::spawn(async move {
            transport::teardown(capture, channel, peer).await;
        });
    }
}

/// Funnel the channel callbacks into the ordered signal queue.
fn wire_channel_callbacks(channel: &Arc<RTCDataChannel>, signal_tx: mpsc::Sender<ChannelSignal>) {
    let tx = signal_tx.clone();
    channel.on_open(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelSignal::Open).await;
        })
    }));

    let tx = signal_tx.clone();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelSignal::Frame(message.data)).await;
        })
    }));

    let tx = signal_tx.clone();
    channel.on_error(Box::new(move |err| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelSignal::TransportError(err.to_string())).await;
        })
    }));

    let tx = signal_tx;
    channel.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelSignal::Close).await;
        })
    }));
}

/// Process channel signals one at a time, in arrival order.
///
/// Connected/Disconnected are announced at most once each no matter how
/// often the underlying callbacks fire.
fn spawn_event_pump(
    mut signal_rx: mpsc::Receiver<ChannelSignal>,
    event_tx: broadcast::Sender<RealtimeEvent>,
    state: Arc<Mutex<SessionState>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut announced_open = false;
        let mut announced_close = false;

        while let Some(signal) = signal_rx.recv().await {
            match signal {
                ChannelSignal::Open => {
                    if !announced_open {
                        announced_open = true;
                        info!("Event channel open");
                        let _ = event_tx.send(RealtimeEvent::Connected);
                    }
                }
                ChannelSignal::Frame(payload) => {
                    let Some(event) = events::parse_frame(&payload) else {
                        continue;
                    };
                    if let Some(message) = event.error_message() {
                        error!("Realtime service error: {}", message);
                        let _ = event_tx.send(RealtimeEvent::ServiceError { message });
                        continue;
                    }
                    match &event {
                        events::ChannelEvent::SpeechStarted => debug!("VAD: speech started"),
                        events::ChannelEvent::SpeechStopped => debug!("VAD: speech stopped"),
                        _ => {}
                    }
                    if let Some(transcript) = event.to_transcript_event() {
                        let _ = event_tx.send(RealtimeEvent::Transcript(transcript));
                    }
                }
                ChannelSignal::TransportError(message) => {
                    error!("Event channel error: {}", message);
                    set_state(&state, SessionState::Failed);
                    let _ = event_tx.send(RealtimeEvent::ServiceError { message });
                }
                ChannelSignal::Close => {
                    if !announced_close {
                        announced_close = true;
                        info!("Event channel closed");
                        set_state(&state, SessionState::Closed);
                        let _ = event_tx.send(RealtimeEvent::Disconnected);
                    }
                    break;
                }
            }
        }
    })
}

fn set_state(state: &Mutex<SessionState>, next: SessionState) {
    if let Ok(mut guard) = state.lock() {
        *guard = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::TranscriptEvent;
    use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

    async fn collect_pump_events(signals: Vec<ChannelSignal>) -> Vec<RealtimeEvent> {
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let (event_tx, mut event_rx) = broadcast::channel(64);
        let state = Arc::new(Mutex::new(SessionState::Open));

        let pump = spawn_event_pump(signal_rx, event_tx, state);
        for signal in signals {
            signal_tx.send(signal).await.unwrap();
        }
        drop(signal_tx);
        pump.await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_pump_announces_open_and_close_once() {
        let events = collect_pump_events(vec![
            ChannelSignal::Open,
            ChannelSignal::Open,
            ChannelSignal::Close,
        ])
        .await;

        assert!(matches!(events[0], RealtimeEvent::Connected));
        assert!(matches!(events[1], RealtimeEvent::Disconnected));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_pump_normalizes_frames_in_order() {
        let events = collect_pump_events(vec![
            ChannelSignal::Open,
            ChannelSignal::Frame(Bytes::from_static(
                br#"{"type": "conversation.item.input_audio_transcription.delta", "delta": "hel"}"#,
            )),
            ChannelSignal::Frame(Bytes::from_static(br#"{"type": "ping"}"#)),
            ChannelSignal::Frame(Bytes::from_static(b"garbage")),
            ChannelSignal::Frame(Bytes::from_static(
                br#"{"type": "conversation.item.input_audio_transcription.completed", "transcript": "Hello."}"#,
            )),
            ChannelSignal::Close,
        ])
        .await;

        let transcripts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RealtimeEvent::Transcript(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            transcripts,
            vec![
                TranscriptEvent::PartialDelta("hel".into()),
                TranscriptEvent::FinalUtterance("Hello.".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_surfaces_service_errors_as_nonfatal() {
        let events = collect_pump_events(vec![
            ChannelSignal::Open,
            ChannelSignal::Frame(Bytes::from_static(
                br#"{"type": "error", "error": {"message": "rate limited"}}"#,
            )),
            ChannelSignal::Close,
        ])
        .await;

        assert!(events.iter().any(|e| matches!(
            e,
            RealtimeEvent::ServiceError { message } if message == "rate limited"
        )));
        // The session keeps going: close still announced after the error
        assert!(events
            .iter()
            .any(|e| matches!(e, RealtimeEvent::Disconnected)));
    }

    #[tokio::test]
    async fn test_pump_marks_transport_errors_failed() {
        let (signal_tx, signal_rx) = mpsc::channel(8);
        let (event_tx, _event_rx) = broadcast::channel(8);
        let state = Arc::new(Mutex::new(SessionState::Open));

        let pump = spawn_event_pump(signal_rx, event_tx, state.clone());
        signal_tx
            .send(ChannelSignal::TransportError("sctp aborted".into()))
            .await
            .unwrap();
        drop(signal_tx);
        pump.await.unwrap();

        assert_eq!(*state.lock().unwrap(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_guard_releases_transport_on_drop() {
        let peer = Arc::new(transport::build_peer_connection().await.unwrap());
        let channel = transport::create_event_channel(&peer).await.unwrap();
        let mut guard = NegotiationGuard::new(peer.clone());
        guard.channel = Some(channel);

        drop(guard);

        // Teardown runs on a spawned task
        let mut closed = false;
        for _ in 0..100 {
            if peer.connection_state() == RTCPeerConnectionState::Closed {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(closed, "dropped guard should close the peer connection");
    }

    #[tokio::test]
    async fn test_disarmed_guard_leaves_transport_alone() {
        let peer = Arc::new(transport::build_peer_connection().await.unwrap());
        let mut guard = NegotiationGuard::new(peer.clone());

        assert!(guard.disarm().is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_ne!(peer.connection_state(), RTCPeerConnectionState::Closed);
    }
}
