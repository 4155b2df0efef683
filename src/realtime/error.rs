//! Error types for the realtime session

/// Errors that abort a realtime connection attempt
///
/// All variants are fatal to the attempt. The only retry anywhere in the
/// negotiation is the single beta-header SDP retry; callers get the error
/// and decide for themselves whether to open a fresh session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Signaling request failed: {0}")]
    Signaling(#[from] reqwest::Error),

    #[error("Credential mint rejected ({status}): {body}")]
    CredentialMint { status: u16, body: String },

    #[error("Invalid signaling endpoint: {0}")]
    Endpoint(String),

    #[error("SDP exchange rejected ({status}): {body}")]
    SdpExchange { status: u16, body: String },

    #[error("SDP exchange returned an empty answer")]
    EmptyAnswer,

    #[error("Transport error: {0}")]
    Transport(#[from] webrtc::Error),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Audio capture failed: {0}")]
    Audio(#[from] crate::audio::AudioError),

    #[error("Opus encoder error: {0}")]
    Encoder(String),
}
