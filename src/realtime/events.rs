//! Event-channel frame parsing
//!
//! The transcription service has renamed its transcript events across API
//! revisions, so both kinds are matched against every historical alias
//! here and normalized into [`TranscriptEvent`] before anything downstream
//! sees them. Unknown event types parse to `Other`; malformed frames are
//! dropped without error.

use crate::transcript::TranscriptEvent;
use serde::Deserialize;
use tracing::trace;

/// Events received on the transcript data channel
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ChannelEvent {
    /// Partial transcription delta
    #[serde(
        rename = "conversation.item.input_audio_transcription.delta",
        alias = "input_audio_transcription.delta",
        alias = "transcript.text.delta",
        alias = "response.audio_transcript.delta"
    )]
    TranscriptionDelta {
        delta: Option<String>,
        text: Option<String>,
        transcript: Option<String>,
    },
    /// Completed transcription for one utterance
    #[serde(
        rename = "conversation.item.input_audio_transcription.completed",
        alias = "input_audio_transcription.completed",
        alias = "transcript.text.done",
        alias = "response.audio_transcript.done"
    )]
    TranscriptionCompleted {
        delta: Option<String>,
        text: Option<String>,
        transcript: Option<String>,
    },
    /// Input audio buffer speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    /// Input audio buffer speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    /// Error message from the service
    #[serde(rename = "error")]
    Error { error: Option<ChannelErrorDetail> },
    /// Catch-all for other message types
    #[serde(other)]
    Other,
}

/// Error details from the service
#[derive(Debug, Deserialize)]
pub(crate) struct ChannelErrorDetail {
    pub message: Option<String>,
}

impl ChannelEvent {
    /// Convert to a normalized transcript event if applicable.
    ///
    /// The payload field varies by alias, so the first non-empty of
    /// `delta` / `text` / `transcript` wins. Empty payloads produce None.
    pub(crate) fn to_transcript_event(&self) -> Option<TranscriptEvent> {
        match self {
            ChannelEvent::TranscriptionDelta {
                delta,
                text,
                transcript,
            } => payload_text(delta, text, transcript).map(TranscriptEvent::PartialDelta),
            ChannelEvent::TranscriptionCompleted {
                delta,
                text,
                transcript,
            } => payload_text(delta, text, transcript).map(TranscriptEvent::FinalUtterance),
            _ => None,
        }
    }

    /// Check if this is an error message
    pub(crate) fn error_message(&self) -> Option<String> {
        match self {
            ChannelEvent::Error { error } => error.as_ref().and_then(|e| e.message.clone()),
            _ => None,
        }
    }
}

fn payload_text(
    delta: &Option<String>,
    text: &Option<String>,
    transcript: &Option<String>,
) -> Option<String> {
    [delta, text, transcript]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .cloned()
}

/// Decode one data-channel frame. Binary frames must be UTF-8 JSON.
///
/// Exactly one JSON decode per frame; undecodable frames are dropped.
pub(crate) fn parse_frame(payload: &[u8]) -> Option<ChannelEvent> {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            trace!("Dropping non-UTF-8 channel frame: {}", e);
            return None;
        }
    };
    match serde_json::from_str::<ChannelEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            trace!("Dropping unparseable channel frame: {} - {}", e, text);
            None
        }
    }
}
