#![deny(clippy::all)]

//! Interview assistant core
//!
//! Streams microphone audio to a realtime transcription service over
//! WebRTC and runs the interview workflow around the live transcript:
//! staged setup, one-tap actions, grounded Q&A with citations, and
//! diarized finalization through an interview backend.

pub mod api;
pub mod audio;
pub mod config;
pub mod interview;
pub mod realtime;
pub mod transcript;

pub use api::{BackendError, HttpBackend, SessionBackend};
pub use config::Settings;
pub use interview::{FlowError, FlowEvent, InterviewFlow};
pub use realtime::{ConnectError, RealtimeEvent, RealtimeSession};
