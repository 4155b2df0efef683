//! Backend API surface
//!
//! Everything the workflow needs from the interview backend, behind one
//! async trait so tests can substitute an in-memory double for the HTTP
//! client.

pub mod client;

pub use client::HttpBackend;

use crate::interview::actions::ActionButton;
use crate::interview::citations::Citation;
use crate::interview::DocumentKind;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Retrieval depth used when the caller does not specify one. The backend
/// clamps whatever it receives to its own bounds.
pub const DEFAULT_TOP_K: u32 = 5;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid backend URL: {0}")]
    Endpoint(String),
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Backend returned {status}: {body}")]
    Http { status: u16, body: String },
}

/// Answer to a context question with its supporting chunks
#[derive(Debug, Clone, Deserialize)]
pub struct QaResponse {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// A document attached to a stored session
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInfo {
    pub kind: DocumentKind,
    #[serde(default)]
    pub name: Option<String>,
}

/// Stored session state, used to resume
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub final_transcript: Option<String>,
    #[serde(default)]
    pub diarized_transcript: Option<String>,
    #[serde(default)]
    pub documents: Vec<DocumentInfo>,
}

/// Operations the workflow performs against the interview backend
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Persist one finalized utterance. Callers treat failures as
    /// non-fatal and never retry.
    async fn persist_utterance(&self, session_id: &str, utterance: &str)
        -> Result<(), BackendError>;

    /// Persist the canonical transcript, once, when recording stops
    async fn persist_final_transcript(
        &self,
        session_id: &str,
        transcript: &str,
    ) -> Result<(), BackendError>;

    /// Run an action prompt over the transcript, returning the generated
    /// text
    async fn execute_action(
        &self,
        session_id: &str,
        button: &ActionButton,
        transcript: &str,
    ) -> Result<String, BackendError>;

    /// Ask a question grounded in the session documents and transcript
    async fn ask_question(
        &self,
        session_id: &str,
        question: &str,
        top_k: u32,
    ) -> Result<QaResponse, BackendError>;

    /// Produce the diarized transcript, ending the session
    async fn finalize_session(&self, session_id: &str) -> Result<String, BackendError>;

    /// Fetch stored session state
    async fn fetch_session(&self, session_id: &str) -> Result<SessionSnapshot, BackendError>;
}
