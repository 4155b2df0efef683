//! HTTP client for the interview backend

use super::{BackendError, QaResponse, SessionBackend, SessionSnapshot};
use crate::interview::actions::ActionButton;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interview backend over HTTP
pub struct HttpBackend {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

#[derive(Serialize)]
struct UtterancePayload<'a> {
    final_utterance: &'a str,
}

#[derive(Serialize)]
struct TranscriptPayload<'a> {
    final_transcript: &'a str,
}

#[derive(Serialize)]
struct ActionPayload<'a> {
    action_button: &'a ActionButton,
    client_transcript: &'a str,
}

#[derive(Serialize)]
struct QuestionPayload<'a> {
    question: &'a str,
    top_k: u32,
}

#[derive(Deserialize)]
struct ActionResponse {
    output: String,
}

#[derive(Deserialize)]
struct FinalizeResponse {
    diarized_transcript: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, BackendError> {
        url::Url::parse(base_url).map_err(|e| BackendError::Endpoint(e.to_string()))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn session_url(&self, session_id: &str, suffix: &str) -> String {
        format!(
            "{}/api/interview/sessions/{}{}",
            self.base_url, session_id, suffix
        )
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let request = match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

impl Drop for HttpBackend {
    fn drop(&mut self) {
        if let Some(token) = &mut self.auth_token {
            token.zeroize();
        }
    }
}

#[async_trait]
impl SessionBackend for HttpBackend {
    async fn persist_utterance(
        &self,
        session_id: &str,
        utterance: &str,
    ) -> Result<(), BackendError> {
        debug!(session_id = %session_id, chars = utterance.len(), "Persisting utterance");
        let url = self.session_url(session_id, "/transcript");
        let payload = UtterancePayload {
            final_utterance: utterance,
        };
        self.send(self.http.put(&url).json(&payload)).await?;
        Ok(())
    }

    async fn persist_final_transcript(
        &self,
        session_id: &str,
        transcript: &str,
    ) -> Result<(), BackendError> {
        debug!(session_id = %session_id, chars = transcript.len(), "Persisting final transcript");
        let url = self.session_url(session_id, "/transcript");
        let payload = TranscriptPayload {
            final_transcript: transcript,
        };
        self.send(self.http.put(&url).json(&payload)).await?;
        Ok(())
    }

    async fn execute_action(
        &self,
        session_id: &str,
        button: &ActionButton,
        transcript: &str,
    ) -> Result<String, BackendError> {
        debug!(session_id = %session_id, button = %button.id, "Executing action");
        let url = self.session_url(session_id, "/action");
        let payload = ActionPayload {
            action_button: button,
            client_transcript: transcript,
        };
        let response = self.send(self.http.post(&url).json(&payload)).await?;
        let parsed: ActionResponse = response.json().await?;
        Ok(parsed.output)
    }

    async fn ask_question(
        &self,
        session_id: &str,
        question: &str,
        top_k: u32,
    ) -> Result<QaResponse, BackendError> {
        debug!(session_id = %session_id, top_k, "Asking context question");
        let url = self.session_url(session_id, "/chat");
        let payload = QuestionPayload { question, top_k };
        let response = self.send(self.http.post(&url).json(&payload)).await?;
        Ok(response.json().await?)
    }

    async fn finalize_session(&self, session_id: &str) -> Result<String, BackendError> {
        debug!(session_id = %session_id, "Finalizing session");
        let url = self.session_url(session_id, "/finalize");
        let response = self.send(self.http.post(&url)).await?;
        let parsed: FinalizeResponse = response.json().await?;
        Ok(parsed.diarized_transcript)
    }

    async fn fetch_session(&self, session_id: &str) -> Result<SessionSnapshot, BackendError> {
        debug!(session_id = %session_id, "Fetching stored session");
        let url = self.session_url(session_id, "");
        let response = self.send(self.http.get(&url)).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::DocumentKind;

    #[test]
    fn test_utterance_payload_shape() {
        let payload = UtterancePayload {
            final_utterance: "So tell me about yourself.",
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"final_utterance":"So tell me about yourself."}"#
        );
    }

    #[test]
    fn test_action_payload_embeds_button() {
        let button = ActionButton {
            id: "summarize".into(),
            label: "Summarize".into(),
            prompt: "Summarize the conversation.".into(),
        };
        let payload = ActionPayload {
            action_button: &button,
            client_transcript: "Hello.",
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["action_button"]["id"], "summarize");
        assert_eq!(value["action_button"]["prompt"], "Summarize the conversation.");
        assert_eq!(value["client_transcript"], "Hello.");
    }

    #[test]
    fn test_question_payload_shape() {
        let payload = QuestionPayload {
            question: "What team size?",
            top_k: 5,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["question"], "What team size?");
        assert_eq!(value["top_k"], 5);
    }

    #[test]
    fn test_qa_response_citations_default_empty() {
        let parsed: QaResponse = serde_json::from_str(r#"{"answer": "Four."}"#).unwrap();
        assert_eq!(parsed.answer, "Four.");
        assert!(parsed.citations.is_empty());
    }

    #[test]
    fn test_qa_response_with_citations() {
        let parsed: QaResponse = serde_json::from_str(
            r#"{
                "answer": "The role needs Rust [1].",
                "citations": [
                    {"source_type": "job_description", "chunk_text": "Rust required", "distance": 0.12}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.citations.len(), 1);
        assert_eq!(parsed.citations[0].source_type, "job_description");
        assert_eq!(parsed.citations[0].display_index, None);
    }

    #[test]
    fn test_session_snapshot_minimal() {
        let parsed: SessionSnapshot = serde_json::from_str(r#"{"id": "s-1"}"#).unwrap();
        assert_eq!(parsed.id, "s-1");
        assert!(parsed.final_transcript.is_none());
        assert!(parsed.documents.is_empty());
    }

    #[test]
    fn test_session_snapshot_full() {
        let parsed: SessionSnapshot = serde_json::from_str(
            r#"{
                "id": "s-2",
                "title": "Backend interview",
                "final_transcript": "Hello.\nWorld.",
                "diarized_transcript": "A: Hello.\nB: World.",
                "documents": [
                    {"kind": "job_description", "name": "role.pdf"},
                    {"kind": "cv"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.documents.len(), 2);
        assert_eq!(parsed.documents[0].kind, DocumentKind::JobDescription);
        assert_eq!(parsed.documents[1].kind, DocumentKind::Cv);
        assert_eq!(parsed.documents[1].name, None);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let backend = HttpBackend::new("http://localhost:8000/", None).unwrap();
        assert_eq!(
            backend.session_url("s-1", "/action"),
            "http://localhost:8000/api/interview/sessions/s-1/action"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(matches!(
            HttpBackend::new("not a url", None),
            Err(BackendError::Endpoint(_))
        ));
    }

    #[test]
    fn test_finalize_response_shape() {
        let parsed: FinalizeResponse =
            serde_json::from_str(r#"{"diarized_transcript": "Interviewer: Hi."}"#).unwrap();
        assert_eq!(parsed.diarized_transcript, "Interviewer: Hi.");
    }
}
