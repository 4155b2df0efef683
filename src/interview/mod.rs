//! Interview workflow orchestration
//!
//! One `InterviewFlow` per interview session. It owns the live transcript
//! accumulator, derives the workflow stage from session content, guards
//! action triggers, reconciles citations on answers, and drives at most
//! one realtime recording at a time. Everything it needs from the outside
//! world goes through the [`SessionBackend`](crate::api::SessionBackend)
//! trait.

pub mod actions;
pub mod citations;
pub mod stage;

use crate::api::{BackendError, SessionBackend, DEFAULT_TOP_K};
use crate::realtime::{ConnectError, RealtimeEvent, RealtimeOptions, RealtimeSession};
use crate::transcript::{TranscriptAccumulator, TranscriptUpdate};
use actions::{ActionButton, ActionError, ActionGate};
use citations::DisplayCitation;
use serde::{Deserialize, Serialize};
use stage::{Stage, StageInputs};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long stop waits for the event pump to drain before detaching it
const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Documents collected during setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    JobDescription,
    Cv,
}

/// Attached document tally. Setup is complete with at least one of each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentSet {
    pub job_descriptions: u32,
    pub cvs: u32,
}

impl DocumentSet {
    pub fn add(&mut self, kind: DocumentKind) {
        match kind {
            DocumentKind::JobDescription => self.job_descriptions += 1,
            DocumentKind::Cv => self.cvs += 1,
        }
    }

    pub fn complete(&self) -> bool {
        self.job_descriptions >= 1 && self.cvs >= 1
    }
}

/// Events published by the flow to its subscribers
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// The live transcript view changed
    Partial { full_text: String },
    /// An utterance was finalized; `full_text` is the canonical join
    Utterance { utterance: String, full_text: String },
    /// The realtime event channel opened
    Connected,
    /// The realtime event channel closed
    Disconnected,
    /// A non-fatal problem worth surfacing
    Warning { message: String },
}

/// A grounded answer with the citations its text references
#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<DisplayCitation>,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("A recording is already in progress")]
    AlreadyRecording,
    #[error("No recording in progress")]
    NotRecording,
    #[error("No action button with id '{0}'")]
    UnknownButton(String),
    #[error("At least one action button must remain")]
    LastButton,
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

struct ActiveRecording {
    session: Arc<RealtimeSession>,
    pump: JoinHandle<()>,
}

/// Orchestrates one interview session
pub struct InterviewFlow {
    backend: Arc<dyn SessionBackend>,
    session_id: String,
    title: Option<String>,
    realtime: RealtimeOptions,
    documents: DocumentSet,
    diarized_transcript: Option<String>,
    accumulator: Arc<Mutex<TranscriptAccumulator>>,
    buttons: Vec<ActionButton>,
    gate: ActionGate,
    event_tx: broadcast::Sender<FlowEvent>,
    recording: Option<ActiveRecording>,
}

impl InterviewFlow {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        session_id: impl Into<String>,
        realtime: RealtimeOptions,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            backend,
            session_id: session_id.into(),
            title: None,
            realtime,
            documents: DocumentSet::default(),
            diarized_transcript: None,
            accumulator: Arc::new(Mutex::new(TranscriptAccumulator::new())),
            buttons: actions::default_buttons(),
            gate: ActionGate::new(),
            event_tx,
            recording: None,
        }
    }

    /// Rebuild a flow from stored session state.
    ///
    /// The stored transcript seeds the accumulator, so the derived stage
    /// after a reload matches what the user last saw.
    pub async fn resume(
        backend: Arc<dyn SessionBackend>,
        session_id: &str,
        realtime: RealtimeOptions,
    ) -> Result<Self, FlowError> {
        let snapshot = backend.fetch_session(session_id).await?;
        let mut flow = Self::new(backend, session_id, realtime);
        flow.title = snapshot.title;
        flow.diarized_transcript = snapshot
            .diarized_transcript
            .filter(|d| !d.trim().is_empty());
        if let Some(transcript) = snapshot.final_transcript {
            if !transcript.is_empty() {
                flow.accumulator =
                    Arc::new(Mutex::new(TranscriptAccumulator::with_finalized(transcript)));
            }
        }
        for document in snapshot.documents {
            flow.documents.add(document.kind);
        }
        info!(session_id = %session_id, stage = flow.stage().as_str(), "Resumed session");
        Ok(flow)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.event_tx.subscribe()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    /// The transcript as displayed: finalized text plus any pending partial
    pub fn transcript(&self) -> String {
        self.accumulator
            .lock()
            .map(|acc| acc.displayed())
            .unwrap_or_default()
    }

    pub fn diarized_transcript(&self) -> Option<&str> {
        self.diarized_transcript.as_deref()
    }

    pub fn documents(&self) -> DocumentSet {
        self.documents
    }

    pub fn add_document(&mut self, kind: DocumentKind) {
        self.documents.add(kind);
        debug!(stage = self.stage().as_str(), "Document attached");
    }

    /// The stage the session content currently justifies
    pub fn stage(&self) -> Stage {
        Stage::derive(self.stage_inputs())
    }

    /// Whether the user may navigate to `target`
    pub fn stage_reachable(&self, target: Stage) -> bool {
        target.reachable(self.stage_inputs())
    }

    fn stage_inputs(&self) -> StageInputs {
        StageInputs {
            diarized_present: self
                .diarized_transcript
                .as_deref()
                .is_some_and(|d| !d.trim().is_empty()),
            transcript_nonempty: !self.transcript().trim().is_empty(),
            documents_complete: self.documents.complete(),
        }
    }

    pub fn buttons(&self) -> &[ActionButton] {
        &self.buttons
    }

    /// Replace the button set. An empty replacement is ignored so the set
    /// never drops below one button.
    pub fn set_buttons(&mut self, buttons: Vec<ActionButton>) {
        if buttons.is_empty() {
            warn!("Ignoring empty action button set");
            return;
        }
        self.buttons = buttons;
    }

    pub fn add_button(&mut self, button: ActionButton) {
        self.buttons.retain(|b| b.id != button.id);
        self.buttons.push(button);
    }

    pub fn remove_button(&mut self, id: &str) -> Result<(), FlowError> {
        if self.buttons.len() == 1 && self.buttons[0].id == id {
            return Err(FlowError::LastButton);
        }
        self.buttons.retain(|b| b.id != id);
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Open a realtime session and start feeding the accumulator.
    ///
    /// At most one recording runs per flow; a second start is rejected
    /// without touching the active one.
    pub async fn start_recording(&mut self) -> Result<(), FlowError> {
        if self.recording.is_some() {
            return Err(FlowError::AlreadyRecording);
        }
        let session =
            Arc::new(RealtimeSession::open(&self.session_id, self.realtime.clone()).await?);
        let pump = tokio::spawn(pump_events(
            session.subscribe(),
            self.accumulator.clone(),
            self.event_tx.clone(),
            self.backend.clone(),
            self.session_id.clone(),
        ));
        self.recording = Some(ActiveRecording { session, pump });
        info!(session_id = %self.session_id, "Recording started");
        Ok(())
    }

    /// Stop the active recording: close the realtime session, drain its
    /// events, flush any trailing partial, then persist the canonical
    /// transcript once. Persistence failures are surfaced as warnings,
    /// never as errors.
    pub async fn stop_recording(&mut self) -> Result<(), FlowError> {
        let Some(active) = self.recording.take() else {
            return Err(FlowError::NotRecording);
        };
        active.session.close().await;

        // Dropping the last session handle ends the event stream, which
        // lets the pump run off the buffered tail and exit
        drop(active.session);
        if timeout(STOP_TIMEOUT, active.pump).await.is_err() {
            warn!("Event pump did not drain in time, detaching");
        }

        self.finish_transcript().await;
        info!(session_id = %self.session_id, "Recording stopped");
        Ok(())
    }

    /// Flush the trailing partial as a final utterance, then persist the
    /// canonical transcript.
    async fn finish_transcript(&mut self) {
        let trailing = self
            .accumulator
            .lock()
            .ok()
            .and_then(|mut acc| acc.flush_pending());
        if let Some(TranscriptUpdate::Finalized {
            full_text,
            utterance,
        }) = trailing
        {
            let _ = self.event_tx.send(FlowEvent::Utterance {
                utterance: utterance.clone(),
                full_text,
            });
            if let Err(e) = self
                .backend
                .persist_utterance(&self.session_id, &utterance)
                .await
            {
                warn!("Trailing utterance not persisted: {}", e);
                let _ = self.event_tx.send(FlowEvent::Warning {
                    message: format!("Utterance not saved: {e}"),
                });
            }
        }

        let transcript = self
            .accumulator
            .lock()
            .map(|acc| acc.finalized().to_string())
            .unwrap_or_default();
        if transcript.is_empty() {
            return;
        }
        if let Err(e) = self
            .backend
            .persist_final_transcript(&self.session_id, &transcript)
            .await
        {
            warn!("Final transcript not persisted: {}", e);
            let _ = self.event_tx.send(FlowEvent::Warning {
                message: format!("Transcript not saved: {e}"),
            });
        }
    }

    /// Run an action button over the current transcript.
    ///
    /// The empty-transcript check runs before the cooldown check, and an
    /// admitted trigger arms the cooldown before the backend call goes
    /// out.
    pub async fn invoke_action(&mut self, button_id: &str) -> Result<String, FlowError> {
        let button = self
            .buttons
            .iter()
            .find(|b| b.id == button_id)
            .cloned()
            .ok_or_else(|| FlowError::UnknownButton(button_id.to_string()))?;
        let transcript = self.transcript();
        self.gate.admit(&transcript, Instant::now())?;

        let output = self
            .backend
            .execute_action(&self.session_id, &button, &transcript)
            .await?;
        debug!(button = %button.id, chars = output.len(), "Action completed");
        Ok(output)
    }

    /// Time left until the next action trigger is allowed
    pub fn action_cooldown_remaining(&self) -> Option<Duration> {
        self.gate.cooldown_remaining(Instant::now())
    }

    /// Ask a question grounded in the session documents and transcript.
    /// Never mutates session state, even on failure.
    pub async fn ask(&self, question: &str, top_k: Option<u32>) -> Result<Answer, FlowError> {
        let response = self
            .backend
            .ask_question(&self.session_id, question, top_k.unwrap_or(DEFAULT_TOP_K))
            .await?;
        let citations = citations::reconcile(&response.answer, &response.citations);
        Ok(Answer {
            answer: response.answer,
            citations,
        })
    }

    /// Produce the diarized transcript, stopping any active recording
    /// first. Runs the backend call at most once; later calls return the
    /// stored result. On failure nothing is recorded and the call may be
    /// retried.
    pub async fn finalize(&mut self) -> Result<String, FlowError> {
        if let Some(existing) = &self.diarized_transcript {
            return Ok(existing.clone());
        }
        if self.recording.is_some() {
            self.stop_recording().await?;
        }
        let diarized = self.backend.finalize_session(&self.session_id).await?;
        self.diarized_transcript = Some(diarized.clone());
        info!(session_id = %self.session_id, "Session finalized");
        Ok(diarized)
    }
}

/// Feed realtime events into the accumulator and fan the results out to
/// flow subscribers. Finalized utterances are persisted fire-and-forget
/// so transcription never stalls on the backend.
async fn pump_events(
    mut events: broadcast::Receiver<RealtimeEvent>,
    accumulator: Arc<Mutex<TranscriptAccumulator>>,
    event_tx: broadcast::Sender<FlowEvent>,
    backend: Arc<dyn SessionBackend>,
    session_id: String,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Transcript event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            RealtimeEvent::Connected => {
                let _ = event_tx.send(FlowEvent::Connected);
            }
            RealtimeEvent::Disconnected => {
                let _ = event_tx.send(FlowEvent::Disconnected);
            }
            RealtimeEvent::ServiceError { message } => {
                let _ = event_tx.send(FlowEvent::Warning { message });
            }
            RealtimeEvent::Transcript(transcript_event) => {
                let update = accumulator
                    .lock()
                    .ok()
                    .and_then(|mut acc| acc.apply(transcript_event));
                match update {
                    Some(TranscriptUpdate::Partial { full_text }) => {
                        let _ = event_tx.send(FlowEvent::Partial { full_text });
                    }
                    Some(TranscriptUpdate::Finalized {
                        full_text,
                        utterance,
                    }) => {
                        let _ = event_tx.send(FlowEvent::Utterance {
                            utterance: utterance.clone(),
                            full_text,
                        });
                        let backend = backend.clone();
                        let event_tx = event_tx.clone();
                        let session_id = session_id.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                backend.persist_utterance(&session_id, &utterance).await
                            {
                                warn!("Utterance not persisted: {}", e);
                                let _ = event_tx.send(FlowEvent::Warning {
                                    message: format!("Utterance not saved: {e}"),
                                });
                            }
                        });
                    }
                    None => {}
                }
            }
        }
    }
}
