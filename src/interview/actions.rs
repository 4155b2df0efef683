//! Action buttons and the double-trigger guard

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Minimum spacing between accepted action triggers
pub const COOLDOWN_WINDOW: Duration = Duration::from_millis(2000);

/// A one-tap prompt run over the live transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    pub id: String,
    pub label: String,
    pub prompt: String,
}

/// Built-in buttons, used when the configuration supplies none
pub fn default_buttons() -> Vec<ActionButton> {
    vec![
        ActionButton {
            id: "suggest-question".into(),
            label: "Suggest question".into(),
            prompt: "Suggest the single most useful follow-up question the \
                     interviewer should ask next, based on the conversation so far."
                .into(),
        },
        ActionButton {
            id: "assess-answer".into(),
            label: "Assess answer".into(),
            prompt: "Assess the candidate's most recent answer: strengths, \
                     gaps, and a short verdict."
                .into(),
        },
    ]
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    /// There is no transcript text to run the action against
    #[error("Transcript is empty")]
    EmptyTranscript,
    /// An earlier trigger was accepted less than the cooldown window ago
    #[error("Action triggered too soon, {remaining_ms} ms of cooldown left")]
    Cooldown { remaining_ms: u64 },
}

/// Gatekeeper for action triggers.
///
/// Checks run in a fixed order: the empty-transcript check always precedes
/// the cooldown check, so an empty transcript is reported as such even
/// while a cooldown is pending, and never consumes the cooldown.
#[derive(Debug, Default)]
pub struct ActionGate {
    deadline: Option<Instant>,
}

impl ActionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or reject a trigger observed at `now`.
    ///
    /// On admission the next allowed instant is recorded before the caller
    /// does any I/O, so a second trigger is rejected even while the first
    /// request is still in flight. There is no timer; the deadline is
    /// checked lazily on the next trigger.
    pub fn admit(&mut self, transcript: &str, now: Instant) -> Result<(), ActionError> {
        if transcript.trim().is_empty() {
            return Err(ActionError::EmptyTranscript);
        }
        if let Some(deadline) = self.deadline {
            if now < deadline {
                let remaining = deadline - now;
                return Err(ActionError::Cooldown {
                    remaining_ms: remaining.as_millis() as u64,
                });
            }
        }
        self.deadline = Some(now + COOLDOWN_WINDOW);
        Ok(())
    }

    /// Time left until the next trigger is allowed, if any
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .and_then(|deadline| deadline.checked_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_trigger_admitted() {
        let mut gate = ActionGate::new();
        assert_eq!(gate.admit("some transcript", Instant::now()), Ok(()));
    }

    #[test]
    fn test_rapid_second_trigger_rejected() {
        let mut gate = ActionGate::new();
        let t0 = Instant::now();
        gate.admit("some transcript", t0).unwrap();

        // The first request is still in flight; the deadline was armed
        // synchronously, so an immediate retap bounces
        let result = gate.admit("some transcript", t0 + Duration::from_millis(100));
        assert!(matches!(result, Err(ActionError::Cooldown { remaining_ms }) if remaining_ms == 1900));
    }

    #[test]
    fn test_trigger_at_deadline_admitted() {
        let mut gate = ActionGate::new();
        let t0 = Instant::now();
        gate.admit("some transcript", t0).unwrap();
        assert_eq!(gate.admit("some transcript", t0 + COOLDOWN_WINDOW), Ok(()));
    }

    #[test]
    fn test_empty_transcript_reported_before_cooldown() {
        let mut gate = ActionGate::new();
        let t0 = Instant::now();
        gate.admit("some transcript", t0).unwrap();

        // Mid-cooldown, but the emptiness is what gets reported
        let result = gate.admit("   ", t0 + Duration::from_millis(500));
        assert_eq!(result, Err(ActionError::EmptyTranscript));
    }

    #[test]
    fn test_empty_transcript_does_not_arm_cooldown() {
        let mut gate = ActionGate::new();
        let t0 = Instant::now();
        assert_eq!(gate.admit("", t0), Err(ActionError::EmptyTranscript));
        // Rejection left no deadline behind
        assert_eq!(gate.admit("now there is text", t0 + Duration::from_millis(1)), Ok(()));
    }

    #[test]
    fn test_cooldown_remaining() {
        let mut gate = ActionGate::new();
        let t0 = Instant::now();
        assert_eq!(gate.cooldown_remaining(t0), None);

        gate.admit("some transcript", t0).unwrap();
        assert_eq!(
            gate.cooldown_remaining(t0 + Duration::from_millis(1500)),
            Some(Duration::from_millis(500))
        );
        assert_eq!(gate.cooldown_remaining(t0 + COOLDOWN_WINDOW), None);
    }

    #[test]
    fn test_default_buttons_nonempty_with_unique_ids() {
        let buttons = default_buttons();
        assert!(!buttons.is_empty());
        let mut ids: Vec<_> = buttons.iter().map(|b| b.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), buttons.len());
    }
}
