//! Transcript accumulation state
//!
//! Folds the normalized event stream from the realtime session into the
//! interview transcript: finalized utterances joined by newlines plus the
//! provisional partial tail still being recognized.

/// A transcript event normalized from the wire protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Incremental text for the utterance currently being recognized
    PartialDelta(String),
    /// One finalized utterance
    FinalUtterance(String),
}

/// Result of applying an event to the accumulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptUpdate {
    /// The displayed transcript changed; the tail is still provisional
    Partial { full_text: String },
    /// An utterance was finalized. `utterance` carries just the new segment
    /// so it can be persisted incrementally; `full_text` is the complete
    /// finalized transcript after the commit.
    Finalized { full_text: String, utterance: String },
}

/// Accumulated transcript state for one interview session
///
/// Invariant: joining every committed utterance with `"\n"` reproduces
/// `finalized` exactly, so the per-utterance notifications and the
/// full-transcript emissions never disagree.
#[derive(Debug, Default, Clone)]
pub struct TranscriptAccumulator {
    finalized: String,
    pending: String,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed previously saved transcript text when resuming a session.
    pub fn with_finalized(text: String) -> Self {
        Self {
            finalized: text,
            pending: String::new(),
        }
    }

    /// Apply one event and report how the transcript changed.
    ///
    /// Events with empty text produce no update.
    pub fn apply(&mut self, event: TranscriptEvent) -> Option<TranscriptUpdate> {
        match event {
            TranscriptEvent::PartialDelta(text) => {
                if text.is_empty() {
                    return None;
                }
                self.pending.push_str(&text);
                Some(TranscriptUpdate::Partial {
                    full_text: self.displayed(),
                })
            }
            TranscriptEvent::FinalUtterance(text) => {
                if text.is_empty() {
                    return None;
                }
                Some(self.commit(text))
            }
        }
    }

    /// Fold any leftover partial into the finalized transcript.
    ///
    /// Called when the transport closes before the service finalizes the
    /// last utterance, so the text survives into persistence.
    pub fn flush_pending(&mut self) -> Option<TranscriptUpdate> {
        if self.pending.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.pending);
        Some(self.commit(text))
    }

    fn commit(&mut self, text: String) -> TranscriptUpdate {
        if !self.finalized.is_empty() {
            self.finalized.push('\n');
        }
        self.finalized.push_str(&text);
        self.pending.clear();
        TranscriptUpdate::Finalized {
            full_text: self.finalized.clone(),
            utterance: text,
        }
    }

    /// Finalized text plus the provisional tail
    pub fn displayed(&self) -> String {
        format!("{}{}", self.finalized, self.pending)
    }

    /// Finalized utterances only
    pub fn finalized(&self) -> &str {
        &self.finalized
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partials_concatenate_in_order() {
        let mut acc = TranscriptAccumulator::new();

        acc.apply(TranscriptEvent::PartialDelta("Tell ".into()));
        acc.apply(TranscriptEvent::PartialDelta("me ".into()));
        let update = acc.apply(TranscriptEvent::PartialDelta("more".into()));

        assert_eq!(
            update,
            Some(TranscriptUpdate::Partial {
                full_text: "Tell me more".into()
            })
        );
        assert_eq!(acc.displayed(), "Tell me more");
        assert_eq!(acc.finalized(), "");
    }

    #[test]
    fn test_final_utterance_replaces_pending() {
        let mut acc = TranscriptAccumulator::new();

        acc.apply(TranscriptEvent::PartialDelta("tell me mo".into()));
        let update = acc.apply(TranscriptEvent::FinalUtterance("Tell me more.".into()));

        assert_eq!(
            update,
            Some(TranscriptUpdate::Finalized {
                full_text: "Tell me more.".into(),
                utterance: "Tell me more.".into(),
            })
        );
        assert!(!acc.has_pending());
        assert_eq!(acc.displayed(), "Tell me more.");
    }

    #[test]
    fn test_utterances_join_with_newline() {
        let mut acc = TranscriptAccumulator::new();

        acc.apply(TranscriptEvent::FinalUtterance("First question.".into()));
        let update = acc.apply(TranscriptEvent::FinalUtterance("Second answer.".into()));

        match update {
            Some(TranscriptUpdate::Finalized { full_text, .. }) => {
                assert_eq!(full_text, "First question.\nSecond answer.");
            }
            other => panic!("expected finalized update, got {:?}", other),
        }
    }

    #[test]
    fn test_per_utterance_stream_reconstructs_finalized() {
        let mut acc = TranscriptAccumulator::new();
        let mut utterances = Vec::new();

        let events = [
            TranscriptEvent::PartialDelta("he".into()),
            TranscriptEvent::PartialDelta("llo".into()),
            TranscriptEvent::FinalUtterance("Hello.".into()),
            TranscriptEvent::PartialDelta("wor".into()),
            TranscriptEvent::FinalUtterance("World.".into()),
            TranscriptEvent::FinalUtterance("Done.".into()),
        ];
        for event in events {
            if let Some(TranscriptUpdate::Finalized { utterance, .. }) = acc.apply(event) {
                utterances.push(utterance);
            }
        }

        assert_eq!(utterances.join("\n"), acc.finalized());
    }

    #[test]
    fn test_flush_pending_commits_leftover_partial() {
        let mut acc = TranscriptAccumulator::new();
        acc.apply(TranscriptEvent::FinalUtterance("Finished.".into()));
        acc.apply(TranscriptEvent::PartialDelta("cut off mid".into()));

        let update = acc.flush_pending();

        assert_eq!(
            update,
            Some(TranscriptUpdate::Finalized {
                full_text: "Finished.\ncut off mid".into(),
                utterance: "cut off mid".into(),
            })
        );
        assert!(acc.flush_pending().is_none());
    }

    #[test]
    fn test_empty_events_are_ignored() {
        let mut acc = TranscriptAccumulator::new();
        assert!(acc.apply(TranscriptEvent::PartialDelta(String::new())).is_none());
        assert!(acc.apply(TranscriptEvent::FinalUtterance(String::new())).is_none());
        assert!(acc.is_empty());
    }

    #[test]
    fn test_resume_seeds_finalized_text() {
        let mut acc = TranscriptAccumulator::with_finalized("Saved earlier.".into());
        acc.apply(TranscriptEvent::FinalUtterance("New utterance.".into()));
        assert_eq!(acc.finalized(), "Saved earlier.\nNew utterance.");
    }
}
