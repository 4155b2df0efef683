//! Workflow stages derived from session content
//!
//! The stage is never stored. It is recomputed from what the session
//! actually contains, so a reload always lands on the same stage and
//! there is no stored cursor to drift out of sync.

/// Interview workflow stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Collecting documents: at least one job description and one CV
    Setup,
    /// Live recording and transcript review
    Record,
    /// Diarization and wrap-up
    Finalize,
}

/// Session facts the stage is derived from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageInputs {
    /// A non-empty diarized transcript exists
    pub diarized_present: bool,
    /// The accumulated transcript has any text
    pub transcript_nonempty: bool,
    /// At least one job description and at least one CV are attached
    pub documents_complete: bool,
}

impl Stage {
    /// Furthest stage the session content justifies.
    ///
    /// Diarization wins over everything else, so a finalized session
    /// reopens on Finalize even if its live transcript is empty.
    pub fn derive(inputs: StageInputs) -> Stage {
        if inputs.diarized_present {
            Stage::Finalize
        } else if inputs.transcript_nonempty || inputs.documents_complete {
            Stage::Record
        } else {
            Stage::Setup
        }
    }

    /// Whether the user may navigate to `self`.
    ///
    /// Earlier stages stay reachable for review; later ones unlock only
    /// once the content justifies them.
    pub fn reachable(self, inputs: StageInputs) -> bool {
        self <= Stage::derive(inputs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Record => "record",
            Stage::Finalize => "finalize",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_session_is_setup() {
        assert_eq!(Stage::derive(StageInputs::default()), Stage::Setup);
    }

    #[test]
    fn test_complete_documents_unlock_record() {
        let inputs = StageInputs {
            documents_complete: true,
            ..Default::default()
        };
        assert_eq!(Stage::derive(inputs), Stage::Record);
    }

    #[test]
    fn test_transcript_alone_unlocks_record() {
        // A resumed session with text but missing documents still lands
        // on Record
        let inputs = StageInputs {
            transcript_nonempty: true,
            ..Default::default()
        };
        assert_eq!(Stage::derive(inputs), Stage::Record);
    }

    #[test]
    fn test_diarized_wins_over_everything() {
        let inputs = StageInputs {
            diarized_present: true,
            transcript_nonempty: false,
            documents_complete: false,
        };
        assert_eq!(Stage::derive(inputs), Stage::Finalize);
    }

    #[test]
    fn test_earlier_stages_stay_reachable() {
        let inputs = StageInputs {
            transcript_nonempty: true,
            ..Default::default()
        };
        assert!(Stage::Setup.reachable(inputs));
        assert!(Stage::Record.reachable(inputs));
        assert!(!Stage::Finalize.reachable(inputs));
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Setup < Stage::Record);
        assert!(Stage::Record < Stage::Finalize);
    }
}
