//! Citation reconciliation for grounded answers
//!
//! Answers cite retrieved chunks with bracketed markers like `[2]`. The
//! service does not always reference every chunk it returns, so the list
//! shown next to an answer is filtered down to the chunks the text
//! actually cites, keeping their original labels.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap());

/// One retrieved chunk backing an answer, as returned by the backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Citation {
    /// Which document the chunk came from, e.g. "job_description" or "cv"
    pub source_type: String,
    pub chunk_text: String,
    /// Label the service assigned; the 1-based list position applies when
    /// absent
    #[serde(default)]
    pub display_index: Option<u32>,
    /// Retrieval distance, smaller is closer
    #[serde(default)]
    pub distance: Option<f64>,
}

/// A citation as shown to the user, with its resolved label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayCitation {
    pub index: u32,
    pub source_type: String,
    pub chunk_text: String,
}

/// Distinct marker indices referenced by the answer text
fn referenced_indices(answer: &str) -> BTreeSet<u32> {
    MARKER_RE
        .captures_iter(answer)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Filter `citations` down to the ones `answer` actually references.
///
/// Each citation gets its service-assigned display index, or its 1-based
/// position when none was assigned. An answer with no markers keeps every
/// citation; markers with no matching citation are ignored. Labels are
/// never renumbered by the filter.
pub fn reconcile(answer: &str, citations: &[Citation]) -> Vec<DisplayCitation> {
    let referenced = referenced_indices(answer);

    let labeled = citations.iter().enumerate().map(|(position, citation)| {
        let index = citation.display_index.unwrap_or(position as u32 + 1);
        DisplayCitation {
            index,
            source_type: citation.source_type.clone(),
            chunk_text: citation.chunk_text.clone(),
        }
    });

    if referenced.is_empty() {
        return labeled.collect();
    }
    labeled
        .filter(|citation| referenced.contains(&citation.index))
        .collect()
}
