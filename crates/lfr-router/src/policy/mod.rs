//! Content policy gate - opt-out markers that forbid cloud escalation

use lfr_llm::Turn;
use serde::{Deserialize, Serialize};

/// Marker a user can put anywhere in a conversation to keep it local
pub const DEFAULT_OPT_OUT_MARKER: &str = "#no_cloud";

/// Outcome of a policy check, kept for the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub cloud_allowed: bool,
    pub matched_marker: Option<String>,
}

/// Decides whether a conversation may be sent to the cloud backend.
///
/// Matching is exact and case-sensitive: `#no_cloud` blocks, "no cloud please" does not.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    markers: Vec<String>,
}

impl PolicyGate {
    pub fn new(markers: Vec<String>) -> Self {
        Self {
            markers: markers.into_iter().filter(|m| !m.is_empty()).collect(),
        }
    }

    /// Gate with a single opt-out marker
    pub fn with_marker(marker: &str) -> Self {
        Self::new(vec![marker.to_string()])
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn check(&self, turns: &[Turn]) -> PolicyResult {
        let text = turns
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let matched = self.markers.iter().find(|m| text.contains(m.as_str()));

        PolicyResult {
            cloud_allowed: matched.is_none(),
            matched_marker: matched.cloned(),
        }
    }

    pub fn cloud_allowed(&self, turns: &[Turn]) -> bool {
        self.check(turns).cloud_allowed
    }
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::with_marker(DEFAULT_OPT_OUT_MARKER)
    }
}
