use serde::{Deserialize, Serialize};

/// Durable lifecycle state of a tracked job.
///
/// Discovery-time conditions (discovered, deduplicated, tailoring in
/// progress) are not persisted; a record enters the store as `Unique` and
/// only ever moves forward, except for the TailoringFailed retry path which
/// re-enters tailoring on a later run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// First sighting recorded, not yet enriched.
    Unique,
    /// Tailoring was attempted and failed; retried on the next run.
    TailoringFailed,
    /// Artifacts generated.
    Tailored,
    /// Meets outreach criteria, send not yet confirmed.
    OutreachPending,
    /// Send collaborator reported success.
    OutreachSent,
    /// Operator marked the application submitted. Terminal.
    Applied,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unique => "unique",
            LifecycleState::TailoringFailed => "tailoring_failed",
            LifecycleState::Tailored => "tailored",
            LifecycleState::OutreachPending => "outreach_pending",
            LifecycleState::OutreachSent => "outreach_sent",
            LifecycleState::Applied => "applied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unique" => Some(LifecycleState::Unique),
            "tailoring_failed" => Some(LifecycleState::TailoringFailed),
            "tailored" => Some(LifecycleState::Tailored),
            "outreach_pending" => Some(LifecycleState::OutreachPending),
            "outreach_sent" => Some(LifecycleState::OutreachSent),
            "applied" => Some(LifecycleState::Applied),
            _ => None,
        }
    }

    /// Records in these states are picked up by the enrichment pass.
    pub fn needs_tailoring(&self) -> bool {
        matches!(
            self,
            LifecycleState::Unique | LifecycleState::TailoringFailed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Applied)
    }

    /// Position in the forward ordering. TailoringFailed sits at the same
    /// rank as Unique: both mean "not yet tailored".
    fn rank(&self) -> u8 {
        match self {
            LifecycleState::Unique | LifecycleState::TailoringFailed => 0,
            LifecycleState::Tailored => 1,
            LifecycleState::OutreachPending => 2,
            LifecycleState::OutreachSent => 3,
            LifecycleState::Applied => 4,
        }
    }

    /// Whether a transition is legal. Transitions never regress; the only
    /// same-rank move allowed is Unique <-> TailoringFailed (a failed
    /// attempt, or a failed record re-entering tailoring). Applied can be
    /// reached from any non-terminal state since it is an operator signal.
    pub fn can_advance(&self, to: LifecycleState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == LifecycleState::Applied {
            return true;
        }
        match (self, to) {
            (LifecycleState::Unique, LifecycleState::TailoringFailed) => true,
            (LifecycleState::TailoringFailed, LifecycleState::TailoringFailed) => true,
            (LifecycleState::TailoringFailed, LifecycleState::Tailored) => true,
            _ => to.rank() == self.rank() + 1,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_strings() {
        for state in [
            LifecycleState::Unique,
            LifecycleState::TailoringFailed,
            LifecycleState::Tailored,
            LifecycleState::OutreachPending,
            LifecycleState::OutreachSent,
            LifecycleState::Applied,
        ] {
            assert_eq!(LifecycleState::parse(state.as_str()), Some(state));
        }
        assert_eq!(LifecycleState::parse("bogus"), None);
    }

    #[test]
    fn forward_transitions_allowed() {
        assert!(LifecycleState::Unique.can_advance(LifecycleState::Tailored));
        assert!(LifecycleState::Unique.can_advance(LifecycleState::TailoringFailed));
        assert!(LifecycleState::TailoringFailed.can_advance(LifecycleState::Tailored));
        assert!(LifecycleState::Tailored.can_advance(LifecycleState::OutreachPending));
        assert!(LifecycleState::OutreachPending.can_advance(LifecycleState::OutreachSent));
        assert!(LifecycleState::OutreachSent.can_advance(LifecycleState::Applied));
    }

    #[test]
    fn regressions_rejected() {
        assert!(!LifecycleState::Tailored.can_advance(LifecycleState::Unique));
        assert!(!LifecycleState::OutreachSent.can_advance(LifecycleState::Tailored));
        assert!(!LifecycleState::Tailored.can_advance(LifecycleState::TailoringFailed));
    }

    #[test]
    fn applied_is_terminal_and_reachable_from_anywhere() {
        assert!(LifecycleState::Unique.can_advance(LifecycleState::Applied));
        assert!(LifecycleState::Tailored.can_advance(LifecycleState::Applied));
        assert!(!LifecycleState::Applied.can_advance(LifecycleState::Unique));
        assert!(!LifecycleState::Applied.can_advance(LifecycleState::OutreachSent));
    }

    #[test]
    fn skipping_stages_rejected() {
        assert!(!LifecycleState::Unique.can_advance(LifecycleState::OutreachPending));
        assert!(!LifecycleState::Tailored.can_advance(LifecycleState::OutreachSent));
    }
}
