//! Health states tracked by the safety monitor.

use serde::{Deserialize, Serialize};

/// Health of one `(agent, variant)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Healthy,
    /// Regression detected, awaiting confirmation.
    Suspect,
    /// Excluded from selection until an operator reinstates it.
    Quarantined,
    /// Permanently excluded; history is preserved.
    Retired,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Suspect => "suspect",
            Self::Quarantined => "quarantined",
            Self::Retired => "retired",
        }
    }

    /// Whether a variant in this state may be offered to a policy.
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Healthy | Self::Suspect)
    }

    /// Automatic retirement always passes through `Quarantined`; the direct
    /// edges into `Retired` exist for operator retirement.
    pub fn can_transition_to(&self, next: HealthState) -> bool {
        use HealthState::*;
        matches!(
            (self, next),
            (Healthy, Suspect)
                | (Suspect, Healthy)
                | (Suspect, Quarantined)
                | (Quarantined, Healthy)
                | (Quarantined, Retired)
                | (Healthy, Retired)
                | (Suspect, Retired)
        )
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectable_states() {
        assert!(HealthState::Healthy.is_selectable());
        assert!(HealthState::Suspect.is_selectable());
        assert!(!HealthState::Quarantined.is_selectable());
        assert!(!HealthState::Retired.is_selectable());
    }

    #[test]
    fn test_retired_is_terminal() {
        for next in [
            HealthState::Healthy,
            HealthState::Suspect,
            HealthState::Quarantined,
        ] {
            assert!(!HealthState::Retired.can_transition_to(next));
        }
        assert!(!HealthState::Healthy.can_transition_to(HealthState::Quarantined));
    }
}
