//! Environment lifecycle states and the transition graph.
//!
//! ```text
//! requested -> provisioning -> starting -> running -> stopping -> stopped
//!                                 ^                                  |
//!                                 +----------------------------------+
//! any non-terminal state -> destroying -> destroyed
//! any non-terminal state -> error -> destroying
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::gateway::JobKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EnvironmentState {
    Requested,
    Provisioning,
    Starting,
    Running,
    Stopping,
    Stopped,
    Destroying,
    Destroyed,
    Error,
}

impl EnvironmentState {
    pub const ALL: [EnvironmentState; 9] = [
        EnvironmentState::Requested,
        EnvironmentState::Provisioning,
        EnvironmentState::Starting,
        EnvironmentState::Running,
        EnvironmentState::Stopping,
        EnvironmentState::Stopped,
        EnvironmentState::Destroying,
        EnvironmentState::Destroyed,
        EnvironmentState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentState::Requested => "requested",
            EnvironmentState::Provisioning => "provisioning",
            EnvironmentState::Starting => "starting",
            EnvironmentState::Running => "running",
            EnvironmentState::Stopping => "stopping",
            EnvironmentState::Stopped => "stopped",
            EnvironmentState::Destroying => "destroying",
            EnvironmentState::Destroyed => "destroyed",
            EnvironmentState::Error => "error",
        }
    }

    /// States this one may move to.
    pub fn successors(&self) -> &'static [EnvironmentState] {
        use EnvironmentState::*;
        match self {
            Requested => &[Provisioning, Destroying, Error],
            Provisioning => &[Starting, Destroying, Error],
            Starting => &[Running, Destroying, Error],
            Running => &[Stopping, Destroying, Error],
            Stopping => &[Stopped, Destroying, Error],
            // The VM still exists, so a restart skips provisioning.
            Stopped => &[Starting, Destroying, Error],
            // Re-entering destroying re-issues the destroy request.
            Destroying => &[Destroying, Destroyed, Error],
            // Errored environments still hold capacity until destroyed.
            Error => &[Destroying],
            Destroyed => &[],
        }
    }

    pub fn can_transition_to(&self, next: EnvironmentState) -> bool {
        self.successors().contains(&next)
    }

    /// `destroyed` and `error` end the lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnvironmentState::Destroyed | EnvironmentState::Error)
    }

    /// Whether an environment in this state counts toward the concurrency quota.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// SQL list of states counted as active, for `state IN (...)` filters.
    pub(crate) fn active_sql_list() -> String {
        Self::ALL
            .iter()
            .filter(|s| s.is_active())
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Side effect to run after entering this state.
    pub fn side_effect(&self) -> SideEffect {
        match self {
            EnvironmentState::Requested => SideEffect::None,
            EnvironmentState::Provisioning => SideEffect::Enqueue(JobKind::Provision),
            EnvironmentState::Starting => SideEffect::Enqueue(JobKind::Start),
            EnvironmentState::Running => SideEffect::MarkStarted,
            EnvironmentState::Stopping => SideEffect::Enqueue(JobKind::Stop),
            EnvironmentState::Stopped => SideEffect::MarkStopped,
            EnvironmentState::Destroying => SideEffect::ReleaseAndDestroy,
            EnvironmentState::Destroyed => SideEffect::MarkDestroyed,
            EnvironmentState::Error => SideEffect::None,
        }
    }
}

/// What the orchestrator does once a transition has been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    None,
    /// Hand a work item to the job queue without waiting on it.
    Enqueue(JobKind),
    /// Stamp `started_at` and `last_activity_at`.
    MarkStarted,
    /// Stamp `stopped_at`.
    MarkStopped,
    /// Release reserved host capacity (at most once) and request VM destruction.
    ReleaseAndDestroy,
    /// Stamp `destroyed_at`.
    MarkDestroyed,
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnvironmentState::ALL
            .iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown environment state: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EnvironmentState::*;

    #[test]
    fn happy_path_is_allowed() {
        let path = [
            Requested,
            Provisioning,
            Starting,
            Running,
            Stopping,
            Stopped,
            Destroying,
            Destroyed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn destroyed_has_no_successors() {
        for next in EnvironmentState::ALL {
            assert!(!Destroyed.can_transition_to(next));
        }
    }

    #[test]
    fn error_and_destroying_reachable_from_every_non_terminal_state() {
        for state in EnvironmentState::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(state.can_transition_to(Error), "{} -> error", state);
            assert!(state.can_transition_to(Destroying), "{} -> destroying", state);
        }
    }

    #[test]
    fn stopped_restarts_without_provisioning() {
        assert!(Stopped.can_transition_to(Starting));
        assert!(!Stopped.can_transition_to(Provisioning));
        assert!(!Running.can_transition_to(Requested));
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("RUNNING".parse::<EnvironmentState>().unwrap(), Running);
        assert!("paused".parse::<EnvironmentState>().is_err());
    }

    #[test]
    fn active_list_excludes_terminal_states() {
        let list = EnvironmentState::active_sql_list();
        assert!(list.contains("'running'"));
        assert!(!list.contains("'destroyed'"));
        assert!(!list.contains("'error'"));
    }
}
