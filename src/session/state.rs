//! Session states and outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::error::ProvisionError;

/// States of a provisioning session, in transition order. `Failed` is
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    PlaceholderCreated,
    ClientRestarted,
    RuntimeTriggered,
    RuntimeVerified,
    Finalized,
    SupplementApplied,
    Complete,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::PlaceholderCreated => "PlaceholderCreated",
            SessionState::ClientRestarted => "ClientRestarted",
            SessionState::RuntimeTriggered => "RuntimeTriggered",
            SessionState::RuntimeVerified => "RuntimeVerified",
            SessionState::Finalized => "Finalized",
            SessionState::SupplementApplied => "SupplementApplied",
            SessionState::Complete => "Complete",
            SessionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub app_name: String,
    pub app_id_signed: i32,
    pub app_id_unsigned: u32,
    /// Mapping name of the runtime the session registered.
    pub runtime: String,
    pub prefix_dir: PathBuf,
    /// Identifier the client itself reports for the shortcut, when the
    /// enumeration interface surfaced one in time.
    pub resolved_app_id: Option<u32>,
    /// Set when the client-assigned identifier could not be confirmed;
    /// callers decide whether that is tolerable downstream.
    pub identifier_uncertain: bool,
    pub completed_at: DateTime<Utc>,
}

/// A fatal session outcome: the transition that failed, the last state
/// that was fully reached, and the underlying reason.
///
/// The placeholder is intentionally not rolled back; with this
/// information a caller can resume from the last completed state or
/// clean up explicitly.
#[derive(Debug, Error)]
#[error("provisioning failed entering {failed} (last completed: {last_completed}): {reason}")]
pub struct SessionFailure {
    pub failed: SessionState,
    pub last_completed: SessionState,
    #[source]
    pub reason: ProvisionError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_order_matches_transition_sequence() {
        assert!(SessionState::Idle < SessionState::PlaceholderCreated);
        assert!(SessionState::PlaceholderCreated < SessionState::ClientRestarted);
        assert!(SessionState::RuntimeTriggered < SessionState::RuntimeVerified);
        assert!(SessionState::SupplementApplied < SessionState::Complete);
    }

    #[test]
    fn report_serializes_for_front_ends() {
        let report = SessionReport {
            app_name: "Tuxborn".into(),
            app_id_signed: -1_480_407_418,
            app_id_unsigned: 2_814_559_878,
            runtime: "GE-Proton10-16".into(),
            prefix_dir: PathBuf::from("/steam/steamapps/compatdata/2814559878"),
            resolved_app_id: Some(2_814_559_878),
            identifier_uncertain: false,
            completed_at: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["app_name"], "Tuxborn");
        assert_eq!(json["app_id_unsigned"], 2_814_559_878u32);
        assert_eq!(json["identifier_uncertain"], false);
    }

    #[test]
    fn failure_reports_both_states() {
        let failure = SessionFailure {
            failed: SessionState::RuntimeVerified,
            last_completed: SessionState::RuntimeTriggered,
            reason: ProvisionError::PrefixTimeout {
                prefix: PathBuf::from("/tmp/compatdata/1"),
                waited_secs: 60,
            },
        };
        let message = failure.to_string();
        assert!(message.contains("RuntimeVerified"));
        assert!(message.contains("RuntimeTriggered"));
    }
}
