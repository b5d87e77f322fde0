//! Observable recovery state
//!
//! The state is ephemeral by design: it is never persisted, so a corrupted
//! store can never wedge the recovery UI itself. A fresh process always
//! starts all-clear.

use serde::{Deserialize, Serialize};

/// Recovery strategies, in order of how much they discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Snapshot, export, reset, re-import. Loses nothing when export works.
    Local,
    /// Reset then refetch everything from the backend.
    Backend,
    /// Re-hydrate notification content from the platform sync store only.
    ICloud,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Local => "local",
            RecoveryStrategy::Backend => "backend",
            RecoveryStrategy::ICloud => "icloud",
        }
    }
}

/// What corruption was last detected, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionInfo {
    /// Component that hit the error ("cache", "sync", ...).
    pub source: String,
    pub message: String,
    /// Unix timestamp of detection.
    pub detected_at: i64,
}

/// Snapshot of the recovery subsystem for the host UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    /// Latches true on corruption intake and on any recovery failure, and
    /// stays set until the user dismisses it or a recovery completes.
    pub visible: bool,
    pub is_recovering: bool,
    /// Strategy of the running (or last failed) recovery.
    pub strategy: Option<RecoveryStrategy>,
    pub status_message: Option<String>,
    pub last_corruption: Option<CorruptionInfo>,
    pub last_error: Option<String>,
    /// Snapshot copies taken by the last local recovery.
    pub last_backup_files: Vec<String>,
    /// Logical export written by the last local recovery.
    pub last_export_file: Option<String>,
}

impl RecoveryState {
    /// The everything-is-fine state.
    pub fn all_clear() -> Self {
        Self::default()
    }

    /// Whether the host should offer recovery actions.
    pub fn needs_attention(&self) -> bool {
        self.visible || self.last_corruption.is_some()
    }
}
