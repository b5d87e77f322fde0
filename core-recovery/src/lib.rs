//! Database corruption recovery
//!
//! Listens for corruption reports, exposes a watchable [`state::RecoveryState`]
//! for the host UI, and runs the recovery strategies: tiered local recovery,
//! backend re-hydration, and iCloud partial re-hydration.

pub mod error;
pub mod service;
pub mod state;

pub use error::{RecoveryError, Result};
pub use service::{RecoveryService, StoreLifecycle};
pub use state::{CorruptionInfo, RecoveryState, RecoveryStrategy};
