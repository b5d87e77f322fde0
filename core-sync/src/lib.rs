//! Backend reconciliation and sync triggering
//!
//! Two entry points drive everything here:
//!
//! - [`reconciler::NetworkReconciler`] merges the backend's notifications
//!   and buckets into the local store and publishes the joined bucket
//!   read-model.
//! - [`trigger::SyncTrigger`] classifies record-change reasons from the
//!   platform sync bridge and either invalidates read-models or starts a
//!   deduplicated incremental sync.
//!
//! Both resolve with describable outcomes instead of erroring; callers never
//! need failure handling beyond reading the result.

pub mod models;
pub mod reconciler;
pub mod trigger;

pub use models::{sort_read_model, BucketWithStats, ReconcileOutcome};
pub use reconciler::NetworkReconciler;
pub use trigger::{SyncTrigger, TriggerAction};
