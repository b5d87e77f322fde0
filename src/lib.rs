//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-cache`, `core-sync`, `core-recovery`). Host
//! applications can depend on `npc-workspace` and enable the documented
//! features without needing to wire each crate individually.

#[cfg(feature = "media-cache")]
pub use core_cache;

#[cfg(feature = "reconciler")]
pub use core_sync;

#[cfg(feature = "recovery")]
pub use core_recovery;
