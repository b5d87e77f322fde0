//! Runtime-level errors
//!
//! Errors raised while assembling and configuring the core, before any
//! store or network work happens. Domain crates carry their own error
//! types; this one only covers wiring.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value is missing or rejected by validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// The host bridge does not provide a capability the core was asked to
    /// use, e.g. a platform without a push subscription source.
    #[error("host capability missing: {capability} ({message})")]
    CapabilityMissing { capability: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
