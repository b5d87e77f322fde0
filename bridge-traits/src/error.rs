use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Remote returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` if the error represents an HTTP status in the
    /// gone/not-found class, meaning the remote content no longer exists and
    /// retrying will not help.
    pub fn is_gone(&self) -> bool {
        matches!(self, BridgeError::Http { status, .. } if matches!(status, 404 | 410))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gone_classification() {
        let gone = BridgeError::Http {
            status: 410,
            message: "gone".to_string(),
        };
        assert!(gone.is_gone());

        let server = BridgeError::Http {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(!server.is_gone());
        assert!(!BridgeError::NotAvailable("x".to_string()).is_gone());
    }
}
