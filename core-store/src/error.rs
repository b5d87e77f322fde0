use thiserror::Error;

/// SQLite primary result codes that indicate a corrupt database file.
///
/// 11 = SQLITE_CORRUPT, 26 = SQLITE_NOTADB. Extended codes (e.g. 267 =
/// SQLITE_CORRUPT_VTAB, 523 = SQLITE_CORRUPT_SEQUENCE) keep the primary code
/// in the low byte.
const CORRUPT_PRIMARY_CODES: [u32; 2] = [11, 26];

/// Driver message fragments that indicate corruption even when no result code
/// is attached (some paths surface only the text).
const CORRUPT_MESSAGE_SIGNATURES: [&str; 2] =
    ["database disk image is malformed", "file is not a database"];

#[derive(Error, Debug)]
pub enum StoreError {
    /// The database file itself is damaged. This is not a query failure:
    /// callers should stop retrying and hand the database to recovery.
    #[error("Database corruption detected: {message}")]
    Corruption { message: String },

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` if this error means the database file is damaged.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if is_corruption_signature(&e) {
            StoreError::Corruption {
                message: e.to_string(),
            }
        } else {
            StoreError::Database(e)
        }
    }
}

/// Classify a driver error as corruption.
///
/// Checks the SQLite result code first (primary code extracted from extended
/// codes), then falls back to well-known message text for paths that lose the
/// code.
fn is_corruption_signature(e: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = e {
        if let Some(code) = db_err.code() {
            if let Ok(code) = code.parse::<u32>() {
                if CORRUPT_PRIMARY_CODES.contains(&(code & 0xff)) {
                    return true;
                }
            }
        }

        let message = db_err.message().to_lowercase();
        return CORRUPT_MESSAGE_SIGNATURES
            .iter()
            .any(|sig| message.contains(sig));
    }

    let message = e.to_string().to_lowercase();
    CORRUPT_MESSAGE_SIGNATURES
        .iter()
        .any(|sig| message.contains(sig))
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_variant_is_classified() {
        let err = StoreError::Corruption {
            message: "database disk image is malformed".to_string(),
        };
        assert!(err.is_corruption());
    }

    #[test]
    fn ordinary_errors_are_not_corruption() {
        let err = StoreError::NotFound {
            entity_type: "bucket".to_string(),
            id: "b-1".to_string(),
        };
        assert!(!err.is_corruption());

        let err = StoreError::Database(sqlx::Error::RowNotFound);
        assert!(!err.is_corruption());
    }

    #[test]
    fn row_not_found_converts_to_database() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn message_signature_matches_malformed_text() {
        // Protocol-level errors carry only text, no result code
        let err: StoreError = sqlx::Error::Protocol(
            "unexpected: database disk image is malformed".to_string(),
        )
        .into();
        assert!(err.is_corruption());
    }
}
