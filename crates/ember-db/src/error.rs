use thiserror::Error;

/// Store failure taxonomy surfaced to the API layer.
///
/// `NotFound` and `Conflict` are terminal for the triggering call.
/// `Unavailable` is transient; callers may retry since every mutation is
/// applied as an all-or-nothing unit.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("uniqueness conflict")]
    Conflict,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}
