pub mod auth;
pub mod loaders;
pub mod middleware;
pub mod posts;
pub mod sessions;
pub mod votes;

use axum::http::StatusCode;
use ember_db::StoreError;
use tracing::error;

/// Map a store failure onto the status it surfaces as. NotFound and Conflict
/// are terminal for the call; Unavailable is transient and safe to retry.
pub(crate) fn store_status(err: StoreError) -> StatusCode {
    match err {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Conflict => StatusCode::CONFLICT,
        StoreError::Unavailable(msg) => {
            error!("store unavailable: {}", msg);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub(crate) fn join_error(err: tokio::task::JoinError) -> StatusCode {
    error!("spawn_blocking join error: {}", err);
    StatusCode::INTERNAL_SERVER_ERROR
}

/// SQLite stores timestamps as naive UTC text, with or without fractional
/// seconds. Parse both shapes.
pub(crate) fn parse_timestamp(raw: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::warn!("Corrupt timestamp '{}': {}", raw, e);
            chrono::DateTime::default()
        })
}
