use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use ember_types::api::CastVoteRequest;

use crate::auth::AppState;
use crate::sessions::CurrentUser;
use crate::{join_error, store_status};

/// Cast or change the caller's vote on a post. Only the sign of `value`
/// matters; repeating the same direction is a successful no-op.
pub async fn cast_vote(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<CastVoteRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.value == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.clone();
    let account_id = user.account_id.to_string();
    let pid = post_id.to_string();
    let value = req.value;
    tokio::task::spawn_blocking(move || {
        db.db.apply_vote(&account_id, &pid, value).map_err(store_status)
    })
    .await
    .map_err(join_error)??;

    Ok(Json(serde_json::json!({ "ok": true })))
}
