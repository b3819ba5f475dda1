use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use ember_db::models::PostRow;
use ember_types::api::{
    AccountSummary, CreatePostRequest, PostListResponse, PostResponse, UpdatePostRequest,
};

use crate::auth::AppState;
use crate::loaders::{Loaded, Loaders};
use crate::sessions::CurrentUser;
use crate::{join_error, parse_timestamp, store_status};

const SNIPPET_LEN: usize = 50;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Opaque cursor from a previous page's `next_cursor`. Absent means
    /// "start from the most recent".
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    20
}

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    viewer: Option<Extension<CurrentUser>>,
) -> Result<impl IntoResponse, StatusCode> {
    let before = match query.cursor.as_deref() {
        Some(cursor) => Some(decode_cursor(cursor)?),
        None => None,
    };
    let viewer_id = viewer.map(|Extension(user)| user.account_id.to_string());

    let db = state.clone();
    let limit = query.limit;
    let vid = viewer_id.clone();
    let (rows, has_more, loaders) = tokio::task::spawn_blocking(move || {
        let (rows, has_more) = db
            .db
            .posts_page(limit, before.as_deref())
            .map_err(store_status)?;

        // One loader pair per request: gather every author id and vote key
        // this page needs, then hit the store once per loader.
        let mut loaders = Loaders::new();
        for row in &rows {
            loaders.accounts.enqueue(row.author_id.clone());
            if let Some(viewer_id) = &vid {
                loaders.votes.enqueue((viewer_id.clone(), row.id.clone()));
            }
        }
        loaders.flush(&db.db).map_err(store_status)?;

        Ok::<_, StatusCode>((rows, has_more, loaders))
    })
    .await
    .map_err(join_error)??;

    let next_cursor = has_more
        .then(|| rows.last().map(|row| encode_cursor(&row.created_at)))
        .flatten();

    let posts = rows
        .into_iter()
        .map(|row| post_response(row, viewer_id.as_deref(), &loaders))
        .collect();

    Ok(Json(PostListResponse {
        posts,
        has_more,
        next_cursor,
    }))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    viewer: Option<Extension<CurrentUser>>,
) -> Result<impl IntoResponse, StatusCode> {
    let viewer_id = viewer.map(|Extension(user)| user.account_id.to_string());

    let db = state.clone();
    let pid = post_id.to_string();
    let vid = viewer_id.clone();
    let (row, loaders) = tokio::task::spawn_blocking(move || {
        let row = db
            .db
            .get_post(&pid)
            .map_err(store_status)?
            .ok_or(StatusCode::NOT_FOUND)?;

        let mut loaders = Loaders::new();
        loaders.accounts.enqueue(row.author_id.clone());
        if let Some(viewer_id) = &vid {
            loaders.votes.enqueue((viewer_id.clone(), row.id.clone()));
        }
        loaders.flush(&db.db).map_err(store_status)?;

        Ok::<_, StatusCode>((row, loaders))
    })
    .await
    .map_err(join_error)??;

    Ok(Json(post_response(row, viewer_id.as_deref(), &loaders)))
}

pub async fn create_post(
    State(state): State<AppState>,
    viewer: Option<Extension<CurrentUser>>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(Extension(user)) = viewer else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    if req.title.trim().is_empty() || req.body.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let post_id = Uuid::new_v4();
    let db = state.clone();
    let author_id = user.account_id.to_string();
    let row = tokio::task::spawn_blocking(move || {
        db.db
            .create_post(&post_id.to_string(), &author_id, &req.title, &req.body)
            .map_err(store_status)
    })
    .await
    .map_err(join_error)??;

    let author = AccountSummary {
        id: user.account_id,
        username: user.username,
    };

    // A fresh post has no votes yet
    Ok((StatusCode::CREATED, Json(build_response(row, author, None))))
}

pub async fn update_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    viewer: Option<Extension<CurrentUser>>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(Extension(user)) = viewer else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let viewer_id = user.account_id.to_string();

    let db = state.clone();
    let pid = post_id.to_string();
    let vid = viewer_id.clone();
    let (row, loaders) = tokio::task::spawn_blocking(move || {
        let existing = db
            .db
            .get_post(&pid)
            .map_err(store_status)?
            .ok_or(StatusCode::NOT_FOUND)?;
        if existing.author_id != vid {
            return Err(StatusCode::FORBIDDEN);
        }

        let row = db
            .db
            .update_post(&pid, req.title.as_deref(), req.body.as_deref())
            .map_err(store_status)?;

        let mut loaders = Loaders::new();
        loaders.accounts.enqueue(row.author_id.clone());
        loaders.votes.enqueue((vid.clone(), row.id.clone()));
        loaders.flush(&db.db).map_err(store_status)?;

        Ok::<_, StatusCode>((row, loaders))
    })
    .await
    .map_err(join_error)??;

    Ok(Json(post_response(row, Some(&viewer_id), &loaders)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    viewer: Option<Extension<CurrentUser>>,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(Extension(user)) = viewer else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let db = state.clone();
    let pid = post_id.to_string();
    let author_id = user.account_id.to_string();
    tokio::task::spawn_blocking(move || {
        let existing = db
            .db
            .get_post(&pid)
            .map_err(store_status)?
            .ok_or(StatusCode::NOT_FOUND)?;
        if existing.author_id != author_id {
            return Err(StatusCode::FORBIDDEN);
        }

        db.db.delete_post(&pid).map_err(store_status)
    })
    .await
    .map_err(join_error)??;

    Ok(StatusCode::NO_CONTENT)
}

fn post_response(row: PostRow, viewer_id: Option<&str>, loaders: &Loaders) -> PostResponse {
    let author = match loaders.accounts.get(&row.author_id) {
        Some(Loaded::Present(account)) => AccountSummary {
            id: account.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt account id '{}': {}", account.id, e);
                Uuid::nil()
            }),
            username: account.username.clone(),
        },
        _ => {
            warn!("Author '{}' missing for post '{}'", row.author_id, row.id);
            AccountSummary {
                id: Uuid::nil(),
                username: "unknown".to_string(),
            }
        }
    };

    let vote_status = viewer_id.and_then(|viewer_id| {
        match loaders.votes.get(&(viewer_id.to_string(), row.id.clone())) {
            Some(Loaded::Present(vote)) => Some(vote.value),
            _ => None,
        }
    });

    build_response(row, author, vote_status)
}

fn build_response(row: PostRow, author: AccountSummary, vote_status: Option<i64>) -> PostResponse {
    PostResponse {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt post id '{}': {}", row.id, e);
            Uuid::nil()
        }),
        author,
        snippet: snippet(&row.body),
        score: row.score,
        vote_status,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        title: row.title,
        body: row.body,
    }
}

/// Leading characters of the body for list rendering, elided when truncated.
fn snippet(body: &str) -> String {
    let mut out: String = body.chars().take(SNIPPET_LEN).collect();
    if out.len() < body.len() {
        out.push_str("...");
    }
    out
}

fn encode_cursor(created_at: &str) -> String {
    B64.encode(created_at)
}

fn decode_cursor(cursor: &str) -> Result<String, StatusCode> {
    let bytes = B64.decode(cursor).map_err(|_| StatusCode::BAD_REQUEST)?;
    String::from_utf8(bytes).map_err(|_| StatusCode::BAD_REQUEST)
}
