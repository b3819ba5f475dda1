use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;
use uuid::Uuid;

use ember_db::Database;
use ember_types::api::{
    AccountResponse, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};

use crate::sessions::{CurrentUser, SessionStore};
use crate::{join_error, parse_timestamp, store_status};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub sessions: SessionStore,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if !req.email.contains('@') {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Argon2id is deliberately slow; keep it off the async runtime
    let password = req.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(join_error)?
    .map_err(|e| {
        error!("password hashing failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let account_id = Uuid::new_v4();

    // A username or email collision surfaces from the store as Conflict
    let db = state.clone();
    let username = req.username.clone();
    let email = req.email.clone();
    tokio::task::spawn_blocking(move || {
        db.db
            .create_account(&account_id.to_string(), &username, &email, &password_hash)
            .map_err(store_status)
    })
    .await
    .map_err(join_error)??;

    let token = state.sessions.create(account_id, &req.username).await;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            account_id,
            username: req.username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let username = req.username.clone();
    let account = tokio::task::spawn_blocking(move || {
        db.db.get_account_by_username(&username).map_err(store_status)
    })
    .await
    .map_err(join_error)??
    .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let stored_hash = account.password.clone();
    let password = req.password;
    tokio::task::spawn_blocking(move || {
        let parsed_hash =
            PasswordHash::new(&stored_hash).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| StatusCode::UNAUTHORIZED)
    })
    .await
    .map_err(join_error)??;

    let account_id: Uuid = account
        .id
        .parse()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = state.sessions.create(account_id, &account.username).await;

    Ok(Json(LoginResponse {
        account_id,
        username: account.username,
        token,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> impl IntoResponse {
    state.sessions.revoke(&user.token).await;
    Json(serde_json::json!({ "ok": true }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let id = user.account_id.to_string();
    let account = tokio::task::spawn_blocking(move || {
        db.db.get_account_by_id(&id).map_err(store_status)
    })
    .await
    .map_err(join_error)??
    .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(Json(AccountResponse {
        id: user.account_id,
        username: account.username,
        email: account.email,
        created_at: parse_timestamp(&account.created_at),
    }))
}
