use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};

use crate::auth::AppState;

/// Resolve the Bearer session token and reject the request without one.
/// Runs before any handler work, so an unauthenticated mutation never
/// touches the store.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&req).ok_or(StatusCode::UNAUTHORIZED)?;
    let user = state
        .sessions
        .resolve(&token)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Like `require_auth`, but anonymous requests pass through with no identity
/// attached. Feed reads use this so vote status resolves when a session is
/// present.
pub async fn optional_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if let Some(token) = bearer_token(&req) {
        if let Some(user) = state.sessions.resolve(&token).await {
            req.extensions_mut().insert(user);
        }
    }
    next.run(req).await
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}
