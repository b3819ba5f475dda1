use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use ember_api::auth::{self, AppState, AppStateInner};
use ember_api::middleware::{optional_auth, require_auth};
use ember_api::posts;
use ember_api::sessions::SessionStore;
use ember_api::votes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ember=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("EMBER_DB_PATH").unwrap_or_else(|_| "ember.db".into());
    let host = std::env::var("EMBER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("EMBER_PORT")
        .unwrap_or_else(|_| "4000".into())
        .parse()?;

    // Init database
    let db = ember_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        sessions: SessionStore::new(),
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    // Feed and CRUD: anonymous reads pass through, writes check the session
    // inside the handler
    let post_routes = Router::new()
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route(
            "/posts/{post_id}",
            get(posts::get_post)
                .patch(posts::update_post)
                .delete(posts::delete_post),
        )
        .layer(middleware::from_fn_with_state(state.clone(), optional_auth))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/posts/{post_id}/vote", post(votes::cast_vote))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(post_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ember server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
