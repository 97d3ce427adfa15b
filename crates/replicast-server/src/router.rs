use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use replicast_cache::ReplicaCache;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handler;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ReplicaCache>,
}

/// Build the axum router with all replicast endpoints.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let mut router: Router<AppState> = Router::new()
        .route("/health", get(handler::health))
        .route("/download/:id", get(handler::download))
        .route("/browse", get(handler::browse_root))
        .route("/browse/*path", get(handler::browse))
        .route(
            "/*path",
            get(handler::get_object)
                .post(handler::upload)
                .put(handler::put_object)
                .delete(handler::delete_object),
        )
        .layer(DefaultBodyLimit::max(config.max_upload_size))
        .layer(TraceLayer::new_for_http());
    if config.permissive_cors {
        router = router.layer(CorsLayer::permissive());
    }
    router.with_state(state)
}
