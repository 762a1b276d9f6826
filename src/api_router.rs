use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::shared::state::AppState;
use crate::{auth, cache, calls, clients, crm_tasks, leads, llm, pipelines, proposals, settings, telegram};

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Builds the full route tree. Webhooks and login stay public; everything
/// under /api goes through the response cache and the auth guard. The guard
/// layer is outermost so unauthenticated requests never touch the cache.
pub fn build_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public = Router::new()
        .route("/health", get(health))
        .merge(auth::configure())
        .merge(telegram::configure())
        .route("/webhook/retell", post(calls::retell_webhook));

    let protected = Router::new()
        .merge(clients::configure())
        .merge(pipelines::configure())
        .merge(leads::configure())
        .merge(crm_tasks::configure())
        .merge(calls::configure())
        .merge(proposals::configure())
        .merge(settings::configure())
        .merge(llm::copilot::configure())
        .layer(middleware::from_fn_with_state(
            state,
            cache::response_cache_middleware,
        ))
        .layer(middleware::from_fn(auth::require_authentication));

    public.merge(protected)
}
