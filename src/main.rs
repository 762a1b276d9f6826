use axum::middleware;
use log::info;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crmserver::api_router::build_router;
use crmserver::auth::authentication_middleware;
use crmserver::config::AppConfig;
use crmserver::shared::state::AppState;
use crmserver::shared::utils::create_conn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env()?;
    let conn = create_conn(&config.database.url)?;
    let addr = config.bind_addr();

    let state = Arc::new(AppState::new(conn, config));

    let app = build_router(Arc::clone(&state))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            authentication_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
