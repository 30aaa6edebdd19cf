use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::context::SharedContext;

mod api;
mod auth;
mod plugins;
mod ws;

pub fn router(ctx: SharedContext) -> Router {
    let api = Router::new()
        .route("/api/config", get(api::get_config).post(api::update_config))
        .route("/api/rcon", post(api::rcon_command))
        .route("/api/status", get(api::server_status))
        .route("/api/logs", get(api::daemon_logs))
        .route("/api/server/control", post(api::server_control))
        .route("/api/plugins", get(plugins::list))
        .route("/api/plugins/:name/:kind", get(plugins::read))
        .route("/api/plugins/content", post(plugins::write))
        .route("/api/plugins/upload", post(plugins::upload))
        .route("/api/plugins/toggle", post(plugins::toggle))
        .route("/api/plugins/delete", post(plugins::delete))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), auth::require_bearer));

    let mut app = api.route("/ws", get(ws::upgrade));

    if let Some(dir) = static_dir(&ctx) {
        info!("serving static files from {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

fn static_dir(ctx: &SharedContext) -> Option<PathBuf> {
    let configured = ctx.config.server_config().dashboard_static_dir;
    if configured.trim().is_empty() {
        return None;
    }
    let dir = PathBuf::from(configured);
    let dir = if dir.is_absolute() { dir } else { ctx.paths.root.join(dir) };
    dir.is_dir().then_some(dir)
}

pub async fn serve(
    listener: TcpListener,
    ctx: SharedContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<SocketAddr> {
    let addr = listener.local_addr()?;
    info!("dashboard listening on http://{addr}");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(addr)
}
