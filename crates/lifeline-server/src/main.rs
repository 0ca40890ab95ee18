mod config;
mod sweeper;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use lifeline_api::auth::{AppState, AppStateInner};
use lifeline_db::Database;
use lifeline_gateway::connection;
use lifeline_gateway::dispatcher::Dispatcher;
use lifeline_types::models::Role;

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lifeline=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("FATAL: {}", e);
            eprintln!("FATAL: {e}. Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    if let Some(username) = &config.super_admin {
        if db.promote_username(username, Role::SuperAdmin)? {
            info!("Promoted {} to super admin", username);
        } else {
            warn!("LIFELINE_SUPER_ADMIN user '{}' does not exist yet", username);
        }
    }

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        max_responders: config.max_responders,
    });

    let state = ServerState {
        db: db.clone(),
        dispatcher: dispatcher.clone(),
        jwt_secret: config.jwt_secret.clone(),
    };

    tokio::spawn(sweeper::run_sweep_loop(
        db,
        dispatcher,
        config.sweep_interval,
    ));

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(lifeline_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Lifeline server listening on {}", config.addr);
    info!("Max responders per alert: {}", config.max_responders);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.jwt_secret, state.db)
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
