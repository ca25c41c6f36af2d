use anyhow::Result;
use axum::{
    middleware,
    routing::{get, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::Config,
    engine::Engine,
    handlers::{self, profiler_api::ViewerState},
    metrics,
    profiler::{profile_middleware, Profiler},
    signals::setup_signal_handlers,
    storage::ProfilerDb,
};

/// Start the profiled demo server
///
/// This function:
/// 1. Initializes metrics
/// 2. Connects the application engine and the profiler database
/// 3. Sets up signal handlers for graceful shutdown and exclusion reload
/// 4. Serves requests with graceful shutdown support
pub async fn start_server(config: Config, config_path: PathBuf) -> Result<()> {
    info!("Initializing Prometheus metrics...");
    let metrics_handle = Arc::new(metrics::init_metrics()?);

    let engine = Arc::new(
        Engine::connect(&config.database.url, config.database.max_connections).await?,
    );
    handlers::items::ensure_schema(&engine).await?;

    let db = Arc::new(
        ProfilerDb::connect(
            config.profiler.database_url(&config.database),
            config.database.max_connections,
        )
        .await?,
    );

    let profiler = Arc::new(Profiler::from_config(engine, db, &config.profiler));

    // SIGTERM, SIGINT for shutdown; SIGHUP for exclusion reload
    let (shutdown_tx, signal_handle) = setup_signal_handlers(config_path, profiler.clone())?;
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app = create_router(profiler, metrics_handle);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting SQL profiler demo on {}", addr);
    info!(
        enabled = config.profiler.enabled,
        excluded_paths = config.profiler.exclude_paths.len(),
        excluded_prefixes = config.profiler.exclude_prefixes.len(),
        "Profiler configured"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    signal_handle.await?;
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware
///
/// Every route sits behind the profiling middleware; the viewer and
/// metrics routes are skipped by its exclusion rules.
pub fn create_router(profiler: Arc<Profiler>, metrics_handle: Arc<PrometheusHandle>) -> Router {
    let item_routes = Router::new()
        .route(
            "/items",
            get(handlers::items::list_items).post(handlers::items::create_item),
        )
        .route(
            "/items/:id",
            put(handlers::items::update_item).delete(handlers::items::delete_item),
        )
        .with_state(profiler.engine().clone());

    let viewer_routes = Router::new()
        .route(
            "/all_request",
            get(handlers::profiler_api::list_requests)
                .delete(handlers::profiler_api::clear_requests),
        )
        .route(
            "/request_detail/:id",
            get(handlers::profiler_api::request_detail),
        )
        .route(
            "/request_query/:id",
            get(handlers::profiler_api::request_queries),
        )
        .route(
            "/request_query_details/:id",
            get(handlers::profiler_api::query_detail),
        )
        .with_state(ViewerState {
            db: profiler.db().clone(),
        });

    Router::new()
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .with_state(metrics_handle)
        .merge(item_routes)
        .merge(viewer_routes)
        .layer(middleware::from_fn_with_state(profiler, profile_middleware))
        .layer(TraceLayer::new_for_http())
}
