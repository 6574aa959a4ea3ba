use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use configuration::ServerSettings;
use database::PlantRepository;
use health::HealthAggregator;
use std::future::Future;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod handlers;

/// The shared application state that all handlers can access.
#[derive(Clone)]
pub struct AppState {
    pub health: HealthAggregator,
    pub plants: PlantRepository,
}

/// `*` allows any origin; anything else must be a single valid origin.
pub fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let allow_origin = if origin.trim() == "*" {
        AllowOrigin::any()
    } else {
        let value = HeaderValue::from_str(origin.trim())
            .map_err(|e| anyhow::anyhow!("invalid CORS origin '{}': {}", origin, e))?;
        AllowOrigin::exact(value)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any()))
}

/// Builds the application router.
pub fn build_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/plants", get(handlers::list_plants).post(handlers::create_plant))
        .route(
            "/api/plants/:id",
            get(handlers::get_plant)
                .patch(handlers::update_plant_status)
                .delete(handlers::delete_plant),
        )
        .route("/api/plants/:id/soil-data", post(handlers::add_soil_reading))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(cors)
        // This middleware will automatically log information about every incoming request.
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024))
}

/// Serves the API until `shutdown` resolves, then drains in-flight requests.
pub async fn run_server<S>(settings: &ServerSettings, state: Arc<AppState>, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr = settings.socket_addr()?;
    let app = build_router(state, cors_layer(&settings.cors_origin)?);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server started and listening on {}", addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    tracing::info!("Web server stopped");
    Ok(())
}
