use axum::{
    Router,
    routing::{IntoMakeService, get},
};
use tower_http::cors::CorsLayer;

use crate::DeploymentImpl;

pub mod health;
pub mod processing_logs;
pub mod repositories;

pub fn router(deployment: DeploymentImpl) -> IntoMakeService<Router> {
    let base_routes = Router::new()
        .route("/health", get(health::health_check))
        .merge(repositories::router())
        .merge(processing_logs::router())
        .with_state(deployment);

    Router::new()
        .nest("/api", base_routes)
        .layer(CorsLayer::permissive())
        .into_make_service()
}
