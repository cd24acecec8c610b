pub mod cors;
pub mod health;
pub mod predict;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/",
            post(predict::predict_calories).options(cors::preflight),
        )
        .route(
            "/predictCalories",
            post(predict::predict_calories).options(cors::preflight),
        )
        .route("/health", get(health::healthcheck))
}
