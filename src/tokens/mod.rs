use axum::{routing::post, Router};

use crate::{errors::method_not_allowed, state::AppState};

pub mod handlers;
pub mod model;
pub mod repo;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/tokens/authentication",
            post(handlers::create_authentication_token).fallback(method_not_allowed),
        )
        .route(
            "/v1/tokens/activation",
            post(handlers::create_activation_token).fallback(method_not_allowed),
        )
}
