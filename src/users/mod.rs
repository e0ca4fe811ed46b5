use axum::{
    routing::{post, put},
    Router,
};

use crate::{errors::method_not_allowed, state::AppState};

pub mod handlers;
pub mod model;
pub mod password;
pub mod permissions;
pub mod repo;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/users",
            post(handlers::register_user).fallback(method_not_allowed),
        )
        .route(
            "/v1/users/activated",
            put(handlers::activate_user).fallback(method_not_allowed),
        )
}
