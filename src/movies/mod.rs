use axum::{
    handler::Handler,
    middleware::from_fn_with_state,
    routing::get,
    Router,
};

use crate::{
    errors::method_not_allowed, middleware::auth::permission_gate, state::AppState,
    users::permissions,
};

pub mod filters;
pub mod handlers;
pub mod model;
pub mod repo;

/// Movie routes. Each route carries its own permission gate so authorization
/// runs before the request body is touched.
pub fn router(state: &AppState) -> Router<AppState> {
    let read = from_fn_with_state((state.clone(), permissions::MOVIES_READ), permission_gate);
    let write = from_fn_with_state((state.clone(), permissions::MOVIES_WRITE), permission_gate);

    Router::new()
        .route(
            "/v1/movies",
            get(handlers::list_movies.layer(read.clone()))
                .post(handlers::create_movie.layer(write.clone()))
                .fallback(method_not_allowed),
        )
        .route(
            "/v1/movies/:id",
            get(handlers::show_movie.layer(read))
                .patch(handlers::update_movie.layer(write.clone()))
                .delete(handlers::delete_movie.layer(write))
                .fallback(method_not_allowed),
        )
}
