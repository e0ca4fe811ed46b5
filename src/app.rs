use std::{any::Any, future::Future, net::SocketAddr, time::Duration};

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    errors::{method_not_allowed, ApiError},
    middleware::{auth, metrics, rate_limit},
    movies, state::AppState, tokens, users,
};

/// How long open connections and background tasks each get after the shutdown
/// signal before the process stops waiting for them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Assembles the router and the middleware pipeline. Outermost to innermost:
/// tracing, metrics, panic recovery, CORS, rate limiting, authentication.
/// Metrics sit outside panic recovery so a recovered 500 is still counted.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/v1/healthcheck", get(healthcheck).fallback(method_not_allowed))
        .route("/debug/vars", get(metrics::debug_vars).fallback(method_not_allowed))
        .merge(movies::router(&state))
        .merge(users::router())
        .merge(tokens::router())
        .fallback(|| async { ApiError::NotFound })
        .layer(from_fn_with_state(state.clone(), auth::authenticate))
        .layer(from_fn_with_state(state.clone(), rate_limit::rate_limit))
        .layer(cors_layer(&state))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(from_fn_with_state(state.clone(), metrics::track))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
        .with_state(state)
}

/// Cross-origin access is granted only to configured origins. An empty list
/// means same-origin clients only.
fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_trusted_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// GET /v1/healthcheck
async fn healthcheck(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "available",
        "system_info": {
            "environment": state.config.env,
            "version": env!("CARGO_PKG_VERSION"),
        },
    }))
}

/// A panicking handler yields the same opaque 500 as any other internal error.
/// `Connection: close` tells the client not to reuse a connection whose state
/// is no longer trustworthy.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<&str>()
        .copied()
        .map(str::to_string)
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %detail, "request handler panicked");

    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "the server encountered a problem and could not process your request"
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

pub async fn serve(app: Router, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;

    tracing::info!(%addr, env = %state.config.env, "starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_tx.send(()).ok();
    });

    serve_until_deadline(async move { server.await }, shutdown_rx, SHUTDOWN_GRACE).await?;

    // Give queued background work its own bounded window before exiting.
    tracing::info!("waiting for background tasks to complete");
    if tokio::time::timeout(SHUTDOWN_GRACE, state.drain_background_tasks())
        .await
        .is_err()
    {
        tracing::warn!("background tasks did not finish before shutdown deadline");
    }

    tracing::info!("server stopped");
    Ok(())
}

/// Awaits the server, but once the shutdown signal has fired the remaining
/// open connections only get `grace` to drain. A connection that will not
/// finish is abandoned with an error logged rather than holding the process
/// open indefinitely.
async fn serve_until_deadline<F>(
    server: F,
    mut shutdown_started: tokio::sync::watch::Receiver<()>,
    grace: Duration,
) -> std::io::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(server);
    tokio::select! {
        result = &mut server => result,
        _ = async {
            shutdown_started.changed().await.ok();
            tokio::time::sleep(grace).await;
        } => {
            tracing::error!(
                grace_secs = grace.as_secs(),
                "open connections did not drain within the shutdown grace period"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
