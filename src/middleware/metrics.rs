use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Instant,
};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    Json,
};
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::state::AppState;

/// Request-level counters, updated outside every other layer so the processing
/// time covers the whole pipeline and the status is the one actually sent.
#[derive(Default)]
pub struct Metrics {
    total_requests_received: AtomicU64,
    total_responses_sent: AtomicU64,
    total_processing_time_micros: AtomicU64,
    responses_by_status: Mutex<HashMap<u16, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_received(&self) {
        self.total_requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_sent(&self, status: u16, elapsed_micros: u64) {
        self.total_responses_sent.fetch_add(1, Ordering::Relaxed);
        self.total_processing_time_micros
            .fetch_add(elapsed_micros, Ordering::Relaxed);
        let mut by_status = self.responses_by_status.lock().expect("metrics lock poisoned");
        *by_status.entry(status).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> Value {
        let by_status: HashMap<String, u64> = self
            .responses_by_status
            .lock()
            .expect("metrics lock poisoned")
            .iter()
            .map(|(status, count)| (status.to_string(), *count))
            .collect();

        json!({
            "total_requests_received": self.total_requests_received.load(Ordering::Relaxed),
            "total_responses_sent": self.total_responses_sent.load(Ordering::Relaxed),
            "total_processing_time_us": self.total_processing_time_micros.load(Ordering::Relaxed),
            "total_responses_sent_by_status": by_status,
        })
    }
}

pub async fn track(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.metrics.request_received();
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
    state.metrics.response_sent(response.status().as_u16(), elapsed);
    response
}

/// GET /debug/vars
pub async fn debug_vars(State(state): State<AppState>) -> Json<Value> {
    let mut vars = state.metrics.snapshot();
    if let Some(map) = vars.as_object_mut() {
        map.insert("version".into(), json!(env!("CARGO_PKG_VERSION")));
        map.insert(
            "timestamp".into(),
            json!(OffsetDateTime::now_utc().unix_timestamp()),
        );
    }
    Json(vars)
}
