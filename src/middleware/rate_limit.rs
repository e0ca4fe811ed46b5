use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{config::LimiterConfig, errors::ApiError, state::AppState};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_CUTOFF: Duration = Duration::from_secs(180);

struct ClientBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Per-client token-bucket limiter. One bucket per IP, refilled at `rps` up to
/// `burst` capacity; each admitted request costs one token. The client map is
/// guarded by a single mutex shared with the idle sweep.
pub struct RateLimiter {
    enabled: bool,
    rps: f64,
    burst: f64,
    idle_cutoff: Duration,
    clients: Mutex<HashMap<IpAddr, ClientBucket>>,
}

impl RateLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            enabled: config.enabled,
            rps: config.rps,
            burst: f64::from(config.burst),
            idle_cutoff: IDLE_CUTOFF,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn admit(&self, ip: IpAddr) -> bool {
        self.admit_at(ip, Instant::now())
    }

    fn admit_at(&self, ip: IpAddr, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }

        let mut clients = self.clients.lock().expect("rate limiter lock poisoned");
        let bucket = clients.entry(ip).or_insert(ClientBucket {
            tokens: self.burst,
            last_refill: now,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rps).min(self.burst);
        bucket.last_refill = now;
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drops buckets not seen within the idle cutoff, bounding map growth.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let mut clients = self.clients.lock().expect("rate limiter lock poisoned");
        clients.retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= self.idle_cutoff);
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().expect("rate limiter lock poisoned").len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        })
    }
}

/// Resolves the real client address: first hop of X-Forwarded-For when a proxy
/// set it, otherwise the socket peer.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(ip) = forwarded
            .split(',')
            .next()
            .and_then(|first| first.trim().parse().ok())
        {
            return Some(ip);
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match client_ip(&request) {
        Some(ip) => {
            if !state.limiter.admit(ip) {
                debug!(client = %ip, "rate limit exceeded");
                return Err(ApiError::RateLimitExceeded);
            }
        }
        None => warn!("no client address available, skipping rate limit"),
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rps: f64, burst: u32, enabled: bool) -> RateLimiter {
        RateLimiter::new(&LimiterConfig { rps, burst, enabled })
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn burst_admits_exactly_burst_requests() {
        let limiter = limiter(2.0, 4, true);
        let now = Instant::now();
        for _ in 0..4 {
            assert!(limiter.admit_at(ip(1), now));
        }
        assert!(!limiter.admit_at(ip(1), now));
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = limiter(2.0, 4, true);
        let start = Instant::now();
        for _ in 0..4 {
            assert!(limiter.admit_at(ip(1), start));
        }
        assert!(!limiter.admit_at(ip(1), start));
        // 2 rps for one second buys two more requests.
        let later = start + Duration::from_secs(1);
        assert!(limiter.admit_at(ip(1), later));
        assert!(limiter.admit_at(ip(1), later));
        assert!(!limiter.admit_at(ip(1), later));
    }

    #[test]
    fn clients_are_limited_independently() {
        let limiter = limiter(1.0, 1, true);
        let now = Instant::now();
        assert!(limiter.admit_at(ip(1), now));
        assert!(!limiter.admit_at(ip(1), now));
        assert!(limiter.admit_at(ip(2), now));
    }

    #[test]
    fn disabled_limiter_always_admits() {
        let limiter = limiter(1.0, 1, false);
        let now = Instant::now();
        for _ in 0..100 {
            assert!(limiter.admit_at(ip(1), now));
        }
    }

    #[test]
    fn sweep_purges_idle_clients_only() {
        let limiter = limiter(2.0, 4, true);
        let start = Instant::now();
        limiter.admit_at(ip(1), start);
        limiter.admit_at(ip(2), start + Duration::from_secs(240));
        assert_eq!(limiter.tracked_clients(), 2);

        limiter.sweep_at(start + Duration::from_secs(241));
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
