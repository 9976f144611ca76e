use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{error::AppError, state::AppState};

const BUCKET_PRUNE_THRESHOLD: usize = 4096;

/// Fixed-window request counter keyed by client address, for the
/// unauthenticated action routes.
#[derive(Clone)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<Mutex<HashMap<IpAddr, Window>>>,
}

struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(window_secs: u64, max_requests: u32) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max_requests,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records one request from `addr` and reports whether it is allowed.
    pub fn allow(&self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if buckets.len() > BUCKET_PRUNE_THRESHOLD {
            let window = self.window;
            buckets.retain(|_, bucket| now.duration_since(bucket.started) < window);
        }

        let bucket = buckets.entry(addr).or_insert(Window { started: now, count: 0 });
        if now.duration_since(bucket.started) >= self.window {
            bucket.started = now;
            bucket.count = 0;
        }

        bucket.count += 1;
        bucket.count <= self.max_requests
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let addr = client_addr(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
        state.config.trust_forwarded_for,
    );

    if !state.rate_limiter.allow(addr) {
        warn!(client = %addr, "action endpoint rate limit exceeded");
        return Err(AppError::RateLimited(
            "too many requests from this address".to_string(),
        ));
    }

    Ok(next.run(request).await)
}

fn client_addr(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_forwarded_for: bool,
) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if let Some(addr) = forwarded {
            return addr;
        }
    }

    connect_info
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
