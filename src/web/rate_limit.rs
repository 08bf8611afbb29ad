use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{StatusCode, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::{HashMap, VecDeque},
    net::{IpAddr, SocketAddr},
};

const MAX_IDLE: Duration = Duration::seconds(24 * 3600); // remove after 24h idle
const PRUNE_INTERVAL: Duration = Duration::seconds(10 * 60);

#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    /// Allowed hits per key inside `window`
    pub limit: usize,
    pub window: Duration,
}

impl RateLimits {
    pub fn new(limit: usize, window_secs: i64) -> Self {
        Self {
            limit,
            window: Duration::seconds(window_secs),
        }
    }
}

#[derive(Debug)]
struct SlidingWindow {
    hits: VecDeque<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

impl SlidingWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            hits: VecDeque::new(),
            last_seen: now,
        }
    }

    fn allow(&mut self, now: DateTime<Utc>, limits: &RateLimits) -> bool {
        while let Some(&ts) = self.hits.front() {
            if now - ts > limits.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        self.last_seen = now;

        if self.hits.len() < limits.limit {
            self.hits.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Throttles form posts per client address and per account email
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    by_ip: HashMap<String, SlidingWindow>,
    by_account: HashMap<String, SlidingWindow>,
    last_prune: DateTime<Utc>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            by_ip: HashMap::new(),
            by_account: HashMap::new(),
            last_prune: Utc::now(),
        }
    }

    /// Every given key has to be allowed; a missing account is not checked
    pub fn check(&mut self, ip: &str, account: Option<&str>) -> bool {
        self.check_at(Utc::now(), ip, account)
    }

    fn check_at(&mut self, now: DateTime<Utc>, ip: &str, account: Option<&str>) -> bool {
        self.prune_if_needed(now);
        let limits = self.limits;

        let ip_ok = self
            .by_ip
            .entry(ip.to_string())
            .or_insert_with(|| SlidingWindow::new(now))
            .allow(now, &limits);

        let account_ok = match account {
            Some(account) => self
                .by_account
                .entry(account.to_lowercase())
                .or_insert_with(|| SlidingWindow::new(now))
                .allow(now, &limits),
            None => true,
        };

        ip_ok && account_ok
    }

    fn prune_if_needed(&mut self, now: DateTime<Utc>) {
        if now - self.last_prune < PRUNE_INTERVAL {
            return;
        }
        self.last_prune = now;
        self.by_ip.retain(|_, win| now - win.last_seen <= MAX_IDLE);
        self.by_account
            .retain(|_, win| now - win.last_seen <= MAX_IDLE);
    }
}

pub struct RealIp(pub IpAddr);

impl<S> FromRequestParts<S> for RealIp
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // first hop of a proxy chain is the client
        if let Some(forwarded) = parts.headers.get("x-forwarded-for")
            && let Ok(s) = forwarded.to_str()
            && let Some(ip_str) = s.split(',').next()
            && let Ok(ip) = ip_str.trim().parse()
        {
            return Ok(RealIp(ip));
        }

        if let Some(addr) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(RealIp(addr.ip()));
        }

        Err((StatusCode::BAD_REQUEST, "No request IP"))
    }
}
