use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::{error, warn};

/// Distinct MX hosts that must time out inside the window before the
/// outbound-blocked flag flips.
pub const THRESHOLD_HOSTS: usize = 3;
pub const WINDOW: Duration = Duration::from_secs(300);
pub const BLOCKED_TTL: Duration = Duration::from_secs(900);

const KEY_BLOCKED: &str = "smtp:outbound_blocked";
const KEY_TIMEOUT_HOSTS: &str = "smtp:timeout_hosts";

/// Fleet-wide detector for networks where outbound port 25 is blocked.
///
/// Every probe that times out or is refused reports its MX host here; once
/// enough distinct hosts misbehave in a short window the flag flips and the
/// scorer falls back to DNS-only signals. The sentinel must never take the
/// engine down with it: an unreachable backing store means "not blocked".
#[async_trait]
pub trait Sentinel: Send + Sync {
    async fn record_timeout(&self, host: &str);
    async fn is_blocked(&self) -> bool;
    /// Admin/test surface: drop the flag and the tracked hosts.
    async fn clear(&self);
    async fn debug_info(&self) -> SentinelInfo;
}

#[derive(Debug, Clone, Serialize)]
pub struct SentinelInfo {
    pub smtp_blocked: bool,
    pub timeout_hosts: Vec<String>,
    pub threshold: usize,
    pub window_seconds: u64,
}

/// Redis-backed sentinel shared across worker processes.
#[derive(Clone)]
pub struct RedisSentinel {
    conn: redis::aio::ConnectionManager,
}

impl RedisSentinel {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    fn now_epoch() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    async fn record_inner(&self, host: &str) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        let now = Self::now_epoch();
        let cutoff = now - WINDOW.as_secs_f64();

        let _: () = conn.zadd(KEY_TIMEOUT_HOSTS, host, now).await?;
        let _: () = conn
            .zrembyscore(KEY_TIMEOUT_HOSTS, "-inf", cutoff)
            .await?;
        // The set expires on its own if no new timeouts arrive.
        let _: () = conn
            .expire(KEY_TIMEOUT_HOSTS, (WINDOW.as_secs() + 60) as i64)
            .await?;

        let distinct: usize = conn.zcard(KEY_TIMEOUT_HOSTS).await?;
        if distinct >= THRESHOLD_HOSTS {
            let _: () = conn
                .set_ex(KEY_BLOCKED, "1", BLOCKED_TTL.as_secs())
                .await?;
            warn!(
                distinct,
                window_seconds = WINDOW.as_secs(),
                ttl_seconds = BLOCKED_TTL.as_secs(),
                "SMTP outbound blocked detected"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Sentinel for RedisSentinel {
    async fn record_timeout(&self, host: &str) {
        if let Err(err) = self.record_inner(host).await {
            error!("failed to record SMTP timeout: {err}");
        }
    }

    async fn is_blocked(&self) -> bool {
        let mut conn = self.conn.clone();
        match conn.exists::<_, bool>(KEY_BLOCKED).await {
            Ok(blocked) => blocked,
            Err(err) => {
                error!("failed to check SMTP blocked flag: {err}");
                false
            }
        }
    }

    async fn clear(&self) {
        let mut conn = self.conn.clone();
        if let Err(err) = conn.del::<_, ()>(&[KEY_BLOCKED, KEY_TIMEOUT_HOSTS]).await {
            error!("failed to clear SMTP blocked flag: {err}");
        }
    }

    async fn debug_info(&self) -> SentinelInfo {
        let mut conn = self.conn.clone();
        let blocked = conn.exists::<_, bool>(KEY_BLOCKED).await.unwrap_or(false);
        let hosts: Vec<String> = conn
            .zrange(KEY_TIMEOUT_HOSTS, 0, -1)
            .await
            .unwrap_or_default();
        SentinelInfo {
            smtp_blocked: blocked,
            timeout_hosts: hosts,
            threshold: THRESHOLD_HOSTS,
            window_seconds: WINDOW.as_secs(),
        }
    }
}

/// In-process sentinel: the single-node fallback when no shared cache is
/// configured, and the deterministic implementation used by tests.
pub struct MemorySentinel {
    state: Mutex<MemoryState>,
    threshold: usize,
    window: Duration,
    blocked_ttl: Duration,
}

#[derive(Default)]
struct MemoryState {
    timeouts: HashMap<String, Instant>,
    blocked_until: Option<Instant>,
}

impl MemorySentinel {
    pub fn new() -> Self {
        Self::with_thresholds(THRESHOLD_HOSTS, WINDOW, BLOCKED_TTL)
    }

    pub fn with_thresholds(threshold: usize, window: Duration, blocked_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            threshold,
            window,
            blocked_ttl,
        }
    }

    /// Force the flag on, as an operator would by writing the cache key.
    pub fn force_blocked(&self) {
        let mut state = self.state.lock().unwrap();
        state.blocked_until = Some(Instant::now() + self.blocked_ttl);
    }
}

impl Default for MemorySentinel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sentinel for MemorySentinel {
    async fn record_timeout(&self, host: &str) {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        state.timeouts.insert(host.to_string(), now);
        let window = self.window;
        state
            .timeouts
            .retain(|_, recorded| now.duration_since(*recorded) < window);
        if state.timeouts.len() >= self.threshold {
            state.blocked_until = Some(now + self.blocked_ttl);
            warn!(
                distinct = state.timeouts.len(),
                "SMTP outbound blocked detected"
            );
        }
    }

    async fn is_blocked(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .blocked_until
            .is_some_and(|until| Instant::now() < until)
    }

    async fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.timeouts.clear();
        state.blocked_until = None;
    }

    async fn debug_info(&self) -> SentinelInfo {
        let state = self.state.lock().unwrap();
        SentinelInfo {
            smtp_blocked: state
                .blocked_until
                .is_some_and(|until| Instant::now() < until),
            timeout_hosts: state.timeouts.keys().cloned().collect(),
            threshold: self.threshold,
            window_seconds: self.window.as_secs(),
        }
    }
}
