//! Token-bucket rate-limit middleware (C7): per-identifier buckets with
//! continuous refill and TTL-based registry eviction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use memcortex_protocol::{MemoryError, MemoryResult};

struct BucketState {
    tokens: f64,
    last_update: Instant,
}

struct TokenBucketInner {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

/// A continuous-refill token bucket: `rate` tokens/second, capped at
/// `burst`. Cheap to clone — the inner state lives behind an `Arc`, so
/// bucket mutations never contend on a registry-wide lock.
#[derive(Clone)]
pub struct TokenBucket(Arc<TokenBucketInner>);

impl TokenBucket {
    /// Build a bucket starting full (`tokens == burst`).
    pub fn new(rate: f64, burst: f64) -> Self {
        Self(Arc::new(TokenBucketInner {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_update: Instant::now(),
            }),
        }))
    }

    fn refill_locked(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_update).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.0.rate).min(self.0.burst);
        state.last_update = now;
    }

    /// Attempt to take `n` tokens immediately, refilling first.
    pub fn allow_n(&self, n: f64) -> bool {
        let mut state = self.0.state.lock();
        self.refill_locked(&mut state);
        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Attempt to take a single token.
    pub fn allow(&self) -> bool {
        self.allow_n(1.0)
    }

    /// How long the caller would have to wait for `n` tokens to become
    /// available, without consuming anything (used to report
    /// `retry_after_seconds` on rejection).
    pub fn retry_after(&self, n: f64) -> Duration {
        let mut state = self.0.state.lock();
        self.refill_locked(&mut state);
        if state.tokens >= n {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(((n - state.tokens) / self.0.rate).max(0.0))
        }
    }

    /// Block until `n` tokens are available, then take them.
    pub async fn wait(&self, n: f64) -> MemoryResult<()> {
        loop {
            let delay = {
                let mut state = self.0.state.lock();
                self.refill_locked(&mut state);
                if state.tokens >= n {
                    state.tokens -= n;
                    return Ok(());
                }
                Duration::from_secs_f64(((n - state.tokens) / self.0.rate).max(0.0))
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// Block until `n` tokens are available or `cancelled` resolves
    /// first, whichever comes first.
    pub async fn wait_cancellable<F>(&self, n: f64, cancelled: F) -> MemoryResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::select! {
            result = self.wait(n) => result,
            _ = cancelled => Err(MemoryError::Cancelled),
        }
    }

    /// Reserve `n` tokens ahead of time, returning a [`Reservation`] that
    /// reports how long to wait before acting and can be cancelled to
    /// give the tokens back.
    pub fn reserve(&self, n: f64) -> Reservation {
        if n > self.0.burst {
            return Reservation {
                granted: false,
                delay: Duration::ZERO,
                tokens: 0.0,
                bucket: None,
            };
        }

        let mut state = self.0.state.lock();
        self.refill_locked(&mut state);
        let delay = if state.tokens >= n {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((n - state.tokens) / self.0.rate)
        };
        state.tokens -= n;

        Reservation {
            granted: true,
            delay,
            tokens: n,
            bucket: Some(self.clone()),
        }
    }

    fn give_back(&self, n: f64) {
        let mut state = self.0.state.lock();
        self.refill_locked(&mut state);
        state.tokens = (state.tokens + n).min(self.0.burst);
    }

    #[cfg(test)]
    fn tokens(&self) -> f64 {
        let mut state = self.0.state.lock();
        self.refill_locked(&mut state);
        state.tokens
    }
}

/// The outcome of [`TokenBucket::reserve`].
pub struct Reservation {
    granted: bool,
    delay: Duration,
    tokens: f64,
    bucket: Option<TokenBucket>,
}

impl Reservation {
    /// Whether the reservation could ever be satisfied (`false` only
    /// when `n` exceeds the bucket's burst size).
    pub fn ok(&self) -> bool {
        self.granted
    }

    /// How long to wait before the reserved tokens are actually available.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Give the reserved tokens back, clamped by `burst`.
    pub fn cancel(self) {
        if self.granted {
            if let Some(bucket) = &self.bucket {
                bucket.give_back(self.tokens);
            }
        }
    }
}

/// Which dimensions feed the rate-limit identifier, and in what order
/// they're concatenated (`user:<id>[:ip:<addr>]`, per `spec.md` §4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifierDimensions {
    /// Include the authenticated user id, if present.
    pub per_user: bool,
    /// Include the caller's IP address, if present.
    pub per_ip: bool,
}

/// Build the rate-limit identifier for a request. Returns `None` when no
/// configured dimension yields a value, meaning the request bypasses
/// per-identifier limiting (an optional global bucket may still apply).
pub fn build_identifier(dims: IdentifierDimensions, user_id: Option<&str>, ip: Option<&str>) -> Option<String> {
    let mut parts = Vec::new();
    if dims.per_user {
        if let Some(id) = user_id {
            parts.push(format!("user:{id}"));
        }
    }
    if dims.per_ip {
        if let Some(addr) = ip {
            parts.push(format!("ip:{addr}"));
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(":"))
    }
}

/// Configuration for a [`RateLimiterRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Tokens/second granted to a freshly created per-identifier bucket.
    pub default_rate: f64,
    /// Burst size for a freshly created per-identifier bucket.
    pub default_burst: f64,
    /// How long an idle bucket survives before the sweeper removes it.
    pub ttl: Duration,
    /// How often the sweeper runs.
    pub cleanup_interval: Duration,
    /// An optional `(rate, burst)` bucket applied regardless of identifier.
    pub global: Option<(f64, f64)>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_rate: 10.0,
            default_burst: 20.0,
            ttl: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
            global: None,
        }
    }
}

struct Entry {
    bucket: TokenBucket,
    last_access: Mutex<Instant>,
}

/// A process-wide registry of per-identifier token buckets. A background
/// sweeper removes entries idle past `ttl`; bucket mutations take a
/// bucket-local lock, never the registry lock, so unrelated identifiers
/// never serialize against each other.
pub struct RateLimiterRegistry {
    buckets: DashMap<String, Entry>,
    global: Option<TokenBucket>,
    config: RateLimitConfig,
}

impl RateLimiterRegistry {
    /// Build a registry from `config`.
    pub fn new(config: RateLimitConfig) -> Arc<Self> {
        Arc::new(Self {
            buckets: DashMap::new(),
            global: config.global.map(|(rate, burst)| TokenBucket::new(rate, burst)),
            config,
        })
    }

    /// Check whether a request for `n` tokens under `identifier` is
    /// admitted. `identifier = None` means the request bypasses
    /// per-identifier limiting (only the optional global bucket applies).
    pub fn check(&self, identifier: Option<&str>, n: f64) -> MemoryResult<()> {
        if let Some(global) = &self.global {
            if !global.allow_n(n) {
                return Err(MemoryError::RateLimit {
                    retry_after_secs: global.retry_after(n).as_secs().max(1),
                });
            }
        }

        let Some(identifier) = identifier else {
            return Ok(());
        };

        let bucket = {
            let entry = self.buckets.entry(identifier.to_string()).or_insert_with(|| Entry {
                bucket: TokenBucket::new(self.config.default_rate, self.config.default_burst),
                last_access: Mutex::new(Instant::now()),
            });
            *entry.last_access.lock() = Instant::now();
            entry.bucket.clone()
        };

        if bucket.allow_n(n) {
            Ok(())
        } else {
            Err(MemoryError::RateLimit {
                retry_after_secs: bucket.retry_after(n).as_secs().max(1),
            })
        }
    }

    /// Remove entries whose `last_access` is older than `ttl`.
    pub fn sweep(&self) {
        let ttl = self.config.ttl;
        let before = self.buckets.len();
        self.buckets.retain(|_, entry| entry.last_access.lock().elapsed() < ttl);
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!(removed, "rate limiter registry sweep evicted idle identifiers");
        }
    }

    /// Number of identifiers currently tracked (test/metrics convenience).
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the registry currently tracks no identifiers.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Spawn the background TTL sweeper.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = self.clone();
        let interval = registry.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_allows_up_to_burst_then_rejects() {
        let bucket = TokenBucket::new(5.0, 2.0);
        assert!(bucket.allow_n(1.0));
        assert!(bucket.allow_n(1.0));
        assert!(!bucket.allow_n(1.0));
    }

    #[tokio::test]
    async fn bucket_refills_continuously() {
        let bucket = TokenBucket::new(5.0, 2.0);
        assert!(bucket.allow_n(1.0));
        assert!(bucket.allow_n(1.0));
        assert!(!bucket.allow_n(1.0));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(bucket.allow_n(1.0));
    }

    #[test]
    fn tokens_never_leave_the_unit_range() {
        let bucket = TokenBucket::new(100.0, 5.0);
        for _ in 0..10 {
            bucket.allow_n(1.0);
        }
        let tokens = bucket.tokens();
        assert!((0.0..=5.0).contains(&tokens));
    }

    #[test]
    fn reservation_cancel_returns_tokens() {
        let bucket = TokenBucket::new(1.0, 5.0);
        let before = bucket.tokens();
        let reservation = bucket.reserve(3.0);
        assert!(reservation.ok());
        reservation.cancel();
        assert!((bucket.tokens() - before).abs() < 0.01);
    }

    #[test]
    fn reserve_beyond_burst_is_never_granted() {
        let bucket = TokenBucket::new(1.0, 5.0);
        let reservation = bucket.reserve(10.0);
        assert!(!reservation.ok());
    }

    #[test]
    fn identifier_bypasses_when_no_dimension_yields_a_value() {
        let dims = IdentifierDimensions { per_user: true, per_ip: true };
        assert_eq!(build_identifier(dims, None, None), None);
    }

    #[test]
    fn identifier_concatenates_user_then_ip() {
        let dims = IdentifierDimensions { per_user: true, per_ip: true };
        assert_eq!(
            build_identifier(dims, Some("u1"), Some("10.0.0.1")),
            Some("user:u1:ip:10.0.0.1".to_string())
        );
    }

    #[test]
    fn registry_rejects_once_bucket_is_exhausted() {
        let registry = RateLimiterRegistry::new(RateLimitConfig {
            default_rate: 1.0,
            default_burst: 1.0,
            ..RateLimitConfig::default()
        });
        assert!(registry.check(Some("user:a"), 1.0).is_ok());
        let err = registry.check(Some("user:a"), 1.0).unwrap_err();
        assert!(matches!(err, MemoryError::RateLimit { .. }));
    }

    #[test]
    fn registry_sweep_evicts_past_ttl() {
        let registry = RateLimiterRegistry::new(RateLimitConfig {
            ttl: Duration::from_millis(1),
            ..RateLimitConfig::default()
        });
        registry.check(Some("user:a"), 1.0).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        registry.sweep();
        assert!(registry.is_empty());
    }

    #[test]
    fn unidentified_request_bypasses_without_global_bucket() {
        let registry = RateLimiterRegistry::new(RateLimitConfig::default());
        for _ in 0..1000 {
            assert!(registry.check(None, 1.0).is_ok());
        }
    }

    #[test]
    fn global_bucket_still_applies_without_an_identifier() {
        let registry = RateLimiterRegistry::new(RateLimitConfig {
            global: Some((1.0, 1.0)),
            ..RateLimitConfig::default()
        });
        assert!(registry.check(None, 1.0).is_ok());
        assert!(registry.check(None, 1.0).is_err());
    }
}
