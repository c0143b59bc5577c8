//! Connection pooling for reusable network sessions

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use crate::config::ConnectionPoolConfig;
use crate::error::{NetworkError, PerfError, PerfResult};
use crate::observability::ComponentHealth;
use super::lock;

/// A reusable network session, such as a keep-alive HTTP connection
#[async_trait]
pub trait Session: Send + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    /// Whether the underlying transport is still usable
    fn is_open(&self) -> bool;

    async fn execute(&mut self, request: Self::Request) -> PerfResult<Self::Response>;

    fn close(&mut self);
}

/// Creates new sessions for a pool
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    async fn create(&self) -> PerfResult<Self::Session>;
}

/// Counters for a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub size: usize,
    pub total_created: u64,
    pub total_closed: u64,
    pub active: usize,
    pub idle: usize,
    pub failed_connections: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub timeouts: u64,
    pub pool_hits: u64,
    pub avg_response_time_ms: f64,
    /// Percentage of requests that succeeded, 100 when nothing was sent yet
    pub success_rate: f64,
}

impl PoolStats {
    pub fn error_rate(&self) -> f64 {
        100.0 - self.success_rate
    }
}

#[derive(Debug, Default)]
struct PoolStatistics {
    total_created: u64,
    total_closed: u64,
    active: usize,
    failed_connections: u64,
    total_requests: u64,
    failed_requests: u64,
    timeouts: u64,
    pool_hits: u64,
    total_response_time: Duration,
}

#[derive(Debug)]
struct SessionSlot<S> {
    id: u64,
    session: S,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
}

impl<S: Session> SessionSlot<S> {
    fn retire_reason(&self, max_idle_time: Duration, max_uses: u64, now: Instant) -> Option<&'static str> {
        if !self.session.is_open() {
            Some("closed")
        } else if self.use_count >= max_uses {
            Some("max_uses")
        } else if now.saturating_duration_since(self.last_used_at) > max_idle_time {
            Some("idle")
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct PoolShared<S> {
    idle: Mutex<VecDeque<SessionSlot<S>>>,
    statistics: Mutex<PoolStatistics>,
    semaphore: Arc<Semaphore>,
    size: usize,
    max_idle_time: Duration,
    max_uses: u64,
    reuse: bool,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl<S: Session> PoolShared<S> {
    fn new(size: usize, max_idle_time: Duration, max_uses: u64, reuse: bool) -> Self {
        Self {
            idle: Mutex::new(VecDeque::new()),
            statistics: Mutex::new(PoolStatistics::default()),
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            max_idle_time,
            max_uses: max_uses.max(1),
            reuse,
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take a healthy idle session, retiring stale ones along the way
    fn checkout_idle(&self) -> Option<SessionSlot<S>> {
        let now = Instant::now();
        let mut retired = Vec::new();
        let found = {
            let mut idle = lock(&self.idle);
            let mut found = None;
            while let Some(slot) = idle.pop_back() {
                match slot.retire_reason(self.max_idle_time, self.max_uses, now) {
                    None => {
                        found = Some(slot);
                        break;
                    }
                    Some(reason) => retired.push((slot, reason)),
                }
            }
            found
        };

        for (slot, reason) in retired {
            self.destroy(slot, reason);
        }
        found
    }

    fn check_in(&self, mut slot: SessionSlot<S>) {
        {
            let mut stats = lock(&self.statistics);
            stats.active = stats.active.saturating_sub(1);
        }

        if !self.reuse {
            return self.destroy(slot, "unpooled");
        }
        if self.is_closed() {
            return self.destroy(slot, "pool_closed");
        }
        if let Some(reason) = slot.retire_reason(self.max_idle_time, self.max_uses, Instant::now()) {
            return self.destroy(slot, reason);
        }

        slot.last_used_at = Instant::now();
        lock(&self.idle).push_back(slot);
    }

    fn destroy(&self, mut slot: SessionSlot<S>, reason: &str) {
        slot.session.close();
        lock(&self.statistics).total_closed += 1;
        debug!(connection_id = slot.id, reason, use_count = slot.use_count, "Retired pooled connection");
    }

    fn record_request(&self, elapsed: Duration, success: bool) {
        let mut stats = lock(&self.statistics);
        stats.total_requests += 1;
        stats.total_response_time += elapsed;
        if !success {
            stats.failed_requests += 1;
        }
    }

    fn stats(&self) -> PoolStats {
        let idle = lock(&self.idle).len();
        let stats = lock(&self.statistics);
        let avg_response_time_ms = if stats.total_requests == 0 {
            0.0
        } else {
            stats.total_response_time.as_secs_f64() * 1000.0 / stats.total_requests as f64
        };
        let success_rate = if stats.total_requests == 0 {
            100.0
        } else {
            (stats.total_requests - stats.failed_requests) as f64 / stats.total_requests as f64 * 100.0
        };

        PoolStats {
            size: self.size,
            total_created: stats.total_created,
            total_closed: stats.total_closed,
            active: stats.active,
            idle,
            failed_connections: stats.failed_connections,
            total_requests: stats.total_requests,
            failed_requests: stats.failed_requests,
            timeouts: stats.timeouts,
            pool_hits: stats.pool_hits,
            avg_response_time_ms,
            success_rate,
        }
    }

    fn retire_idle(&self) -> usize {
        let now = Instant::now();
        let stale: Vec<(SessionSlot<S>, &'static str)> = {
            let mut idle = lock(&self.idle);
            let mut kept = VecDeque::with_capacity(idle.len());
            let mut stale = Vec::new();
            for slot in idle.drain(..) {
                match slot.retire_reason(self.max_idle_time, self.max_uses, now) {
                    Some(reason) => stale.push((slot, reason)),
                    None => kept.push_back(slot),
                }
            }
            *idle = kept;
            stale
        };

        let count = stale.len();
        for (slot, reason) in stale {
            self.destroy(slot, reason);
        }
        count
    }

    fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.semaphore.close();
        let drained: Vec<_> = lock(&self.idle).drain(..).collect();
        let count = drained.len();
        for slot in drained {
            self.destroy(slot, "pool_closed");
        }
        count
    }
}

/// A borrowed session. Returned to its pool on drop.
///
/// Only one borrower can hold a given session, and releasing consumes the
/// handle, so a session cannot be returned twice.
#[derive(Debug)]
pub struct PooledConnection<S: Session> {
    slot: Option<SessionSlot<S>>,
    shared: Arc<PoolShared<S>>,
    // Dropped after the slot is checked back in
    _permit: Option<OwnedSemaphorePermit>,
}

impl<S: Session> PooledConnection<S> {
    pub fn id(&self) -> u64 {
        self.slot.as_ref().map(|s| s.id).unwrap_or_default()
    }

    pub fn use_count(&self) -> u64 {
        self.slot.as_ref().map(|s| s.use_count).unwrap_or_default()
    }

    pub fn age(&self) -> Duration {
        self.slot.as_ref().map(|s| s.created_at.elapsed()).unwrap_or_default()
    }

    pub fn session(&self) -> Option<&S> {
        self.slot.as_ref().map(|s| &s.session)
    }

    pub fn session_mut(&mut self) -> Option<&mut S> {
        self.slot.as_mut().map(|s| &mut s.session)
    }

    /// Run one request on the session, recording timing and outcome
    pub async fn execute(&mut self, request: S::Request) -> PerfResult<S::Response> {
        let slot = self.slot.as_mut().ok_or(NetworkError::PoolClosed)?;
        let start = Instant::now();
        slot.use_count += 1;
        slot.last_used_at = start;

        let result = slot.session.execute(request).await;
        self.shared.record_request(start.elapsed(), result.is_ok());
        result
    }

    /// Return the session to its pool
    pub fn release(self) {
        drop(self)
    }
}

impl<S: Session> Drop for PooledConnection<S> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.shared.check_in(slot);
        }
    }
}

/// Acquire/release surface shared by [`ConnectionPool`] and [`UnpooledConnections`]
#[async_trait]
pub trait ConnectionProvider<S: Session>: Send + Sync {
    /// Borrow a session, waiting at most `timeout` (the configured timeout when `None`)
    async fn acquire(&self, timeout: Option<Duration>) -> PerfResult<PooledConnection<S>>;

    fn release(&self, connection: PooledConnection<S>) {
        connection.release()
    }

    async fn request(&self, request: S::Request) -> PerfResult<S::Response> {
        let mut connection = self.acquire(None).await?;
        let result = connection.execute(request).await;
        connection.release();
        result
    }

    fn stats(&self) -> PoolStats;

    /// Close idle sessions that are stale; returns how many were closed
    fn retire_idle(&self) -> usize;

    fn health_check(&self) -> ComponentHealth;

    fn close(&self);

    fn is_pooled(&self) -> bool;
}

/// Bounded pool of reusable sessions.
///
/// At most `size` sessions are borrowed at any time. Acquirers beyond that
/// wait for a release up to their timeout.
pub struct ConnectionPool<F: SessionFactory> {
    factory: F,
    shared: Arc<PoolShared<F::Session>>,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl<F: SessionFactory> std::fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.shared.size)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl<F: SessionFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: &ConnectionPoolConfig) -> Self {
        let shared = PoolShared::new(
            config.size.max(1),
            config.max_idle_time(),
            config.max_uses,
            true,
        );
        info!(size = shared.size, max_retries = config.max_retries, "Connection pool created");

        Self {
            factory,
            shared: Arc::new(shared),
            timeout: config.timeout(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(50),
        }
    }

    /// Delay between failed session creation attempts, multiplied by the attempt number
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Borrow a session. `timeout` bounds the whole acquisition, including
    /// session creation and its retries.
    pub async fn acquire(&self, timeout: Option<Duration>) -> PerfResult<PooledConnection<F::Session>> {
        if self.shared.is_closed() {
            return Err(NetworkError::PoolClosed.into());
        }

        let wait = timeout.unwrap_or(self.timeout);
        match tokio::time::timeout(wait, self.checkout()).await {
            Ok(result) => result,
            Err(_) => {
                lock(&self.shared.statistics).timeouts += 1;
                warn!(timeout_ms = wait.as_millis() as u64, "Timed out waiting for a pooled connection");
                Err(PerfError::timeout("connection_pool.acquire", wait))
            }
        }
    }

    async fn checkout(&self) -> PerfResult<PooledConnection<F::Session>> {
        let permit = Arc::clone(&self.shared.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PerfError::from(NetworkError::PoolClosed))?;

        let slot = match self.shared.checkout_idle() {
            Some(slot) => {
                lock(&self.shared.statistics).pool_hits += 1;
                slot
            }
            None => create_with_retries(&self.factory, &self.shared, self.max_retries, self.retry_backoff).await?,
        };

        lock(&self.shared.statistics).active += 1;
        Ok(PooledConnection {
            slot: Some(slot),
            shared: Arc::clone(&self.shared),
            _permit: Some(permit),
        })
    }

    pub fn release(&self, connection: PooledConnection<F::Session>) {
        connection.release()
    }

    /// Acquire, run one request, and release even when the request fails
    pub async fn request(
        &self,
        request: <F::Session as Session>::Request,
    ) -> PerfResult<<F::Session as Session>::Response> {
        let mut connection = self.acquire(None).await?;
        let result = connection.execute(request).await;
        connection.release();
        result
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    pub fn retire_idle(&self) -> usize {
        let retired = self.shared.retire_idle();
        if retired > 0 {
            debug!(retired, "Retired idle connections");
        }
        retired
    }

    /// Health derived from request success rate and saturation
    pub fn health_check(&self) -> ComponentHealth {
        pool_health("connection_pool", &self.stats(), self.shared.is_closed())
    }

    /// Close idle sessions and fail pending acquirers. Borrowed sessions are closed on release.
    pub fn close(&self) {
        if self.shared.is_closed() {
            return;
        }
        let closed = self.shared.close();
        info!(closed, "Connection pool closed");
    }
}

async fn create_with_retries<F: SessionFactory>(
    factory: &F,
    shared: &PoolShared<F::Session>,
    max_retries: u32,
    backoff: Duration,
) -> PerfResult<SessionSlot<F::Session>> {
    let mut attempt = 0;
    loop {
        match factory.create().await {
            Ok(session) => {
                let now = Instant::now();
                let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                lock(&shared.statistics).total_created += 1;
                debug!(connection_id = id, attempt, "Created new connection");
                return Ok(SessionSlot {
                    id,
                    session,
                    created_at: now,
                    last_used_at: now,
                    use_count: 0,
                });
            }
            Err(e) => {
                lock(&shared.statistics).failed_connections += 1;
                if attempt >= max_retries {
                    warn!(error = %e, attempts = attempt + 1, "Failed to create connection");
                    return Err(e);
                }
                attempt += 1;
                tokio::time::sleep(backoff * attempt).await;
            }
        }
    }
}

fn pool_health(name: &str, stats: &PoolStats, closed: bool) -> ComponentHealth {
    let health = if closed {
        ComponentHealth::critical(name, "pool is closed")
    } else if stats.success_rate < 90.0 {
        ComponentHealth::warning(name, &format!("success rate {:.1}%", stats.success_rate))
    } else {
        ComponentHealth::healthy(name)
    };

    health
        .with_metadata("active", &stats.active.to_string())
        .with_metadata("idle", &stats.idle.to_string())
        .with_metadata("size", &stats.size.to_string())
        .with_metadata("success_rate", &format!("{:.1}", stats.success_rate))
}

#[async_trait]
impl<F: SessionFactory> ConnectionProvider<F::Session> for ConnectionPool<F> {
    async fn acquire(&self, timeout: Option<Duration>) -> PerfResult<PooledConnection<F::Session>> {
        ConnectionPool::acquire(self, timeout).await
    }

    fn stats(&self) -> PoolStats {
        ConnectionPool::stats(self)
    }

    fn retire_idle(&self) -> usize {
        ConnectionPool::retire_idle(self)
    }

    fn health_check(&self) -> ComponentHealth {
        ConnectionPool::health_check(self)
    }

    fn close(&self) {
        ConnectionPool::close(self)
    }

    fn is_pooled(&self) -> bool {
        true
    }
}

/// Stand-in used when pooling is disabled: a fresh session per acquire,
/// closed again on release
pub struct UnpooledConnections<F: SessionFactory> {
    factory: F,
    shared: Arc<PoolShared<F::Session>>,
}

impl<F: SessionFactory> UnpooledConnections<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            shared: Arc::new(PoolShared::new(Semaphore::MAX_PERMITS, Duration::MAX, u64::MAX, false)),
        }
    }
}

#[async_trait]
impl<F: SessionFactory> ConnectionProvider<F::Session> for UnpooledConnections<F> {
    async fn acquire(&self, _timeout: Option<Duration>) -> PerfResult<PooledConnection<F::Session>> {
        if self.shared.is_closed() {
            return Err(NetworkError::PoolClosed.into());
        }
        let slot = create_with_retries(&self.factory, &self.shared, 0, Duration::ZERO).await?;
        lock(&self.shared.statistics).active += 1;
        Ok(PooledConnection {
            slot: Some(slot),
            shared: Arc::clone(&self.shared),
            _permit: None,
        })
    }

    fn stats(&self) -> PoolStats {
        let mut stats = self.shared.stats();
        stats.size = 0;
        stats
    }

    fn retire_idle(&self) -> usize {
        0
    }

    fn health_check(&self) -> ComponentHealth {
        ComponentHealth::disabled("connection_pool")
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    fn is_pooled(&self) -> bool {
        false
    }
}
