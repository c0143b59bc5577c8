//! In-memory sessions that record how they are used

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use perflayer::{NetworkError, PerfResult, Session, SessionFactory};

/// What a mock session should do with a request
#[derive(Debug, Clone)]
pub enum MockRequest {
    Echo(String),
    Sleep(Duration),
    Fail,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Debug)]
pub struct MockSession {
    id: usize,
    open: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl Session for MockSession {
    type Request = MockRequest;
    type Response = String;

    fn is_open(&self) -> bool {
        self.open
    }

    async fn execute(&mut self, request: MockRequest) -> PerfResult<String> {
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match request {
            MockRequest::Echo(text) => Ok(format!("{}:{}", self.id, text)),
            MockRequest::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(format!("{}:slept", self.id))
            }
            MockRequest::Fail => Err(NetworkError::RequestFailed { message: "mock failure".into() }.into()),
        };

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Factory whose clones share counters, so a test can keep one handle and
/// hand another to the pool
#[derive(Debug, Clone, Default)]
pub struct MockSessionFactory {
    counters: Arc<Counters>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were executing at the same time
    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    type Session = MockSession;

    async fn create(&self) -> PerfResult<MockSession> {
        let id = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockSession {
            id,
            open: true,
            counters: Arc::clone(&self.counters),
        })
    }
}
