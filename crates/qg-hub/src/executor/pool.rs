//! Bounded, timed access to an inner executor.

use super::{ExecutionError, QueryExecutor};
use async_trait::async_trait;
use qg_core::Row;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// At most `max_connections` queries run against the inner executor at once.
/// Waiting for a permit counts against the timeout.
pub struct PooledExecutor {
    inner: Arc<dyn QueryExecutor>,
    permits: Arc<Semaphore>,
    max_connections: usize,
    timeout: Duration,
}

impl PooledExecutor {
    pub fn new(inner: Arc<dyn QueryExecutor>, max_connections: usize, timeout: Duration) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            timeout,
        }
    }

    pub fn available_connections(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

#[async_trait]
impl QueryExecutor for PooledExecutor {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, ExecutionError> {
        let run = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| ExecutionError::Backend("connection pool closed".into()))?;
            self.inner.execute(query).await
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Query execution timed out");
                Err(ExecutionError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps, tracking peak concurrency.
    struct SlowExecutor {
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowExecutor {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QueryExecutor for SlowExecutor {
        async fn execute(&self, _query: &str) -> Result<Vec<Row>, ExecutionError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let slow = Arc::new(SlowExecutor::new(Duration::from_millis(50)));
        let pool = Arc::new(PooledExecutor::new(slow.clone(), 2, Duration::from_secs(10)));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.execute("SELECT 1 FROM t").await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        assert_eq!(slow.peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available_connections(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_as_error() {
        let slow = Arc::new(SlowExecutor::new(Duration::from_secs(60)));
        let pool = PooledExecutor::new(slow, 1, Duration::from_millis(100));
        assert_eq!(
            pool.execute("SELECT 1 FROM t").await,
            Err(ExecutionError::Timeout(Duration::from_millis(100)))
        );
        // The permit is released with the cancelled future
        assert_eq!(pool.available_connections(), 1);
    }
}
