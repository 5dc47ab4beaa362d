//! Log sink service
//!
//! Collects step output for one execution in memory and persists it to the
//! record store in batches. A background flusher writes the buffer at a fixed
//! interval; `append` flushes synchronously once the buffer grows past its
//! limit. Flushes are serialized and always take the whole buffer, so the
//! persisted text keeps append order.

use anyhow::anyhow;
use async_trait::async_trait;
use conveyor_core::dto::execution::ExecutionEvent;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::EventPublisher;
use crate::service::step::{OutputSink, OutputStream};
use crate::store::RecordStore;

/// Buffered, incrementally persisted log of one execution
pub struct LogSink {
    inner: Arc<SinkInner>,
    stop: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

struct SinkInner {
    execution_id: Uuid,
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn EventPublisher>,
    buffer: Mutex<String>,
    flush_lock: tokio::sync::Mutex<()>,
    buffer_limit: usize,
    flush_timeout: Duration,
}

impl LogSink {
    /// Creates the sink and starts its background flusher
    pub fn start(
        execution_id: Uuid,
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
        config: &EngineConfig,
    ) -> Self {
        let inner = Arc::new(SinkInner {
            execution_id,
            store,
            publisher,
            buffer: Mutex::new(String::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            buffer_limit: config.log_buffer_limit,
            flush_timeout: config.log_flush_timeout,
        });
        let stop = CancellationToken::new();

        let flusher = tokio::spawn(run_flusher(
            Arc::clone(&inner),
            config.log_flush_interval,
            stop.clone(),
        ));

        Self {
            inner,
            stop,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    /// Adds a chunk of output
    ///
    /// Waits for a flush (bounded by the flush timeout) when the buffer is
    /// over its limit.
    pub async fn append(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        let buffered = {
            let mut buffer = self.inner.buffer();
            buffer.push_str(chunk);
            buffer.len()
        };

        if buffered >= self.inner.buffer_limit {
            debug!(
                "Log buffer of {} reached {} bytes, flushing",
                self.inner.execution_id, buffered
            );
            if let Err(e) = self.inner.flush().await {
                warn!("Log flush for {} failed: {}", self.inner.execution_id, e);
            }
        }
    }

    /// Writes everything buffered so far
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    /// Stops the flusher and performs the final flush
    ///
    /// Returns whatever could not be persisted, so the caller can write it
    /// together with the terminal status.
    pub async fn close(&self) -> String {
        self.stop.cancel();
        let flusher = self
            .flusher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(flusher) = flusher {
            if let Err(e) = flusher.await {
                warn!("Log flusher of {} ended abnormally: {}", self.inner.execution_id, e);
            }
        }

        if let Err(e) = self.inner.flush().await {
            warn!("Final log flush for {} failed: {}", self.inner.execution_id, e);
        }
        std::mem::take(&mut *self.inner.buffer())
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[async_trait]
impl OutputSink for LogSink {
    async fn on_output(&self, _stream: OutputStream, chunk: String) {
        self.append(&chunk).await;
    }
}

impl SinkInner {
    fn buffer(&self) -> std::sync::MutexGuard<'_, String> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Puts unwritten text back in front of anything appended meanwhile
    fn restore(&self, mut chunk: String) {
        let mut buffer = self.buffer();
        chunk.push_str(&buffer);
        *buffer = chunk;
    }

    async fn flush(&self) -> Result<()> {
        let started = Instant::now();
        let Ok(_guard) = tokio::time::timeout(self.flush_timeout, self.flush_lock.lock()).await
        else {
            return Err(EngineError::Store(anyhow!(
                "log flush still waiting for the previous one after {:?}",
                self.flush_timeout
            )));
        };

        let chunk = std::mem::take(&mut *self.buffer());
        if chunk.is_empty() {
            return Ok(());
        }

        let remaining = self.flush_timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, self.store.append_logs(self.execution_id, &chunk))
            .await
        {
            Ok(Ok(true)) => {
                self.publisher.publish(ExecutionEvent::LogAppended {
                    execution_id: self.execution_id,
                    chunk,
                });
                Ok(())
            }
            Ok(Ok(false)) => {
                debug!(
                    "Execution {} is already terminal, dropped {} bytes of log",
                    self.execution_id,
                    chunk.len()
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.restore(chunk);
                Err(EngineError::Store(e))
            }
            Err(_) => {
                self.restore(chunk);
                Err(EngineError::Store(anyhow!(
                    "log write timed out after {:?}",
                    self.flush_timeout
                )))
            }
        }
    }
}

async fn run_flusher(inner: Arc<SinkInner>, period: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = inner.flush().await {
                    warn!("Log flush for {} failed, will retry: {}", inner.execution_id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingPublisher;
    use crate::store::MemoryRecordStore;
    use conveyor_core::domain::execution::{Execution, ExecutionStatus};
    use conveyor_core::domain::pipeline::{Environment, Pipeline};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Memory store that counts log writes and can be told to fail or hang them
    #[derive(Default)]
    struct FlakyStore {
        records: MemoryRecordStore,
        writes: AtomicUsize,
        failing: AtomicBool,
        hanging: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn find_pipeline(&self, id: Uuid) -> anyhow::Result<Option<Pipeline>> {
            self.records.find_pipeline(id).await
        }

        async fn create_execution(
            &self,
            pipeline_id: Uuid,
            branch: &str,
            environment: Environment,
        ) -> anyhow::Result<Execution> {
            self.records
                .create_execution(pipeline_id, branch, environment)
                .await
        }

        async fn find_execution(&self, id: Uuid) -> anyhow::Result<Option<Execution>> {
            self.records.find_execution(id).await
        }

        async fn list_in_flight(&self) -> anyhow::Result<Vec<Execution>> {
            self.records.list_in_flight().await
        }

        async fn begin_execution(
            &self,
            id: Uuid,
            started_at: chrono::DateTime<chrono::Utc>,
        ) -> anyhow::Result<bool> {
            self.records.begin_execution(id, started_at).await
        }

        async fn append_logs(&self, id: Uuid, chunk: &str) -> anyhow::Result<bool> {
            if self.hanging.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("database unavailable");
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.records.append_logs(id, chunk).await
        }

        async fn finalize_execution(
            &self,
            id: Uuid,
            status: ExecutionStatus,
            ended_at: chrono::DateTime<chrono::Utc>,
            trailing_logs: &str,
        ) -> anyhow::Result<bool> {
            self.records
                .finalize_execution(id, status, ended_at, trailing_logs)
                .await
        }
    }

    async fn setup(config: &EngineConfig) -> (Arc<FlakyStore>, Arc<RecordingPublisher>, Uuid, LogSink) {
        let store = Arc::new(FlakyStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let execution = store
            .create_execution(Uuid::new_v4(), "main", Environment::Staging)
            .await
            .unwrap();
        let sink = LogSink::start(execution.id, store.clone(), publisher.clone(), config);
        (store, publisher, execution.id, sink)
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.log_flush_interval = Duration::from_secs(60);
        config
    }

    async fn persisted(store: &FlakyStore, id: Uuid) -> String {
        store.find_execution(id).await.unwrap().unwrap().logs
    }

    #[tokio::test]
    async fn test_rapid_chunks_become_one_write() {
        let (store, publisher, id, sink) = setup(&config()).await;

        for i in 0..50 {
            sink.append(&format!("line {}\n", i)).await;
        }
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);

        sink.flush().await.unwrap();
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);

        let expected: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        assert_eq!(persisted(&store, id).await, expected);
        assert_eq!(
            publisher.events(),
            vec![ExecutionEvent::LogAppended {
                execution_id: id,
                chunk: expected,
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_order() {
        let (store, _publisher, id, sink) = setup(&config()).await;

        sink.append("first\n").await;
        store.failing.store(true, Ordering::SeqCst);
        assert!(sink.flush().await.is_err());

        sink.append("second\n").await;
        store.failing.store(false, Ordering::SeqCst);
        sink.flush().await.unwrap();

        assert_eq!(persisted(&store, id).await, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_buffer_limit_forces_flush() {
        let mut config = config();
        config.log_buffer_limit = 16;
        let (store, _publisher, id, sink) = setup(&config).await;

        sink.append("short\n").await;
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);

        sink.append("this pushes past the limit\n").await;
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(persisted(&store, id).await, "short\nthis pushes past the limit\n");
    }

    #[tokio::test]
    async fn test_background_flusher_persists_periodically() {
        let mut config = config();
        config.log_flush_interval = Duration::from_millis(50);
        let (store, _publisher, id, sink) = setup(&config).await;

        sink.append("tick\n").await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while persisted(&store, id).await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(sink.close().await, "");
    }

    #[tokio::test]
    async fn test_close_returns_unpersisted_tail() {
        let (store, _publisher, id, sink) = setup(&config()).await;

        sink.append("saved\n").await;
        sink.flush().await.unwrap();
        sink.append("stranded\n").await;
        store.failing.store(true, Ordering::SeqCst);

        assert_eq!(sink.close().await, "stranded\n");
        assert_eq!(persisted(&store, id).await, "saved\n");
    }

    #[tokio::test]
    async fn test_hanging_store_bounds_append_and_flush() {
        let mut config = config();
        config.log_buffer_limit = 8;
        config.log_flush_timeout = Duration::from_millis(300);
        let (store, _publisher, id, sink) = setup(&config).await;
        let sink = Arc::new(sink);
        store.hanging.store(true, Ordering::SeqCst);

        let started = std::time::Instant::now();
        let over_limit = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { sink.append("over the limit\n").await })
        };

        // The over-limit append now holds the flush lock inside the store call.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let waiting = std::time::Instant::now();
        assert!(sink.flush().await.is_err());
        assert!(waiting.elapsed() < Duration::from_secs(1));

        over_limit.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(sink.close().await, "over the limit\n");
        assert_eq!(persisted(&store, id).await, "");
    }
}
