//! CameraRelay - Shared Upstream Video Fan-out
//!
//! ## Responsibilities
//!
//! - At most one upstream multipart connection, shared by all subscribers
//! - Frame boundary parsing
//! - Bounded per-subscriber queues (most recent frames win)
//! - Single-shot capture fallback while the stream is down
//!
//! ## Lifecycle
//!
//! The capture task exists only while the subscriber set is non-empty:
//! the first subscriber starts it, removing the last stops it.
//! Wrapping frames into an HTTP response is left to the caller.

mod multipart;
mod subscriber;
mod upstream;

pub use multipart::{boundary_from_content_type, MultipartParser, DEFAULT_BOUNDARY, MAX_PART_SIZE};
pub use subscriber::{frame_queue, FrameEvent, FrameSink, FrameSource, QUEUE_CAPACITY};
pub use upstream::{RelayStats, RelayStatsSnapshot};

use crate::error::Result;
use crate::state::CameraConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use upstream::{Subscribers, Upstream};
use uuid::Uuid;

/// Bound on joining the capture task after the last subscriber leaves
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct Worker {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl Worker {
    async fn shutdown(self) {
        let _ = self.stop.send(true);
        let mut handle = self.handle;
        if tokio::time::timeout(WORKER_JOIN_TIMEOUT, &mut handle).await.is_err() {
            tracing::warn!(
                timeout_ms = WORKER_JOIN_TIMEOUT.as_millis() as u64,
                "Camera relay worker did not stop in time - aborting"
            );
            handle.abort();
        }
    }
}

pub struct CameraRelay {
    config: CameraConfig,
    client: reqwest::Client,
    subscribers: Subscribers,
    /// Guards worker start/stop; taken before `subscribers`
    worker: Mutex<Option<Worker>>,
    /// Held by a capture task for its whole life, including its drain
    upstream_slot: Arc<tokio::sync::Mutex<()>>,
    stats: Arc<RelayStats>,
}

impl CameraRelay {
    /// Create relay; nothing connects until the first subscriber
    pub fn new(config: CameraConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            config,
            client,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            worker: Mutex::new(None),
            upstream_slot: Arc::new(tokio::sync::Mutex::new(())),
            stats: Arc::new(RelayStats::default()),
        })
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Register a subscriber, starting the capture task if it is the first
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_subscriber(&self) -> (Uuid, FrameSource) {
        let id = Uuid::new_v4();
        let (sink, source) = frame_queue(id, QUEUE_CAPACITY);

        let mut worker = self.worker.lock();
        let count = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(id, sink);
            subscribers.len()
        };

        let alive = worker.as_ref().map_or(false, |w| !w.handle.is_finished());
        if !alive {
            *worker = Some(self.spawn_worker());
        }

        tracing::info!(subscriber = %id, subscribers = count, "Camera subscriber added");
        (id, source)
    }

    /// Close one subscriber; stops the capture task when none remain
    pub async fn remove_subscriber(&self, id: Uuid) {
        let stopping = {
            let mut worker = self.worker.lock();
            let mut subscribers = self.subscribers.lock();
            match subscribers.remove(&id) {
                Some(sink) => sink.close(),
                None => return,
            }
            tracing::info!(subscriber = %id, subscribers = subscribers.len(), "Camera subscriber removed");
            if subscribers.is_empty() {
                worker.take()
            } else {
                None
            }
        };

        // Joined outside the locks so registrations are never blocked
        if let Some(worker) = stopping {
            worker.shutdown().await;
        }
    }

    /// Close every subscriber and stop the capture task
    pub async fn shutdown(&self) {
        let stopping = {
            let mut worker = self.worker.lock();
            let mut subscribers = self.subscribers.lock();
            for sink in subscribers.values() {
                sink.close();
            }
            subscribers.clear();
            worker.take()
        };
        if let Some(worker) = stopping {
            worker.shutdown().await;
        }
        tracing::info!("Camera relay shut down");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Whether a capture task is currently alive
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map_or(false, |w| !w.handle.is_finished())
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    fn spawn_worker(&self) -> Worker {
        let (stop, stop_rx) = watch::channel(false);
        let upstream = Upstream {
            client: self.client.clone(),
            config: self.config.clone(),
            subscribers: self.subscribers.clone(),
            stats: self.stats.clone(),
        };
        let slot = self.upstream_slot.clone();
        // A replacement waits for a stopping predecessor to let go
        let handle = tokio::spawn(async move {
            let _slot = slot.lock_owned().await;
            upstream.run(stop_rx).await;
        });
        Worker { handle, stop }
    }
}
