//! Bounded per-subscriber frame queues
//!
//! The producer never blocks: a full queue drops its oldest frame.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Frames buffered per subscriber
pub const QUEUE_CAPACITY: usize = 4;

/// What a subscriber sees on each read
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// One encoded image
    Frame(Bytes),
    /// Nothing arrived within the timeout; poll again
    Idle,
    /// The relay shut this subscriber down
    Closed,
}

struct Queue {
    frames: VecDeque<Bytes>,
    closed: bool,
    dropped: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    notify: Notify,
    capacity: usize,
}

/// Create a connected sink/source pair
pub fn frame_queue(id: Uuid, capacity: usize) -> (FrameSink, FrameSource) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(Queue {
            frames: VecDeque::with_capacity(capacity),
            closed: false,
            dropped: 0,
        }),
        notify: Notify::new(),
        capacity: capacity.max(1),
    });
    (
        FrameSink {
            shared: shared.clone(),
        },
        FrameSource { id, shared },
    )
}

/// Producer half, held by the relay
pub struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    /// Enqueue a frame; returns false if an older frame was dropped
    pub fn push(&self, frame: Bytes) -> bool {
        let kept = {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                return true;
            }
            let kept = if queue.frames.len() >= self.shared.capacity {
                queue.frames.pop_front();
                queue.dropped += 1;
                false
            } else {
                true
            };
            queue.frames.push_back(frame);
            kept
        };
        self.shared.notify.notify_one();
        kept
    }

    /// Mark end-of-stream; buffered frames are still delivered first
    pub fn close(&self) {
        self.shared.queue.lock().closed = true;
        self.shared.notify.notify_one();
    }

    pub fn dropped(&self) -> u64 {
        self.shared.queue.lock().dropped
    }
}

/// Consumer half, handed to the subscriber
pub struct FrameSource {
    id: Uuid,
    shared: Arc<Shared>,
}

impl FrameSource {
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn poll(&self) -> Option<FrameEvent> {
        let mut queue = self.shared.queue.lock();
        if let Some(frame) = queue.frames.pop_front() {
            Some(FrameEvent::Frame(frame))
        } else if queue.closed {
            Some(FrameEvent::Closed)
        } else {
            None
        }
    }

    /// Next frame, `Idle` after `timeout`, or `Closed`
    pub async fn next_frame(&self, timeout: Duration) -> FrameEvent {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.poll() {
                return event;
            }
            if tokio::time::timeout_at(deadline, self.shared.notify.notified())
                .await
                .is_err()
            {
                return self.poll().unwrap_or(FrameEvent::Idle);
            }
        }
    }

    /// Non-waiting read
    pub fn try_next(&self) -> Option<FrameEvent> {
        self.poll()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
