//! Upstream capture task
//!
//! One task per relay while subscribers exist. Reads the live multipart
//! stream, falls back to single-shot captures while it is down, and
//! reconnects until told to stop.

use super::multipart::{boundary_from_content_type, MultipartParser};
use super::subscriber::FrameSink;
use crate::error::{Error, Result};
use crate::state::CameraConfig;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Bound on a single body read so fallback checks keep running
const CHUNK_TIMEOUT: Duration = Duration::from_secs(1);
/// Frame silence that triggers a fallback capture
const FALLBACK_AFTER: Duration = Duration::from_secs(1);
/// Minimum spacing between fallback captures
const FALLBACK_INTERVAL: Duration = Duration::from_secs(1);
/// How often a pending connect checks whether a fallback is due
const FALLBACK_POLL: Duration = Duration::from_millis(250);
/// Upper bound on the fallback request
const FALLBACK_TIMEOUT_CAP: Duration = Duration::from_secs(2);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub(crate) type Subscribers = Arc<Mutex<HashMap<Uuid, FrameSink>>>;

/// Relay counters
#[derive(Debug, Default)]
pub struct RelayStats {
    frames: AtomicU64,
    fallback_frames: AtomicU64,
    reconnects: AtomicU64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            fallback_frames: self.fallback_frames.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    /// Live frames delivered
    pub frames: u64,
    /// Substitute frames from single-shot captures
    pub fallback_frames: u64,
    pub reconnects: u64,
}

/// Upstream link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkStatus {
    Unknown,
    Online,
    Offline,
}

/// Link transition worth logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkEvent {
    Connected,
    Lost,
    Recovered,
}

/// Logs link changes only when they happen
#[derive(Debug)]
pub(crate) struct LinkTracker {
    status: LinkStatus,
}

impl LinkTracker {
    pub(crate) fn new() -> Self {
        Self {
            status: LinkStatus::Unknown,
        }
    }

    pub(crate) fn update(&mut self, online: bool) -> Option<LinkEvent> {
        let next = if online { LinkStatus::Online } else { LinkStatus::Offline };
        let event = match (self.status, next) {
            (LinkStatus::Unknown, LinkStatus::Online) => Some(LinkEvent::Connected),
            (LinkStatus::Offline, LinkStatus::Online) => Some(LinkEvent::Recovered),
            (LinkStatus::Unknown | LinkStatus::Online, LinkStatus::Offline) => Some(LinkEvent::Lost),
            _ => None,
        };
        self.status = next;
        event
    }
}

pub(crate) struct Upstream {
    pub(crate) client: reqwest::Client,
    pub(crate) config: CameraConfig,
    pub(crate) subscribers: Subscribers,
    pub(crate) stats: Arc<RelayStats>,
}

enum SessionEnd {
    Stopped,
    Failed(Error),
}

struct Pacing {
    last_frame: Instant,
    last_fallback: Option<Instant>,
    fallback_failing: bool,
}

impl Upstream {
    fn broadcast(&self, frame: Bytes) {
        let subscribers = self.subscribers.lock();
        for (id, sink) in subscribers.iter() {
            if !sink.push(frame.clone()) {
                tracing::trace!(subscriber = %id, "Subscriber lagging - oldest frame dropped");
            }
        }
    }

    /// Capture loop; returns when `stop` fires or its sender is gone
    pub(crate) async fn run(self, mut stop: watch::Receiver<bool>) {
        tracing::info!(url = %self.config.stream_url(), "Camera relay worker started");
        let mut tracker = LinkTracker::new();
        let mut pacing = Pacing {
            last_frame: Instant::now(),
            last_fallback: None,
            fallback_failing: false,
        };

        loop {
            if *stop.borrow() {
                break;
            }
            match self.session(&mut stop, &mut tracker, &mut pacing).await {
                SessionEnd::Stopped => break,
                SessionEnd::Failed(e) => {
                    if tracker.update(false) == Some(LinkEvent::Lost) {
                        tracing::warn!(error = %e, "Camera stream lost");
                    } else {
                        tracing::debug!(error = %e, "Camera stream still unavailable");
                    }
                }
            }

            self.maybe_fallback(&mut pacing).await;
            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        }

        tracing::info!("Camera relay worker stopped");
    }

    async fn session(
        &self,
        stop: &mut watch::Receiver<bool>,
        tracker: &mut LinkTracker,
        pacing: &mut Pacing,
    ) -> SessionEnd {
        let url = self.config.stream_url();
        let connect = tokio::time::timeout(self.config.connect_timeout, self.client.get(&url).send());
        tokio::pin!(connect);
        let mut fallback_poll = tokio::time::interval(FALLBACK_POLL);
        fallback_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Keep substitute frames flowing while the stream connect hangs
        let response = loop {
            tokio::select! {
                _ = stop.changed() => return SessionEnd::Stopped,
                result = &mut connect => match result {
                    Err(_) => {
                        return SessionEnd::Failed(Error::Timeout(format!("connecting to {}", url)))
                    }
                    Ok(Err(e)) => return SessionEnd::Failed(e.into()),
                    Ok(Ok(response)) => break response,
                },
                _ = fallback_poll.tick() => self.maybe_fallback(pacing).await,
            }
        };

        if !response.status().is_success() {
            return SessionEnd::Failed(Error::StreamUnavailable(format!(
                "stream HTTP error: {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let boundary = boundary_from_content_type(content_type.as_deref());
        match tracker.update(true) {
            Some(LinkEvent::Recovered) => tracing::info!(boundary = %boundary, "Camera stream recovered"),
            Some(_) => tracing::info!(url = %url, boundary = %boundary, "Camera stream connected"),
            None => {}
        }

        let mut parser = MultipartParser::new(&boundary);
        let mut body = response.bytes_stream();
        let mut last_data = Instant::now();

        loop {
            let chunk = tokio::select! {
                _ = stop.changed() => return SessionEnd::Stopped,
                chunk = tokio::time::timeout(CHUNK_TIMEOUT, body.next()) => chunk,
            };

            match chunk {
                Err(_) => {
                    if last_data.elapsed() >= self.config.stream_read_timeout {
                        return SessionEnd::Failed(Error::Timeout(format!(
                            "no stream data for {}s",
                            self.config.stream_read_timeout.as_secs()
                        )));
                    }
                }
                Ok(None) => {
                    return SessionEnd::Failed(Error::StreamUnavailable(
                        "stream ended by upstream".to_string(),
                    ))
                }
                Ok(Some(Err(e))) => return SessionEnd::Failed(e.into()),
                Ok(Some(Ok(data))) => {
                    last_data = Instant::now();
                    for frame in parser.push(&data) {
                        tracing::trace!(size = frame.len(), "Frame received");
                        self.stats.frames.fetch_add(1, Ordering::Relaxed);
                        pacing.last_frame = Instant::now();
                        self.broadcast(frame);
                    }
                }
            }
            self.maybe_fallback(pacing).await;
        }
    }

    /// Single-shot capture when live frames have stalled, at most ~1 Hz
    async fn maybe_fallback(&self, pacing: &mut Pacing) {
        if pacing.last_frame.elapsed() < FALLBACK_AFTER {
            return;
        }
        if pacing
            .last_fallback
            .map_or(false, |at| at.elapsed() < FALLBACK_INTERVAL)
        {
            return;
        }
        pacing.last_fallback = Some(Instant::now());

        match self.capture_once().await {
            Ok(frame) => {
                if pacing.fallback_failing {
                    tracing::info!("Fallback capture recovered");
                    pacing.fallback_failing = false;
                }
                tracing::debug!(size = frame.len(), "Fallback frame captured");
                self.stats.fallback_frames.fetch_add(1, Ordering::Relaxed);
                self.broadcast(frame);
            }
            Err(e) => {
                if !pacing.fallback_failing {
                    tracing::warn!(error = %e, "Fallback capture failed");
                    pacing.fallback_failing = true;
                }
            }
        }
    }

    async fn capture_once(&self) -> Result<Bytes> {
        let timeout = self.config.connect_timeout.min(FALLBACK_TIMEOUT_CAP);
        let resp = self
            .client
            .get(self.config.capture_url())
            .timeout(timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::StreamUnavailable(format!(
                "capture HTTP error: {}",
                resp.status()
            )));
        }

        Ok(resp.bytes().await?)
    }
}
