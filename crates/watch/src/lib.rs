//! Stackspark watch: a long-lived, self-reconnecting, filtered subscription to
//! application change events.
//!
//! The loop has two states, streaming and stopped. Whenever a stream ends, cleanly or
//! with a fault, a new one is opened until the cancellation token fires. Faults are
//! logged and counted in [`WatchStats`]; they never reach the caller. Events within one
//! stream are dispatched in order; across a reconnect duplicates and gaps are possible.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stackspark_core::{
    derive_phase, AppDocument, DocumentError, EventType, Phase, PhaseError, RawWatchEvent, SelectorMap, WatchEvent,
};
use stackspark_kubehub::{AppPlatform, PlatformError, WatchQuery};

mod backoff;
mod listener;
mod stats;

pub use backoff::Backoff;
pub use listener::{ChannelListener, EventsListener, LogEventsListener};
pub use stats::{WatchStats, WatchStatsSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("invalid name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Phase(#[from] PhaseError),
}

/// Turn a raw stream item into a listener event.
///
/// Phase falls back to `Empty` when the platform has not written one yet. Bookmarks
/// carry no name and pass through with an empty one.
pub fn decode_event(raw: RawWatchEvent) -> Result<WatchEvent, DecodeError> {
    let payload = AppDocument::from_value(raw.object)?;
    let app_name = match raw.kind {
        EventType::Bookmark => payload.name().unwrap_or_default().to_string(),
        _ => payload.app_name()?.to_string(),
    };
    let phase = derive_phase(&payload, Some(Phase::Empty))?;
    Ok(WatchEvent { event_type: raw.kind, app_name, phase, payload })
}

fn full_match(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

enum StreamEnd {
    Closed,
    Faulted(PlatformError),
    Cancelled,
}

pub struct WatcherBuilder {
    platform: Arc<dyn AppPlatform>,
    listener: Arc<dyn EventsListener>,
    query: WatchQuery,
    name_pattern: Option<String>,
    backoff: Backoff,
    cancel: Option<CancellationToken>,
}

impl WatcherBuilder {
    pub fn new(platform: Arc<dyn AppPlatform>) -> Self {
        Self {
            platform,
            listener: Arc::new(LogEventsListener),
            query: WatchQuery::default(),
            name_pattern: None,
            backoff: Backoff::default(),
            cancel: None,
        }
    }

    /// Server-side timeout (`STACKSPARK_WATCH_TIMEOUT_SECS`) and backoff cap from the environment.
    pub fn from_env(platform: Arc<dyn AppPlatform>) -> Self {
        let timeout = std::env::var("STACKSPARK_WATCH_TIMEOUT_SECS").ok().and_then(|s| s.parse::<u32>().ok());
        let mut b = Self::new(platform).backoff(Backoff::from_env());
        b.query.timeout_secs = timeout;
        b
    }

    pub fn listener(mut self, listener: impl EventsListener + 'static) -> Self {
        self.listener = Arc::new(listener);
        self
    }

    pub fn label_selector(mut self, selector: SelectorMap) -> Self {
        self.query.label_selector = selector;
        self
    }

    pub fn field_selector(mut self, selector: SelectorMap) -> Self {
        self.query.field_selector = selector;
        self
    }

    /// Client-side filter on `metadata.name`; the whole name must match.
    pub fn name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u32) -> Self {
        self.query.timeout_secs = Some(secs);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Tie the watcher to an external token (e.g. a child of the process shutdown token).
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<ChangeWatcher, WatchError> {
        let name_pattern = self.name_pattern.as_deref().map(full_match).transpose()?;
        Ok(ChangeWatcher {
            platform: self.platform,
            listener: self.listener,
            query: self.query,
            name_pattern,
            backoff: self.backoff,
            cancel: self.cancel.unwrap_or_default(),
            stats: Arc::new(WatchStats::default()),
        })
    }
}

pub struct ChangeWatcher {
    platform: Arc<dyn AppPlatform>,
    listener: Arc<dyn EventsListener>,
    query: WatchQuery,
    name_pattern: Option<Regex>,
    backoff: Backoff,
    cancel: CancellationToken,
    stats: Arc<WatchStats>,
}

impl ChangeWatcher {
    pub fn builder(platform: Arc<dyn AppPlatform>) -> WatcherBuilder {
        WatcherBuilder::new(platform)
    }

    pub fn stats(&self) -> Arc<WatchStats> {
        Arc::clone(&self.stats)
    }

    /// Request shutdown. Takes effect at the next check; an in-flight read is aborted.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(ns = %self.platform.namespace(), "watch: stopping");
        }
        self.cancel.cancel();
    }

    /// Run on a dedicated task.
    pub fn spawn(self) -> WatchHandle {
        let cancel = self.cancel.clone();
        let stats = self.stats();
        let task = tokio::spawn(async move { self.run().await });
        WatchHandle { cancel, stats, task }
    }

    /// Reconnect loop. Returns only once stopped.
    pub async fn run(&self) {
        let gvk = self.platform.coords().gvk_key();
        info!(gvk = %gvk, ns = %self.platform.namespace(), query = ?self.query, "watch: starting");
        let mut backoff = self.backoff.state();
        while !self.cancel.is_cancelled() {
            match self.run_stream(&mut backoff).await {
                StreamEnd::Cancelled => break,
                StreamEnd::Closed => debug!(gvk = %gvk, "watch: stream closed; reopening"),
                StreamEnd::Faulted(e) => {
                    self.stats.stream_fault();
                    let delay = backoff.next_delay();
                    warn!(gvk = %gvk, error = %e, delay_ms = ?delay.map(|d| d.as_millis()), "watch: stream fault; reopening");
                    if let Some(d) = delay {
                        if self.pause(d).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!(gvk = %gvk, stats = ?self.stats.snapshot(), "watch: stopped");
    }

    async fn pause(&self, d: Duration) -> Result<(), ()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(()),
            _ = tokio::time::sleep(d) => Ok(()),
        }
    }

    async fn run_stream(&self, backoff: &mut backoff::BackoffState) -> StreamEnd {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
            res = self.platform.watch(&self.query) => res,
        };
        let mut stream = match opened {
            Ok(s) => s,
            Err(e) => return StreamEnd::Faulted(e),
        };
        self.stats.stream_opened();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                item = stream.next() => item,
            };
            match next {
                None => return StreamEnd::Closed,
                Some(Err(e)) => return StreamEnd::Faulted(e),
                Some(Ok(raw)) => {
                    backoff.reset();
                    self.handle(raw);
                }
            }
            if self.cancel.is_cancelled() {
                return StreamEnd::Cancelled;
            }
        }
    }

    fn handle(&self, raw: RawWatchEvent) {
        self.stats.received();
        let kind = raw.kind;
        let event = match decode_event(raw) {
            Ok(ev) => ev,
            Err(e) => {
                self.stats.decode_failure();
                warn!(event = %kind, error = %e, "watch: undecodable event skipped");
                return;
            }
        };
        if let Some(re) = &self.name_pattern {
            if !re.is_match(&event.app_name) {
                self.stats.filtered();
                debug!(app = %event.app_name, "watch: filtered by name pattern");
                return;
            }
        }
        self.listener.on_event(&event);
        self.stats.dispatched();
    }
}

/// Handle to a spawned watcher.
pub struct WatchHandle {
    cancel: CancellationToken,
    stats: Arc<WatchStats>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn stats(&self) -> WatchStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.stop();
        self.join().await
    }
}
