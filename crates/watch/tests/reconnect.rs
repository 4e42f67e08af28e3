#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use stackspark_core::{EventType, Phase, RawWatchEvent, SelectorMap, WatchEvent};
use stackspark_kubehub::{MemoryPlatform, Op, PlatformError};
use stackspark_watch::{Backoff, ChangeWatcher, ChannelListener};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn ev(kind: EventType, name: &str, phase: Option<&str>) -> Result<RawWatchEvent, PlatformError> {
    let mut object = serde_json::json!({
        "apiVersion": "spark.stackable.tech/v1alpha1",
        "kind": "SparkApplication",
        "metadata": { "name": name },
    });
    if let Some(p) = phase {
        object["status"] = serde_json::json!({ "phase": p });
    }
    Ok(RawWatchEvent { kind, object })
}

async fn collect(rx: &mut tokio::sync::mpsc::Receiver<WatchEvent>, n: usize) -> Vec<WatchEvent> {
    let mut out = Vec::new();
    while out.len() < n {
        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(e)) => out.push(e),
            _ => break,
        }
    }
    out
}

#[tokio::test]
async fn name_pattern_filters_client_side() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    platform.push_stream(vec![
        ev(EventType::Added, "app-1", Some("Running")),
        ev(EventType::Added, "other", Some("Running")),
    ]);
    let (listener, mut rx) = ChannelListener::channel(16);
    let handle = ChangeWatcher::builder(platform.clone())
        .listener(listener)
        .name_pattern("app-.*")
        .build()
        .unwrap()
        .spawn();

    let got = collect(&mut rx, 1).await;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].app_name, "app-1");
    assert_eq!(got[0].phase, Phase::Running);
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

    let stats = handle.stats();
    assert_eq!(stats.events_dispatched, 1);
    assert_eq!(stats.events_filtered, 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn reopens_after_clean_close() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    platform.push_stream(vec![ev(EventType::Added, "a", None), ev(EventType::Modified, "b", Some("Pending"))]);
    platform.push_stream(vec![ev(EventType::Deleted, "c", Some("Succeeded"))]);
    let (listener, mut rx) = ChannelListener::channel(16);
    let handle = ChangeWatcher::builder(platform.clone()).listener(listener).build().unwrap().spawn();

    let got = collect(&mut rx, 3).await;
    let seen: Vec<_> = got.iter().map(|e| (e.event_type, e.app_name.as_str(), e.phase)).collect();
    assert_eq!(
        seen,
        vec![
            (EventType::Added, "a", Phase::Empty),
            (EventType::Modified, "b", Phase::Pending),
            (EventType::Deleted, "c", Phase::Succeeded),
        ]
    );
    // two scripted streams, then an idle one
    handle.shutdown().await.unwrap();
    assert!(platform.watches_opened() >= 3);
}

#[tokio::test]
async fn stream_fault_reopens_after_backoff() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    platform.push_stream(vec![
        ev(EventType::Added, "a", None),
        Err(PlatformError::api(410, "Expired", "too old resource version")),
    ]);
    platform.push_stream(vec![ev(EventType::Added, "b", None)]);
    let (listener, mut rx) = ChannelListener::channel(16);
    let handle = ChangeWatcher::builder(platform.clone())
        .listener(listener)
        .backoff(Backoff::default().with_max(Duration::from_millis(20)))
        .build()
        .unwrap()
        .spawn();

    let got = collect(&mut rx, 2).await;
    assert_eq!(got.iter().map(|e| e.app_name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    let stats = handle.stats();
    assert_eq!(stats.stream_faults, 1);
    assert!(stats.streams_opened >= 2);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_open_is_retried() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    platform.fail_next(Op::Watch, PlatformError::Transport("connection refused".into()));
    platform.push_stream(vec![ev(EventType::Added, "a", None)]);
    let (listener, mut rx) = ChannelListener::channel(16);
    let handle = ChangeWatcher::builder(platform.clone())
        .listener(listener)
        .backoff(Backoff::none())
        .build()
        .unwrap()
        .spawn();

    assert_eq!(collect(&mut rx, 1).await.len(), 1);
    assert_eq!(handle.stats().stream_faults, 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn stop_before_run_opens_nothing() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    let watcher = ChangeWatcher::builder(platform.clone()).build().unwrap();
    watcher.stop();
    timeout(Duration::from_secs(1), watcher.run()).await.unwrap();
    assert_eq!(platform.watches_opened(), 0);
}

#[tokio::test]
async fn stop_from_the_listener_ends_after_current_event() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    platform.push_stream(vec![ev(EventType::Added, "a", None), ev(EventType::Added, "b", None)]);
    let token = CancellationToken::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (seen2, token2) = (seen.clone(), token.clone());
    let watcher = ChangeWatcher::builder(platform.clone())
        .listener(move |e: &WatchEvent| {
            seen2.lock().unwrap().push(e.app_name.clone());
            token2.cancel();
        })
        .cancel_token(token)
        .build()
        .unwrap();

    timeout(Duration::from_secs(1), watcher.run()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["a".to_string()]);
    assert_eq!(platform.watches_opened(), 1);
}

#[tokio::test]
async fn undecodable_events_are_skipped() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    platform.push_stream(vec![
        Ok(RawWatchEvent { kind: EventType::Added, object: serde_json::json!("not an object") }),
        ev(EventType::Added, "bad-phase", Some("Exploded")),
        Ok(RawWatchEvent { kind: EventType::Added, object: serde_json::json!({ "metadata": {} }) }),
        ev(EventType::Added, "good", Some("Failed")),
    ]);
    let (listener, mut rx) = ChannelListener::channel(16);
    let handle = ChangeWatcher::builder(platform.clone()).listener(listener).build().unwrap().spawn();

    let got = collect(&mut rx, 1).await;
    assert_eq!(got[0].app_name, "good");
    assert_eq!(got[0].phase, Phase::Failed);
    let stats = handle.stats();
    assert_eq!(stats.decode_failures, 3);
    assert_eq!(stats.stream_faults, 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn bookmarks_reach_the_listener() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    platform.push_stream(vec![Ok(RawWatchEvent {
        kind: EventType::Bookmark,
        object: serde_json::json!({ "kind": "SparkApplication", "metadata": { "resourceVersion": "42" } }),
    })]);
    let (listener, mut rx) = ChannelListener::channel(4);
    let handle = ChangeWatcher::builder(platform.clone()).listener(listener).build().unwrap().spawn();

    let got = collect(&mut rx, 1).await;
    assert_eq!(got[0].event_type, EventType::Bookmark);
    assert_eq!(got[0].app_name, "");
    assert_eq!(got[0].payload.resource_version(), Some("42"));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn query_carries_selectors_and_timeout() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    let watcher = ChangeWatcher::builder(platform.clone())
        .label_selector(SelectorMap::new().with("team", "data").with("tier", "batch"))
        .field_selector(SelectorMap::new().with("metadata.name", "a"))
        .timeout_secs(60)
        .build()
        .unwrap();
    let handle = watcher.spawn();
    for _ in 0..50 {
        if platform.watches_opened() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await.unwrap();

    let q = &platform.queries()[0];
    assert_eq!(q.label_selector.get("team"), Some("data"));
    assert_eq!(q.label_selector.len(), 2);
    assert_eq!(q.field_selector.get("metadata.name"), Some("a"));
    assert_eq!(q.timeout_secs, Some(60));
}

#[tokio::test]
async fn stop_interrupts_an_idle_stream() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    let handle = ChangeWatcher::builder(platform.clone()).build().unwrap().spawn();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());
    handle.stop();
    timeout(Duration::from_secs(1), handle.join()).await.unwrap().unwrap();
    assert_eq!(platform.watches_opened(), 1);
}

#[test]
fn bad_pattern_fails_build() {
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    assert!(ChangeWatcher::builder(platform).name_pattern("(unclosed").build().is_err());
}

/// Yields one event, then blocks far longer than any test timeout.
struct SlowPlatform {
    coords: stackspark_core::ResourceCoords,
}

#[async_trait::async_trait]
impl stackspark_kubehub::AppPlatform for SlowPlatform {
    fn namespace(&self) -> &str {
        "jobs"
    }

    fn coords(&self) -> &stackspark_core::ResourceCoords {
        &self.coords
    }

    async fn create(
        &self,
        _doc: &stackspark_core::AppDocument,
        _dry_run: bool,
    ) -> Result<stackspark_core::AppDocument, PlatformError> {
        Err(PlatformError::Transport("read-only".into()))
    }

    async fn get(&self, name: &str) -> Result<stackspark_core::AppDocument, PlatformError> {
        Err(PlatformError::NotFound(name.to_string()))
    }

    async fn get_status(&self, name: &str) -> Result<stackspark_core::AppDocument, PlatformError> {
        Err(PlatformError::NotFound(name.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<stackspark_kubehub::Deletion, PlatformError> {
        Err(PlatformError::NotFound(name.to_string()))
    }

    async fn watch(&self, _query: &stackspark_kubehub::WatchQuery) -> Result<stackspark_kubehub::WatchStream, PlatformError> {
        let s = async_stream::stream! {
            yield ev(EventType::Added, "first", Some("Running"));
            tokio::time::sleep(Duration::from_secs(3600)).await;
            yield ev(EventType::Modified, "never", Some("Running"));
        };
        Ok(Box::pin(s))
    }
}

#[tokio::test]
async fn stop_aborts_a_read_in_flight() {
    let platform = Arc::new(SlowPlatform { coords: Default::default() });
    let (listener, mut rx) = ChannelListener::channel(4);
    let handle = ChangeWatcher::builder(platform).listener(listener).build().unwrap().spawn();

    assert_eq!(collect(&mut rx, 1).await[0].app_name, "first");
    timeout(Duration::from_secs(1), handle.shutdown()).await.unwrap().unwrap();
    assert!(rx.recv().await.is_none(), "listener dropped with the watcher");
}

#[tokio::test]
async fn environment_sets_the_server_timeout() {
    std::env::set_var("STACKSPARK_WATCH_TIMEOUT_SECS", "45");
    let platform = Arc::new(MemoryPlatform::new("jobs"));
    let handle = stackspark_watch::WatcherBuilder::from_env(platform.clone()).build().unwrap().spawn();
    for _ in 0..50 {
        if platform.watches_opened() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await.unwrap();
    assert_eq!(platform.queries()[0].timeout_secs, Some(45));
}
