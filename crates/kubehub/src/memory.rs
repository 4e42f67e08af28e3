//! In-memory platform for tests and offline runs.
//!
//! Stores documents by name, serves scripted watch streams in order, and can fail
//! the next call of a given operation on request.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use stackspark_core::{AppDocument, AppStatus, RawWatchEvent, ResourceCoords};

use crate::{AppPlatform, Deletion, PlatformError, WatchQuery, WatchStream};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Get,
    GetStatus,
    Delete,
    Watch,
}

pub type ScriptedStream = Vec<Result<RawWatchEvent, PlatformError>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MemoryPlatform {
    namespace: String,
    coords: ResourceCoords,
    store: Mutex<BTreeMap<String, AppDocument>>,
    scripts: Mutex<VecDeque<ScriptedStream>>,
    failures: Mutex<HashMap<Op, PlatformError>>,
    calls: Mutex<Vec<(Op, String)>>,
    queries: Mutex<Vec<WatchQuery>>,
    watches_opened: AtomicUsize,
    next_rv: AtomicU64,
    status_deletes: AtomicBool,
}

impl MemoryPlatform {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            coords: ResourceCoords::default(),
            store: Mutex::new(BTreeMap::new()),
            scripts: Mutex::new(VecDeque::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            watches_opened: AtomicUsize::new(0),
            next_rv: AtomicU64::new(1),
            status_deletes: AtomicBool::new(false),
        }
    }

    /// Queue one stream; each `watch` call takes the next queued stream.
    /// With the queue empty, watches stay open and idle.
    pub fn push_stream(&self, events: ScriptedStream) {
        lock(&self.scripts).push_back(events);
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: Op, err: PlatformError) {
        lock(&self.failures).insert(op, err);
    }

    /// Answer successful deletes with a bare status instead of the object.
    pub fn delete_with_status(&self, on: bool) {
        self.status_deletes.store(on, Ordering::SeqCst);
    }

    /// Play the operator: write a status phase onto a stored document.
    pub fn set_phase(&self, name: &str, phase: &str) -> bool {
        let rv = self.bump_rv();
        match lock(&self.store).get_mut(name) {
            Some(doc) => {
                let status = doc.status.get_or_insert_with(AppStatus::default);
                status.phase = Some(phase.to_string());
                doc.metadata.resource_version = Some(rv);
                true
            }
            None => false,
        }
    }

    pub fn insert(&self, doc: AppDocument) {
        if let Some(name) = doc.name().map(str::to_string) {
            lock(&self.store).insert(name, doc);
        }
    }

    pub fn stored(&self, name: &str) -> Option<AppDocument> {
        lock(&self.store).get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.store).keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<(Op, String)> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, op: Op) -> usize {
        lock(&self.calls).iter().filter(|(o, _)| *o == op).count()
    }

    pub fn watches_opened(&self) -> usize {
        self.watches_opened.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<WatchQuery> {
        lock(&self.queries).clone()
    }

    fn bump_rv(&self) -> String {
        self.next_rv.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn enter(&self, op: Op, name: &str) -> Result<(), PlatformError> {
        lock(&self.calls).push((op, name.to_string()));
        match lock(&self.failures).remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn not_found(&self, name: &str) -> PlatformError {
        PlatformError::NotFound(format!("{} \"{}\" not found", self.coords.plural, name))
    }
}

#[async_trait::async_trait]
impl AppPlatform for MemoryPlatform {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn coords(&self) -> &ResourceCoords {
        &self.coords
    }

    async fn create(&self, doc: &AppDocument, dry_run: bool) -> Result<AppDocument, PlatformError> {
        let name = doc.name().ok_or_else(|| PlatformError::api(422, "Invalid", "metadata.name: Required value"))?;
        self.enter(Op::Create, name)?;
        let mut store = lock(&self.store);
        if store.contains_key(name) {
            return Err(PlatformError::api(409, "AlreadyExists", format!("{} \"{}\" already exists", self.coords.plural, name)));
        }
        let mut created = doc.clone();
        created.metadata.namespace = Some(self.namespace.clone());
        created.status = None;
        if dry_run {
            return Ok(created);
        }
        let serial = self.next_rv.fetch_add(1, Ordering::SeqCst);
        created.metadata.resource_version = Some(serial.to_string());
        created.metadata.uid = Some(format!("00000000-0000-0000-0000-{serial:012}"));
        store.insert(name.to_string(), created.clone());
        Ok(created)
    }

    async fn get(&self, name: &str) -> Result<AppDocument, PlatformError> {
        self.enter(Op::Get, name)?;
        self.stored(name).ok_or_else(|| self.not_found(name))
    }

    async fn get_status(&self, name: &str) -> Result<AppDocument, PlatformError> {
        self.enter(Op::GetStatus, name)?;
        self.stored(name).ok_or_else(|| self.not_found(name))
    }

    async fn delete(&self, name: &str) -> Result<Deletion, PlatformError> {
        self.enter(Op::Delete, name)?;
        match lock(&self.store).remove(name) {
            Some(_) if self.status_deletes.load(Ordering::SeqCst) => Ok(Deletion::Status),
            Some(doc) => Ok(Deletion::Object(doc)),
            None => Err(self.not_found(name)),
        }
    }

    async fn watch(&self, query: &WatchQuery) -> Result<WatchStream, PlatformError> {
        self.enter(Op::Watch, "")?;
        self.watches_opened.fetch_add(1, Ordering::SeqCst);
        lock(&self.queries).push(query.clone());
        match lock(&self.scripts).pop_front() {
            Some(events) => Ok(futures::stream::iter(events).boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}
