//! Stackspark kubehub: sessions and the platform seam used by the controller and watcher.

#![forbid(unsafe_code)]

use std::ffi::OsStr;
use std::sync::Arc;

use futures::stream::BoxStream;
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use stackspark_core::{AppDocument, RawWatchEvent, ResourceCoords, SelectorMap};

mod kube_platform;
pub mod memory;

pub use kube_platform::KubePlatform;
pub use memory::{MemoryPlatform, Op};

/// Errors surfaced by platform calls. `NotFound` is the only kind callers branch on.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlatformError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("api ({code} {reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("config: {0}")]
    Config(String),
    #[error("decode: {0}")]
    Decode(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }

    pub fn api(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        PlatformError::Api { code, reason: reason.into(), message: message.into() }
    }

    pub(crate) fn from_response(ae: kube::core::ErrorResponse) -> Self {
        if ae.code == 404 {
            PlatformError::NotFound(ae.message)
        } else {
            PlatformError::Api { code: ae.code, reason: ae.reason, message: ae.message }
        }
    }
}

impl From<kube::Error> for PlatformError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) => PlatformError::from_response(ae),
            other => PlatformError::Transport(other.to_string()),
        }
    }
}

impl From<stackspark_core::DocumentError> for PlatformError {
    fn from(e: stackspark_core::DocumentError) -> Self {
        PlatformError::Decode(e.to_string())
    }
}

/// Read a path list separated like `$PATH`, merging the files in order. Empty entries are
/// skipped; the first file wins for `current-context` and duplicate names.
pub fn read_kubeconfig(paths: &OsStr) -> Result<Kubeconfig, PlatformError> {
    let mut merged: Option<Kubeconfig> = None;
    for path in std::env::split_paths(paths).filter(|p| !p.as_os_str().is_empty()) {
        let next = Kubeconfig::read_from(&path)
            .map_err(|e| PlatformError::Config(format!("reading {}: {}", path.display(), e)))?;
        merged = Some(match merged {
            None => next,
            Some(acc) => acc.merge(next).map_err(|e| PlatformError::Config(e.to_string()))?,
        });
    }
    merged.ok_or_else(|| PlatformError::Config("no kubeconfig path given".into()))
}

/// Authenticated client plus the namespace every call is scoped to.
#[derive(Clone)]
pub struct Session {
    client: Client,
    namespace: String,
}

impl Session {
    /// `$KUBECONFIG` (or `~/.kube/config`) when present, otherwise the in-cluster environment.
    pub async fn infer() -> Result<Self, PlatformError> {
        let config = kube::Config::infer().await.map_err(|e| PlatformError::Config(e.to_string()))?;
        Self::from_config(config)
    }

    /// `$KUBECONFIG` (merged when it lists several files) or `~/.kube/config`, with a chosen context.
    pub async fn from_default_kubeconfig(context: Option<&str>) -> Result<Self, PlatformError> {
        let opts = KubeConfigOptions { context: context.map(str::to_string), ..Default::default() };
        let config = kube::Config::from_kubeconfig(&opts).await.map_err(|e| PlatformError::Config(e.to_string()))?;
        Self::from_config(config)
    }

    /// Load explicit kubeconfig files, optionally selecting a context.
    ///
    /// `paths` is one file or a `KUBECONFIG`-style list; see [`read_kubeconfig`].
    pub async fn from_kubeconfig(paths: impl AsRef<OsStr>, context: Option<&str>) -> Result<Self, PlatformError> {
        let kubeconfig = read_kubeconfig(paths.as_ref())?;
        let opts = KubeConfigOptions { context: context.map(str::to_string), ..Default::default() };
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &opts)
            .await
            .map_err(|e| PlatformError::Config(e.to_string()))?;
        Self::from_config(config)
    }

    pub fn from_config(config: kube::Config) -> Result<Self, PlatformError> {
        let namespace = config.default_namespace.clone();
        let client = Client::try_from(config).map_err(PlatformError::from)?;
        info!(ns = %namespace, "session ready");
        Ok(Self { client, namespace })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Server-side filters for a watch stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchQuery {
    pub label_selector: SelectorMap,
    pub field_selector: SelectorMap,
    /// Server-side stream timeout; the platform closes the stream when it elapses.
    pub timeout_secs: Option<u32>,
}

/// Outcome of a successful delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Deletion {
    /// The platform echoed the object as last stored.
    Object(AppDocument),
    /// The platform answered with a bare status; the object is gone or being finalized.
    Status,
}

impl Deletion {
    pub fn into_document(self) -> Option<AppDocument> {
        match self {
            Deletion::Object(doc) => Some(doc),
            Deletion::Status => None,
        }
    }
}

pub type WatchStream = BoxStream<'static, Result<RawWatchEvent, PlatformError>>;

/// Generic operations over one namespaced custom resource kind.
#[async_trait::async_trait]
pub trait AppPlatform: Send + Sync {
    fn namespace(&self) -> &str;

    fn coords(&self) -> &ResourceCoords;

    /// Create a resource; `dry_run` asks the server to validate without persisting.
    async fn create(&self, doc: &AppDocument, dry_run: bool) -> Result<AppDocument, PlatformError>;

    async fn get(&self, name: &str) -> Result<AppDocument, PlatformError>;

    /// Fetch through the status subresource.
    async fn get_status(&self, name: &str) -> Result<AppDocument, PlatformError>;

    async fn delete(&self, name: &str) -> Result<Deletion, PlatformError>;

    /// Open one watch stream. It may end at any time without an error.
    async fn watch(&self, query: &WatchQuery) -> Result<WatchStream, PlatformError>;
}

#[async_trait::async_trait]
impl<T: AppPlatform + ?Sized> AppPlatform for Arc<T> {
    fn namespace(&self) -> &str {
        (**self).namespace()
    }

    fn coords(&self) -> &ResourceCoords {
        (**self).coords()
    }

    async fn create(&self, doc: &AppDocument, dry_run: bool) -> Result<AppDocument, PlatformError> {
        (**self).create(doc, dry_run).await
    }

    async fn get(&self, name: &str) -> Result<AppDocument, PlatformError> {
        (**self).get(name).await
    }

    async fn get_status(&self, name: &str) -> Result<AppDocument, PlatformError> {
        (**self).get_status(name).await
    }

    async fn delete(&self, name: &str) -> Result<Deletion, PlatformError> {
        (**self).delete(name).await
    }

    async fn watch(&self, query: &WatchQuery) -> Result<WatchStream, PlatformError> {
        (**self).watch(query).await
    }
}
