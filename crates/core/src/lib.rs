//! Stackspark core types: phases, selectors, application identity and documents.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod document;
pub mod phase;
pub mod selector;

pub use document::{AppDocument, AppMeta, AppStatus, DocumentError};
pub use phase::{derive_phase, Phase, PhaseError};
pub use selector::{render_selector, SelectorMap};

pub const SPARK_GROUP: &str = "spark.stackable.tech";
pub const SPARK_VERSION: &str = "v1alpha1";
pub const SPARK_KIND: &str = "SparkApplication";
pub const SPARK_PLURAL: &str = "sparkapplications";

/// Group/version/kind/plural of the custom resource being managed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceCoords {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl Default for ResourceCoords {
    fn default() -> Self {
        Self {
            group: SPARK_GROUP.to_string(),
            version: SPARK_VERSION.to_string(),
            kind: SPARK_KIND.to_string(),
            plural: SPARK_PLURAL.to_string(),
        }
    }
}

impl ResourceCoords {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Key in the `group/version/Kind` form used in log fields.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }
}

/// Addresses exactly one application instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AppIdentity {
    pub name: String,
    pub namespace: String,
}

impl AppIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into() }
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Change notification types pushed by the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
            EventType::Bookmark => "BOOKMARK",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Undecoded event as received from a watch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWatchEvent {
    pub kind: EventType,
    pub object: serde_json::Value,
}

/// Decoded event handed to listeners. Lives for one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub app_name: String,
    pub phase: Phase,
    pub payload: AppDocument,
}
