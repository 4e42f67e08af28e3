//! Typed view over an application custom resource.
//!
//! Identity (`metadata`) and `status` are typed; the submission body (`spec`) and any
//! other top-level or metadata fields are carried as opaque JSON. Shape is validated
//! once when a raw value enters through [`AppDocument::from_value`].

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::{AppIdentity, ResourceCoords};

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("document is not a JSON object")]
    NotAnObject,
    #[error("malformed document: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("document has no metadata.name")]
    MissingName,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Everything else the platform writes (creationTimestamp, managedFields, ...)
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

/// Platform-written status; only `phase` is interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppDocument {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub metadata: AppMeta,
    #[serde(default, skip_serializing_if = "Json::is_null")]
    pub spec: Json,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

impl AppDocument {
    /// Validate and convert a raw platform object.
    pub fn from_value(v: Json) -> Result<Self, DocumentError> {
        if !v.is_object() {
            return Err(DocumentError::NotAnObject);
        }
        Ok(serde_json::from_value(v)?)
    }

    pub fn to_value(&self) -> Result<Json, DocumentError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Build a fresh, unnamed document for the given coordinates and spec body.
    pub fn new(coords: &ResourceCoords, spec: Json) -> Self {
        Self {
            api_version: coords.api_version(),
            kind: coords.kind.clone(),
            spec,
            ..Default::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Name as required by decoders: absent or empty is an error.
    pub fn app_name(&self) -> Result<&str, DocumentError> {
        self.name().ok_or(DocumentError::MissingName)
    }

    pub fn identity(&self, default_namespace: &str) -> Option<AppIdentity> {
        let name = self.name()?;
        let namespace = self.metadata.namespace.as_deref().unwrap_or(default_namespace);
        Some(AppIdentity::new(name, namespace))
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    /// Copy of this document addressed by `id`, ready to be created.
    ///
    /// Server-owned fields (status, uid, resourceVersion, managedFields,
    /// creationTimestamp) are dropped; missing apiVersion/kind come from `coords`.
    pub fn for_submission(&self, id: &AppIdentity, coords: &ResourceCoords) -> Self {
        let mut out = self.clone();
        out.metadata.name = Some(id.name.clone());
        out.metadata.namespace = Some(id.namespace.clone());
        out.metadata.resource_version = None;
        out.metadata.uid = None;
        for key in ["managedFields", "creationTimestamp", "generation", "deletionTimestamp"] {
            out.metadata.extra.remove(key);
        }
        out.status = None;
        if out.api_version.is_empty() {
            out.api_version = coords.api_version();
        }
        if out.kind.is_empty() {
            out.kind = coords.kind.clone();
        }
        out
    }
}
