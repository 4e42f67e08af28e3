//! Stackspark schema: load SparkApplication job definitions from YAML and view their spec
//! through typed fields while keeping every unknown field intact.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use stackspark_core::{AppDocument, DocumentError, ResourceCoords};

pub const DEFAULT_MAX_YAML_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("document is {size} bytes; limit is {limit} (STACKSPARK_MAX_YAML_BYTES)")]
    TooLarge { size: usize, limit: usize },
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid document: {0}")]
    Shape(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Byte limit from `STACKSPARK_MAX_YAML_BYTES`, 1 MiB when unset or unparsable.
pub fn max_yaml_bytes() -> usize {
    std::env::var("STACKSPARK_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_YAML_BYTES)
}

fn check_size(size: usize) -> Result<(), SchemaError> {
    let limit = max_yaml_bytes();
    if size > limit {
        return Err(SchemaError::TooLarge { size, limit });
    }
    Ok(())
}

/// Parse one YAML job definition.
pub fn document_from_yaml(yaml: &str) -> Result<AppDocument, SchemaError> {
    document_from_yaml_with(yaml, &ResourceCoords::default())
}

pub fn document_from_yaml_with(yaml: &str, coords: &ResourceCoords) -> Result<AppDocument, SchemaError> {
    check_size(yaml.len())?;
    let value: Json = serde_yaml::from_str(yaml)?;
    document_from_value(value, coords)
}

/// Parse a `---` separated stream of job definitions. Empty documents are skipped.
pub fn documents_from_yaml(yaml: &str, coords: &ResourceCoords) -> Result<Vec<AppDocument>, SchemaError> {
    check_size(yaml.len())?;
    let mut out = Vec::new();
    for de in serde_yaml::Deserializer::from_str(yaml) {
        let value = Json::deserialize(de)?;
        if value.is_null() {
            continue;
        }
        out.push(document_from_value(value, coords)?);
    }
    Ok(out)
}

/// Read and parse a job definition file.
pub fn load_document(path: impl AsRef<Path>) -> Result<AppDocument, SchemaError> {
    let path = path.as_ref();
    let io = |source| SchemaError::Io { path: path.display().to_string(), source };
    let size = std::fs::metadata(path).map_err(io)?.len();
    check_size(usize::try_from(size).unwrap_or(usize::MAX))?;
    let text = std::fs::read_to_string(path).map_err(io)?;
    let doc = document_from_yaml(&text)?;
    debug!(path = %path.display(), name = ?doc.name(), "schema: document loaded");
    Ok(doc)
}

fn document_from_value(value: Json, coords: &ResourceCoords) -> Result<AppDocument, SchemaError> {
    let obj = value.as_object().ok_or_else(|| SchemaError::Shape("top level must be a mapping".into()))?;
    match obj.get("metadata") {
        None | Some(Json::Object(_)) => {}
        Some(_) => return Err(SchemaError::Shape("metadata must be a mapping".into())),
    }
    match obj.get("spec") {
        Some(Json::Object(_)) => {}
        Some(_) => return Err(SchemaError::Shape("spec must be a mapping".into())),
        None => return Err(SchemaError::Shape("spec is required".into())),
    }
    let mut doc = AppDocument::from_value(value)?;
    if doc.api_version.is_empty() {
        doc.api_version = coords.api_version();
    }
    if doc.kind.is_empty() {
        doc.kind = coords.kind.clone();
    }
    Ok(doc)
}

/// Typed view of the `spec` section. Unrecognised keys land in `extra` and are written back
/// unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SparkApplicationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spark_image: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_application_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spark_conf: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps: Option<Deps>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3connection: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_directory: Option<Json>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deps {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(flatten)]
    pub source: serde_json::Map<String, Json>,
}

/// Driver, executor or submit job settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RoleConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryLimit>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CpuRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryLimit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

impl SparkApplicationSpec {
    pub fn from_document(doc: &AppDocument) -> Result<Self, SchemaError> {
        Ok(serde_json::from_value(doc.spec.clone()).map_err(DocumentError::from)?)
    }

    /// Write this view back as the document's spec.
    pub fn apply_to(&self, doc: &mut AppDocument) -> Result<(), SchemaError> {
        doc.spec = serde_json::to_value(self).map_err(DocumentError::from)?;
        Ok(())
    }

    pub fn executor_replicas(&self) -> Option<u32> {
        self.executor.as_ref().and_then(|e| e.replicas)
    }
}
