//! kube-rs backed platform: dynamic objects addressed by fixed coordinates.

use futures::StreamExt;
use kube::{
    api::{Api, DeleteParams, PostParams, WatchEvent as KubeWatchEvent, WatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
};
use tracing::debug;

use stackspark_core::{render_selector, AppDocument, EventType, RawWatchEvent, ResourceCoords};

use crate::{AppPlatform, Deletion, PlatformError, Session, WatchQuery, WatchStream};

/// Watch resumes from "any" version: the first frames replay current objects as ADDED.
const WATCH_FROM_ANY_VERSION: &str = "0";

/// The API server rejects watch timeouts of 295s and above.
const MAX_WATCH_TIMEOUT_SECS: u32 = 290;

pub struct KubePlatform {
    session: Session,
    coords: ResourceCoords,
    ar: ApiResource,
}

impl KubePlatform {
    pub fn new(session: Session) -> Self {
        Self::with_coords(session, ResourceCoords::default())
    }

    pub fn with_coords(session: Session, coords: ResourceCoords) -> Self {
        let gvk = GroupVersionKind::gvk(&coords.group, &coords.version, &coords.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &coords.plural);
        Self { session, coords, ar }
    }

    fn api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.session.client().clone(), self.session.namespace(), &self.ar)
    }
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn to_document(obj: &DynamicObject) -> Result<AppDocument, PlatformError> {
    let mut raw = serde_json::to_value(obj).map_err(|e| PlatformError::Decode(e.to_string()))?;
    strip_managed_fields(&mut raw);
    Ok(AppDocument::from_value(raw)?)
}

fn to_dynamic(doc: &AppDocument) -> Result<DynamicObject, PlatformError> {
    let raw = doc.to_value()?;
    serde_json::from_value(raw).map_err(|e| PlatformError::Decode(e.to_string()))
}

fn raw_event(kind: EventType, obj: &DynamicObject) -> Result<RawWatchEvent, PlatformError> {
    let mut object = serde_json::to_value(obj).map_err(|e| PlatformError::Decode(e.to_string()))?;
    strip_managed_fields(&mut object);
    Ok(RawWatchEvent { kind, object })
}

fn decode_event(ev: KubeWatchEvent<DynamicObject>) -> Result<RawWatchEvent, PlatformError> {
    match ev {
        KubeWatchEvent::Added(o) => raw_event(EventType::Added, &o),
        KubeWatchEvent::Modified(o) => raw_event(EventType::Modified, &o),
        KubeWatchEvent::Deleted(o) => raw_event(EventType::Deleted, &o),
        KubeWatchEvent::Bookmark(b) => Ok(RawWatchEvent {
            kind: EventType::Bookmark,
            object: serde_json::json!({
                "apiVersion": b.types.api_version,
                "kind": b.types.kind,
                "metadata": { "resourceVersion": b.metadata.resource_version },
            }),
        }),
        KubeWatchEvent::Error(e) => Err(PlatformError::from_response(e)),
    }
}

/// Render selectors for the wire. Empty maps mean no filter.
fn watch_params(query: &WatchQuery) -> WatchParams {
    let mut wp = WatchParams::default();
    if let Some(labels) = render_selector(&query.label_selector) {
        wp = wp.labels(&labels);
    }
    if let Some(fields) = render_selector(&query.field_selector) {
        wp = wp.fields(&fields);
    }
    if let Some(secs) = query.timeout_secs {
        wp = wp.timeout(secs.min(MAX_WATCH_TIMEOUT_SECS));
    }
    wp
}

#[async_trait::async_trait]
impl AppPlatform for KubePlatform {
    fn namespace(&self) -> &str {
        self.session.namespace()
    }

    fn coords(&self) -> &ResourceCoords {
        &self.coords
    }

    async fn create(&self, doc: &AppDocument, dry_run: bool) -> Result<AppDocument, PlatformError> {
        let obj = to_dynamic(doc)?;
        let pp = PostParams { dry_run, ..Default::default() };
        debug!(name = ?doc.name(), dry_run, "kube: create");
        let created = self.api().create(&pp, &obj).await?;
        to_document(&created)
    }

    async fn get(&self, name: &str) -> Result<AppDocument, PlatformError> {
        debug!(name = %name, "kube: get");
        let obj = self.api().get(name).await?;
        to_document(&obj)
    }

    async fn get_status(&self, name: &str) -> Result<AppDocument, PlatformError> {
        debug!(name = %name, "kube: get status");
        let obj = self.api().get_status(name).await?;
        to_document(&obj)
    }

    async fn delete(&self, name: &str) -> Result<Deletion, PlatformError> {
        debug!(name = %name, "kube: delete");
        let res = self.api().delete(name, &DeleteParams::default()).await?;
        match res.left() {
            Some(obj) => Ok(Deletion::Object(to_document(&obj)?)),
            None => Ok(Deletion::Status),
        }
    }

    async fn watch(&self, query: &WatchQuery) -> Result<WatchStream, PlatformError> {
        let wp = watch_params(query);
        debug!(labels = ?wp.label_selector, fields = ?wp.field_selector, timeout = ?wp.timeout, "kube: watch");
        let stream = self.api().watch(&wp, WATCH_FROM_ANY_VERSION).await?;
        Ok(stream
            .map(|item| match item {
                Ok(ev) => decode_event(ev),
                Err(e) => Err(PlatformError::from(e)),
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic(name: &str, phase: Option<&str>) -> DynamicObject {
        let mut raw = serde_json::json!({
            "apiVersion": "spark.stackable.tech/v1alpha1",
            "kind": "SparkApplication",
            "metadata": { "name": name, "namespace": "ns", "managedFields": [ {} ] },
            "spec": { "mode": "cluster" },
        });
        if let Some(p) = phase {
            raw["status"] = serde_json::json!({ "phase": p });
        }
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn converts_objects_and_strips_managed_fields() {
        let doc = to_document(&dynamic("a", Some("Running"))).unwrap();
        assert_eq!(doc.name(), Some("a"));
        assert_eq!(doc.status.and_then(|s| s.phase).as_deref(), Some("Running"));
        assert!(!doc.metadata.extra.contains_key("managedFields"));
    }

    #[test]
    fn documents_convert_back_to_dynamic_objects() {
        let doc = to_document(&dynamic("b", None)).unwrap();
        let obj = to_dynamic(&doc).unwrap();
        assert_eq!(obj.metadata.name.as_deref(), Some("b"));
        assert_eq!(obj.data["spec"]["mode"], "cluster");
    }

    #[test]
    fn decodes_change_events() {
        let ev = decode_event(KubeWatchEvent::Modified(dynamic("c", Some("Pending")))).unwrap();
        assert_eq!(ev.kind, EventType::Modified);
        assert_eq!(ev.object["metadata"]["name"], "c");
    }

    #[test]
    fn error_frames_become_stream_faults() {
        let frame = kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "too old resource version".into(),
            reason: "Expired".into(),
            code: 410,
        };
        let err = decode_event(KubeWatchEvent::Error(frame)).unwrap_err();
        assert!(matches!(err, PlatformError::Api { code: 410, .. }));
    }

    #[test]
    fn watch_params_render_both_selectors() {
        use stackspark_core::SelectorMap;
        let query = WatchQuery {
            label_selector: SelectorMap::new().with("a", "1").with("b", "2"),
            field_selector: SelectorMap::new().with("metadata.name", "app-1"),
            timeout_secs: Some(60),
        };
        let wp = watch_params(&query);
        assert_eq!(wp.label_selector.as_deref(), Some("a=1,b=2"));
        assert_eq!(wp.field_selector.as_deref(), Some("metadata.name=app-1"));
        assert_eq!(wp.timeout, Some(60));
    }

    #[test]
    fn empty_query_sends_no_filter() {
        let wp = watch_params(&WatchQuery::default());
        assert_eq!(wp.label_selector, None);
        assert_eq!(wp.field_selector, None);
        assert_eq!(wp.timeout, None);
    }

    #[test]
    fn watch_timeout_is_clamped() {
        let wp = watch_params(&WatchQuery { timeout_secs: Some(600), ..Default::default() });
        assert_eq!(wp.timeout, Some(MAX_WATCH_TIMEOUT_SECS));
        assert_eq!(wp.timeout, Some(290));
    }
}
