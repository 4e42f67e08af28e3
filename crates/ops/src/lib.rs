//! Stackspark ops: imperative application operations (submit, validate, get, stop, phase).
//!
//! Every call is a single round trip (two for `submit`) against the platform; nothing is
//! cached and nothing is retried. `submit` replaces by delete-then-create because the
//! resource's spec cannot be replaced in place. Between the two steps readers observe
//! "not found", and concurrent submits for one name must be serialized by the caller.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{error, info, warn};

use stackspark_core::{derive_phase, AppDocument, AppIdentity, Phase, PhaseError};
use stackspark_kubehub::{AppPlatform, Deletion, PlatformError};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("invalid state: {0}")]
    Decode(#[from] PhaseError),
}

pub type ControllerResult<T> = Result<T, ControllerError>;

/// Application controller bound to one platform (and therefore one namespace).
pub struct AppController {
    platform: Arc<dyn AppPlatform>,
    template: Option<AppDocument>,
}

impl AppController {
    pub fn new(platform: Arc<dyn AppPlatform>) -> Self {
        Self { platform, template: None }
    }

    /// Attach a job definition used by [`AppController::submit_template`].
    pub fn with_template(mut self, template: AppDocument) -> Self {
        self.template = Some(template);
        self
    }

    pub fn namespace(&self) -> &str {
        self.platform.namespace()
    }

    fn resolve(&self, doc: &AppDocument, name: Option<&str>) -> ControllerResult<AppIdentity> {
        let explicit = name.map(str::trim).filter(|n| !n.is_empty());
        match explicit.or_else(|| doc.name()) {
            Some(n) => Ok(AppIdentity::new(n, self.namespace())),
            None => Err(ControllerError::InvalidArgument(
                "application name required: pass one or set metadata.name".into(),
            )),
        }
    }

    /// Delete-then-create under the effective name. Returns the created document.
    pub async fn submit(&self, doc: &AppDocument, name: Option<&str>) -> ControllerResult<AppDocument> {
        let t0 = Instant::now();
        counter!("app_submit_total", 1u64);
        let id = self.resolve(doc, name)?;
        info!(app = %id, "ops: submit start");
        let body = doc.for_submission(&id, self.platform.coords());

        match self.platform.delete(&id.name).await {
            Ok(prev) => info!(app = %id, echoed = matches!(prev, Deletion::Object(_)), "ops: submit replaced existing"),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                counter!("app_submit_err", 1u64);
                error!(app = %id, error = %e, "ops: submit aborted; delete of existing failed");
                return Err(e.into());
            }
        }

        let created = self.platform.create(&body, false).await.map_err(|e| {
            counter!("app_submit_err", 1u64);
            error!(app = %id, error = %e, "ops: submit create failed");
            ControllerError::from(e)
        })?;
        histogram!("app_op_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => "submit");
        info!(app = %id, rv = ?created.resource_version(), took_ms = %t0.elapsed().as_millis(), "ops: submit ok");
        Ok(created)
    }

    /// Submit the attached template under `name`.
    pub async fn submit_template(&self, name: &str) -> ControllerResult<AppDocument> {
        let template = self
            .template
            .as_ref()
            .ok_or_else(|| ControllerError::InvalidArgument("no application document to submit".into()))?;
        self.submit(template, Some(name)).await
    }

    /// Server-side dry-run create. Never touches an existing resource.
    pub async fn validate(&self, doc: &AppDocument, name: Option<&str>) -> ControllerResult<AppDocument> {
        let id = self.resolve(doc, name)?;
        info!(app = %id, "ops: validate start");
        let body = doc.for_submission(&id, self.platform.coords());
        let out = self.platform.create(&body, true).await?;
        info!(app = %id, "ops: validate ok");
        Ok(out)
    }

    /// Fetch by name; `None` when the platform reports not found.
    pub async fn get(&self, name: &str) -> ControllerResult<Option<AppDocument>> {
        let t0 = Instant::now();
        counter!("app_get_total", 1u64);
        let res = absent_on_not_found(self.platform.get(name).await)?;
        histogram!("app_op_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => "get");
        info!(app = %name, found = res.is_some(), "ops: get done");
        Ok(res)
    }

    /// Delete by name; `None` when there was nothing to delete.
    pub async fn stop(&self, name: &str) -> ControllerResult<Option<Deletion>> {
        let t0 = Instant::now();
        counter!("app_stop_total", 1u64);
        let res = match self.platform.delete(name).await {
            Ok(deletion) => Some(deletion),
            Err(e) if e.is_not_found() => {
                warn!(app = %name, "ops: stop found nothing to delete");
                None
            }
            Err(e) => {
                error!(app = %name, error = %e, "ops: stop failed");
                return Err(e.into());
            }
        };
        histogram!("app_op_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => "stop");
        info!(app = %name, deleted = res.is_some(), echoed = matches!(res, Some(Deletion::Object(_))), "ops: stop done");
        Ok(res)
    }

    /// Phase from the status subresource, `Initiating` until the operator assigns one.
    pub async fn phase(&self, name: &str) -> ControllerResult<Phase> {
        counter!("app_phase_total", 1u64);
        let doc = self.platform.get_status(name).await.map_err(|e| {
            error!(app = %name, error = %e, "ops: phase fetch failed");
            ControllerError::from(e)
        })?;
        let phase = derive_phase(&doc, Some(Phase::Initiating))?;
        info!(app = %name, phase = %phase, "ops: phase");
        Ok(phase)
    }
}

fn absent_on_not_found<T>(res: Result<T, PlatformError>) -> Result<Option<T>, PlatformError> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
