/// Single-writer session store and the view the UI renders from

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use super::run::{PipelineRun, PipelineStatus, RequestId, RunFailure, RunImages};
use crate::geo::{BoundingBox, GeoPoint};
use crate::imaging::EncodedImage;

/// Historical imagery overlay toggles, passed through to the map untouched
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSettings {
    pub visible: bool,
    /// 0.0 (transparent) to 1.0 (opaque)
    pub opacity: f32,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            visible: true,
            opacity: 1.0,
        }
    }
}

/// Everything the store holds for one session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// `None` until the first click
    pub run: Option<PipelineRun>,
    pub layer: LayerSettings,
}

/// Read-only projection handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationView {
    pub request_id: Option<RequestId>,
    pub status: PipelineStatus,
    pub loading: bool,
    pub point: Option<GeoPoint>,
    pub bbox: Option<BoundingBox>,
    pub original_image: Option<EncodedImage>,
    pub colorized_image: Option<EncodedImage>,
    pub error: Option<String>,
    pub layer: LayerSettings,
}

/// Holder of the currently displayed run
///
/// Cloning yields another handle to the same session. Every write names the
/// run it belongs to; a write for any run other than the current one is
/// dropped, so a slow, superseded run can never overwrite a newer one.
#[derive(Clone)]
pub struct StateStore {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current run with a fresh Loading run
    ///
    /// Ignored unless `request_id` is newer than the current run's.
    pub fn begin_run(&self, request_id: RequestId, point: GeoPoint, bbox: Option<BoundingBox>) -> bool {
        self.tx.send_if_modified(|state| {
            if let Some(current) = &state.run {
                if current.request_id >= request_id {
                    return false;
                }
            }
            state.run = Some(PipelineRun::loading(request_id, point, bbox));
            true
        })
    }

    /// Mark the run Succeeded with its images
    pub fn complete_run(&self, request_id: RequestId, images: RunImages) -> bool {
        self.write_current(request_id, |run| run.succeed(images))
    }

    /// Mark the run Failed with the recorded error
    pub fn fail_run(&self, request_id: RequestId, failure: RunFailure) -> bool {
        self.write_current(request_id, |run| run.fail(failure))
    }

    /// Apply `write` only to the current, still-loading run with this id
    ///
    /// A second completion for the same id is a no-op.
    fn write_current<F>(&self, request_id: RequestId, write: F) -> bool
    where
        F: FnOnce(&mut PipelineRun),
    {
        self.tx.send_if_modified(|state| match state.run.as_mut() {
            Some(run) if run.request_id == request_id && !run.status.is_terminal() => {
                write(run);
                true
            }
            _ => false,
        })
    }

    pub fn set_layer_visible(&self, visible: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.layer.visible != visible;
            state.layer.visible = visible;
            changed
        });
    }

    pub fn set_layer_opacity(&self, opacity: f32) {
        let opacity = if opacity.is_finite() { opacity.clamp(0.0, 1.0) } else { 1.0 };
        self.tx.send_if_modified(|state| {
            let changed = state.layer.opacity != opacity;
            state.layer.opacity = opacity;
            changed
        });
    }

    pub fn current_request(&self) -> Option<RequestId> {
        self.tx.borrow().run.as_ref().map(|run| run.request_id)
    }

    pub fn current_run(&self) -> Option<PipelineRun> {
        self.tx.borrow().run.clone()
    }

    pub fn layer(&self) -> LayerSettings {
        self.tx.borrow().layer
    }

    /// Snapshot for rendering
    pub fn view(&self) -> PresentationView {
        let state = self.tx.borrow();
        let layer = state.layer;

        match &state.run {
            None => PresentationView {
                request_id: None,
                status: PipelineStatus::Idle,
                loading: false,
                point: None,
                bbox: None,
                original_image: None,
                colorized_image: None,
                error: None,
                layer,
            },
            Some(run) => PresentationView {
                request_id: Some(run.request_id),
                status: run.status,
                loading: run.status == PipelineStatus::Loading,
                point: Some(run.point),
                bbox: run.bbox,
                original_image: run.original_image.clone(),
                colorized_image: run.colorized_image.clone(),
                error: run.error.as_ref().map(ToString::to_string),
                layer,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::run::FailureKind;

    fn images(tag: &str) -> RunImages {
        RunImages {
            original: EncodedImage::from_data_url(format!("data:image/png;base64,{}", tag)).unwrap(),
            colorized: None,
        }
    }

    fn point() -> GeoPoint {
        GeoPoint::new(37.0, -122.0)
    }

    #[test]
    fn test_starts_idle() {
        let store = StateStore::new();
        let view = store.view();
        assert_eq!(view.status, PipelineStatus::Idle);
        assert!(!view.loading);
        assert!(view.original_image.is_none());
        assert_eq!(view.layer, LayerSettings::default());
    }

    #[test]
    fn test_begin_then_complete() {
        let store = StateStore::new();
        assert!(store.begin_run(RequestId(1), point(), None));
        assert!(store.view().loading);

        assert!(store.complete_run(RequestId(1), images("AAAA")));
        let view = store.view();
        assert_eq!(view.status, PipelineStatus::Succeeded);
        assert!(!view.loading);
        assert_eq!(view.original_image.unwrap().as_str(), "data:image/png;base64,AAAA");
        assert!(view.colorized_image.is_none());
    }

    #[test]
    fn test_stale_writes_are_discarded() {
        let store = StateStore::new();
        store.begin_run(RequestId(1), point(), None);
        store.begin_run(RequestId(2), GeoPoint::new(1.0, 1.0), None);

        assert!(!store.complete_run(RequestId(1), images("AAAA")));
        assert!(!store.fail_run(
            RequestId(1),
            RunFailure { kind: FailureKind::Model, message: "quota".to_string() }
        ));

        let view = store.view();
        assert_eq!(view.request_id, Some(RequestId(2)));
        assert!(view.loading);
        assert!(view.error.is_none());

        // An older click can never replace a newer run
        assert!(!store.begin_run(RequestId(1), point(), None));
        assert_eq!(store.current_request(), Some(RequestId(2)));
    }

    #[test]
    fn test_writes_are_idempotent_per_request() {
        let store = StateStore::new();
        store.begin_run(RequestId(5), point(), None);
        assert!(store.complete_run(RequestId(5), images("AAAA")));
        assert!(!store.complete_run(RequestId(5), images("BBBB")));
        assert!(!store.fail_run(
            RequestId(5),
            RunFailure { kind: FailureKind::Fetch, message: "late".to_string() }
        ));

        let view = store.view();
        assert_eq!(view.status, PipelineStatus::Succeeded);
        assert_eq!(view.original_image.unwrap().as_str(), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_failure_is_visible() {
        let store = StateStore::new();
        store.begin_run(RequestId(1), point(), None);
        store.fail_run(
            RequestId(1),
            RunFailure { kind: FailureKind::Fetch, message: "HTTP 503".to_string() },
        );

        let view = store.view();
        assert_eq!(view.status, PipelineStatus::Failed);
        assert!(!view.loading);
        assert_eq!(view.error.as_deref(), Some("Could not fetch historical imagery: HTTP 503"));
    }

    #[test]
    fn test_layer_toggles_pass_through() {
        let store = StateStore::new();

        store.set_layer_visible(false);
        store.set_layer_opacity(1.7);

        assert_eq!(store.layer(), LayerSettings { visible: false, opacity: 1.0 });

        store.set_layer_opacity(0.4);
        assert_eq!(store.layer().opacity, 0.4);
    }

    #[test]
    fn test_view_serializes_for_display_surface() {
        let store = StateStore::new();
        store.begin_run(RequestId(3), point(), None);
        store.complete_run(RequestId(3), images("AAAA"));

        let json = serde_json::to_value(store.view()).unwrap();
        assert_eq!(json["loading"], false);
        assert_eq!(json["originalImage"], "data:image/png;base64,AAAA");
        assert!(json["colorizedImage"].is_null());
    }
}
