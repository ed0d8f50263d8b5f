/// Data model of a single click-triggered pipeline run
///
/// A run is created when the map is clicked, moves to Loading immediately,
/// and ends Succeeded or Failed. Only the coordinator mutates it, and only
/// through the `StateStore`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geo::{BoundingBox, GeoPoint};
use crate::imaging::EncodedImage;

/// Monotonically increasing identity of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    Idle,
    Loading,
    Succeeded,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Succeeded | PipelineStatus::Failed)
    }
}

/// Which stage aborted a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Geometry,
    Fetch,
    Model,
    Codec,
}

/// Cloneable record of why a run failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.kind {
            FailureKind::Geometry => "Invalid location",
            FailureKind::Fetch => "Could not fetch historical imagery",
            FailureKind::Model => "Colorization failed",
            FailureKind::Codec => "Could not read image",
        };
        write!(f, "{}: {}", stage, self.message)
    }
}

/// Images produced by a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunImages {
    pub original: EncodedImage,
    /// `None` when the model answered without an image
    pub colorized: Option<EncodedImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub request_id: RequestId,
    pub point: GeoPoint,
    /// `None` only when the point itself was invalid
    pub bbox: Option<BoundingBox>,
    pub status: PipelineStatus,
    pub original_image: Option<EncodedImage>,
    pub colorized_image: Option<EncodedImage>,
    pub error: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// A fresh run in the Loading state with no images
    pub fn loading(request_id: RequestId, point: GeoPoint, bbox: Option<BoundingBox>) -> Self {
        Self {
            request_id,
            point,
            bbox,
            status: PipelineStatus::Loading,
            original_image: None,
            colorized_image: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn succeed(&mut self, images: RunImages) {
        self.status = PipelineStatus::Succeeded;
        self.original_image = Some(images.original);
        self.colorized_image = images.colorized;
        self.error = None;
        self.finished_at = Some(Utc::now());
    }

    /// Failed runs show no images
    pub fn fail(&mut self, failure: RunFailure) {
        self.status = PipelineStatus::Failed;
        self.original_image = None;
        self.colorized_image = None;
        self.error = Some(failure);
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock time from click to completion
    pub fn elapsed_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_order() {
        assert!(RequestId(2) > RequestId(1));
        assert_eq!(RequestId(7).to_string(), "#7");
    }

    #[test]
    fn test_fail_clears_images() {
        let mut run = PipelineRun::loading(RequestId(1), GeoPoint::new(1.0, 2.0), None);
        run.original_image = Some(EncodedImage::from_data_url("data:image/png;base64,AAAA").unwrap());

        run.fail(RunFailure {
            kind: FailureKind::Fetch,
            message: "timed out".to_string(),
        });

        assert_eq!(run.status, PipelineStatus::Failed);
        assert!(run.original_image.is_none());
        assert!(run.colorized_image.is_none());
        assert!(run.status.is_terminal());
        assert!(run.elapsed_ms().is_some());
        assert_eq!(
            run.error.unwrap().to_string(),
            "Could not fetch historical imagery: timed out"
        );
    }
}
