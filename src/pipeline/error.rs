/// Failures a click run can end in

use thiserror::Error;

use crate::geo::GeometryError;
use crate::imaging::CodecError;
use crate::remote::{FetchError, ModelError};
use crate::state::{FailureKind, RunFailure};

/// Anything that aborts a run
///
/// A model answer without an image is not in here; it is a successful run
/// with no colorized image.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Geometry(_) => FailureKind::Geometry,
            PipelineError::Fetch(_) => FailureKind::Fetch,
            PipelineError::Model(_) => FailureKind::Model,
            PipelineError::Codec(_) => FailureKind::Codec,
        }
    }
}

impl From<&PipelineError> for RunFailure {
    fn from(err: &PipelineError) -> Self {
        RunFailure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_record_keeps_kind_and_message() {
        let err = PipelineError::from(FetchError::EmptyPayload);
        let failure = RunFailure::from(&err);
        assert_eq!(failure.kind, FailureKind::Fetch);
        assert_eq!(failure.message, "imagery service returned an empty payload");

        let err = PipelineError::from(GeometryError::Latitude(95.0));
        assert_eq!(err.kind(), FailureKind::Geometry);
        assert_eq!(err.to_string(), "latitude 95 is outside [-90, 90]");
    }
}
