/// Click → fetch → colorize orchestration
///
/// A click is handled in two halves:
/// - `begin` (synchronous): assign a request id, compute the box, put the
///   store into Loading and announce it. The UI can render the spinner
///   before anything slow has started.
/// - `execute` (async): fetch, decode, colorize, encode, then write the
///   result, which the store drops if a newer click has taken over.
///
/// Both halves announce themselves on the progress channel.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use super::error::PipelineError;
use crate::geo::{self, BoundingBox, GeoPoint, CLICK_RADIUS_M};
use crate::imaging::codec;
use crate::remote::{Colorizer, ImageryFetcher};
use crate::state::{PipelineStatus, RequestId, RunFailure, RunImages, StateStore};

/// Capacity of the progress channel; slow subscribers lose the oldest events
const EVENT_CAPACITY: usize = 64;

/// Progress notifications for subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    LoadingStarted {
        request_id: RequestId,
        point: GeoPoint,
        bbox: Option<BoundingBox>,
    },
    RunCompleted(RunOutcome),
}

/// A run that has entered Loading and still needs its images
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunTicket {
    pub request_id: RequestId,
    pub point: GeoPoint,
    pub bbox: BoundingBox,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub request_id: RequestId,
    pub status: PipelineStatus,
    /// false when a newer click had already taken over the store
    pub applied: bool,
    /// the model returned an image
    pub colorized: bool,
}

/// Sole writer of the `StateStore`
pub struct ClickCoordinator<F, C> {
    fetcher: F,
    colorizer: C,
    store: StateStore,
    radius_m: f64,
    last_request: AtomicU64,
    events: broadcast::Sender<ProgressEvent>,
}

impl<F, C> ClickCoordinator<F, C>
where
    F: ImageryFetcher,
    C: Colorizer,
{
    pub fn new(fetcher: F, colorizer: C, store: StateStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            fetcher,
            colorizer,
            store,
            radius_m: CLICK_RADIUS_M,
            last_request: AtomicU64::new(0),
            events,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Start a run for a clicked point
    ///
    /// Returns the ticket to pass to `execute`, or the finished outcome when
    /// the point itself is invalid.
    pub fn begin(&self, point: GeoPoint) -> Result<RunTicket, RunOutcome> {
        let request_id = RequestId(self.last_request.fetch_add(1, Ordering::SeqCst) + 1);
        let bbox = geo::box_around(point, self.radius_m);

        self.store.begin_run(request_id, point, bbox.as_ref().ok().copied());
        self.emit(ProgressEvent::LoadingStarted {
            request_id,
            point,
            bbox: bbox.as_ref().ok().copied(),
        });

        match bbox {
            Ok(bbox) => {
                tracing::info!(
                    "run {} started at ({:.6}, {:.6}), box N{:.5} S{:.5} E{:.5} W{:.5}",
                    request_id,
                    point.latitude,
                    point.longitude,
                    bbox.north,
                    bbox.south,
                    bbox.east,
                    bbox.west
                );
                Ok(RunTicket {
                    request_id,
                    point,
                    bbox,
                })
            }
            Err(err) => Err(self.finish(request_id, Err(err.into()))),
        }
    }

    /// Fetch and colorize for a ticket, then publish the result
    pub async fn execute(&self, ticket: RunTicket) -> RunOutcome {
        let result = self.produce(&ticket).await;
        self.finish(ticket.request_id, result)
    }

    /// `begin` followed by `execute`
    #[cfg(test)]
    pub async fn handle_click(&self, point: GeoPoint) -> RunOutcome {
        match self.begin(point) {
            Ok(ticket) => self.execute(ticket).await,
            Err(outcome) => outcome,
        }
    }

    async fn produce(&self, ticket: &RunTicket) -> Result<RunImages, PipelineError> {
        let artifact = self.fetcher.fetch(ticket.bbox).await?;
        let original = codec::decode(&artifact.bytes)?;
        tracing::debug!(
            "run {} fetched {}x{} {} ({:?})",
            ticket.request_id,
            original.width(),
            original.height(),
            artifact.mime_type,
            original.source_format()
        );

        let colorized = match self.colorizer.colorize(&original, ticket.point).await? {
            Some(artifact) => Some(codec::decode(&artifact.bytes)?),
            None => {
                tracing::warn!("run {} got no colorized image, keeping the original only", ticket.request_id);
                None
            }
        };

        Ok(RunImages {
            original: codec::encode(&original)?,
            colorized: colorized.as_ref().map(codec::encode).transpose()?,
        })
    }

    fn finish(&self, request_id: RequestId, result: Result<RunImages, PipelineError>) -> RunOutcome {
        let (status, applied, colorized) = match result {
            Ok(images) => {
                let colorized = images.colorized.is_some();
                let applied = self.store.complete_run(request_id, images);
                (PipelineStatus::Succeeded, applied, colorized)
            }
            Err(err) => {
                tracing::error!("run {} failed: {}", request_id, err);
                let applied = self.store.fail_run(request_id, RunFailure::from(&err));
                (PipelineStatus::Failed, applied, false)
            }
        };

        if applied {
            let elapsed = self
                .store
                .current_run()
                .and_then(|run| run.elapsed_ms())
                .unwrap_or_default();
            tracing::info!("run {} finished {:?} in {} ms", request_id, status, elapsed);
        } else {
            tracing::info!("run {} superseded, result discarded", request_id);
        }

        let outcome = RunOutcome {
            request_id,
            status,
            applied,
            colorized,
        };
        self.emit(ProgressEvent::RunCompleted(outcome));
        outcome
    }

    fn emit(&self, event: ProgressEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
