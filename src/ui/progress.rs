/// Pipeline progress as a stream for the application subscription

use iced::futures::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::pipeline::ProgressEvent;

/// Yield every event from `receiver` until the coordinator is dropped
///
/// A lagging receiver skips what it missed; the next event still carries the
/// state to render.
pub fn progress_events(receiver: broadcast::Receiver<ProgressEvent>) -> impl Stream<Item = ProgressEvent> {
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((event, receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("progress subscriber lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::pipeline::RunOutcome;
    use crate::state::{PipelineStatus, RequestId};
    use iced::futures::StreamExt;

    fn started(id: u64) -> ProgressEvent {
        ProgressEvent::LoadingStarted {
            request_id: RequestId(id),
            point: GeoPoint::new(37.0, -122.0),
            bbox: None,
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, rx) = broadcast::channel(8);
        let completed = ProgressEvent::RunCompleted(RunOutcome {
            request_id: RequestId(1),
            status: PipelineStatus::Succeeded,
            applied: true,
            colorized: true,
        });

        tx.send(started(1)).unwrap();
        tx.send(completed.clone()).unwrap();
        drop(tx);

        let events: Vec<ProgressEvent> = progress_events(rx).collect().await;
        assert_eq!(events, vec![started(1), completed]);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_keeps_newest() {
        let (tx, rx) = broadcast::channel(1);
        tx.send(started(1)).unwrap();
        tx.send(started(2)).unwrap();
        tx.send(started(3)).unwrap();
        drop(tx);

        let events: Vec<ProgressEvent> = progress_events(rx).collect().await;
        assert_eq!(events, vec![started(3)]);
    }
}
