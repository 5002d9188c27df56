//! # Flow Handles
//!
//! What a caller gets back from `start_flow`: a future-like result accessor
//! and a live feed of progress events.

use crate::domain::{FlowError, FlowOutcome, ProgressEvent};
use serde::de::DeserializeOwned;
use shared_types::{decode, FlowId};
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

/// Handle to a started (or recovered) flow.
pub struct FlowHandle<T> {
    flow_id: FlowId,
    outcome: watch::Receiver<Option<FlowOutcome>>,
    progress: Option<broadcast::Receiver<ProgressEvent>>,
    _output: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> FlowHandle<T> {
    pub(crate) fn new(
        flow_id: FlowId,
        outcome: watch::Receiver<Option<FlowOutcome>>,
        progress: Option<broadcast::Receiver<ProgressEvent>>,
    ) -> Self {
        Self {
            flow_id,
            outcome,
            progress,
            _output: PhantomData,
        }
    }

    pub fn id(&self) -> FlowId {
        self.flow_id
    }

    /// Wait for the flow to finish.
    ///
    /// Fails with [`FlowError::EngineStopped`] if the engine shuts down first;
    /// the flow itself is recovered by the next engine over the same store.
    pub async fn result(mut self) -> Result<T, FlowError> {
        loop {
            let current = self.outcome.borrow().clone();
            if let Some(outcome) = current {
                return outcome.and_then(|bytes| Ok(decode(&bytes)?));
            }
            if self.outcome.changed().await.is_err() {
                let last = self.outcome.borrow().clone();
                return match last {
                    Some(outcome) => outcome.and_then(|bytes| Ok(decode(&bytes)?)),
                    None => Err(FlowError::EngineStopped),
                };
            }
        }
    }

    /// Progress events since the handle was created. Ends when the flow
    /// finishes. The feed can be taken once; later calls get an empty feed.
    pub fn progress(&mut self) -> ProgressFeed {
        let receiver = self
            .progress
            .take()
            .unwrap_or_else(|| broadcast::channel(1).1);
        ProgressFeed {
            inner: BroadcastStream::new(receiver),
        }
    }
}

/// Stream of [`ProgressEvent`]s. Events missed by a slow reader are skipped.
pub struct ProgressFeed {
    inner: BroadcastStream<ProgressEvent>,
}

impl Stream for ProgressFeed {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                // Lagged: advisory data, carry on with what is still buffered.
                Poll::Ready(Some(Err(_))) => continue,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::encode;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_result_decodes_output() {
        let (tx, rx) = watch::channel(None);
        let handle: FlowHandle<String> = FlowHandle::new(FlowId::new(), rx, None);
        tx.send_replace(Some(Ok(encode(&"done".to_string()).unwrap())));
        assert_eq!(handle.result().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_result_after_engine_stop() {
        let (tx, rx) = watch::channel(None);
        let handle: FlowHandle<u8> = FlowHandle::new(FlowId::new(), rx, None);
        drop(tx);
        assert_eq!(handle.result().await, Err(FlowError::EngineStopped));
    }

    #[tokio::test]
    async fn test_progress_feed_of_finished_flow_is_empty() {
        let (_tx, rx) = watch::channel(Some(Ok(vec![])));
        let mut handle: FlowHandle<()> = FlowHandle::new(FlowId::new(), rx, None);
        let events: Vec<_> = handle.progress().collect().await;
        assert!(events.is_empty());
    }
}
