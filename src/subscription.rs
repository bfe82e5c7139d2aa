//! Feeding scanner output into an [`Aggregator`].
//!
//! A [`Subscription`] owns the task that drains a scanner channel. Consumers
//! watch its revision counter to know when to redraw, and cancel it
//! explicitly when observation should stop.

use crate::aggregator::Aggregator;
use crate::scanner::ObservationResult;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Handle to a running scanner-to-aggregator pipeline.
///
/// Dropping the handle cancels the pipeline.
#[derive(Debug)]
pub struct Subscription {
    /// Set once cancelled. Held for the duration of every ingest.
    cancelled: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
    updates: watch::Receiver<u64>,
}

impl Subscription {
    /// Spawn a task that ingests everything `observations` yields.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        aggregator: Arc<Aggregator>,
        observations: mpsc::Receiver<ObservationResult>,
    ) -> Self {
        let cancelled = Arc::new(Mutex::new(false));
        let (revision, updates) = watch::channel(0);
        let task = tokio::spawn(pump(
            aggregator,
            observations,
            Arc::clone(&cancelled),
            revision,
        ));

        Self {
            cancelled,
            task,
            updates,
        }
    }

    /// Receiver whose value increases after each accepted observation.
    ///
    /// `changed()` fails once the pipeline has stopped, whether the scanner
    /// ran dry or the subscription was cancelled.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.updates.clone()
    }

    /// Stop ingesting. Safe to call repeatedly.
    ///
    /// Once this returns, no further observation reaches the aggregator
    /// through this subscription.
    pub fn cancel(&self) {
        let mut cancelled = self
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !*cancelled {
            *cancelled = true;
            self.task.abort();
            debug!("subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// True once the ingest task has stopped for any reason.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn pump(
    aggregator: Arc<Aggregator>,
    mut observations: mpsc::Receiver<ObservationResult>,
    cancelled: Arc<Mutex<bool>>,
    revision: watch::Sender<u64>,
) {
    while let Some(result) = observations.recv().await {
        let observation = match result {
            Ok(observation) => observation,
            Err(e) => {
                debug!(error = %e, "skipping undecodable advertisement");
                continue;
            }
        };

        let accepted = {
            let cancelled = cancelled.lock().unwrap_or_else(PoisonError::into_inner);
            if *cancelled {
                break;
            }
            // Rejections are logged by the aggregator
            aggregator.ingest(observation).is_ok()
        };

        if accepted {
            revision.send_modify(|r| *r += 1);
        }
    }

    trace!("observation stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Proximity;
    use crate::scanner::DecodeError;
    use crate::test_utils::observation;
    use std::time::Duration;

    async fn wait_for_revision(updates: &mut watch::Receiver<u64>, target: u64) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while *updates.borrow_and_update() < target {
                updates.changed().await.unwrap();
            }
        })
        .await
        .expect("revision not reached");
    }

    #[tokio::test]
    async fn test_ingests_and_notifies() {
        let aggregator = Arc::new(Aggregator::new());
        let (tx, rx) = mpsc::channel(8);
        let subscription = Subscription::start(Arc::clone(&aggregator), rx);
        let mut updates = subscription.updates();

        tx.send(Ok(observation("AA:BB", 2.0, Proximity::Near, -60)))
            .await
            .unwrap();
        tx.send(Ok(observation("AA:BB", 1.5, Proximity::Immediate, -50)))
            .await
            .unwrap();
        wait_for_revision(&mut updates, 2).await;

        assert_eq!(
            aggregator.snapshot(),
            vec![observation("AA:BB", 1.5, Proximity::Immediate, -50)]
        );
    }

    #[tokio::test]
    async fn test_errors_and_rejections_do_not_notify() {
        let aggregator = Arc::new(Aggregator::new());
        let (tx, rx) = mpsc::channel(8);
        let subscription = Subscription::start(Arc::clone(&aggregator), rx);
        let mut updates = subscription.updates();

        tx.send(Err(DecodeError::InvalidData("garbage".into())))
            .await
            .unwrap();
        tx.send(Ok(observation("", 1.0, Proximity::Near, -40)))
            .await
            .unwrap();
        tx.send(Ok(observation("CC:DD", 5.0, Proximity::Far, -80)))
            .await
            .unwrap();
        drop(tx);

        // Stream ends after the last item; only the valid one counted
        while updates.changed().await.is_ok() {}
        assert_eq!(*updates.borrow(), 1);
        assert_eq!(aggregator.len(), 1);
    }

    #[tokio::test]
    async fn test_updates_close_when_stream_ends() {
        let aggregator = Arc::new(Aggregator::new());
        let (tx, rx) = mpsc::channel::<ObservationResult>(1);
        let subscription = Subscription::start(aggregator, rx);
        let mut updates = subscription.updates();

        drop(tx);
        assert!(updates.changed().await.is_err());
        assert!(!subscription.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_stops_ingest() {
        let aggregator = Arc::new(Aggregator::new());
        let (tx, rx) = mpsc::channel(8);
        let subscription = Subscription::start(Arc::clone(&aggregator), rx);
        let mut updates = subscription.updates();

        tx.send(Ok(observation("AA:BB", 2.0, Proximity::Near, -60)))
            .await
            .unwrap();
        wait_for_revision(&mut updates, 1).await;

        subscription.cancel();
        subscription.cancel();
        assert!(subscription.is_cancelled());

        // The receiver may already be gone; either way nothing is ingested
        let _ = tx.try_send(Ok(observation("CC:DD", 5.0, Proximity::Far, -80)));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(aggregator.len(), 1);
        assert!(updates.changed().await.is_err());
        assert!(subscription.is_finished());
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let aggregator = Arc::new(Aggregator::new());
        let (tx, rx) = mpsc::channel(8);
        let subscription = Subscription::start(Arc::clone(&aggregator), rx);
        let mut updates = subscription.updates();

        drop(subscription);
        assert!(updates.changed().await.is_err());
        assert!(tx.is_closed());
    }
}
