//! Delivery handles
//!
//! A send returns immediately with a [`DeliveryHandle`]. The transport
//! later reports exactly one [`DeliveryOutcome`] through the paired
//! [`DeliveryReporter`]. Dropping the reporter without reporting resolves
//! the handle as failed.

use tokio::sync::oneshot;

/// Terminal result of one send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Remote process received the envelope
    Arrived,
    /// Peer offline; envelope stored for later delivery
    StoredOffline,
    /// Transport gave up
    Failed(String),
}

/// Receiving side of a delivery report
#[derive(Debug)]
pub struct DeliveryHandle {
    rx: oneshot::Receiver<DeliveryOutcome>,
}

/// Sending side of a delivery report
#[derive(Debug)]
pub struct DeliveryReporter {
    tx: oneshot::Sender<DeliveryOutcome>,
}

impl DeliveryHandle {
    /// Create a connected handle/reporter pair
    pub fn pair() -> (DeliveryHandle, DeliveryReporter) {
        let (tx, rx) = oneshot::channel();
        (DeliveryHandle { rx }, DeliveryReporter { tx })
    }

    /// Handle that is already resolved
    pub fn ready(outcome: DeliveryOutcome) -> Self {
        let (handle, reporter) = Self::pair();
        reporter.report(outcome);
        handle
    }

    /// Wait for the outcome
    pub async fn outcome(self) -> DeliveryOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| DeliveryOutcome::Failed("delivery report dropped".to_string()))
    }
}

impl DeliveryReporter {
    /// Report the outcome; consumes the reporter
    pub fn report(self, outcome: DeliveryOutcome) {
        // Receiver may have stopped caring.
        let _ = self.tx.send(outcome);
    }

    /// `on_arrived`
    pub fn arrived(self) {
        self.report(DeliveryOutcome::Arrived);
    }

    /// `on_stored_offline`
    pub fn stored_offline(self) {
        self.report(DeliveryOutcome::StoredOffline);
    }

    /// `on_failed`
    pub fn failed(self, reason: impl Into<String>) {
        self.report(DeliveryOutcome::Failed(reason.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reported_outcome_reaches_handle() {
        let (handle, reporter) = DeliveryHandle::pair();
        reporter.stored_offline();
        assert_eq!(handle.outcome().await, DeliveryOutcome::StoredOffline);
    }

    #[tokio::test]
    async fn dropped_reporter_is_a_failure() {
        let (handle, reporter) = DeliveryHandle::pair();
        drop(reporter);
        assert!(matches!(handle.outcome().await, DeliveryOutcome::Failed(_)));
    }
}
