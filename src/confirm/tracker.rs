//! Monotonic confirmation state

use tokio::sync::watch;
use tracing::debug;

use super::ConfirmationStatus;
use crate::rpc::{Commitment, SignatureStatus};

/// What one status observation did to the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Moved forward to a new commitment
    Advanced(Commitment),
    /// Nothing new: unknown to the node, equal, or lower than already seen
    Unchanged,
    /// Reached (or passed) the target commitment
    Reached(Commitment),
    /// The network reported an execution error
    Failed(String),
}

/// Tracks one transaction's status and publishes every transition
///
/// Progress only moves forward; a node lagging behind another cannot pull
/// the status back. Once terminal, further observations are ignored.
#[derive(Debug)]
pub struct StatusTracker {
    target: Commitment,
    current: ConfirmationStatus,
    slot: Option<u64>,
    observed: bool,
    tx: watch::Sender<ConfirmationStatus>,
}

impl StatusTracker {
    pub fn new(target: Commitment) -> (Self, watch::Receiver<ConfirmationStatus>) {
        let (tx, rx) = watch::channel(ConfirmationStatus::Pending);
        (Self::with_sender(target, tx), rx)
    }

    /// Publish into an existing channel, resetting it to `Pending`
    pub fn with_sender(target: Commitment, tx: watch::Sender<ConfirmationStatus>) -> Self {
        tx.send_replace(ConfirmationStatus::Pending);
        Self {
            target,
            current: ConfirmationStatus::Pending,
            slot: None,
            observed: false,
            tx,
        }
    }

    pub fn target(&self) -> Commitment {
        self.target
    }

    pub fn current(&self) -> &ConfirmationStatus {
        &self.current
    }

    /// Slot of the most recent forward observation
    pub fn slot(&self) -> Option<u64> {
        self.slot
    }

    /// Whether the transaction has ever been seen on-chain
    pub fn observed(&self) -> bool {
        self.observed
    }

    /// Apply one poll or notification result
    pub fn observe(&mut self, status: Option<&SignatureStatus>) -> Observation {
        if self.current.is_terminal() {
            return Observation::Unchanged;
        }
        let Some(status) = status else {
            return Observation::Unchanged;
        };
        self.observed = true;

        if let Some(reason) = &status.err {
            self.finish(ConfirmationStatus::Failed(reason.clone()));
            return Observation::Failed(reason.clone());
        }

        let seen = status.commitment();
        if self.current.commitment().is_some_and(|c| c >= seen) {
            debug!(seen = %seen, current = %self.current, "Ignoring stale status");
            return self.unchanged_or_reached();
        }

        self.slot = Some(status.slot);
        self.publish(ConfirmationStatus::from(seen));
        if seen >= self.target {
            Observation::Reached(seen)
        } else {
            Observation::Advanced(seen)
        }
    }

    /// Move to a terminal state; ignored if already terminal
    pub fn finish(&mut self, status: ConfirmationStatus) {
        if self.current.is_terminal() {
            return;
        }
        self.publish(status);
    }

    fn unchanged_or_reached(&self) -> Observation {
        match self.current.commitment() {
            Some(c) if c >= self.target => Observation::Reached(c),
            _ => Observation::Unchanged,
        }
    }

    fn publish(&mut self, status: ConfirmationStatus) {
        debug!(from = %self.current, to = %status, "Confirmation status changed");
        self.current = status.clone();
        // receivers may all be gone; the tracker keeps its own copy
        self.tx.send_replace(status);
    }
}
