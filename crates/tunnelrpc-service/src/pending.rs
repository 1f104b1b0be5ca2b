//! Pending calls tracker
//!
//! Tracks calls sent to the agent and routes acknowledgements and results
//! back to the callers waiting on them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Final answer to a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Results(Vec<u8>),
    Exception(String),
}

struct PendingCall {
    ack: Option<oneshot::Sender<()>>,
    reply: oneshot::Sender<Reply>,
}

/// Tracks calls awaiting an acknowledgement and a reply
#[derive(Clone)]
pub struct PendingCalls {
    /// Maps call_id -> senders for the acknowledgement and the reply
    calls: Arc<DashMap<u64, PendingCall>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(DashMap::new()),
        }
    }

    /// Register a new pending call
    /// Returns receivers for the acknowledgement and the final reply
    pub fn register(&self, call_id: u64) -> (oneshot::Receiver<()>, oneshot::Receiver<Reply>) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.calls.insert(
            call_id,
            PendingCall {
                ack: Some(ack_tx),
                reply: reply_tx,
            },
        );
        debug!("Registered pending call {}", call_id);
        (ack_rx, reply_rx)
    }

    /// Mark a call as accepted by the agent
    /// Returns true if the call was known and not acknowledged before
    pub fn acknowledge(&self, call_id: u64) -> bool {
        let Some(mut call) = self.calls.get_mut(&call_id) else {
            warn!("Acknowledgement for unknown call {}", call_id);
            return false;
        };
        match call.ack.take() {
            Some(tx) => {
                debug!("Call {} acknowledged", call_id);
                // The caller may have stopped waiting for the ack only
                let _ = tx.send(());
                true
            }
            None => {
                warn!("Duplicate acknowledgement for call {}", call_id);
                false
            }
        }
    }

    /// Deliver the final reply and forget the call
    /// Returns true if the reply was delivered, false if the call wasn't found
    pub fn respond(&self, call_id: u64, reply: Reply) -> bool {
        if let Some((_, call)) = self.calls.remove(&call_id) {
            debug!("Routing reply for call {}", call_id);
            if call.reply.send(reply).is_err() {
                warn!("Failed to deliver reply for call {} - caller gone", call_id);
                return false;
            }
            return true;
        }
        // Cancelled calls land here when the agent answers anyway
        debug!("No pending call found for id {}", call_id);
        false
    }

    /// Forget a call (cancellation, timeout, or caller dropped)
    pub fn cancel(&self, call_id: u64) {
        if self.calls.remove(&call_id).is_some() {
            debug!("Cancelled pending call {}", call_id);
        }
    }

    /// Drop every pending call; their waiters observe a closed connection
    pub fn fail_all(&self) {
        let count = self.calls.len();
        self.calls.clear();
        if count > 0 {
            warn!("Failed {} pending call(s) on connection loss", count);
        }
    }

    /// Get count of pending calls
    pub fn count(&self) -> usize {
        self.calls.len()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_ack_and_respond() {
        let tracker = PendingCalls::new();

        let (ack, reply) = tracker.register(7);
        assert_eq!(tracker.count(), 1);

        assert!(tracker.acknowledge(7));
        ack.await.unwrap();
        assert_eq!(tracker.count(), 1);

        assert!(tracker.respond(7, Reply::Results(vec![1, 2, 3])));
        assert_eq!(reply.await.unwrap(), Reply::Results(vec![1, 2, 3]));
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_ack_ignored() {
        let tracker = PendingCalls::new();
        let (_ack, _reply) = tracker.register(1);

        assert!(tracker.acknowledge(1));
        assert!(!tracker.acknowledge(1));
        assert!(!tracker.acknowledge(2));
    }

    #[tokio::test]
    async fn test_exception_without_ack_drops_ack_sender() {
        let tracker = PendingCalls::new();
        let (ack, reply) = tracker.register(3);

        assert!(tracker.respond(3, Reply::Exception("bad params".into())));
        assert!(ack.await.is_err());
        assert_eq!(reply.await.unwrap(), Reply::Exception("bad params".into()));
    }

    #[tokio::test]
    async fn test_cancel() {
        let tracker = PendingCalls::new();
        let (_ack, reply) = tracker.register(5);

        tracker.cancel(5);
        assert_eq!(tracker.count(), 0);
        assert!(reply.await.is_err());

        // Late reply for a cancelled call is dropped
        assert!(!tracker.respond(5, Reply::Results(vec![])));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let tracker = PendingCalls::new();
        let (_a1, r1) = tracker.register(1);
        let (_a2, r2) = tracker.register(2);

        tracker.fail_all();
        assert_eq!(tracker.count(), 0);
        assert!(r1.await.is_err());
        assert!(r2.await.is_err());
    }
}
