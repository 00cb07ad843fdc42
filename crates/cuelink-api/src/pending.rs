// ── Pending reply queue ──
//
// The device protocol carries no request ids, so replies are correlated
// purely by order: the stream transport delivers replies in the order the
// requests were written, and the oldest outstanding call claims the next
// reply. Calls whose caller already gave up (deadline passed or receiver
// dropped) are skipped rather than matched.

use std::collections::VecDeque;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::Error;

pub(crate) type ReplySink = oneshot::Sender<Result<Value, Error>>;

/// One in-flight request awaiting a reply.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub id: u64,
    pub address: String,
    pub deadline: Instant,
    pub sink: ReplySink,
}

impl PendingCall {
    fn is_live(&self, now: Instant) -> bool {
        now < self.deadline && !self.sink.is_closed()
    }
}

/// Ordered queue of outstanding calls.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    calls: VecDeque<PendingCall>,
}

impl PendingQueue {
    pub(crate) fn push(&mut self, call: PendingCall) {
        self.calls.push_back(call);
    }

    /// Dequeue the oldest call that is still waiting, discarding dead ones.
    pub(crate) fn claim_oldest(&mut self, now: Instant) -> Option<PendingCall> {
        while let Some(call) = self.calls.pop_front() {
            if call.is_live(now) {
                return Some(call);
            }
            tracing::trace!(id = call.id, address = %call.address, "discarding expired pending call");
        }
        None
    }

    /// Remove a call by id (used when its caller times out).
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.calls.len();
        self.calls.retain(|c| c.id != id);
        self.calls.len() != before
    }

    /// Reject every outstanding call.
    pub(crate) fn fail_all(&mut self, make_error: impl Fn() -> Error) {
        for call in self.calls.drain(..) {
            let _ = call.sink.send(Err(make_error()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn call(id: u64, deadline: Instant) -> (PendingCall, oneshot::Receiver<Result<Value, Error>>) {
        let (sink, rx) = oneshot::channel();
        (
            PendingCall {
                id,
                address: format!("/q/{id}"),
                deadline,
                sink,
            },
            rx,
        )
    }

    #[test]
    fn claims_in_send_order() {
        let now = Instant::now();
        let deadline = now + Duration::from_secs(10);
        let mut queue = PendingQueue::default();
        let mut receivers = Vec::new();
        for id in 0..3 {
            let (c, rx) = call(id, deadline);
            queue.push(c);
            receivers.push(rx);
        }

        let ids: Vec<u64> = std::iter::from_fn(|| queue.claim_oldest(now))
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn skips_dropped_and_expired_calls() {
        let now = Instant::now();
        let mut queue = PendingQueue::default();

        let (expired, _rx0) = call(0, now);
        let (abandoned, rx1) = call(1, now + Duration::from_secs(10));
        let (live, _rx2) = call(2, now + Duration::from_secs(10));
        queue.push(expired);
        queue.push(abandoned);
        queue.push(live);
        drop(rx1);

        assert_eq!(queue.claim_oldest(now).unwrap().id, 2);
        assert!(queue.claim_oldest(now).is_none());
    }

    #[test]
    fn remove_by_id() {
        let now = Instant::now();
        let mut queue = PendingQueue::default();
        let (a, _ra) = call(7, now + Duration::from_secs(1));
        queue.push(a);
        assert!(queue.remove(7));
        assert!(!queue.remove(7));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn fail_all_rejects_everyone() {
        let now = Instant::now();
        let mut queue = PendingQueue::default();
        let (a, ra) = call(1, now + Duration::from_secs(1));
        let (b, rb) = call(2, now + Duration::from_secs(1));
        queue.push(a);
        queue.push(b);

        queue.fail_all(|| Error::ConnectionLost);

        assert!(matches!(ra.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(matches!(rb.await.unwrap(), Err(Error::ConnectionLost)));
        assert_eq!(queue.len(), 0);
    }
}
