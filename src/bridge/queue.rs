//! Bounded work queue between the broker event loop and the delivery workers
//!
//! The producer side never waits unless the `block` policy is configured, so a slow
//! endpoint cannot stall keepalive handling on the connector task.

use crate::config::QueueFullPolicy;
use crate::protocol::InboundMessage;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// Result of offering a message to the queue
#[derive(Debug, PartialEq)]
pub enum PushOutcome {
    Enqueued,
    /// Queue was full; the oldest queued message was evicted to make room
    DroppedOldest(InboundMessage),
    /// Queue was full; the offered message was discarded
    DroppedNewest(InboundMessage),
    /// Queue is closed; the offered message was discarded
    Closed(InboundMessage),
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<InboundMessage>,
    closed: bool,
}

/// Bounded FIFO with a configurable full-queue policy
#[derive(Debug)]
pub struct MessageQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    policy: QueueFullPolicy,
    items_available: Notify,
    space_available: Notify,
}

impl MessageQueue {
    pub fn new(capacity: usize, policy: QueueFullPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity: capacity.max(1),
            policy,
            items_available: Notify::new(),
            space_available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Critical sections never panic midway, so a poisoned lock still holds consistent data
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Offer a message; only waits when the policy is `block` and the queue is full
    pub async fn push(&self, message: InboundMessage) -> PushOutcome {
        loop {
            let space = self.space_available.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return PushOutcome::Closed(message);
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(message);
                    drop(state);
                    self.items_available.notify_one();
                    return PushOutcome::Enqueued;
                }
                match self.policy {
                    QueueFullPolicy::DropOldest => {
                        let evicted = state.items.pop_front();
                        state.items.push_back(message);
                        drop(state);
                        self.items_available.notify_one();
                        return match evicted {
                            Some(evicted) => PushOutcome::DroppedOldest(evicted),
                            None => PushOutcome::Enqueued,
                        };
                    }
                    QueueFullPolicy::DropNewest => return PushOutcome::DroppedNewest(message),
                    QueueFullPolicy::Block => {}
                }
            }

            space.await;
        }
    }

    /// Take the next message, waiting while the queue is empty
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<InboundMessage> {
        loop {
            let available = self.items_available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(message) = state.items.pop_front() {
                    drop(state);
                    self.space_available.notify_one();
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
            }

            available.await;
        }
    }

    /// Stop accepting messages and wake every waiter
    pub fn close(&self) {
        self.lock().closed = true;
        self.items_available.notify_waiters();
        self.space_available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> QueueFullPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn message(sequence: u64) -> InboundMessage {
        InboundMessage::new("test/topic", format!("{{\"n\":{sequence}}}"), 0).with_sequence(sequence)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MessageQueue::new(4, QueueFullPolicy::DropOldest);
        for n in 1..=3 {
            assert_eq!(queue.push(message(n)).await, PushOutcome::Enqueued);
        }
        assert_eq!(queue.len(), 3);

        for n in 1..=3 {
            assert_eq!(queue.pop().await.unwrap().sequence, n);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drop_oldest_policy() {
        let queue = MessageQueue::new(2, QueueFullPolicy::DropOldest);
        queue.push(message(1)).await;
        queue.push(message(2)).await;

        match queue.push(message(3)).await {
            PushOutcome::DroppedOldest(evicted) => assert_eq!(evicted.sequence, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(queue.pop().await.unwrap().sequence, 2);
        assert_eq!(queue.pop().await.unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn test_drop_newest_policy() {
        let queue = MessageQueue::new(1, QueueFullPolicy::DropNewest);
        queue.push(message(1)).await;

        match queue.push(message(2)).await {
            PushOutcome::DroppedNewest(rejected) => assert_eq!(rejected.sequence, 2),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(queue.pop().await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_space() {
        let queue = Arc::new(MessageQueue::new(1, QueueFullPolicy::Block));
        queue.push(message(1)).await;

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(message(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "push should wait while the queue is full");

        assert_eq!(queue.pop().await.unwrap().sequence, 1);
        let outcome = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, PushOutcome::Enqueued);
        assert_eq!(queue.pop().await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(MessageQueue::new(4, QueueFullPolicy::DropOldest));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(message(5)).await;

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.unwrap().sequence, 5);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = Arc::new(MessageQueue::new(4, QueueFullPolicy::DropOldest));
        queue.push(message(1)).await;
        queue.close();

        assert!(matches!(queue.push(message(2)).await, PushOutcome::Closed(_)));
        assert_eq!(queue.pop().await.unwrap().sequence, 1);
        assert!(queue.pop().await.is_none());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_idle_consumer() {
        let queue = Arc::new(MessageQueue::new(4, QueueFullPolicy::DropOldest));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}
