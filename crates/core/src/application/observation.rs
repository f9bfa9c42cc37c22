// Observation Queue
// Single-producer/single-consumer FIFO of pending output actions, fed
// by an adapter's asynchronous read path and drained by `observe`.
// This queue is the only shared mutable structure between the control
// thread and a bridge's output reader.

use tokio::sync::mpsc;

use crate::domain::ActionIndex;

/// Default per-adapter queue bound.
pub const OBSERVATION_QUEUE_CAPACITY: usize = 256;

/// A queued output observation with its logical sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationEntry {
    pub index: ActionIndex,
    pub seq: u64,
}

/// Producer half. Held by the async output reader (or event matcher);
/// assigns logical sequence numbers in push order.
pub struct ObservationSender {
    tx: mpsc::Sender<ObservationEntry>,
    next_seq: u64,
}

impl ObservationSender {
    /// Queue an observed output action. Parks if the consumer is more
    /// than the queue bound behind.
    ///
    /// Returns `false` if the consumer half has been dropped (teardown
    /// in progress); the producer should then wind down.
    pub async fn push(&mut self, index: ActionIndex) -> bool {
        let entry = ObservationEntry {
            index,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.tx.send(entry).await.is_ok()
    }
}

/// Consumer half, drained by `Adapter::observe`.
pub struct ObservationQueue {
    rx: mpsc::Receiver<ObservationEntry>,
}

impl ObservationQueue {
    /// Pop the oldest queued observation.
    ///
    /// With `block = true`, suspends until an entry arrives or the
    /// producer half is dropped (then `None`). With `block = false`,
    /// returns immediately.
    pub async fn pop(&mut self, block: bool) -> Option<ObservationEntry> {
        if block {
            self.rx.recv().await
        } else {
            self.rx.try_recv().ok()
        }
    }
}

/// Create a bounded observation queue pair.
pub fn observation_queue(capacity: usize) -> (ObservationSender, ObservationQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        ObservationSender { tx, next_seq: 0 },
        ObservationQueue { rx },
    )
}
