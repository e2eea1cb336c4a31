//! Bounded FIFO of pending publishes held across reconnection (spec
//! §4.12).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BufferError {
    #[error("message buffer is full (capacity {0})")]
    Full(usize),
    #[error("buffered entry expired after {0:?}")]
    Expired(Duration),
    #[error("buffer cleared: {0}")]
    Cleared(String),
}

pub struct BufferEntry {
    pub payload: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub inserted_at: Instant,
    resolver: oneshot::Sender<Result<(), BufferError>>,
}

/// A flushed entry, ready for the owner to republish.
pub struct FlushedEntry {
    pub payload: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    resolver: oneshot::Sender<Result<(), BufferError>>,
}

impl FlushedEntry {
    pub fn resolve(self) {
        let _ = self.resolver.send(Ok(()));
    }

    pub fn reject(self, err: BufferError) {
        let _ = self.resolver.send(Err(err));
    }
}

pub struct MessageBuffer {
    capacity: usize,
    ttl: Duration,
    queue: Mutex<VecDeque<BufferEntry>>,
}

impl MessageBuffer {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { capacity, ttl, queue: Mutex::new(VecDeque::new()) }
    }

    /// Enqueues a pending publish. The returned receiver resolves once
    /// the owner flushes and successfully republishes the entry, or
    /// rejects if it expires, the buffer is cleared, or it could not be
    /// enqueued because the buffer is full.
    pub fn add(&self, payload: Vec<u8>, exchange: String, routing_key: String) -> oneshot::Receiver<Result<(), BufferError>> {
        let (tx, rx) = oneshot::channel();
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            let _ = tx.send(Err(BufferError::Full(self.capacity)));
            return rx;
        }
        queue.push_back(BufferEntry {
            payload,
            exchange,
            routing_key,
            inserted_at: Instant::now(),
            resolver: tx,
        });
        rx
    }

    /// Drains the buffer for the owner to republish on reconnection.
    /// Entries older than the configured TTL are rejected here rather
    /// than handed back (spec §4.12).
    pub fn flush(&self) -> Vec<FlushedEntry> {
        let mut queue = self.queue.lock().unwrap();
        let drained: Vec<_> = queue.drain(..).collect();
        drop(queue);

        let mut flushed = Vec::with_capacity(drained.len());
        for entry in drained {
            let age = entry.inserted_at.elapsed();
            if age > self.ttl {
                let _ = entry.resolver.send(Err(BufferError::Expired(age)));
                continue;
            }
            flushed.push(FlushedEntry {
                payload: entry.payload,
                exchange: entry.exchange,
                routing_key: entry.routing_key,
                resolver: entry.resolver,
            });
        }
        flushed
    }

    /// Rejects all outstanding entries with `reason` and empties the buffer.
    pub fn clear(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut queue = self.queue.lock().unwrap();
        for entry in queue.drain(..) {
            let _ = entry.resolver.send(Err(BufferError::Cleared(reason.clone())));
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nth_plus_one_add_is_rejected_when_full() {
        let buffer = MessageBuffer::new(2, Duration::from_secs(60));
        let rx1 = buffer.add(b"a".to_vec(), "ex".into(), "rk".into());
        let rx2 = buffer.add(b"b".to_vec(), "ex".into(), "rk".into());
        let rx3 = buffer.add(b"c".to_vec(), "ex".into(), "rk".into());

        assert!(matches!(rx3.await.unwrap(), Err(BufferError::Full(2))));

        // the first two are still pending (not yet flushed/resolved).
        drop(rx1);
        drop(rx2);
    }

    #[tokio::test]
    async fn flush_returns_entries_in_fifo_order() {
        let buffer = MessageBuffer::new(10, Duration::from_secs(60));
        buffer.add(b"a".to_vec(), "ex".into(), "rk1".into());
        buffer.add(b"b".to_vec(), "ex".into(), "rk2".into());

        let flushed = buffer.flush();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].routing_key, "rk1");
        assert_eq!(flushed[1].routing_key, "rk2");
        for entry in flushed {
            entry.resolve();
        }
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn clear_rejects_all_outstanding_entries() {
        let buffer = MessageBuffer::new(10, Duration::from_secs(60));
        let rx = buffer.add(b"a".to_vec(), "ex".into(), "rk".into());
        buffer.clear("connection closing");
        match rx.await.unwrap() {
            Err(BufferError::Cleared(reason)) => assert_eq!(reason, "connection closing"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_entries_are_rejected_on_flush() {
        let buffer = MessageBuffer::new(10, Duration::from_millis(1));
        let rx = buffer.add(b"a".to_vec(), "ex".into(), "rk".into());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let flushed = buffer.flush();
        assert!(flushed.is_empty());
        assert!(matches!(rx.await.unwrap(), Err(BufferError::Expired(_))));
    }
}
