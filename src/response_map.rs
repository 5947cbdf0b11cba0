//! Per-connection registry of in-flight requests.
//!
//! Maps each outbound request id to the one-shot slot awaiting its
//! response. Completion is at-most-once: resolving a slot removes it
//! atomically, and once the map shuts down every slot (present or
//! future) resolves with the connection-shut-down error.
//!
//! The slot map and the terminal flag live under one mutex, so shutdown
//! is atomic with respect to concurrent adds and completions. The lock
//! is never held across a suspension point; senders fire outside it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{EpoxyError, Result};
use crate::message::{ErrorData, Message};

/// Read handle for a pending exchange.
///
/// Resolves exactly once with the response [`Message`] (or the
/// connection-shut-down error). Callers wanting a timeout compose one
/// around [`response`](ResponseHandle::response).
#[derive(Debug)]
pub struct ResponseHandle {
    rx: oneshot::Receiver<Message>,
}

impl ResponseHandle {
    fn new(rx: oneshot::Receiver<Message>) -> Self {
        Self { rx }
    }

    /// Await the response.
    ///
    /// # Errors
    ///
    /// Fails with `ConnectionClosed` if the slot was dropped without
    /// resolving, which only happens when the owning map is dropped
    /// mid-flight.
    pub async fn response(self) -> Result<Message> {
        self.rx.await.map_err(|_| EpoxyError::ConnectionClosed)
    }
}

struct Slots {
    pending: HashMap<u64, oneshot::Sender<Message>>,
    shut_down: bool,
}

/// Registry correlating request ids with pending response slots.
pub struct ResponseMap {
    slots: Mutex<Slots>,
}

impl ResponseMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                pending: HashMap::new(),
                shut_down: false,
            }),
        }
    }

    /// Register a pending exchange and return its read handle.
    ///
    /// After [`shutdown`](Self::shutdown), the returned handle is
    /// already resolved with the connection-shut-down error and nothing
    /// is inserted.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` if `id` is already registered.
    pub fn add(&self, id: u64) -> Result<ResponseHandle> {
        let (tx, rx) = oneshot::channel();
        {
            let mut slots = self.slots.lock();
            if slots.shut_down {
                drop(slots);
                let _ = tx.send(Message::from_error(ErrorData::connection_shut_down()));
                return Ok(ResponseHandle::new(rx));
            }
            if slots.pending.contains_key(&id) {
                return Err(EpoxyError::InvalidOperation(format!(
                    "duplicate request id {id}"
                )));
            }
            slots.pending.insert(id, tx);
        }
        Ok(ResponseHandle::new(rx))
    }

    /// Resolve the slot for `id` with `msg` and remove it.
    ///
    /// Returns true if a slot was resolved with `msg`. Late or unknown
    /// ids return false. After shutdown, a still-present slot resolves
    /// with the connection-shut-down error instead of `msg` and the
    /// call returns false.
    pub fn complete(&self, id: u64, msg: Message) -> bool {
        let (sender, shut_down) = {
            let mut slots = self.slots.lock();
            (slots.pending.remove(&id), slots.shut_down)
        };

        match sender {
            Some(tx) if shut_down => {
                let _ = tx.send(Message::from_error(ErrorData::connection_shut_down()));
                false
            }
            Some(tx) => {
                let _ = tx.send(msg);
                true
            }
            None => false,
        }
    }

    /// Mark the map terminal and resolve every outstanding slot with
    /// the connection-shut-down error. Idempotent.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut slots = self.slots.lock();
            slots.shut_down = true;
            slots.pending.drain().collect()
        };

        for (_, tx) in drained {
            let _ = tx.send(Message::from_error(ErrorData::connection_shut_down()));
        }
    }

    /// Number of exchanges currently awaiting a response.
    pub fn outstanding_count(&self) -> usize {
        self.slots.lock().pending.len()
    }

    /// Whether the map has shut down.
    pub fn is_shut_down(&self) -> bool {
        self.slots.lock().shut_down
    }
}

impl Default for ResponseMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::error_code;
    use bytes::Bytes;

    fn payload(bytes: &'static [u8]) -> Message {
        Message::from_payload(Bytes::from_static(bytes))
    }

    #[tokio::test]
    async fn test_add_complete_read() {
        let map = ResponseMap::new();

        let handle = map.add(1).unwrap();
        assert_eq!(map.outstanding_count(), 1);

        assert!(map.complete(1, payload(b"ok")));
        assert_eq!(map.outstanding_count(), 0);

        let msg = handle.response().await.unwrap();
        assert_eq!(msg, payload(b"ok"));
    }

    #[tokio::test]
    async fn test_second_complete_returns_false() {
        let map = ResponseMap::new();
        let handle = map.add(1).unwrap();

        assert!(map.complete(1, payload(b"first")));
        assert!(!map.complete(1, payload(b"second")));

        assert_eq!(handle.response().await.unwrap(), payload(b"first"));
    }

    #[test]
    fn test_duplicate_add_fails() {
        let map = ResponseMap::new();
        let _handle = map.add(1).unwrap();

        assert!(matches!(map.add(1), Err(EpoxyError::InvalidOperation(_))));
        assert_eq!(map.outstanding_count(), 1);
    }

    #[test]
    fn test_unknown_id_complete_returns_false() {
        let map = ResponseMap::new();
        assert!(!map.complete(99, payload(b"late")));
    }

    #[tokio::test]
    async fn test_shutdown_resolves_outstanding_with_shut_down_error() {
        let map = ResponseMap::new();
        let h1 = map.add(1).unwrap();
        let h2 = map.add(2).unwrap();
        assert_eq!(map.outstanding_count(), 2);

        map.shutdown();
        assert_eq!(map.outstanding_count(), 0);

        for handle in [h1, h2] {
            let msg = handle.response().await.unwrap();
            assert_eq!(
                msg.error().unwrap().error_code,
                error_code::CONNECTION_SHUT_DOWN
            );
        }
    }

    #[tokio::test]
    async fn test_complete_after_shutdown_wins_shut_down_error() {
        let map = ResponseMap::new();
        let handle = map.add(1).unwrap();

        map.shutdown();
        assert!(!map.complete(1, payload(b"too late")));
        assert_eq!(map.outstanding_count(), 0);

        let msg = handle.response().await.unwrap();
        assert_eq!(
            msg.error().unwrap().error_code,
            error_code::CONNECTION_SHUT_DOWN
        );
    }

    #[tokio::test]
    async fn test_add_after_shutdown_is_pre_resolved() {
        let map = ResponseMap::new();
        map.shutdown();

        let handle = map.add(5).unwrap();
        assert_eq!(map.outstanding_count(), 0);

        let msg = handle.response().await.unwrap();
        assert_eq!(
            msg.error().unwrap().error_code,
            error_code::CONNECTION_SHUT_DOWN
        );
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let map = ResponseMap::new();
        let _handle = map.add(1).unwrap();
        map.shutdown();
        map.shutdown();
        assert_eq!(map.outstanding_count(), 0);
        assert!(map.is_shut_down());
    }

    #[tokio::test]
    async fn test_concurrent_adds_and_completes() {
        use std::sync::Arc;

        let map = Arc::new(ResponseMap::new());
        let mut handles = Vec::new();

        for id in 0..64u64 {
            handles.push((id, map.add(id).unwrap()));
        }

        let completer = {
            let map = map.clone();
            tokio::spawn(async move {
                for id in 0..64u64 {
                    assert!(map.complete(id, payload(b"done")));
                }
            })
        };

        for (_, handle) in handles {
            assert_eq!(handle.response().await.unwrap(), payload(b"done"));
        }
        completer.await.unwrap();
        assert_eq!(map.outstanding_count(), 0);
    }
}
