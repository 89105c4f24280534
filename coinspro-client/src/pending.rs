//! Outstanding requests awaiting a reply.

use crate::dispatcher::Envelope;
use crate::error::ClientError;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Result delivered to the caller of a request.
pub type Completion = Result<Envelope, ClientError>;

/// Maps sequence numbers to single-fire completions.
///
/// An entry is removed the moment it fires, so a duplicated reply finds
/// nothing and is discarded.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<u64, oneshot::Sender<Completion>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a completion for `sequence`.
    pub fn register(&self, sequence: u64) -> Result<oneshot::Receiver<Completion>, ClientError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&sequence) {
            return Err(ClientError::DuplicateSequence(sequence));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(sequence, tx);
        Ok(rx)
    }

    /// Fires and removes the completion for `sequence`.
    ///
    /// Returns false when nothing was pending under that sequence.
    pub fn complete(&self, sequence: u64, result: Completion) -> bool {
        let Some(tx) = self.entries.lock().remove(&sequence) else {
            return false;
        };
        if tx.send(result).is_err() {
            tracing::debug!("pending: waiter for sequence={} is gone", sequence);
        }
        true
    }

    /// Removes the entry for `sequence` without firing it.
    pub fn cancel(&self, sequence: u64) -> bool {
        self.entries.lock().remove(&sequence).is_some()
    }

    /// Fails every outstanding completion. Returns how many were failed.
    pub fn fail_all(&self, error: impl Fn() -> ClientError) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error()));
        }
        count
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.entries.lock().contains_key(&sequence)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
