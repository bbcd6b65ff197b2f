//! Cancellable key enumeration.
//!
//! [`stream_keys`] opens the key store and republishes its listing from a
//! producer task; [`reduce`] relays the keys matching a predicate from a
//! second task. Both tasks stop as soon as the caller's token is cancelled,
//! and [`KeyStream::next`] never hands out a key once it has been.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Error;
use crate::keys::{Key, KeyFilter};
use crate::keystore::{KeyStoreError, KeyStoreFactory};

/// Buffer between the key store producer and its consumer.
const PRODUCER_BUFFER: usize = 2;
/// Buffer between a filtering relay and its consumer.
const RELAY_BUFFER: usize = 1;

/// Finite sequence of keys bound to a cancellation token.
pub struct KeyStream {
    receiver: mpsc::Receiver<Key>,
    cancel: CancellationToken,
}

impl KeyStream {
    /// Yields the next key, or `None` once the source is exhausted or the
    /// token has been cancelled. Cancellation is checked first.
    pub async fn next(&mut self) -> Option<Key> {
        if self.cancel.is_cancelled() {
            self.receiver.close();
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.receiver.close();
                None
            }
            key = self.receiver.recv() => {
                // recv may have resolved in the same poll as the cancellation.
                if self.cancel.is_cancelled() {
                    self.receiver.close();
                    return None;
                }
                key
            }
        }
    }
}

/// Opens the key store once and streams every key it holds.
///
/// The store is opened on the blocking pool. Opening failures are returned
/// directly; no producer is spawned in that case.
pub async fn stream_keys(
    cancel: &CancellationToken,
    factory: &KeyStoreFactory,
) -> Result<KeyStream, Error> {
    let open = factory.clone();
    let store = tokio::task::spawn_blocking(move || open())
        .await
        .map_err(|err| KeyStoreError::Unavailable(err.to_string()))??;
    let listing = store.list_keys();
    debug!(keys = listing.len(), "streaming keys from key store");

    let (tx, rx) = mpsc::channel(PRODUCER_BUFFER);
    let token = cancel.clone();
    tokio::spawn(async move {
        for (id, info) in listing {
            let key = Key::from_info(id, &info);
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    trace!("key producer cancelled");
                    break;
                }
                sent = tx.send(key) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });

    Ok(KeyStream {
        receiver: rx,
        cancel: cancel.clone(),
    })
}

/// Relays the keys of `source` that satisfy `filter`.
pub fn reduce(cancel: &CancellationToken, mut source: KeyStream, filter: KeyFilter) -> KeyStream {
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    let token = cancel.clone();
    tokio::spawn(async move {
        loop {
            let key = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                key = source.next() => match key {
                    Some(key) => key,
                    None => break,
                },
            };
            if !filter.matches(&key) {
                continue;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = tx.send(key) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        trace!("key relay finished");
    });

    KeyStream {
        receiver: rx,
        cancel: cancel.clone(),
    }
}

/// Drains `stream` into a vector.
pub async fn collect_keys(mut stream: KeyStream) -> Vec<Key> {
    let mut keys = Vec::new();
    while let Some(key) = stream.next().await {
        keys.push(key);
    }
    keys
}
