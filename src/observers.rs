// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Registry of live push-channel observers and packet fan-out.

use crate::packet::Packet;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Thread-safe set of connected observers.
///
/// One instance is constructed at startup and shared by handle across all
/// request-handling tasks. Each observer is an unbounded queue of outgoing
/// frames; the serve loop in `ws` drains it into the socket. Broadcast never
/// blocks on an observer: a send either enqueues immediately or fails because
/// the observer's receiving side is gone, in which case the observer is
/// removed on the spot.
pub struct ObserverRegistry {
    observers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Message>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
        }
    }

    /// Add a new observer, returning its id and the receiving end of its
    /// outgoing queue.
    pub fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        match self.observers.lock() {
            Ok(mut observers) => {
                observers.insert(id, tx);
            }
            Err(_) => {
                tracing::warn!("observer registry lock poisoned during register");
            }
        }
        (id, rx)
    }

    /// Remove an observer. Safe to call for an id that is already gone.
    pub fn unregister(&self, id: Uuid) {
        match self.observers.lock() {
            Ok(mut observers) => {
                observers.remove(&id);
            }
            Err(_) => {
                tracing::warn!("observer registry lock poisoned during unregister");
            }
        }
    }

    /// Number of currently registered observers.
    pub fn count(&self) -> usize {
        match self.observers.lock() {
            Ok(observers) => observers.len(),
            Err(_) => {
                tracing::warn!("observer registry lock poisoned during count");
                0
            }
        }
    }

    /// Serialize `packet` once and push it to every registered observer.
    ///
    /// Observers whose channel is closed are removed; a failure for one
    /// observer never prevents delivery to the others. Returns the number of
    /// observers the packet was enqueued for.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        let json = match serde_json::to_string(packet) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize packet for broadcast");
                return 0;
            }
        };

        match self.observers.lock() {
            Ok(mut observers) => {
                let mut delivered = 0;
                observers.retain(|id, tx| {
                    match tx.send(Message::Text(json.clone())) {
                        Ok(()) => {
                            delivered += 1;
                            true
                        }
                        Err(_) => {
                            tracing::debug!(observer = %id, "dropping closed observer");
                            false
                        }
                    }
                });
                delivered
            }
            Err(_) => {
                tracing::warn!("observer registry lock poisoned during broadcast");
                0
            }
        }
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
