//! Connection table and broadcast fan-out

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

/// Outbound queue depth per connection
pub const OUTBOUND_BUFFER: usize = 256;

/// Sending half of one client connection
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<ServerMsg>,
    closer: Arc<Notify>,
}

/// Peer is gone
#[derive(Debug, thiserror::Error)]
#[error("Connection {0} is closed")]
pub struct SendFailure(pub Uuid);

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<ServerMsg>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            closer: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Notified when the handler owning this connection should stop
    pub fn closer(&self) -> Arc<Notify> {
        self.closer.clone()
    }

    /// Queue a message without waiting. A full queue drops the message for
    /// this recipient only; a closed queue is a failure.
    pub fn send(&self, msg: ServerMsg) -> Result<(), SendFailure> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn_id = %self.id, "Outbound queue full, dropping message");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendFailure(self.id)),
        }
    }

    /// Ask the connection's handler loop to stop
    pub fn close(&self) {
        self.closer.notify_one();
    }
}

/// Removal waiting out the grace period
struct PendingRemoval {
    conn_id: Uuid,
    timer: JoinHandle<()>,
}

/// Live connections keyed by participant id, plus pending grace removals
#[derive(Default)]
pub struct ConnectionTable {
    connections: DashMap<String, ConnectionHandle>,
    pending: DashMap<String, PendingRemoval>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.connections.contains_key(player_id)
    }

    /// True if `conn_id` is the live connection for `player_id`
    pub fn is_current(&self, player_id: &str, conn_id: Uuid) -> bool {
        self.connections
            .get(player_id)
            .is_some_and(|handle| handle.id == conn_id)
    }

    /// Install a connection, returning the one it replaced
    pub fn register(&self, player_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(player_id.to_string(), handle)
    }

    /// Remove the connection only if it is still `conn_id`
    pub fn remove_if_current(&self, player_id: &str, conn_id: Uuid) -> Option<ConnectionHandle> {
        self.connections
            .remove_if(player_id, |_, handle| handle.id == conn_id)
            .map(|(_, handle)| handle)
    }

    /// Send to everyone except `exclude`. Every recipient is attempted;
    /// the ones whose peer is gone are returned.
    pub fn broadcast(&self, msg: &ServerMsg, exclude: Option<&str>) -> Vec<(String, Uuid)> {
        let mut failed = Vec::new();

        for entry in self.connections.iter() {
            if exclude == Some(entry.key().as_str()) {
                continue;
            }
            if let Err(SendFailure(conn_id)) = entry.value().send(msg.clone()) {
                debug!(player_id = %entry.key(), conn_id = %conn_id, "Broadcast send failed");
                failed.push((entry.key().clone(), conn_id));
            }
        }

        failed
    }

    /// Track a grace timer for `player_id`, aborting any older one
    pub fn schedule_removal(&self, player_id: &str, conn_id: Uuid, timer: JoinHandle<()>) {
        if let Some(old) = self
            .pending
            .insert(player_id.to_string(), PendingRemoval { conn_id, timer })
        {
            old.timer.abort();
        }
    }

    /// Cancel a pending removal. Returns true if one was pending.
    pub fn cancel_removal(&self, player_id: &str) -> bool {
        match self.pending.remove(player_id) {
            Some((_, pending)) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Claim an expired removal. False if it was cancelled or superseded.
    pub fn take_expired(&self, player_id: &str, conn_id: Uuid) -> bool {
        self.pending
            .remove_if(player_id, |_, pending| pending.conn_id == conn_id)
            .is_some()
    }

    /// Close and forget every connection and timer
    pub fn shutdown(&self) {
        for entry in self.pending.iter() {
            entry.value().timer.abort();
        }
        self.pending.clear();
        for entry in self.connections.iter() {
            entry.value().close();
        }
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (ConnectionHandle, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        (ConnectionHandle::new(tx), rx)
    }

    fn joined(id: &str) -> ServerMsg {
        ServerMsg::PlayerJoined {
            player_id: id.to_string(),
        }
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let table = ConnectionTable::new();
        let (a, mut rx_a) = connection();
        let (b, mut rx_b) = connection();
        table.register("a", a);
        table.register("b", b);

        let failed = table.broadcast(&joined("a"), Some("a"));

        assert!(failed.is_empty());
        assert_eq!(rx_b.try_recv().unwrap(), joined("a"));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_survives_dead_peer() {
        let table = ConnectionTable::new();
        let (a, rx_a) = connection();
        let (b, mut rx_b) = connection();
        let a_id = a.id();
        table.register("a", a);
        table.register("b", b);
        drop(rx_a);

        let failed = table.broadcast(&joined("c"), None);

        assert_eq!(failed, vec![("a".to_string(), a_id)]);
        assert_eq!(rx_b.try_recv().unwrap(), joined("c"));
    }

    #[test]
    fn test_remove_only_current_connection() {
        let table = ConnectionTable::new();
        let (old, _rx_old) = connection();
        let (new, _rx_new) = connection();
        let old_id = old.id();
        let new_id = new.id();

        table.register("p1", old);
        let replaced = table.register("p1", new).unwrap();
        assert_eq!(replaced.id(), old_id);

        assert!(table.remove_if_current("p1", old_id).is_none());
        assert!(table.contains("p1"));
        assert!(table.remove_if_current("p1", new_id).is_some());
        assert!(!table.contains("p1"));
    }

    #[tokio::test]
    async fn test_take_expired_ignores_superseded_timer() {
        let table = ConnectionTable::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        table.schedule_removal("p1", first, tokio::spawn(async {}));
        table.schedule_removal("p1", second, tokio::spawn(async {}));

        assert!(!table.take_expired("p1", first));
        assert!(table.take_expired("p1", second));
        assert!(!table.take_expired("p1", second));
        assert!(!table.cancel_removal("p1"));
    }
}
