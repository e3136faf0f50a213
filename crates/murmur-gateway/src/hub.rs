use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// The hub's view of one live connection: its outbound queue and the token
/// that tears it down.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    outbound: mpsc::Sender<Utf8Bytes>,
    closer: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(id: Uuid, outbound: mpsc::Sender<Utf8Bytes>, closer: CancellationToken) -> Self {
        Self { id, outbound, closer }
    }
}

#[derive(Debug, Error)]
#[error("gateway hub is not running")]
pub struct HubClosed;

struct Registration {
    handle: ConnectionHandle,
    ack: oneshot::Sender<()>,
}

/// Handle to the hub worker. The worker alone owns the connection set; every
/// other task talks to it over the three channels held here.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<Uuid>,
    broadcast_tx: mpsc::Sender<Utf8Bytes>,
}

impl Hub {
    /// Spawn the worker. It stops once every `Hub` clone is dropped.
    pub fn spawn(capacity: usize) -> Self {
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);

        let worker = HubWorker {
            connections: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        tokio::spawn(worker.run());

        Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
        }
    }

    /// Add a connection. Returns once the worker has inserted it, so any
    /// broadcast sent afterwards reaches this connection.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubClosed> {
        let (ack, acked) = oneshot::channel();
        self.register_tx
            .send(Registration { handle, ack })
            .await
            .map_err(|_| HubClosed)?;
        acked.await.map_err(|_| HubClosed)
    }

    /// Remove and close a connection. Unknown ids are ignored.
    pub async fn unregister(&self, id: Uuid) {
        let _ = self.unregister_tx.send(id).await;
    }

    /// Fan a text frame out to every registered connection.
    pub async fn broadcast(&self, frame: Utf8Bytes) {
        let _ = self.broadcast_tx.send(frame).await;
    }
}

struct HubWorker {
    connections: HashMap<Uuid, ConnectionHandle>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<Uuid>,
    broadcast_rx: mpsc::Receiver<Utf8Bytes>,
}

impl HubWorker {
    async fn run(mut self) {
        info!("Gateway hub started");

        loop {
            tokio::select! {
                biased;

                Some(registration) = self.register_rx.recv() => self.register(registration),
                Some(id) = self.unregister_rx.recv() => self.unregister(id),
                Some(frame) = self.broadcast_rx.recv() => self.broadcast(frame),
                else => break,
            }
        }

        for (_, conn) in self.connections.drain() {
            conn.closer.cancel();
        }
        info!("Gateway hub stopped");
    }

    fn register(&mut self, Registration { handle, ack }: Registration) {
        debug!("Connection {} registered ({} live)", handle.id, self.connections.len() + 1);
        self.connections.insert(handle.id, handle);
        let _ = ack.send(());
    }

    fn unregister(&mut self, id: Uuid) {
        if let Some(conn) = self.connections.remove(&id) {
            conn.closer.cancel();
            debug!("Connection {} unregistered ({} live)", id, self.connections.len());
        }
    }

    /// Enqueue on every connection without waiting on any socket. A closed or
    /// full queue drops that connection.
    fn broadcast(&mut self, frame: Utf8Bytes) {
        let mut dead = Vec::new();

        for (id, conn) in &self.connections {
            match conn.outbound.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Connection {} outbound queue full, disconnecting", id);
                    dead.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Connection {} writer gone, removing", id);
                    dead.push(*id);
                }
            }
        }

        for id in &dead {
            if let Some(conn) = self.connections.remove(id) {
                conn.closer.cancel();
            }
        }

        trace!(
            "Broadcast {} bytes to {} connections ({} dropped)",
            frame.as_str().len(),
            self.connections.len(),
            dead.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct FakeConnection {
        id: Uuid,
        rx: mpsc::Receiver<Utf8Bytes>,
        closer: CancellationToken,
    }

    async fn connect(hub: &Hub, queue: usize) -> FakeConnection {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(queue);
        let closer = CancellationToken::new();
        hub.register(ConnectionHandle::new(id, tx, closer.clone())).await.unwrap();
        FakeConnection { id, rx, closer }
    }

    async fn closed_within(token: &CancellationToken) -> bool {
        tokio::time::timeout(Duration::from_secs(1), token.cancelled()).await.is_ok()
    }

    #[tokio::test]
    async fn every_live_connection_receives_the_frame_once() {
        let hub = Hub::spawn(16);
        let mut x = connect(&hub, 8).await;
        let mut y = connect(&hub, 8).await;

        hub.broadcast(Utf8Bytes::from("hello")).await;

        assert_eq!(x.rx.recv().await.unwrap().as_str(), "hello");
        assert_eq!(y.rx.recv().await.unwrap().as_str(), "hello");

        // Nothing else queued for either.
        hub.broadcast(Utf8Bytes::from("marker")).await;
        assert_eq!(x.rx.recv().await.unwrap().as_str(), "marker");
        assert_eq!(y.rx.recv().await.unwrap().as_str(), "marker");
    }

    #[tokio::test]
    async fn unregister_closes_the_connection() {
        let hub = Hub::spawn(16);
        let mut x = connect(&hub, 8).await;
        let y = connect(&hub, 8).await;

        hub.unregister(y.id).await;
        assert!(closed_within(&y.closer).await);

        hub.broadcast(Utf8Bytes::from("after")).await;
        assert_eq!(x.rx.recv().await.unwrap().as_str(), "after");
        assert!(!x.closer.is_cancelled());
    }

    #[tokio::test]
    async fn dead_writer_is_removed_on_broadcast() {
        let hub = Hub::spawn(16);
        let mut x = connect(&hub, 8).await;
        let FakeConnection { rx, closer, .. } = connect(&hub, 8).await;
        drop(rx);

        hub.broadcast(Utf8Bytes::from("one")).await;
        assert!(closed_within(&closer).await);
        assert_eq!(x.rx.recv().await.unwrap().as_str(), "one");
    }

    #[tokio::test]
    async fn overflowing_queue_disconnects_only_the_slow_peer() {
        let hub = Hub::spawn(16);
        let mut fast = connect(&hub, 8).await;
        let slow = connect(&hub, 1).await;

        hub.broadcast(Utf8Bytes::from("1")).await;
        hub.broadcast(Utf8Bytes::from("2")).await;

        assert!(closed_within(&slow.closer).await);
        assert_eq!(fast.rx.recv().await.unwrap().as_str(), "1");
        assert_eq!(fast.rx.recv().await.unwrap().as_str(), "2");
        assert!(!fast.closer.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_the_worker() {
        let hub = Hub::spawn(16);
        let x = connect(&hub, 8).await;
        drop(hub);
        assert!(closed_within(&x.closer).await);
    }
}
