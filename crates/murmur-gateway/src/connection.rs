use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_types::ObjectId;
use murmur_types::events::OutboundFrame;

use crate::Gateway;
use crate::dispatcher::Session;
use crate::hub::ConnectionHandle;
use crate::state::{ConnectionState, StateTracker};

/// How long the writer gets to flush and send its Close frame once the
/// connection is ending.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Serve one upgraded socket until either side closes it.
///
/// Every text frame is first pushed to the hub for broadcast, then
/// dispatched. Dispatch failures never end the connection; only a read
/// error, a writer failure, or the hub dropping us does.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, user_id: Option<ObjectId>) {
    let conn_id = Uuid::new_v4();
    let mut tracker = StateTracker::new(conn_id);

    let (outbound_tx, outbound_rx) = mpsc::channel::<Utf8Bytes>(gateway.config.outbound_queue);
    let closer = CancellationToken::new();

    let handle = ConnectionHandle::new(conn_id, outbound_tx.clone(), closer.clone());
    if gateway.hub.register(handle).await.is_err() {
        warn!("Gateway hub is not running, dropping connection {}", conn_id);
        return;
    }
    tracker.advance(ConnectionState::Registered);

    match user_id {
        Some(user_id) => info!("Connection {} opened for user {}", conn_id, user_id),
        None => info!("Connection {} opened (anonymous)", conn_id),
    }

    let (sender, mut receiver) = socket.split();
    let send_task = tokio::spawn(write_loop(sender, outbound_rx, closer.clone(), conn_id));

    let session = Session { conn_id, user_id };

    loop {
        tracker.advance(ConnectionState::Reading);
        let Some(text) = next_text_frame(&mut receiver, &closer, conn_id).await else {
            break;
        };

        tracker.advance(ConnectionState::Dispatching);

        // Echo to every live connection, including this one.
        gateway.hub.broadcast(text.clone()).await;

        let reply = match gateway.dispatcher.dispatch(text.as_str(), &session).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Connection {} error processing message: {}", conn_id, e);
                gateway.config.error_frames.then(|| OutboundFrame::error(&e))
            }
        };

        if let Some(reply) = reply {
            if !enqueue(&outbound_tx, &closer, &reply, conn_id).await {
                tracker.advance(ConnectionState::Reading);
                break;
            }
        }
    }

    tracker.advance(ConnectionState::Closing);
    gateway.hub.unregister(conn_id).await;
    closer.cancel();
    stop_writer(send_task, WRITER_GRACE, conn_id).await;
    tracker.advance(ConnectionState::Terminal);

    info!("Connection {} closed", conn_id);
}

/// Wait for the next text payload. Binary frames holding UTF-8 count as
/// text. `None` means the connection is over: peer close, read error, end of
/// stream, or the hub closed us.
async fn next_text_frame(
    receiver: &mut SplitStream<WebSocket>,
    closer: &CancellationToken,
    conn_id: Uuid,
) -> Option<Utf8Bytes> {
    loop {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            _ = closer.cancelled() => {
                debug!("Connection {} closed by hub", conn_id);
                return None;
            }
        };

        match msg {
            Some(Ok(Message::Text(text))) => return Some(text),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => return Some(Utf8Bytes::from(text)),
                Err(_) => {
                    warn!("Connection {} sent a non-UTF-8 binary frame ({} bytes), ignoring", conn_id, data.len());
                }
            },
            Some(Ok(Message::Close(frame))) => {
                debug!("Connection {} peer closed: {:?}", conn_id, frame);
                return None;
            }
            // Ping/Pong are answered by the socket layer.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                info!("Connection {} error reading message: {}", conn_id, e);
                return None;
            }
            None => return None,
        }
    }
}

/// Drain the outbound queue into the socket. A failed write cancels the
/// connection so the reader stops too. On the way out the sink is closed,
/// which sends the Close frame.
async fn write_loop<S>(
    mut sender: S,
    mut outbound_rx: mpsc::Receiver<Utf8Bytes>,
    closer: CancellationToken,
    conn_id: Uuid,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sender.send(Message::Text(frame)).await {
                    warn!("Connection {} error writing message: {}", conn_id, e);
                    break;
                }
            }
            _ = closer.cancelled() => break,
        }
    }

    closer.cancel();
    if let Err(e) = sender.close().await {
        debug!("Connection {} error closing socket: {}", conn_id, e);
    }
}

/// Wait for the writer to finish its close handshake, aborting it if the
/// peer stops reading.
async fn stop_writer(mut send_task: JoinHandle<()>, grace: Duration, conn_id: Uuid) {
    if tokio::time::timeout(grace, &mut send_task).await.is_err() {
        debug!("Connection {} writer did not close in {:?}, aborting", conn_id, grace);
        send_task.abort();
    }
}

/// Queue a reply for this connection only. Returns false once the
/// connection is closing.
async fn enqueue(
    outbound_tx: &mpsc::Sender<Utf8Bytes>,
    closer: &CancellationToken,
    reply: &OutboundFrame,
    conn_id: Uuid,
) -> bool {
    let json = match reply.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("Connection {} {}", conn_id, e);
            return true;
        }
    };

    tokio::select! {
        sent = outbound_tx.send(Utf8Bytes::from(json)) => sent.is_ok(),
        _ = closer.cancelled() => false,
    }
}
