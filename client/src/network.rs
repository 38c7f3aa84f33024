//! Client WebSocket connection
//!
//! The connection runs on its own OS thread with a current-thread tokio
//! runtime, so the macroquad render loop never blocks on I/O. The two sides
//! talk through unbounded channels: the render loop pushes [`ClientMessage`]s
//! in and polls [`NetworkEvent`]s out once per frame.
//!
//! Both client hops are delayed by a [`LatencyQueue`]; frames are encoded when
//! queued and decoded when released. On shutdown the outgoing queue is flushed
//! early, followed by `leave`, so nothing is dropped with the socket.

use futures_util::{Sink, SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::protocol::{self, decode_server_message};
use shared::{ClientMessage, LatencyQueue, ServerMessage, HEARTBEAT_INTERVAL_MS};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const LATENCY_POLL: Duration = Duration::from_millis(5);

/// What the network thread reports to the render loop
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    Connected,
    Message(ServerMessage),
    Disconnected(String),
}

#[derive(Debug)]
enum NetworkCommand {
    Send(ClientMessage),
    Shutdown,
}

pub struct NetworkHandle {
    commands: mpsc::UnboundedSender<NetworkCommand>,
    events: mpsc::UnboundedReceiver<NetworkEvent>,
    thread: Option<JoinHandle<()>>,
}

impl NetworkHandle {
    /// Starts connecting to `url` in the background
    pub fn spawn(url: &str, latency: Duration) -> io::Result<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let url = url.to_string();

        let thread = thread::Builder::new()
            .name("network".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to start network runtime: {}", e);
                        let _ = event_tx.send(NetworkEvent::Disconnected(e.to_string()));
                        return;
                    }
                };
                runtime.block_on(run_connection(url, latency, command_rx, event_tx));
            })?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            thread: Some(thread),
        })
    }

    /// Queues a message; returns false once the connection is gone
    pub fn send(&self, message: ClientMessage) -> bool {
        self.commands.send(NetworkCommand::Send(message)).is_ok()
    }

    /// Next pending event, never blocking
    pub fn try_recv(&mut self) -> Option<NetworkEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Sends `leave`, closes the socket and waits for the thread to finish
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(NetworkCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Network thread panicked");
            }
        }
    }
}

impl Drop for NetworkHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_connection(
    url: String,
    latency: Duration,
    mut commands: mpsc::UnboundedReceiver<NetworkCommand>,
    events: mpsc::UnboundedSender<NetworkEvent>,
) {
    info!("Connecting to {}", url);
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!("Could not connect to {}: {}", url, e);
            let _ = events.send(NetworkEvent::Disconnected(format!(
                "could not connect to {}",
                url
            )));
            return;
        }
    };
    info!("Connected to {}", url);
    if events.send(NetworkEvent::Connected).is_err() {
        return;
    }

    let (mut sink, mut source) = stream.split();
    let mut outgoing: LatencyQueue<String> = LatencyQueue::new(latency);
    let mut incoming: LatencyQueue<String> = LatencyQueue::new(latency);

    let mut poll_interval = interval(LATENCY_POLL);
    poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut heartbeat_interval = interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(NetworkCommand::Send(message)) => {
                    queue_message(&mut outgoing, &message, Instant::now());
                }
                Some(NetworkCommand::Shutdown) | None => {
                    // Nothing queued was due later than one delay from now
                    let deadline = Instant::now() + latency;
                    if let Err(e) = flush_outgoing(&mut sink, &mut outgoing, deadline).await {
                        warn!("Pending frames lost on shutdown: {}", e);
                    }
                    if let Ok(text) = protocol::encode(&ClientMessage::Leave {}) {
                        let _ = sink.send(Message::Text(text)).await;
                    }
                    let _ = sink.close().await;
                    break "closed by client".to_string();
                }
            },

            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => incoming.push(text, Instant::now()),
                Some(Ok(Message::Close(_))) | None => break "server closed the connection".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("connection error: {}", e),
            },

            _ = heartbeat_interval.tick() => {
                queue_message(&mut outgoing, &ClientMessage::Heartbeat {}, Instant::now());
            },

            _ = poll_interval.tick() => {
                let now = Instant::now();
                if let Err(e) = flush_outgoing(&mut sink, &mut outgoing, now).await {
                    break format!("send failed: {}", e);
                }
                if !deliver_incoming(&mut incoming, &events, now) {
                    // Render loop is gone; nobody is left to tell
                    let _ = sink.close().await;
                    return;
                }
            },
        }
    };

    info!("Connection ended: {}", reason);
    let _ = events.send(NetworkEvent::Disconnected(reason));
}

fn queue_message(queue: &mut LatencyQueue<String>, message: &ClientMessage, now: Instant) {
    match protocol::encode(message) {
        Ok(text) => queue.push(text, now),
        Err(e) => error!("Failed to encode {}: {}", message.kind(), e),
    }
}

async fn flush_outgoing<S>(
    sink: &mut S,
    queue: &mut LatencyQueue<String>,
    now: Instant,
) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    for text in queue.drain(now) {
        sink.send(Message::Text(text)).await?;
    }
    Ok(())
}

/// Decodes released frames and forwards them; false when the receiver is gone
fn deliver_incoming(
    queue: &mut LatencyQueue<String>,
    events: &mpsc::UnboundedSender<NetworkEvent>,
    now: Instant,
) -> bool {
    for text in queue.drain(now) {
        match decode_server_message(&text) {
            Ok(message) => {
                debug!("Received {}", message.kind());
                if events.send(NetworkEvent::Message(message)).is_err() {
                    return false;
                }
            }
            Err(e) => warn!("Dropping bad frame from server: {}", e),
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{decode_client_message, WelcomePayload};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn next_event(handle: &mut NetworkHandle) -> NetworkEvent {
        for _ in 0..500 {
            if let Some(event) = handle.try_recv() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no network event within 5s");
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut handle = NetworkHandle::spawn(&format!("ws://{}", addr), Duration::ZERO).unwrap();
        match next_event(&mut handle).await {
            NetworkEvent::Disconnected(reason) => assert!(reason.contains("could not connect")),
            other => panic!("expected disconnect, got {:?}", other),
        }
    }

    // shutdown() joins the network thread, so the fake server needs its own worker
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_round_trip_with_simulated_latency() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // Skip heartbeats until the join arrives
            let join = loop {
                let frame = ws.next().await.unwrap().unwrap();
                let message = decode_client_message(frame.to_text().unwrap()).unwrap();
                if let ClientMessage::Join(join) = message {
                    break join;
                }
            };
            let welcome = ServerMessage::Welcome(WelcomePayload {
                player_id: 1,
                name: join.name,
                color_index: 0,
            });
            ws.send(Message::Text(protocol::encode(&welcome).unwrap()))
                .await
                .unwrap();

            // The client says goodbye on shutdown
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if decode_client_message(&text).unwrap() == (ClientMessage::Leave {}) {
                            return true;
                        }
                    }
                    Some(Ok(_)) => {}
                    _ => return false,
                }
            }
        });

        let mut handle =
            NetworkHandle::spawn(&format!("ws://{}", addr), Duration::from_millis(50)).unwrap();
        assert_eq!(next_event(&mut handle).await, NetworkEvent::Connected);

        let sent_at = Instant::now();
        assert!(handle.send(ClientMessage::Join(shared::protocol::JoinPayload {
            name: "Ada".to_string(),
        })));

        match next_event(&mut handle).await {
            NetworkEvent::Message(ServerMessage::Welcome(welcome)) => {
                assert_eq!(welcome.name, "Ada");
            }
            other => panic!("expected welcome, got {:?}", other),
        }
        // One delayed hop out and one delayed hop back
        assert!(sent_at.elapsed() >= Duration::from_millis(100));

        handle.shutdown();
        assert!(server.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_flushes_delayed_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut kinds = Vec::new();
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Text(text) = frame {
                    let message = decode_client_message(&text).unwrap();
                    kinds.push(message.kind());
                    if message == (ClientMessage::Leave {}) {
                        break;
                    }
                }
            }
            kinds
        });

        // Far longer than the test waits, so the join is still queued at shutdown
        let mut handle =
            NetworkHandle::spawn(&format!("ws://{}", addr), Duration::from_secs(30)).unwrap();
        assert_eq!(next_event(&mut handle).await, NetworkEvent::Connected);
        assert!(handle.send(ClientMessage::Join(shared::protocol::JoinPayload {
            name: "Ada".to_string(),
        })));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        let kinds = server.await.unwrap();
        assert!(kinds.contains(&"join"), "received {:?}", kinds);
        assert_eq!(kinds.last(), Some(&"leave"));
    }
}
