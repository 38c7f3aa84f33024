//! WebSocket transport and the server loop
//!
//! Each accepted socket gets a reader task that forwards text frames to the
//! loop and a writer task that drains an unbounded channel into the socket. The
//! loop itself owns the [`Session`] exclusively and interleaves four sources:
//! transport events, the simulation tick, a short latency poll that releases
//! delayed frames, and a once-per-second heartbeat check.

use crate::session::Session;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const LATENCY_POLL: Duration = Duration::from_millis(5);
const HEARTBEAT_CHECK: Duration = Duration::from_secs(1);

/// Messages sent from connection tasks to the server loop
#[derive(Debug)]
pub enum NetworkEvent {
    Opened {
        addr: SocketAddr,
        stream: WebSocketStream<TcpStream>,
    },
    Frame {
        connection_id: u32,
        text: String,
    },
    Closed {
        connection_id: u32,
    },
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    session: Session,
    writers: HashMap<u32, mpsc::UnboundedSender<Message>>,
    event_tx: mpsc::UnboundedSender<NetworkEvent>,
    event_rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl Server {
    pub async fn bind(addr: &str, session: Session) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Ok(Server {
            listener,
            session,
            writers: HashMap::new(),
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the server loop until the task is cancelled
    pub async fn run(mut self) -> io::Result<()> {
        let config = self.session.config().clone();
        info!(
            "Running at {} Hz with {} ms simulated latency per hop",
            config.tick_rate,
            config.latency.as_millis()
        );

        let mut tick_interval = interval(config.tick_duration());
        let mut latency_interval = interval(LATENCY_POLL);
        latency_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat_interval = interval(HEARTBEAT_CHECK);
        heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_handshake(stream, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },

                Some(event) = self.event_rx.recv() => self.handle_event(event),

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    self.session.update(now);
                    self.session.tick(now);
                    self.flush(now);

                    let tick = self.session.game().tick_count();
                    if tick > 0 && tick % (config.tick_rate as u64 * 10) == 0 {
                        debug!(
                            "Tick {}: {} connections, phase {:?}",
                            tick,
                            self.writers.len(),
                            self.session.phase()
                        );
                    }
                },

                _ = latency_interval.tick() => {
                    let now = Instant::now();
                    self.session.update(now);
                    self.flush(now);
                },

                _ = heartbeat_interval.tick() => {
                    let now = Instant::now();
                    for id in self.session.check_heartbeats(now) {
                        warn!("Connection {} missed its heartbeat", id);
                    }
                    self.flush(now);
                },
            }
        }
    }

    fn spawn_handshake(&self, stream: TcpStream, addr: SocketAddr) {
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match accept_async(stream).await {
                Ok(stream) => {
                    if event_tx.send(NetworkEvent::Opened { addr, stream }).is_err() {
                        error!("Server loop gone; dropping connection from {}", addr);
                    }
                }
                Err(e) => warn!("WebSocket handshake with {} failed: {}", addr, e),
            }
        });
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Opened { addr, stream } => {
                match self.session.handle_connect(addr, Instant::now()) {
                    Some(connection_id) => self.spawn_connection(connection_id, stream),
                    // Dropping the stream closes the socket
                    None => drop(stream),
                }
            }
            NetworkEvent::Frame {
                connection_id,
                text,
            } => self.session.receive_frame(connection_id, text, Instant::now()),
            NetworkEvent::Closed { connection_id } => {
                info!("Connection {} closed", connection_id);
                self.writers.remove(&connection_id);
                self.session.handle_disconnect(connection_id);
            }
        }
    }

    fn spawn_connection(&mut self, connection_id: u32, stream: WebSocketStream<TcpStream>) {
        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        self.writers.insert(connection_id, out_tx);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!("Write to connection {} failed: {}", connection_id, e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let event = NetworkEvent::Frame {
                            connection_id,
                            text,
                        };
                        if event_tx.send(event).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Read from connection {} failed: {}", connection_id, e);
                        break;
                    }
                }
            }
            let _ = event_tx.send(NetworkEvent::Closed { connection_id });
        });
    }

    /// Hands released frames to writer tasks and closes finished connections
    fn flush(&mut self, now: Instant) {
        for outbound in self.session.drain_outgoing(now) {
            if let Some(writer) = self.writers.get(&outbound.connection_id) {
                if writer.send(Message::Text(outbound.text)).is_err() {
                    debug!("Writer for {} already closed", outbound.connection_id);
                }
            }
        }

        for connection_id in self.session.take_closed() {
            // Dropping the sender ends the writer task, which closes the socket
            self.writers.remove(&connection_id);
        }
    }
}
