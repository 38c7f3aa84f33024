//! Connection roster for the session layer
//!
//! Tracks every accepted WebSocket connection from accept to close:
//! - Connection lifecycle (connecting, seated in a match, disconnected)
//! - Liveness via the time of the last frame received
//! - Display names chosen at join time
//!
//! A connection id doubles as the player id once the connection joins, so the
//! roster and the game state never need a separate mapping.

use log::info;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted but not yet joined
    Connecting,
    Lobby,
    Countdown,
    Playing,
    /// Closed, left or timed out; removed on the next session update
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: u32,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    /// Display name, set once the connection has joined
    pub name: Option<String>,
    /// Last time any frame arrived from this connection
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(id: u32, addr: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            addr,
            state: ConnectionState::Connecting,
            name: None,
            last_seen: now,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    /// Seated in the current match (or waiting in its lobby)
    pub fn is_joined(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Lobby | ConnectionState::Countdown | ConnectionState::Playing
        )
    }
}

#[derive(Debug)]
pub struct ClientManager {
    connections: BTreeMap<u32, Connection>,
    next_connection_id: u32,
    max_connections: usize,
}

impl ClientManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_connection_id: 1,
            max_connections,
        }
    }

    /// Registers a freshly accepted connection
    ///
    /// Returns `None` when the roster is at capacity.
    pub fn add_connection(&mut self, addr: SocketAddr, now: Instant) -> Option<u32> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let id = self.next_connection_id;
        self.next_connection_id += 1;

        info!("Connection {} accepted from {}", id, addr);
        self.connections.insert(id, Connection::new(id, addr, now));
        Some(id)
    }

    pub fn get(&self, id: u32) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Refreshes liveness; returns false for unknown or closed connections
    pub fn touch(&mut self, id: u32, now: Instant) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) if conn.state != ConnectionState::Disconnected => {
                conn.touch(now);
                true
            }
            _ => false,
        }
    }

    pub fn seat(&mut self, id: u32, name: &str, state: ConnectionState) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.name = Some(name.to_string());
            conn.state = state;
        }
    }

    /// Moves every joined connection to `state`
    pub fn set_joined_state(&mut self, state: ConnectionState) {
        for conn in self.connections.values_mut() {
            if conn.is_joined() {
                conn.state = state;
            }
        }
    }

    pub fn mark_disconnected(&mut self, id: u32) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) if conn.state != ConnectionState::Disconnected => {
                conn.state = ConnectionState::Disconnected;
                info!("Connection {} disconnected", id);
                true
            }
            _ => false,
        }
    }

    pub fn remove_connection(&mut self, id: u32) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Drops every disconnected connection and returns their ids
    pub fn remove_disconnected(&mut self) -> Vec<u32> {
        let gone: Vec<u32> = self
            .connections
            .values()
            .filter(|c| c.state == ConnectionState::Disconnected)
            .map(|c| c.id)
            .collect();
        for id in &gone {
            self.connections.remove(id);
        }
        gone
    }

    /// Marks connections silent for longer than `timeout` as disconnected
    ///
    /// Returns the ids that timed out on this check.
    pub fn check_timeouts(&mut self, timeout: Duration, now: Instant) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .connections
            .values()
            .filter(|c| c.state != ConnectionState::Disconnected && c.is_timed_out(timeout, now))
            .map(|c| c.id)
            .collect();

        for id in &timed_out {
            info!("Connection {} timed out", id);
            self.mark_disconnected(*id);
        }
        timed_out
    }

    /// Joined connections in ascending id order
    pub fn joined(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(|c| c.is_joined())
    }

    pub fn joined_ids(&self) -> Vec<u32> {
        self.joined().map(|c| c.id).collect()
    }

    pub fn joined_count(&self) -> usize {
        self.joined().count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
