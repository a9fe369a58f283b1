//! Live connections and the three delivery primitives: unicast, room-cast and
//! room-cast-except-sender.

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::util::id::ConnId;
use crate::ws::protocol::ServerEvent;

pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug)]
struct Session {
    tx: Outbox,
    /// Room this connection currently sits in.
    room: Option<String>,
}

/// Connection table. Sends never block: each connection drains its own
/// unbounded outbox in a writer task.
#[derive(Default)]
pub struct Sessions {
    conns: DashMap<ConnId, Session>,
}

impl Sessions {
    pub fn new() -> Self {
        Self { conns: DashMap::new() }
    }

    /// Register a connection and hand back the receiving half of its outbox.
    pub fn register(&self, id: ConnId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.conns.insert(id, Session { tx, room: None });
        rx
    }

    /// Forget a connection; returns the room it was in, if any.
    pub fn unregister(&self, id: ConnId) -> Option<String> {
        self.conns.remove(&id).and_then(|(_, s)| s.room)
    }

    pub fn is_connected(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    pub fn room_of(&self, id: ConnId) -> Option<String> {
        self.conns.get(&id).and_then(|s| s.room.clone())
    }

    pub fn set_room(&self, id: ConnId, room: Option<String>) {
        if let Some(mut s) = self.conns.get_mut(&id) {
            s.room = room;
        }
    }

    pub fn send_to(&self, id: ConnId, event: ServerEvent) {
        if let Some(s) = self.conns.get(&id) {
            if s.tx.send(event).is_err() {
                tracing::debug!(conn = %id, "outbox closed, dropping event");
            }
        }
    }

    pub fn broadcast(&self, members: &[ConnId], event: &ServerEvent) {
        for id in members {
            self.send_to(*id, event.clone());
        }
    }

    pub fn broadcast_except(&self, members: &[ConnId], except: ConnId, event: &ServerEvent) {
        for id in members.iter().filter(|id| **id != except) {
            self.send_to(*id, event.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
