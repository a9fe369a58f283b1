//! Registry of live rooms keyed by room code.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{mapref::entry::Entry, DashMap};
use rand::Rng;
use tokio::task::JoinHandle;

use crate::error::{GameError, GameResult};
use crate::room::state::{PublicRoom, Room};
use crate::util::id::{new_room_code, normalize_code, ConnId};
use crate::ws::sessions::Sessions;

const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// Owns every room. A closure passed to [`RoomRegistry::with_room_mut`] runs
/// with the room locked, so each handler's reads and writes (and the events it
/// emits from inside the closure) are atomic with respect to other handlers on
/// the same room.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self { rooms: DashMap::new() }
    }

    /// Create a room with `creator` as sole player and host; returns its code.
    pub fn create_room(&self, creator: ConnId, username: Option<&str>) -> String {
        self.create_room_with(&mut rand::thread_rng(), creator, username)
    }

    pub fn create_room_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        creator: ConnId,
        username: Option<&str>,
    ) -> String {
        loop {
            // The vacant entry holds the shard lock, so no concurrent create can claim the same code.
            match self.rooms.entry(new_room_code(rng)) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let code = slot.key().clone();
                    slot.insert(Room::new(code.clone(), creator, username));
                    tracing::info!(room = %code, %creator, "room created");
                    return code;
                }
            }
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rooms.contains_key(&normalize_code(code))
    }

    /// Read-only access to a room; `code` is matched case-insensitively.
    pub fn with_room<T>(&self, code: &str, f: impl FnOnce(&Room) -> T) -> GameResult<T> {
        let code = checked_code(code)?;
        let room = self.rooms.get(&code).ok_or_else(GameError::room_not_found)?;
        Ok(f(&*room))
    }

    /// Exclusive access to a room. Marks the room active.
    pub fn with_room_mut<T>(&self, code: &str, f: impl FnOnce(&mut Room) -> T) -> GameResult<T> {
        let code = checked_code(code)?;
        let mut room = self.rooms.get_mut(&code).ok_or_else(GameError::room_not_found)?;
        room.touch();
        Ok(f(&mut *room))
    }

    pub fn snapshot_public(&self, code: &str) -> GameResult<PublicRoom> {
        self.with_room(code, Room::snapshot)
    }

    /// Drop the room if nobody is left in it. Returns whether it was removed.
    pub fn remove_if_empty(&self, code: &str) -> bool {
        let removed = self.rooms.remove_if(&normalize_code(code), |_, room| room.is_empty()).is_some();
        if removed {
            tracing::info!(room = %code, "empty room removed");
        }
        removed
    }

    /// Remove rooms idle for longer than `max_idle` that have no member with a
    /// live connection; returns their codes.
    pub fn prune_idle(&self, max_idle: Duration, is_connected: impl Fn(ConnId) -> bool) -> Vec<String> {
        let now = Instant::now();
        let mut pruned = Vec::new();
        self.rooms.retain(|code, room| {
            let stale = now.duration_since(room.last_activity()) >= max_idle;
            let orphaned = room.players().iter().all(|p| !is_connected(p.id));
            if stale && orphaned {
                pruned.push(code.clone());
                return false;
            }
            true
        });
        pruned
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

/// Periodically drop orphaned rooms nobody has touched for `max_idle`.
pub fn spawn_reaper(
    rooms: Arc<RoomRegistry>,
    sessions: Arc<Sessions>,
    every: Duration,
    max_idle: Duration,
) -> JoinHandle<()> {
    // tokio's interval panics on a zero period
    let every = every.max(MIN_REAP_INTERVAL);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let pruned = rooms.prune_idle(max_idle, |id| sessions.is_connected(id));
            if !pruned.is_empty() {
                tracing::info!(count = pruned.len(), rooms = ?pruned, remaining = rooms.len(), "reaped idle rooms");
            }
        }
    })
}

fn checked_code(raw: &str) -> GameResult<String> {
    let code = normalize_code(raw);
    if code.is_empty() {
        return Err(GameError::InvalidInput("room code is required".into()));
    }
    Ok(code)
}
