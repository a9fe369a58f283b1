//! Per-room game state: membership, deck, secrets and guess adjudication.
//!
//! Everything here is synchronous and side-effect free apart from mutating the
//! room. Callers decide what to emit from the returned outcomes, which lets the
//! realtime layer send events while it still holds the room.

use std::time::Instant;

use axum::body::Bytes;
use rand::Rng;
use serde::Serialize;

use crate::error::{GameError, GameResult};
use crate::util::id::ConnId;

pub const DEFAULT_USERNAME: &str = "Player";
const MAX_USERNAME_CHARS: usize = 32;

/// One uploaded card image, kept in memory for the room's lifetime.
#[derive(Debug, Clone)]
pub struct Image {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No images yet.
    Lobby,
    /// Deck present, no round running.
    ImagesReady,
    /// Every player seated at start holds a secret.
    InProgress,
    /// A guess ended the round.
    Resolved { winner: ConnId },
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: ConnId,
    pub username: String,
    /// `None` until the next start/restart deals this player in.
    pub secret: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPlayer {
    pub id: ConnId,
    pub username: String,
}

/// Broadcast-safe projection of a room. Never carries images or secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicRoom {
    pub room_code: String,
    pub players: Vec<PublicPlayer>,
    pub host_id: Option<ConnId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub role: Role,
    /// The joiner took over a hostless room.
    pub became_host: bool,
    pub already_member: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub was_host: bool,
    /// The departure cut a running round short.
    pub round_aborted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuessOutcome {
    pub guesser: ConnId,
    pub guesser_name: String,
    pub opponent: ConnId,
    pub index: usize,
    pub correct: bool,
    pub winner: ConnId,
}

/// Secret dealt to one player; delivered to that player only.
pub type Deal = (ConnId, usize);

#[derive(Debug)]
pub struct Room {
    code: String,
    host: Option<ConnId>,
    players: Vec<Player>,
    images: Vec<Image>,
    phase: Phase,
    last_activity: Instant,
}

/// Trim a display name, fall back to the default and cap its length.
pub fn clean_username(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(name) if !name.is_empty() => name.chars().take(MAX_USERNAME_CHARS).collect(),
        _ => DEFAULT_USERNAME.to_string(),
    }
}

impl Room {
    /// New room with `creator` as its sole player and host.
    pub fn new(code: String, creator: ConnId, username: Option<&str>) -> Self {
        Self {
            code,
            host: Some(creator),
            players: vec![Player { id: creator, username: clean_username(username), secret: None }],
            images: Vec::new(),
            phase: Phase::Lobby,
            last_activity: Instant::now(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn host(&self) -> Option<ConnId> {
        self.host
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player_ids(&self) -> Vec<ConnId> {
        self.players.iter().map(|p| p.id).collect()
    }

    pub fn player(&self, id: ConnId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn is_member(&self, id: ConnId) -> bool {
        self.player(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn role_of(&self, id: ConnId) -> Role {
        if self.host == Some(id) { Role::Host } else { Role::Guest }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, idx: usize) -> Option<&Image> {
        self.images.get(idx)
    }

    /// Relative URLs under which the deck is served, in index order.
    pub fn image_urls(&self) -> Vec<String> {
        (0..self.images.len()).map(|i| format!("/img/{}/{}", self.code, i)).collect()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn snapshot(&self) -> PublicRoom {
        PublicRoom {
            room_code: self.code.clone(),
            players: self
                .players
                .iter()
                .map(|p| PublicPlayer { id: p.id, username: p.username.clone() })
                .collect(),
            host_id: self.host,
        }
    }

    /// The other current player, if there is one.
    pub fn opponent_of(&self, me: ConnId) -> Option<&Player> {
        self.players.iter().find(|p| p.id != me)
    }

    pub fn add_player(&mut self, id: ConnId, username: Option<&str>, max_players: usize) -> GameResult<JoinOutcome> {
        if self.is_member(id) {
            return Ok(JoinOutcome { role: self.role_of(id), became_host: false, already_member: true });
        }
        if self.players.len() >= max_players {
            return Err(GameError::RoomFull);
        }
        self.players.push(Player { id, username: clean_username(username), secret: None });
        let became_host = self.host.is_none();
        if became_host {
            self.host = Some(id);
        }
        Ok(JoinOutcome { role: self.role_of(id), became_host, already_member: false })
    }

    /// Drop a player together with their name and secret. A departing host
    /// leaves the room hostless until someone else joins.
    pub fn remove_player(&mut self, id: ConnId) -> Option<LeaveOutcome> {
        let pos = self.players.iter().position(|p| p.id == id)?;
        self.players.remove(pos);
        let was_host = self.host == Some(id);
        if was_host {
            self.host = None;
        }
        let round_aborted = self.phase == Phase::InProgress;
        if round_aborted {
            self.clear_secrets();
            self.phase = self.idle_phase();
        }
        Some(LeaveOutcome { was_host, round_aborted })
    }

    /// Replace the deck. Not allowed while a round is running because the
    /// dealt secrets index into it.
    pub fn set_images(&mut self, images: Vec<Image>) -> GameResult<()> {
        if self.phase == Phase::InProgress {
            return Err(GameError::IllegalState("cannot replace images while a game is in progress".into()));
        }
        self.images = images;
        self.clear_secrets();
        self.phase = self.idle_phase();
        Ok(())
    }

    /// Deal every current player a fresh uniform secret in `[0, images)`.
    /// Players may share a secret.
    pub fn assign_secrets<R: Rng + ?Sized>(&mut self, rng: &mut R) -> GameResult<Vec<Deal>> {
        let n = self.images.len();
        if n == 0 {
            return Err(GameError::IllegalState("cannot assign secrets without images".into()));
        }
        Ok(self
            .players
            .iter_mut()
            .map(|p| {
                let idx = rng.gen_range(0..n);
                p.secret = Some(idx);
                (p.id, idx)
            })
            .collect())
    }

    pub fn start<R: Rng + ?Sized>(
        &mut self,
        requester: ConnId,
        min_images: usize,
        rng: &mut R,
    ) -> GameResult<Vec<Deal>> {
        self.require_host(requester, "start the game")?;
        if self.phase == Phase::InProgress {
            return Err(GameError::IllegalState("game already in progress".into()));
        }
        self.require_images(min_images)?;
        let deals = self.assign_secrets(rng)?;
        self.phase = Phase::InProgress;
        Ok(deals)
    }

    pub fn restart<R: Rng + ?Sized>(
        &mut self,
        requester: ConnId,
        min_images: usize,
        rng: &mut R,
    ) -> GameResult<Vec<Deal>> {
        self.require_host(requester, "restart the game")?;
        if !matches!(self.phase, Phase::InProgress | Phase::Resolved { .. }) {
            return Err(GameError::IllegalState("no game to restart".into()));
        }
        self.require_images(min_images)?;
        let deals = self.assign_secrets(rng)?;
        self.phase = Phase::InProgress;
        Ok(deals)
    }

    /// Adjudicate `guesser` naming `index` as the opponent's secret. Right or
    /// wrong, the round ends; the guesser wins only on a hit. Both sides must
    /// have been dealt in, so a player who joined mid-round cannot guess.
    pub fn resolve_guess(&mut self, guesser: ConnId, index: usize) -> GameResult<GuessOutcome> {
        if self.phase != Phase::InProgress {
            return Err(GameError::IllegalState("no game in progress".into()));
        }
        let me = self
            .player(guesser)
            .ok_or_else(|| GameError::IllegalState("guesser is not in this room".into()))?;
        if me.secret.is_none() {
            return Err(GameError::IllegalState("you were not dealt into this round; wait for a restart".into()));
        }
        let guesser_name = me.username.clone();
        if index >= self.images.len() {
            return Err(GameError::InvalidInput(format!(
                "card index {index} out of range (deck has {})",
                self.images.len()
            )));
        }
        let opponent = self
            .opponent_of(guesser)
            .ok_or_else(|| GameError::IllegalState("no opponent to guess against".into()))?;
        let secret = opponent
            .secret
            .ok_or_else(|| GameError::IllegalState("opponent has no secret yet; restart the game".into()))?;
        let opponent = opponent.id;

        let correct = index == secret;
        let winner = if correct { guesser } else { opponent };
        self.phase = Phase::Resolved { winner };
        Ok(GuessOutcome { guesser, guesser_name, opponent, index, correct, winner })
    }

    fn require_host(&self, requester: ConnId, action: &'static str) -> GameResult<()> {
        if self.host == Some(requester) { Ok(()) } else { Err(GameError::NotHost(action)) }
    }

    fn require_images(&self, min_images: usize) -> GameResult<()> {
        let have = self.images.len();
        if have < min_images.max(1) {
            return Err(GameError::IllegalState(format!("need at least {min_images} images, have {have}")));
        }
        Ok(())
    }

    fn clear_secrets(&mut self) {
        for p in &mut self.players {
            p.secret = None;
        }
    }

    fn idle_phase(&self) -> Phase {
        if self.images.is_empty() { Phase::Lobby } else { Phase::ImagesReady }
    }
}
