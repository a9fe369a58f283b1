//! Inbound command handling.
//!
//! Every handler that touches a room does its mutation and its emissions inside
//! one `with_room_mut` closure, so members observe a room's events in the order
//! the server applied them.

use crate::error::{GameError, GameResult};
use crate::http::routes::AppState;
use crate::room::state::Role;
use crate::util::id::ConnId;
use crate::ws::protocol::{
    Ack, ClientCommand, ClientFrame, CreateRoom, JoinRoom, MakeGuess, RoomRef, SendQuestion, ServerEvent,
};

const MAX_QUESTION_CHARS: usize = 500;

/// Per-command context: who sent it and where the reply goes.
struct Ctx<'a> {
    state: &'a AppState,
    conn: ConnId,
    ack: Option<u64>,
}

impl Ctx<'_> {
    fn reply(&self, ack: impl FnOnce(u64) -> Ack) {
        if let Some(id) = self.ack {
            self.state.sessions.send_to(self.conn, ServerEvent::Ack(ack(id)));
        }
    }

    fn reply_ok(&self) {
        self.reply(Ack::ok);
    }

    fn fail(&self, event: &str, err: &GameError) {
        tracing::debug!(conn = %self.conn, event, error = %err, "command rejected");
        let out = match self.ack {
            Some(id) => ServerEvent::Ack(Ack::failed(id, err)),
            None => ServerEvent::error(event, err),
        };
        self.state.sessions.send_to(self.conn, out);
    }
}

/// Decode one text frame and run it.
pub fn handle_text(state: &AppState, conn: ConnId, text: &str) {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err(err) => {
            let err = GameError::InvalidInput(format!("bad message: {err}"));
            Ctx { state, conn, ack: None }.fail("unknown", &err);
            return;
        }
    };
    let ctx = Ctx { state, conn, ack: frame.ack };
    match frame.command() {
        Ok(cmd) => run(&ctx, cmd),
        Err(err) => ctx.fail(&frame.event, &GameError::InvalidInput(format!("bad {} payload: {err}", frame.event))),
    }
}

fn run(ctx: &Ctx<'_>, cmd: ClientCommand) {
    let event = cmd.name();
    let result = match cmd {
        ClientCommand::CreateRoom(req) => create_room(ctx, req),
        ClientCommand::JoinRoom(req) => join_room(ctx, req),
        ClientCommand::StartGame(req) => start_game(ctx, req),
        ClientCommand::SendQuestion(req) => send_question(ctx, req),
        ClientCommand::MakeGuess(req) => make_guess(ctx, req),
        ClientCommand::RestartGame(req) => restart_game(ctx, req),
    };
    if let Err(err) = result {
        ctx.fail(event, &err);
    }
}

fn create_room(ctx: &Ctx<'_>, req: CreateRoom) -> GameResult<()> {
    let AppState { rooms, sessions, .. } = ctx.state;
    if let Some(previous) = sessions.room_of(ctx.conn) {
        leave_room(ctx.state, ctx.conn, &previous);
    }
    let code = rooms.create_room(ctx.conn, req.username.as_deref());
    sessions.set_room(ctx.conn, Some(code.clone()));
    rooms.with_room_mut(&code, |room| {
        ctx.reply(|id| Ack::joined(id, room.code().to_string(), room.role_of(ctx.conn)));
        sessions.send_to(ctx.conn, ServerEvent::YouAreHost);
        sessions.broadcast(&room.player_ids(), &ServerEvent::RoomState(room.snapshot()));
    })
}

fn join_room(ctx: &Ctx<'_>, req: JoinRoom) -> GameResult<()> {
    let AppState { rooms, sessions, config } = ctx.state;
    let conn = ctx.conn;
    let code = rooms.with_room_mut(&req.room_code, |room| -> GameResult<String> {
        let joined = room.add_player(conn, req.username.as_deref(), config.limits.max_players)?;
        ctx.reply(|id| Ack::joined(id, room.code().to_string(), joined.role));
        if joined.already_member {
            return Ok(room.code().to_string());
        }
        if joined.role == Role::Host {
            sessions.send_to(conn, ServerEvent::YouAreHost);
        }
        sessions.broadcast(&room.player_ids(), &ServerEvent::RoomState(room.snapshot()));
        if room.image_count() > 0 {
            sessions.send_to(conn, ServerEvent::ImagesReady { images: room.image_urls() });
        }
        tracing::info!(room = %room.code(), %conn, role = ?joined.role, "player joined");
        Ok(room.code().to_string())
    })??;

    let previous = sessions.room_of(conn);
    sessions.set_room(conn, Some(code.clone()));
    if let Some(previous) = previous.filter(|p| *p != code) {
        leave_room(ctx.state, conn, &previous);
    }
    Ok(())
}

fn start_game(ctx: &Ctx<'_>, req: RoomRef) -> GameResult<()> {
    let AppState { rooms, sessions, config } = ctx.state;
    rooms.with_room_mut(&req.room_code, |room| -> GameResult<()> {
        let deals = room.start(ctx.conn, config.limits.min_images, &mut rand::thread_rng())?;
        for (player, secret_index) in &deals {
            sessions.send_to(*player, ServerEvent::SecretAssigned { secret_index: *secret_index });
        }
        sessions.broadcast(&room.player_ids(), &ServerEvent::GameStarted);
        tracing::info!(room = %room.code(), players = deals.len(), deck = room.image_count(), "game started");
        Ok(())
    })??;
    ctx.reply_ok();
    Ok(())
}

fn send_question(ctx: &Ctx<'_>, req: SendQuestion) -> GameResult<()> {
    let AppState { rooms, sessions, .. } = ctx.state;
    let text = req.text.trim();
    if text.is_empty() {
        return Err(GameError::InvalidInput("question text is empty".into()));
    }
    if text.chars().count() > MAX_QUESTION_CHARS {
        return Err(GameError::InvalidInput(format!("question longer than {MAX_QUESTION_CHARS} characters")));
    }
    rooms.with_room_mut(&req.room_code, |room| -> GameResult<()> {
        let sender = room
            .player(ctx.conn)
            .ok_or_else(|| GameError::IllegalState("you are not in this room".into()))?;
        let event = ServerEvent::ReceiveQuestion {
            text: text.to_string(),
            sender: sender.username.clone(),
            sender_id: ctx.conn,
        };
        sessions.broadcast_except(&room.player_ids(), ctx.conn, &event);
        Ok(())
    })??;
    ctx.reply_ok();
    Ok(())
}

fn make_guess(ctx: &Ctx<'_>, req: MakeGuess) -> GameResult<()> {
    let AppState { rooms, sessions, .. } = ctx.state;
    rooms.with_room_mut(&req.room_code, |room| -> GameResult<()> {
        let outcome = room.resolve_guess(ctx.conn, req.index)?;
        let members = room.player_ids();
        sessions.broadcast(
            &members,
            &ServerEvent::GuessResult {
                guesser: outcome.guesser_name.clone(),
                guesser_id: outcome.guesser,
                correct: outcome.correct,
                index: outcome.index,
            },
        );
        sessions.broadcast(&members, &ServerEvent::GameEnded { winner: outcome.winner });
        tracing::info!(
            room = %room.code(),
            guesser = %outcome.guesser,
            index = outcome.index,
            correct = outcome.correct,
            winner = %outcome.winner,
            "guess resolved"
        );
        Ok(())
    })??;
    ctx.reply_ok();
    Ok(())
}

fn restart_game(ctx: &Ctx<'_>, req: RoomRef) -> GameResult<()> {
    let AppState { rooms, sessions, config } = ctx.state;
    rooms.with_room_mut(&req.room_code, |room| -> GameResult<()> {
        let deals = room.restart(ctx.conn, config.limits.min_images, &mut rand::thread_rng())?;
        sessions.broadcast(&room.player_ids(), &ServerEvent::RestartReady);
        for (player, secret_index) in deals {
            sessions.send_to(player, ServerEvent::SecretAssigned { secret_index });
        }
        tracing::info!(room = %room.code(), "game restarted");
        Ok(())
    })??;
    ctx.reply_ok();
    Ok(())
}

/// Take `conn` out of `code`, tell the remaining members, and drop the room
/// once it is empty.
fn leave_room(state: &AppState, conn: ConnId, code: &str) {
    let AppState { rooms, sessions, .. } = state;
    let left = rooms.with_room_mut(code, |room| {
        let outcome = room.remove_player(conn)?;
        sessions.broadcast(&room.player_ids(), &ServerEvent::RoomState(room.snapshot()));
        tracing::info!(
            room = %room.code(),
            %conn,
            was_host = outcome.was_host,
            round_aborted = outcome.round_aborted,
            "player left"
        );
        Some(outcome)
    });
    match left {
        Ok(_) => {
            rooms.remove_if_empty(code);
        }
        // room already gone
        Err(err) => tracing::debug!(room = %code, %conn, error = %err, "leave skipped"),
    }
}

/// Connection closed: forget the session and leave its room.
pub fn disconnect(state: &AppState, conn: ConnId) {
    if let Some(code) = state.sessions.unregister(conn) {
        leave_room(state, conn, &code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::room::state::Image;
    use axum::body::Bytes;
    use serde_json::{json, Value};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Client {
        id: ConnId,
        rx: UnboundedReceiver<ServerEvent>,
    }

    impl Client {
        fn connect(state: &AppState) -> Self {
            let id = ConnId::new();
            let rx = state.sessions.register(id);
            Self { id, rx }
        }

        fn send(&self, state: &AppState, frame: Value) {
            handle_text(state, self.id, &frame.to_string());
        }

        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut out = Vec::new();
            while let Ok(ev) = self.rx.try_recv() {
                out.push(ev);
            }
            out
        }
    }

    fn code_from(events: &[ServerEvent]) -> String {
        events
            .iter()
            .find_map(|ev| match ev {
                ServerEvent::Ack(Ack { room_code: Some(code), .. }) => Some(code.clone()),
                _ => None,
            })
            .unwrap()
    }

    fn secret_from(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .find_map(|ev| match ev {
                ServerEvent::SecretAssigned { secret_index } => Some(*secret_index),
                _ => None,
            })
            .unwrap()
    }

    fn seed_images(state: &AppState, code: &str, n: usize) {
        let images = (0..n)
            .map(|i| Image { bytes: Bytes::from(vec![i as u8]), content_type: "image/jpeg".into() })
            .collect();
        state.rooms.with_room_mut(code, |room| room.set_images(images)).unwrap().unwrap();
    }

    /// Host A and guest B in one room with a four-card deck.
    fn seated_pair(state: &AppState) -> (Client, Client, String) {
        let mut a = Client::connect(state);
        let mut b = Client::connect(state);
        a.send(state, json!({"event":"createRoom","data":{"username":"alice"},"ack":1}));
        let code = code_from(&a.drain());
        b.send(state, json!({"event":"joinRoom","data":{"roomCode":code.to_lowercase(),"username":"bob"},"ack":1}));
        b.drain();
        a.drain();
        seed_images(state, &code, 4);
        (a, b, code)
    }

    #[test]
    fn create_room_acks_then_announces_host() {
        let state = AppState::new(Config::default());
        let mut a = Client::connect(&state);
        a.send(&state, json!({"event":"createRoom","data":{},"ack":9}));
        let events = a.drain();
        assert!(matches!(&events[0], ServerEvent::Ack(Ack { id: 9, ok: true, .. })));
        assert_eq!(events[1], ServerEvent::YouAreHost);
        assert!(matches!(&events[2], ServerEvent::RoomState(s) if s.host_id == Some(a.id)));
    }

    #[test]
    fn join_unknown_room_fails_through_ack() {
        let state = AppState::new(Config::default());
        let mut b = Client::connect(&state);
        b.send(&state, json!({"event":"joinRoom","data":{"roomCode":"QQQQQ"},"ack":2}));
        let events = b.drain();
        assert_eq!(
            events,
            vec![ServerEvent::Ack(Ack::failed(2, &GameError::room_not_found()))]
        );
        assert_eq!(state.rooms.len(), 0);
    }

    #[test]
    fn joiner_sees_existing_images() {
        let state = AppState::new(Config::default());
        let mut a = Client::connect(&state);
        a.send(&state, json!({"event":"createRoom","ack":1}));
        let code = code_from(&a.drain());
        seed_images(&state, &code, 5);

        let mut b = Client::connect(&state);
        b.send(&state, json!({"event":"joinRoom","data":{"roomCode":code}}));
        let events = b.drain();
        assert!(events.iter().any(|e| matches!(e, ServerEvent::ImagesReady { images } if images.len() == 5)));
        assert!(!events.contains(&ServerEvent::YouAreHost));
    }

    #[test]
    fn third_player_is_turned_away() {
        let state = AppState::new(Config::default());
        let (_a, _b, code) = seated_pair(&state);
        let mut c = Client::connect(&state);
        c.send(&state, json!({"event":"joinRoom","data":{"roomCode":code},"ack":3}));
        let events = c.drain();
        assert!(matches!(&events[..], [ServerEvent::Ack(Ack { ok: false, kind: Some(k), .. })] if k == "roomFull"));
    }

    #[test]
    fn full_round_with_correct_guess() {
        let state = AppState::new(Config::default());
        let (mut a, mut b, code) = seated_pair(&state);

        a.send(&state, json!({"event":"startGame","data":{"roomCode":code}}));
        let a_events = a.drain();
        let b_events = b.drain();
        assert!(a_events.contains(&ServerEvent::GameStarted));
        assert!(b_events.contains(&ServerEvent::GameStarted));
        let b_secret = secret_from(&b_events);
        assert!(b_secret < 4);
        assert_eq!(a_events.iter().filter(|e| matches!(e, ServerEvent::SecretAssigned { .. })).count(), 1);

        a.send(&state, json!({"event":"makeGuess","data":{"roomCode":code,"index":b_secret}}));
        let expected = vec![
            ServerEvent::GuessResult { guesser: "alice".into(), guesser_id: a.id, correct: true, index: b_secret },
            ServerEvent::GameEnded { winner: a.id },
        ];
        assert_eq!(a.drain(), expected);
        assert_eq!(b.drain(), expected);
    }

    #[test]
    fn guest_cannot_start_and_gets_error_event() {
        let state = AppState::new(Config::default());
        let (mut a, mut b, code) = seated_pair(&state);
        b.send(&state, json!({"event":"startGame","data":{"roomCode":code}}));
        let events = b.drain();
        assert!(matches!(
            &events[..],
            [ServerEvent::Error { event, kind, .. }] if event == "startGame" && kind == "notHost"
        ));
        assert!(a.drain().is_empty());
    }

    #[test]
    fn lone_player_guess_reports_illegal_state() {
        let state = AppState::new(Config::default());
        let mut a = Client::connect(&state);
        a.send(&state, json!({"event":"createRoom","ack":1}));
        let code = code_from(&a.drain());
        seed_images(&state, &code, 4);
        a.send(&state, json!({"event":"startGame","data":{"roomCode":code}}));
        a.drain();
        a.send(&state, json!({"event":"makeGuess","data":{"roomCode":code,"index":0},"ack":5}));
        let events = a.drain();
        assert!(matches!(
            &events[..],
            [ServerEvent::Ack(Ack { id: 5, ok: false, kind: Some(k), .. })] if k == "illegalState"
        ));
    }

    #[test]
    fn joining_mid_round_deals_nothing_and_blocks_guessing() {
        let state = AppState::new(Config::default());
        let mut a = Client::connect(&state);
        a.send(&state, json!({"event":"createRoom","data":{"username":"alice"},"ack":1}));
        let code = code_from(&a.drain());
        seed_images(&state, &code, 4);
        a.send(&state, json!({"event":"startGame","data":{"roomCode":code}}));
        let a_secret = secret_from(&a.drain());

        let mut b = Client::connect(&state);
        b.send(&state, json!({"event":"joinRoom","data":{"roomCode":code,"username":"bob"},"ack":2}));
        let joined = b.drain();
        assert!(!joined.iter().any(|e| matches!(e, ServerEvent::SecretAssigned { .. })));
        let b_secret = state.rooms.with_room(&code, |r| r.player(b.id).and_then(|p| p.secret)).unwrap();
        assert_eq!(b_secret, None);
        a.drain();

        b.send(&state, json!({"event":"makeGuess","data":{"roomCode":code,"index":a_secret},"ack":3}));
        assert!(matches!(
            &b.drain()[..],
            [ServerEvent::Ack(Ack { id: 3, ok: false, kind: Some(k), .. })] if k == "illegalState"
        ));
        assert!(a.drain().is_empty(), "no result is broadcast");

        // the host's restart deals the late joiner in
        a.send(&state, json!({"event":"restartGame","data":{"roomCode":code}}));
        assert!(secret_from(&b.drain()) < 4);
    }

    #[test]
    fn rejoining_the_same_room_only_acks() {
        let state = AppState::new(Config::default());
        let (mut a, mut b, code) = seated_pair(&state);
        b.send(&state, json!({"event":"joinRoom","data":{"roomCode":code,"username":"bob"},"ack":4}));
        assert!(matches!(&b.drain()[..], [ServerEvent::Ack(Ack { id: 4, ok: true, .. })]));
        a.send(&state, json!({"event":"joinRoom","data":{"roomCode":code},"ack":5}));
        let events = a.drain();
        assert!(matches!(&events[..], [ServerEvent::Ack(Ack { id: 5, ok: true, role: Some(Role::Host), .. })]));
        assert!(b.drain().is_empty());
        assert_eq!(state.rooms.snapshot_public(&code).unwrap().players.len(), 2);
    }

    #[test]
    fn reaper_leaves_rooms_with_connected_members_alone() {
        let state = AppState::new(Config::default());
        let (mut a, mut b, code) = seated_pair(&state);
        let sessions = state.sessions.clone();
        let pruned = state.rooms.prune_idle(std::time::Duration::ZERO, |id| sessions.is_connected(id));
        assert!(pruned.is_empty());
        assert!(state.rooms.contains(&code));
        assert!(a.drain().is_empty());
        assert_eq!(state.sessions.room_of(b.id), Some(code.clone()));

        b.send(&state, json!({"event":"sendQuestion","data":{"roomCode":code,"text":"hat?"},"ack":6}));
        assert!(matches!(&b.drain()[..], [ServerEvent::Ack(Ack { id: 6, ok: true, .. })]));
        assert_eq!(a.drain().len(), 1);
    }

    #[test]
    fn restart_signals_ready_before_new_secrets() {
        let state = AppState::new(Config::default());
        let (mut a, mut b, code) = seated_pair(&state);
        a.send(&state, json!({"event":"startGame","data":{"roomCode":code}}));
        a.send(&state, json!({"event":"makeGuess","data":{"roomCode":code,"index":0}}));
        a.drain();
        b.drain();

        a.send(&state, json!({"event":"restartGame","data":{"roomCode":code}}));
        let events = b.drain();
        assert_eq!(events[0], ServerEvent::RestartReady);
        assert!(matches!(events[1], ServerEvent::SecretAssigned { secret_index } if secret_index < 4));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn questions_go_to_everyone_but_sender() {
        let state = AppState::new(Config::default());
        let (mut a, mut b, code) = seated_pair(&state);
        a.send(&state, json!({"event":"sendQuestion","data":{"roomCode":code,"text":"  glasses? "}}));
        assert!(a.drain().is_empty());
        assert_eq!(
            b.drain(),
            vec![ServerEvent::ReceiveQuestion { text: "glasses?".into(), sender: "alice".into(), sender_id: a.id }]
        );

        a.send(&state, json!({"event":"sendQuestion","data":{"roomCode":code,"text":"   "}}));
        assert!(matches!(&a.drain()[..], [ServerEvent::Error { kind, .. }] if kind == "invalidInput"));
    }

    #[test]
    fn disconnect_updates_snapshot_and_clears_host() {
        let state = AppState::new(Config::default());
        let (a, mut b, code) = seated_pair(&state);
        disconnect(&state, a.id);
        let events = b.drain();
        match &events[..] {
            [ServerEvent::RoomState(snap)] => {
                assert_eq!(snap.host_id, None);
                assert!(snap.players.iter().all(|p| p.id != a.id));
                assert_eq!(snap.players.len(), 1);
            }
            other => panic!("unexpected events {other:?}"),
        }

        disconnect(&state, b.id);
        assert!(!state.rooms.contains(&code));
    }

    #[test]
    fn malformed_frames_are_reported() {
        let state = AppState::new(Config::default());
        let mut a = Client::connect(&state);
        handle_text(&state, a.id, "{oops");
        a.send(&state, json!({"event":"fly","data":{}}));
        let events = a.drain();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, ServerEvent::Error { kind, .. } if kind == "invalidInput")));
    }

    #[test]
    fn creating_a_second_room_leaves_the_first() {
        let state = AppState::new(Config::default());
        let (mut a, mut b, first) = seated_pair(&state);
        b.send(&state, json!({"event":"createRoom","ack":1}));
        let second = code_from(&b.drain());
        assert_ne!(first, second);
        let snap = state.rooms.snapshot_public(&first).unwrap();
        assert_eq!(snap.players.len(), 1);
        assert!(a.drain().iter().any(|e| matches!(e, ServerEvent::RoomState(s) if s.players.len() == 1)));
        assert_eq!(state.sessions.room_of(b.id), Some(second));
    }
}
