//! Match Session Management
//!
//! A session is one duel: two connections, one authoritative loop. The
//! session owns the loop, so removing a player drops its fighter, queue and
//! outbound channel under the same lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::game::input::InputCommand;
use crate::game::state::FighterId;
use crate::game::step::Simulation;
use crate::game::tick::{AuthoritativeLoop, TickResult};
use crate::network::codec::{encode_frame, should_send, CodecError, CompactFighter};
use crate::network::protocol::ServerMessage;

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for players to join and ready up.
    Lobby,
    /// Match in progress.
    Playing,
    /// Match decided or abandoned; final message pending.
    Ended,
    /// Session closed.
    Closed,
}

/// Something queued for one connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// JSON text frame.
    Message(ServerMessage),
    /// Binary state frame (see `codec`).
    Frame(Vec<u8>),
}

/// Configuration for a match session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum players in match.
    pub max_players: usize,
    /// Minimum players to start.
    pub min_players: usize,
    /// Simulation rate (Hz).
    pub tick_rate: u32,
    /// Send state as binary frames instead of JSON.
    pub binary_state: bool,
}

impl SessionConfig {
    /// Fixed step derived from the tick rate.
    pub fn step_ms(&self) -> f64 {
        1000.0 / self.tick_rate.max(1) as f64
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: 2,
            min_players: 2,
            tick_rate: crate::TICK_RATE,
            binary_state: true,
        }
    }
}

/// A player connected to a session.
#[derive(Debug)]
pub struct SessionPlayer {
    /// Fighter controlled by this connection.
    pub fighter_id: FighterId,
    /// Display name.
    pub name: String,
    /// Is player ready to start.
    pub ready: bool,
    /// Message channel to this player.
    pub sender: mpsc::Sender<Outbound>,
}

/// A match session.
pub struct MatchSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Current state.
    pub state: SessionState,
    /// Session configuration.
    pub config: SessionConfig,
    players: BTreeMap<FighterId, SessionPlayer>,
    room: AuthoritativeLoop,
    /// Last broadcast values per fighter, for the delta gate.
    last_broadcast: BTreeMap<FighterId, (CompactFighter, Option<u64>)>,
    /// When the match started.
    started_at: Option<Instant>,
}

impl MatchSession {
    /// Create a new session.
    pub fn new(id: SessionId, config: SessionConfig, sim: Simulation) -> Self {
        let room = AuthoritativeLoop::with_step(sim, config.step_ms());
        Self {
            id,
            state: SessionState::Lobby,
            config,
            players: BTreeMap::new(),
            room,
            last_broadcast: BTreeMap::new(),
            started_at: None,
        }
    }

    /// Add a player; returns the fighter it controls.
    ///
    /// Fighter ids are slot numbers, so the first free slot wins.
    pub fn add_player(
        &mut self,
        name: String,
        sender: mpsc::Sender<Outbound>,
    ) -> Result<FighterId, SessionError> {
        if self.state != SessionState::Lobby {
            return Err(SessionError::MatchInProgress);
        }

        if self.players.len() >= self.config.max_players {
            return Err(SessionError::SessionFull);
        }

        let slot = (0..self.config.max_players)
            .find(|s| !self.players.contains_key(&FighterId(*s as u8)))
            .ok_or(SessionError::SessionFull)?;
        let fighter_id = FighterId(slot as u8);

        self.room.add_fighter(fighter_id, slot);
        self.players.insert(fighter_id, SessionPlayer {
            fighter_id,
            name,
            ready: false,
            sender,
        });

        debug!(session = %hex::encode(&self.id[..4]), fighter = %fighter_id, "Player joined");
        Ok(fighter_id)
    }

    /// Remove a player together with its fighter.
    ///
    /// A mid-match departure ends the match.
    pub fn remove_player(&mut self, fighter_id: FighterId) -> bool {
        if self.players.remove(&fighter_id).is_none() {
            return false;
        }
        self.room.remove_fighter(fighter_id);
        self.last_broadcast.remove(&fighter_id);

        match self.state {
            SessionState::Lobby if self.players.is_empty() => self.state = SessionState::Closed,
            SessionState::Playing if self.players.len() < self.config.min_players => {
                info!(session = %hex::encode(&self.id[..4]), fighter = %fighter_id, "Player left mid-match");
                self.state = SessionState::Ended;
            }
            SessionState::Ended if self.players.is_empty() => self.state = SessionState::Closed,
            _ => {}
        }
        true
    }

    /// Set a player's ready flag.
    pub fn set_player_ready(&mut self, fighter_id: FighterId, ready: bool) -> bool {
        if let Some(player) = self.players.get_mut(&fighter_id) {
            player.ready = ready;
            true
        } else {
            false
        }
    }

    /// Enough players, all ready.
    pub fn all_players_ready(&self) -> bool {
        self.players.len() >= self.config.min_players
            && self.players.values().all(|p| p.ready)
    }

    /// Number of players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Lobby with a free slot.
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Lobby && self.players.len() < self.config.max_players
    }

    /// Fighters in id order.
    pub fn fighters(&self) -> Vec<FighterId> {
        self.players.keys().copied().collect()
    }

    /// Start the match.
    pub fn start_match(&mut self) -> Result<Vec<FighterId>, SessionError> {
        if self.state != SessionState::Lobby {
            return Err(SessionError::InvalidState);
        }

        if !self.all_players_ready() {
            return Err(SessionError::PlayersNotReady);
        }

        self.state = SessionState::Playing;
        self.started_at = Some(Instant::now());
        info!(
            session = %hex::encode(&self.id[..4]),
            players = self.players.len(),
            "Match started"
        );
        Ok(self.fighters())
    }

    /// Queue a player's command for the next tick.
    pub fn enqueue_input(
        &mut self,
        fighter_id: FighterId,
        input: InputCommand,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Playing {
            return Err(SessionError::MatchNotInProgress);
        }

        if self.room.enqueue(fighter_id, input) {
            Ok(())
        } else {
            Err(SessionError::PlayerNotFound)
        }
    }

    /// Feed wall-clock time into the loop.
    pub fn advance(&mut self, elapsed_ms: f64) -> Vec<TickResult> {
        if self.state != SessionState::Playing {
            return Vec::new();
        }

        let results = self.room.advance(elapsed_ms);
        if self.room.winner().is_some() {
            self.state = SessionState::Ended;
        }
        results
    }

    /// Build this broadcast's per-recipient state, or nothing if no fighter
    /// moved past the delta gate.
    pub fn state_frames(&mut self) -> Result<Vec<(FighterId, Outbound)>, SessionError> {
        let snapshot = self.room.snapshot();
        let constants = *self.room.simulation().constants();

        let current: BTreeMap<FighterId, (CompactFighter, Option<u64>)> = snapshot
            .players
            .iter()
            .map(|p| {
                let compact = CompactFighter::from_state(p.fighter_id, &p.state, &constants);
                (p.fighter_id, (compact, p.last_processed_sequence))
            })
            .collect();

        let changed = current.len() != self.last_broadcast.len()
            || current.iter().any(|(id, (fighter, seq))| match self.last_broadcast.get(id) {
                Some((prev, prev_seq)) => should_send(prev, fighter) || prev_seq != seq,
                None => true,
            });
        if !changed {
            return Ok(Vec::new());
        }
        self.last_broadcast = current;

        let mut frames = Vec::with_capacity(self.players.len());
        for id in self.players.keys() {
            let outbound = if self.config.binary_state {
                Outbound::Frame(encode_frame(&snapshot, Some(*id), &constants)?)
            } else {
                Outbound::Message(ServerMessage::State(snapshot.clone()))
            };
            frames.push((*id, outbound));
        }
        Ok(frames)
    }

    /// Push state to every player without waiting on slow sockets.
    ///
    /// Returns how many frames were queued.
    pub fn push_state(&mut self) -> Result<usize, SessionError> {
        let frames = self.state_frames()?;
        let mut queued = 0;
        for (id, outbound) in frames {
            if let Some(player) = self.players.get(&id) {
                match player.sender.try_send(outbound) {
                    Ok(()) => queued += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(fighter = %id, "Outbound queue full, skipping state frame");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(fighter = %id, "Outbound channel closed");
                    }
                }
            }
        }
        Ok(queued)
    }

    /// Final message once the match has ended; closes the session.
    pub fn finalize(&mut self) -> Option<ServerMessage> {
        if self.state != SessionState::Ended {
            return None;
        }

        self.state = SessionState::Closed;
        let elapsed = self.started_at.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        info!(
            session = %hex::encode(&self.id[..4]),
            frame = self.room.frame(),
            winner = ?self.room.winner(),
            elapsed_secs = elapsed,
            "Match ended"
        );

        Some(ServerMessage::MatchEnd {
            frame: self.room.frame(),
            winner: self.room.winner(),
            state_hash: hex::encode(self.room.state_hash()),
        })
    }

    /// Address a control message to every player.
    ///
    /// Nothing is sent until [`Broadcast::deliver`] is awaited, which callers
    /// do after releasing the session lock.
    pub fn broadcast(&self, message: ServerMessage) -> Broadcast {
        Broadcast {
            senders: self.players.values().map(|p| p.sender.clone()).collect(),
            message,
        }
    }

    /// Current state.
    pub fn get_state(&self) -> SessionState {
        self.state
    }

    /// Current server frame.
    pub fn current_frame(&self) -> u64 {
        self.room.frame()
    }

    /// The authoritative loop.
    pub fn room(&self) -> &AuthoritativeLoop {
        &self.room
    }
}

/// A control message and the channels it goes to.
#[derive(Debug)]
pub struct Broadcast {
    senders: Vec<mpsc::Sender<Outbound>>,
    message: ServerMessage,
}

impl Broadcast {
    /// Queue the message on every channel, waiting on full ones.
    ///
    /// Returns how many channels accepted it.
    pub async fn deliver(self) -> usize {
        let mut delivered = 0;
        for sender in &self.senders {
            if sender.send(Outbound::Message(self.message.clone())).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of recipients.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// No recipients.
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No free slot.
    #[error("Session is full")]
    SessionFull,

    /// Joining after the lobby closed.
    #[error("Match in progress")]
    MatchInProgress,

    /// Input before start or after the end.
    #[error("Match not in progress")]
    MatchNotInProgress,

    /// Operation not valid in the current state.
    #[error("Invalid session state")]
    InvalidState,

    /// Start requested before everyone is ready.
    #[error("Players not ready")]
    PlayersNotReady,

    /// Unknown fighter.
    #[error("Player not found")]
    PlayerNotFound,

    /// Binary state frame could not be built.
    #[error("State encoding failed: {0}")]
    Codec(#[from] CodecError),
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Tracks live sessions.
pub struct SessionManager {
    sessions: RwLock<BTreeMap<SessionId, Arc<RwLock<MatchSession>>>>,
    sim: Simulation,
}

impl SessionManager {
    /// Manager whose sessions share one stage and constants table.
    pub fn new(sim: Simulation) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            sim,
        }
    }

    /// Stage and constants every session runs with.
    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// Create an empty session.
    pub async fn create_session(&self, config: SessionConfig) -> SessionId {
        let id = uuid::Uuid::new_v4().into_bytes();
        let session = MatchSession::new(id, config, self.sim.clone());

        let mut sessions = self.sessions.write().await;
        sessions.insert(id, Arc::new(RwLock::new(session)));

        id
    }

    /// Look up a session.
    pub async fn get_session(&self, id: &SessionId) -> Option<Arc<RwLock<MatchSession>>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// First lobby with a free slot.
    pub async fn find_open_session(&self) -> Option<SessionId> {
        let sessions = self.sessions.read().await;
        for (id, session) in sessions.iter() {
            if session.read().await.is_open() {
                return Some(*id);
            }
        }
        None
    }

    /// Drop a session.
    pub async fn remove_session(&self, id: &SessionId) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
    }

    /// Number of sessions.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Drop closed sessions.
    pub async fn cleanup(&self) {
        let mut sessions = self.sessions.write().await;
        let mut to_remove = Vec::new();

        for (id, session) in sessions.iter() {
            let s = session.read().await;
            if s.state == SessionState::Closed {
                to_remove.push(*id);
            }
        }

        for id in to_remove {
            sessions.remove(&id);
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Simulation::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::codec::decode_frame;
    use crate::FIXED_STEP_MS;

    fn create_test_session() -> MatchSession {
        MatchSession::new([0; 16], SessionConfig::default(), Simulation::default())
    }

    fn started_session() -> (MatchSession, mpsc::Receiver<Outbound>, mpsc::Receiver<Outbound>) {
        let mut session = create_test_session();
        let (tx1, rx1) = mpsc::channel(16);
        let (tx2, rx2) = mpsc::channel(16);
        let a = session.add_player("a".into(), tx1).unwrap();
        let b = session.add_player("b".into(), tx2).unwrap();
        session.set_player_ready(a, true);
        session.set_player_ready(b, true);
        session.start_match().unwrap();
        (session, rx1, rx2)
    }

    #[tokio::test]
    async fn test_add_remove_player() {
        let mut session = create_test_session();
        let (tx, _rx) = mpsc::channel(10);

        let id = session.add_player("p1".into(), tx).unwrap();
        assert_eq!(id, FighterId(0));
        assert_eq!(session.player_count(), 1);
        assert!(session.room().fighter(id).is_some());

        assert!(session.remove_player(id));
        assert_eq!(session.player_count(), 0);
        assert!(session.room().fighter(id).is_none());
        assert_eq!(session.state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_slots_are_reused() {
        let mut session = create_test_session();
        let (tx, _rx) = mpsc::channel(10);

        let a = session.add_player("a".into(), tx.clone()).unwrap();
        let b = session.add_player("b".into(), tx.clone()).unwrap();
        assert_eq!((a, b), (FighterId(0), FighterId(1)));

        session.remove_player(a);
        assert_eq!(session.add_player("c".into(), tx).unwrap(), FighterId(0));
    }

    #[tokio::test]
    async fn test_session_full() {
        let mut session = create_test_session();
        for _ in 0..2 {
            let (tx, _rx) = mpsc::channel(10);
            session.add_player(String::new(), tx).unwrap();
        }

        let (tx, _rx) = mpsc::channel(10);
        let result = session.add_player(String::new(), tx);
        assert!(matches!(result, Err(SessionError::SessionFull)));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_cannot_start_without_ready() {
        let mut session = create_test_session();
        let (tx1, _) = mpsc::channel(10);
        let (tx2, _) = mpsc::channel(10);

        let a = session.add_player("a".into(), tx1).unwrap();
        session.add_player("b".into(), tx2).unwrap();
        session.set_player_ready(a, true);

        assert!(!session.all_players_ready());
        let result = session.start_match();
        assert!(matches!(result, Err(SessionError::PlayersNotReady)));
    }

    #[tokio::test]
    async fn test_input_requires_playing() {
        let mut session = create_test_session();
        let (tx, _) = mpsc::channel(10);
        let id = session.add_player("a".into(), tx).unwrap();

        let result = session.enqueue_input(id, InputCommand::right().with_sequence(1));
        assert!(matches!(result, Err(SessionError::MatchNotInProgress)));
    }

    #[tokio::test]
    async fn test_start_and_advance() {
        let (mut session, _rx1, _rx2) = started_session();
        assert_eq!(session.state, SessionState::Playing);

        session.enqueue_input(FighterId(0), InputCommand::right().with_sequence(1)).unwrap();
        let ticks = session.advance(FIXED_STEP_MS);
        assert_eq!(ticks.len(), 1);
        assert_eq!(session.current_frame(), 1);
        assert_eq!(
            session.room().fighter(FighterId(0)).unwrap().last_processed_sequence,
            Some(1)
        );

        assert!(matches!(
            session.enqueue_input(FighterId(7), InputCommand::idle()),
            Err(SessionError::PlayerNotFound)
        ));
    }

    #[tokio::test]
    async fn test_push_state_binary_with_own_state() {
        let (mut session, mut rx1, mut rx2) = started_session();
        session.advance(FIXED_STEP_MS);

        assert_eq!(session.push_state().unwrap(), 2);

        let Some(Outbound::Frame(bytes)) = rx2.recv().await else {
            panic!("expected binary frame");
        };
        let frame = decode_frame(&bytes).unwrap();
        assert_eq!(frame.frame, 1);
        assert_eq!(frame.own_state, Some(session.room().fighter(FighterId(1)).unwrap().state));
        assert!(matches!(rx1.recv().await, Some(Outbound::Frame(_))));

        // Nothing moved since the last push
        assert_eq!(session.push_state().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_state_json() {
        let mut session = MatchSession::new(
            [1; 16],
            SessionConfig { binary_state: false, ..Default::default() },
            Simulation::default(),
        );
        let (tx, mut rx) = mpsc::channel(4);
        session.add_player("a".into(), tx).unwrap();

        session.push_state().unwrap();
        match rx.recv().await {
            Some(Outbound::Message(ServerMessage::State(snap))) => assert_eq!(snap.players.len(), 1),
            other => panic!("expected JSON state, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_mid_match_ends_session() {
        let (mut session, _rx1, _rx2) = started_session();
        session.advance(FIXED_STEP_MS);

        assert!(session.remove_player(FighterId(1)));
        assert!(session.room().fighter(FighterId(1)).is_none());
        assert_eq!(session.state, SessionState::Ended);
        assert!(session.advance(FIXED_STEP_MS).is_empty());

        match session.finalize() {
            Some(ServerMessage::MatchEnd { frame, winner, state_hash }) => {
                // The one left standing does not win by forfeit
                assert_eq!(winner, None);
                assert_eq!(frame, 1);
                assert_eq!(state_hash.len(), 64);
            }
            other => panic!("expected match end, got {:?}", other),
        }
        assert_eq!(session.state, SessionState::Closed);
        assert!(session.finalize().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_delivers_outside_the_lock() {
        let mut session = create_test_session();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        session.add_player("slow".into(), slow_tx.clone()).unwrap();
        session.add_player("fast".into(), fast_tx).unwrap();
        let session = Arc::new(RwLock::new(session));

        // The slow writer's queue is already full
        slow_tx.try_send(Outbound::Frame(vec![0])).unwrap();

        let pending = session.read().await.broadcast(ServerMessage::FighterLeft { fighter_id: FighterId(2) });
        assert_eq!(pending.len(), 2);
        let delivery = tokio::spawn(pending.deliver());

        // The game loop can still take the session while delivery waits
        let locked = tokio::time::timeout(std::time::Duration::from_millis(200), session.write()).await;
        assert!(locked.is_ok());
        drop(locked);

        // Draining the slow writer lets delivery finish
        assert_eq!(slow_rx.recv().await, Some(Outbound::Frame(vec![0])));
        assert_eq!(delivery.await.unwrap(), 2);
        assert!(matches!(slow_rx.recv().await, Some(Outbound::Message(ServerMessage::FighterLeft { .. }))));
        assert!(matches!(fast_rx.recv().await, Some(Outbound::Message(ServerMessage::FighterLeft { .. }))));
    }

    #[tokio::test]
    async fn test_session_manager() {
        let manager = SessionManager::default();

        let session_id = manager.create_session(SessionConfig::default()).await;
        assert_eq!(manager.session_count().await, 1);
        assert_eq!(manager.find_open_session().await, Some(session_id));

        let session = manager.get_session(&session_id).await.unwrap();
        for _ in 0..2 {
            let (tx, _rx) = mpsc::channel(1);
            session.write().await.add_player(String::new(), tx).unwrap();
        }
        assert_eq!(manager.find_open_session().await, None);

        manager.remove_session(&session_id).await;
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_closed() {
        let manager = SessionManager::default();
        let id = manager.create_session(SessionConfig::default()).await;
        manager.get_session(&id).await.unwrap().write().await.state = SessionState::Closed;

        manager.cleanup().await;
        assert_eq!(manager.session_count().await, 0);
    }
}
