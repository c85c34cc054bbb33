//! WebSocket Game Server
//!
//! Async WebSocket server for duel matches.
//! Routes client messages into sessions and runs one game loop per session.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::input::InputCommand;
use crate::game::state::FighterId;
use crate::game::step::Simulation;
use crate::network::protocol::{
    decode_input, ClientMessage, ErrorCode, ServerError, ServerMessage, WelcomeInfo,
};
use crate::network::session::{
    MatchSession, Outbound, SessionConfig, SessionError, SessionId, SessionManager, SessionState,
};

/// Outbound queue depth per connection.
const OUTBOUND_CAPACITY: usize = 64;

/// Grace period before an ended session is dropped.
const SESSION_LINGER: Duration = Duration::from_secs(5);

// =============================================================================
// CONFIG
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Tick rate for game simulation (Hz).
    pub tick_rate: u32,
    /// Interval between state broadcasts.
    pub broadcast_interval: Duration,
    /// Send state as binary frames.
    pub binary_state: bool,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 2567)),
            max_connections: 256,
            tick_rate: crate::TICK_RATE,
            broadcast_interval: Duration::from_millis(33),
            binary_state: true,
            idle_timeout: Duration::from_secs(300),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}

impl ServerConfig {
    /// Defaults overridden by `DUEL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "DUEL_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(rate) = parse_var::<u32>(&lookup, "DUEL_TICK_RATE")? {
            if rate == 0 {
                return Err(ConfigError::InvalidValue { var: "DUEL_TICK_RATE", value: "0".into() });
            }
            config.tick_rate = rate;
        }
        if let Some(ms) = parse_var(&lookup, "DUEL_BROADCAST_MS")? {
            config.broadcast_interval = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var(&lookup, "DUEL_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(binary) = parse_var(&lookup, "DUEL_BINARY_STATE")? {
            config.binary_state = binary;
        }

        Ok(config)
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick_rate: self.tick_rate,
            binary_state: self.binary_state,
            ..Default::default()
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

// =============================================================================
// SERVER
// =============================================================================

/// Connected client state.
struct ConnectedClient {
    /// Current session (if joined).
    session_id: Option<SessionId>,
    /// Fighter controlled in that session.
    fighter_id: Option<FighterId>,
    /// Last activity.
    last_activity: Instant,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Session manager.
    sessions: Arc<SessionManager>,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server on the default stage.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_simulation(config, Simulation::default())
    }

    /// Create a server whose matches use `sim`.
    pub fn with_simulation(config: ServerConfig, sim: Simulation) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            sessions: Arc::new(SessionManager::new(sim)),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, GameServerError> {
        Ok(TcpListener::bind(&self.config.bind_addr).await?)
    }

    /// Accept connections on `listener` until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);

        let cleanup_clients = self.clients.clone();
        let cleanup_sessions = self.sessions.clone();
        let idle_timeout = self.config.idle_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_clients, cleanup_sessions, idle_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let sessions = self.sessions.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);

            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    session_id: None,
                    fighter_id: None,
                    last_activity: Instant::now(),
                });
            }

            // Writer task: the only place that awaits the socket
            let sender_task = tokio::spawn(async move {
                while let Some(out) = msg_rx.recv().await {
                    let frame = match out {
                        Outbound::Frame(bytes) => Message::Binary(bytes),
                        Outbound::Message(msg) => match msg.to_json() {
                            Ok(text) => Message::Text(text),
                            Err(e) => {
                                error!("Failed to serialize message: {}", e);
                                continue;
                            }
                        },
                    };
                    if ws_sender.send(frame).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let client_msg = match msg {
                            Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                                Ok(m) => m,
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", addr, e);
                                    let _ = msg_tx.send(error_message(
                                        ErrorCode::InvalidMessage,
                                        "Invalid message format",
                                    )).await;
                                    continue;
                                }
                            },
                            Some(Ok(Message::Binary(data))) => match decode_input(&data) {
                                Ok(input) => ClientMessage::Input(input),
                                Err(e) => {
                                    debug!("Invalid binary input from {}: {}", addr, e);
                                    continue;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        {
                            let mut clients = clients.write().await;
                            if let Some(client) = clients.get_mut(&addr) {
                                client.last_activity = Instant::now();
                            }
                        }

                        Self::handle_client_message(
                            addr,
                            client_msg,
                            &clients,
                            &sessions,
                            &config,
                            &msg_tx,
                        ).await;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(Outbound::Message(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        })).await;
                        break;
                    }
                }
            }

            Self::handle_leave(addr, &clients, &sessions).await;
            clients.write().await.remove(&addr);
            sender_task.abort();

            info!("Client {} cleaned up", addr);
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        config: &ServerConfig,
        sender: &mpsc::Sender<Outbound>,
    ) {
        match msg {
            ClientMessage::Join { name } => {
                Self::handle_join(addr, name, clients, sessions, config, sender).await;
            }
            ClientMessage::Input(input) => {
                Self::handle_input(addr, input, clients, sessions, sender).await;
            }
            ClientMessage::Ready => {
                Self::handle_ready(addr, clients, sessions, config, sender).await;
            }
            ClientMessage::Ping { timestamp } => {
                let server_frame = match Self::client_session(addr, clients, sessions).await {
                    Some((session, _)) => session.read().await.current_frame(),
                    None => 0,
                };
                let _ = sender.send(Outbound::Message(ServerMessage::Pong {
                    timestamp,
                    server_frame,
                })).await;
            }
            ClientMessage::Leave => {
                Self::handle_leave(addr, clients, sessions).await;
            }
        }
    }

    /// Session and fighter for a connection.
    async fn client_session(
        addr: SocketAddr,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
    ) -> Option<(Arc<RwLock<MatchSession>>, FighterId)> {
        let (session_id, fighter_id) = {
            let clients = clients.read().await;
            let client = clients.get(&addr)?;
            (client.session_id?, client.fighter_id?)
        };
        let session = sessions.get_session(&session_id).await?;
        Some((session, fighter_id))
    }

    /// Handle a join: fill an open lobby or create one.
    async fn handle_join(
        addr: SocketAddr,
        name: String,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        config: &ServerConfig,
        sender: &mpsc::Sender<Outbound>,
    ) {
        if Self::client_session(addr, clients, sessions).await.is_some() {
            let _ = sender.send(error_message(ErrorCode::AlreadyInMatch, "Already in a match")).await;
            return;
        }

        let session_id = match sessions.find_open_session().await {
            Some(id) => id,
            None => sessions.create_session(config.session_config()).await,
        };

        let Some(session) = sessions.get_session(&session_id).await else {
            let _ = sender.send(error_message(ErrorCode::InternalError, "Session vanished")).await;
            return;
        };

        let joined = session.write().await.add_player(name, sender.clone());
        let fighter_id = match joined {
            Ok(id) => id,
            Err(e) => {
                let _ = sender.send(error_message(ErrorCode::MatchFull, e.to_string())).await;
                return;
            }
        };

        {
            let mut clients = clients.write().await;
            if let Some(client) = clients.get_mut(&addr) {
                client.session_id = Some(session_id);
                client.fighter_id = Some(fighter_id);
            }
        }

        let _ = sender.send(Outbound::Message(ServerMessage::Welcome(WelcomeInfo {
            session_id: hex::encode(session_id),
            fighter_id,
            tick_rate: config.tick_rate,
            step_ms: config.session_config().step_ms(),
            binary_state: config.binary_state,
            constants_hash: hex::encode(sessions.simulation().constants().hash()),
            stage_hash: hex::encode(sessions.simulation().stage().hash()),
            server_version: config.version.clone(),
        }))).await;

        info!("Client {} joined session {} as {}", addr, hex::encode(&session_id[..4]), fighter_id);
    }

    /// Handle player input.
    async fn handle_input(
        addr: SocketAddr,
        input: InputCommand,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        sender: &mpsc::Sender<Outbound>,
    ) {
        let Some((session, fighter_id)) = Self::client_session(addr, clients, sessions).await else {
            let _ = sender.send(error_message(ErrorCode::NotInMatch, "Join a match first")).await;
            return;
        };

        let queued = session.write().await.enqueue_input(fighter_id, input);
        if let Err(e) = queued {
            debug!("Input from {} dropped: {}", addr, e);
        }
    }

    /// Handle player ready.
    async fn handle_ready(
        addr: SocketAddr,
        clients: &Clients,
        sessions: &Arc<SessionManager>,
        config: &ServerConfig,
        sender: &mpsc::Sender<Outbound>,
    ) {
        let Some((session, fighter_id)) = Self::client_session(addr, clients, sessions).await else {
            let _ = sender.send(error_message(ErrorCode::NotInMatch, "Join a match first")).await;
            return;
        };

        let started = {
            let mut s = session.write().await;
            s.set_player_ready(fighter_id, true);
            debug!("Fighter {} marked ready", fighter_id);

            if s.all_players_ready() && s.get_state() == SessionState::Lobby {
                match s.start_match() {
                    Ok(fighters) => Some((fighters, s.current_frame())),
                    Err(e) => {
                        error!("Failed to start match: {}", e);
                        None
                    }
                }
            } else {
                None
            }
        };

        if let Some((fighters, frame)) = started {
            let start = session.read().await.broadcast(ServerMessage::MatchStart { frame, fighters });
            start.deliver().await;

            let session_clone = session.clone();
            let sessions_clone = sessions.clone();
            let broadcast_interval = config.broadcast_interval;
            let tick_rate = config.tick_rate;

            tokio::spawn(async move {
                Self::run_session_game_loop(session_clone, sessions_clone, tick_rate, broadcast_interval).await;
            });
        }
    }

    /// Handle player leave: fighter, queue and channel go together.
    async fn handle_leave(addr: SocketAddr, clients: &Clients, sessions: &Arc<SessionManager>) {
        let Some((session, fighter_id)) = Self::client_session(addr, clients, sessions).await else {
            return;
        };

        // Deliver after the lock is gone so a slow peer cannot stall the game loop
        let left = {
            let mut s = session.write().await;
            s.remove_player(fighter_id)
                .then(|| s.broadcast(ServerMessage::FighterLeft { fighter_id }))
        };
        if let Some(left) = left {
            left.deliver().await;
        }

        let mut clients = clients.write().await;
        if let Some(client) = clients.get_mut(&addr) {
            client.session_id = None;
            client.fighter_id = None;
        }
    }

    /// Run the game loop for a session.
    ///
    /// Ticks and broadcasts run on independent intervals. Ticks never wait on
    /// sockets; state frames are handed to writer tasks with `try_send`.
    async fn run_session_game_loop(
        session: Arc<RwLock<MatchSession>>,
        sessions: Arc<SessionManager>,
        tick_rate: u32,
        broadcast_interval: Duration,
    ) {
        let session_id = session.read().await.id;

        let tick_duration = Duration::from_micros(1_000_000 / tick_rate.max(1) as u64);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut broadcast_timer = interval(broadcast_interval);
        broadcast_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let elapsed_ms = now.duration_since(last).as_secs_f64() * 1000.0;
                    last = now;

                    let mut s = session.write().await;
                    if s.get_state() != SessionState::Playing {
                        break;
                    }
                    s.advance(elapsed_ms);
                }
                _ = broadcast_timer.tick() => {
                    let mut s = session.write().await;
                    if let Err(e) = s.push_state() {
                        error!("State broadcast failed: {}", e);
                    }
                }
            }
        }

        // Last state so clients see the deciding frame, then the result
        let end = {
            let mut s = session.write().await;
            if let Err(e) = s.push_state() {
                error!("State broadcast failed: {}", e);
            }
            s.finalize()
        };

        if let Some(end) = end {
            let end = session.read().await.broadcast(end);
            end.deliver().await;
        }

        tokio::time::sleep(SESSION_LINGER).await;
        sessions.remove_session(&session_id).await;
        debug!("Session {} removed", hex::encode(&session_id[..4]));
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(clients: Clients, sessions: Arc<SessionManager>, idle_timeout: Duration) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let now = Instant::now();
            let idle: Vec<_> = {
                let clients = clients.read().await;
                clients.iter()
                    .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                    .map(|(addr, _)| *addr)
                    .collect()
            };

            for addr in idle {
                Self::handle_leave(addr, &clients, &sessions).await;
                clients.write().await.remove(&addr);
                info!("Removed idle client {}", addr);
            }

            sessions.cleanup().await;
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.session_count().await
    }
}

fn error_message(code: ErrorCode, message: impl Into<String>) -> Outbound {
    Outbound::Message(ServerMessage::Error(ServerError::new(code, message)))
}
