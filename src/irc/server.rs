/// Gateway core: shared state, connection lifecycle and presence.
///
/// All shared mutation goes through the dispatcher while holding the state
/// write lock, so per-channel delivery order matches processing order.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::bridge::OutboundBridge;
use super::channel::Channel;
use super::codec::Inbound;
use super::command::Command;
use super::error::GatewayError;
use super::handlers;
use super::identity::{IdentityResolver, Presence};
use super::message::{Message, ParseError};
use super::metrics;
use super::sanitize::Sanitizer;

/// Version string reported in the welcome sequence.
pub const VERSION: &str = concat!("swarmgate-", env!("CARGO_PKG_VERSION"));

/// Reason broadcast when a connection closes without an explicit QUIT.
pub const DEFAULT_QUIT_REASON: &str = "Connection closed";

/// Reason broadcast when a newer AUTH replaces a session.
pub const TAKEOVER_REASON: &str = "Session replaced by a new connection";

pub type ConnectionId = u64;

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Gateway-level settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Prefix on every server-originated line.
    pub server_name: String,
    /// Network name shown in the welcome sequence.
    pub network: String,
    /// Delay between an authenticated disconnect and the offline flip.
    pub presence_grace: Duration,
    /// Keepalive probe interval per connection.
    pub keepalive: Duration,
    /// Human-readable start time for `003`.
    pub created: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_name: "swarm.local".into(),
            network: "Swarm".into(),
            presence_grace: Duration::from_secs(30),
            keepalive: Duration::from_secs(30),
            created: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}

/// What the connection task should do with a queued item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Line(Message),
    /// Flush and close the socket.
    Close,
}

/// The authenticated side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSession {
    pub id: String,
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

/// One live socket.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub tx: mpsc::UnboundedSender<Outbound>,
    /// `None` until AUTH succeeds, and again after a takeover.
    pub agent: Option<AgentSession>,
    /// Joined channel ids.
    pub channels: BTreeSet<String>,
    /// Unix seconds.
    pub connected_at: u64,
    pub last_activity: Instant,
    /// Reason given with an explicit QUIT.
    pub quit_reason: Option<String>,
}

/// Shared gateway state.
#[derive(Debug, Default)]
pub struct GatewayState {
    /// Every live socket.
    pub connections: HashMap<ConnectionId, Connection>,
    /// Agent id → its one authenticated connection.
    pub agents: HashMap<String, ConnectionId>,
    /// Channel id → channel.
    pub channels: BTreeMap<String, Channel>,
    /// Agent id → (command name → description).
    pub commands: HashMap<String, BTreeMap<String, String>>,
    /// Agents whose presence is online, grace window included.
    pub online: HashSet<String>,
    /// Pending offline flips, cancelled by a new AUTH.
    pending_offline: HashMap<String, JoinHandle<()>>,
    pub total_messages: u64,
    next_id: ConnectionId,
}

/// Shared, thread-safe gateway state.
pub type SharedState = Arc<RwLock<GatewayState>>;

impl GatewayState {
    /// The session behind an agent's live connection.
    pub fn session(&self, agent_id: &str) -> Option<&AgentSession> {
        let conn_id = self.agents.get(agent_id)?;
        self.connections.get(conn_id)?.agent.as_ref()
    }

    /// Whether `conn` is still the agent's authenticated connection.
    pub fn holds_session(&self, conn: ConnectionId, agent_id: &str) -> bool {
        self.agents.get(agent_id) == Some(&conn)
    }

    /// Display name for an agent id, falling back to the id.
    pub fn display_name<'a>(&'a self, agent_id: &'a str) -> &'a str {
        self.session(agent_id)
            .map(|s| s.name.as_str())
            .unwrap_or(agent_id)
    }

    /// Resolve a connected agent by id, or by name case-insensitively.
    pub fn find_connected(&self, name_or_id: &str) -> Option<&Connection> {
        if let Some(conn) = self
            .agents
            .get(name_or_id)
            .and_then(|id| self.connections.get(id))
        {
            return Some(conn);
        }
        self.agents
            .values()
            .filter_map(|id| self.connections.get(id))
            .find(|c| {
                c.agent
                    .as_ref()
                    .is_some_and(|a| a.name.eq_ignore_ascii_case(name_or_id))
            })
    }

    /// Queue a line for one agent. Returns whether it had a live connection.
    pub fn send_to_agent(&self, agent_id: &str, msg: &Message) -> bool {
        match self.agents.get(agent_id).and_then(|id| self.connections.get(id)) {
            Some(conn) => conn.tx.send(Outbound::Line(msg.clone())).is_ok(),
            None => false,
        }
    }

    /// Queue a line for every member of a channel, optionally skipping one agent.
    pub fn broadcast_channel(&self, channel_id: &str, msg: &Message, except: Option<&str>) {
        let Some(channel) = self.channels.get(channel_id) else {
            return;
        };
        for member in &channel.members {
            if except != Some(member.as_str()) {
                self.send_to_agent(member, msg);
            }
        }
    }

    fn authenticated_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.agent.is_some())
            .count()
    }

    pub(crate) fn refresh_gauges(&self) {
        metrics::gauges(
            self.connections.len(),
            self.authenticated_count(),
            self.channels.len(),
            self.online.len(),
        );
    }
}

/// Snapshot handed to collaborators (HTTP stats endpoint, dashboards).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub authenticated: usize,
    pub total_messages: u64,
    pub online_agents: usize,
    pub channels: usize,
    /// Agent name → (command → description).
    pub commands: BTreeMap<String, BTreeMap<String, String>>,
}

/// The connection's view of itself while one line is being handled.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: ConnectionId,
    pub tx: mpsc::UnboundedSender<Outbound>,
    pub agent: Option<AgentSession>,
}

impl Caller {
    /// Reply target: the agent name, or `*` before AUTH.
    pub fn nick(&self) -> &str {
        self.agent.as_ref().map(|a| a.name.as_str()).unwrap_or("*")
    }

    pub fn send(&self, msg: Message) {
        let _ = self.tx.send(Outbound::Line(msg));
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// The gateway: shared state plus the collaborators the dispatcher consumes.
#[derive(Clone)]
pub struct Gateway {
    pub state: SharedState,
    pub config: Arc<GatewayConfig>,
    pub identity: Arc<dyn IdentityResolver>,
    pub sanitizer: Arc<dyn Sanitizer>,
    pub bridge: Arc<dyn OutboundBridge>,
    /// Serializes identity-store presence writes.
    presence_writes: Arc<Mutex<()>>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        identity: Arc<dyn IdentityResolver>,
        sanitizer: Arc<dyn Sanitizer>,
        bridge: Arc<dyn OutboundBridge>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(GatewayState::default())),
            config: Arc::new(config),
            identity,
            sanitizer,
            bridge,
            presence_writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn server(&self) -> &str {
        &self.config.server_name
    }

    /// A numeric reply; the last parameter is written as trailing.
    pub fn numeric(&self, code: &str, nick: &str, params: Vec<String>) -> Message {
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(nick.to_owned());
        all.extend(params);
        Message::with_trailing(Some(self.server().to_owned()), code, all)
    }

    pub fn notice(&self, nick: &str, text: impl Into<String>) -> Message {
        Message::with_trailing(
            Some(self.server().to_owned()),
            "NOTICE",
            vec![nick.to_owned(), text.into()],
        )
    }

    pub fn reply_error(&self, caller: &Caller, err: &GatewayError) {
        metrics::error_reply(err.numeric());
        caller.send(err.to_reply(self.server(), caller.nick()));
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Register a freshly opened socket. The returned receiver carries
    /// everything destined for it.
    pub async fn connect(&self, addr: SocketAddr) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let banner = self.notice(
            "*",
            format!(
                "*** Welcome to {}. Authenticate with AUTH <api_key>",
                self.config.network
            ),
        );
        let _ = tx.send(Outbound::Line(banner));

        let mut st = self.state.write().await;
        st.next_id += 1;
        let id = st.next_id;
        st.connections.insert(
            id,
            Connection {
                id,
                addr,
                tx,
                agent: None,
                channels: BTreeSet::new(),
                connected_at: unix_now(),
                last_activity: Instant::now(),
                quit_reason: None,
            },
        );
        st.refresh_gauges();
        info!(conn = id, %addr, "connection opened");
        (id, rx)
    }

    /// Handle one inbound unit from the transport.
    pub async fn handle_inbound(&self, id: ConnectionId, inbound: Inbound) {
        match inbound {
            Inbound::Line(line) => self.handle_line(id, &line).await,
            Inbound::TooLong => {
                if let Some(caller) = self.caller(id).await {
                    self.reply_error(&caller, &GatewayError::InputTooLong);
                }
            }
        }
    }

    /// Parse, gate and dispatch one line. Every rejection becomes one reply.
    pub async fn handle_line(&self, id: ConnectionId, line: &str) {
        let Some(caller) = self.caller(id).await else {
            return;
        };

        let msg = match Message::parse(line) {
            Ok(msg) => msg,
            Err(ParseError::Empty) => return,
            Err(e) => {
                warn!(conn = id, "parse error: {e}");
                self.reply_error(&caller, &GatewayError::UnknownCommand("*".into()));
                return;
            }
        };
        let verb = msg.verb();
        debug!(conn = id, agent = caller.nick(), %verb, "line");
        metrics::line(&verb);

        if caller.agent.is_none() && !Command::allowed_before_auth(&verb) {
            self.reply_error(&caller, &GatewayError::NotAuthenticated);
            return;
        }

        let dispatched = AssertUnwindSafe(async {
            match Command::from_message(&msg) {
                Ok(cmd) => handlers::dispatch(self, &caller, cmd).await,
                Err(err) => Err(err),
            }
        })
        .catch_unwind()
        .await;

        match dispatched {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.reply_error(&caller, &err),
            Err(_) => error!(conn = id, %verb, "handler panicked; connection kept open"),
        }
    }

    /// Snapshot the caller and bump its activity timestamp.
    async fn caller(&self, id: ConnectionId) -> Option<Caller> {
        let mut st = self.state.write().await;
        let conn = st.connections.get_mut(&id)?;
        conn.last_activity = Instant::now();
        Some(Caller {
            id,
            tx: conn.tx.clone(),
            agent: conn.agent.clone(),
        })
    }

    /// Tear down a closed socket. Authenticated closes broadcast QUIT, drop
    /// registered commands and start the presence grace window.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut st = self.state.write().await;
        let reason = st
            .connections
            .get(&id)
            .and_then(|c| c.quit_reason.clone())
            .unwrap_or_else(|| DEFAULT_QUIT_REASON.into());

        if let Some(agent) = detach(&mut st, id, &reason) {
            self.schedule_offline(&mut st, &agent.id);
            info!(conn = id, agent = %agent.name, %reason, "agent disconnected");
        }
        if let Some(conn) = st.connections.remove(&id) {
            debug!(conn = id, addr = %conn.addr, "connection removed");
        }
        st.refresh_gauges();
    }

    /// Close the prior session of an agent that is authenticating again.
    pub(crate) fn take_over(&self, st: &mut GatewayState, old: ConnectionId) {
        let Some(tx) = st.connections.get(&old).map(|c| c.tx.clone()) else {
            return;
        };
        if let Some(agent) = detach(st, old, TAKEOVER_REASON) {
            info!(conn = old, agent = %agent.name, "session taken over");
            metrics::takeover();
        }
        let _ = tx.send(Outbound::Line(Message::with_trailing(
            None,
            "ERROR",
            vec![format!("Closing link: {}", TAKEOVER_REASON.to_lowercase())],
        )));
        let _ = tx.send(Outbound::Close);
    }

    // ── Presence ─────────────────────────────────────────────────

    /// Mark an agent online, cancelling any pending offline flip.
    pub(crate) fn mark_online(&self, st: &mut GatewayState, agent_id: &str) {
        if let Some(pending) = st.pending_offline.remove(agent_id) {
            pending.abort();
            debug!(agent = agent_id, "offline flip cancelled by reconnect");
        }
        st.online.insert(agent_id.to_owned());
    }

    fn schedule_offline(&self, st: &mut GatewayState, agent_id: &str) {
        let gateway = self.clone();
        let agent = agent_id.to_owned();
        let grace = self.config.presence_grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            gateway.expire_presence(&agent).await;
        });
        if let Some(previous) = st.pending_offline.insert(agent_id.to_owned(), handle) {
            previous.abort();
        }
    }

    async fn expire_presence(&self, agent_id: &str) {
        {
            let mut st = self.state.write().await;
            st.pending_offline.remove(agent_id);
            if st.agents.contains_key(agent_id) {
                return;
            }
            st.online.remove(agent_id);
            st.refresh_gauges();
        }
        info!(agent = agent_id, "agent offline");
        self.sync_presence(agent_id).await;
    }

    /// Push the agent's current presence to the identity store. Writes are
    /// serialized and read the state under that serialization, so the last
    /// write always matches the latest transition. Failures are logged only.
    pub(crate) async fn sync_presence(&self, agent_id: &str) {
        let _serial = self.presence_writes.lock().await;
        let presence = if self.state.read().await.online.contains(agent_id) {
            Presence::Online
        } else {
            Presence::Offline
        };
        if let Err(e) = self.identity.set_presence(agent_id, presence).await {
            warn!(agent = agent_id, ?presence, "presence update failed: {e}");
        }
    }

    // ── Welcome ──────────────────────────────────────────────────

    /// Greeting, server banner and MOTD block sent after a successful AUTH.
    pub(crate) fn welcome(&self, st: &GatewayState, nick: &str) -> Vec<Message> {
        let server = self.server().to_owned();
        let network = &self.config.network;
        let mut out = vec![
            self.numeric("001", nick, vec![format!("Welcome to {network}, {nick}!")]),
            self.numeric(
                "002",
                nick,
                vec![format!("Your host is {server}, running version {VERSION}")],
            ),
            self.numeric(
                "003",
                nick,
                vec![format!("This server was created {}", self.config.created)],
            ),
            Message::new(
                Some(server.clone()),
                "004",
                vec![nick.into(), server.clone(), VERSION.into(), "o".into(), "ob".into()],
            ),
            self.numeric("375", nick, vec![format!("- {server} Message of the Day -")]),
        ];
        let motd = [
            format!("- {network}: agents coordinate here."),
            format!(
                "- {} agent(s) online, {} channel(s) open.",
                st.online.len(),
                st.channels.len()
            ),
            "- Type HELP for the command list.".to_owned(),
        ];
        for line in motd {
            out.push(self.numeric("372", nick, vec![line]));
        }
        out.push(self.numeric("376", nick, vec!["End of /MOTD command".into()]));
        out
    }

    // ── Stats ────────────────────────────────────────────────────

    pub async fn stats(&self) -> GatewayStats {
        let st = self.state.read().await;
        let commands = st
            .commands
            .iter()
            .filter(|(_, cmds)| !cmds.is_empty())
            .map(|(agent_id, cmds)| (st.display_name(agent_id).to_owned(), cmds.clone()))
            .collect();
        GatewayStats {
            connections: st.connections.len(),
            authenticated: st.authenticated_count(),
            total_messages: st.total_messages,
            online_agents: st.online.len(),
            channels: st.channels.len(),
            commands,
        }
    }
}

/// Strip the authenticated session from a connection: broadcast QUIT to
/// co-members, leave every joined channel, clear registered commands and
/// release the agent index entry.
fn detach(st: &mut GatewayState, id: ConnectionId, reason: &str) -> Option<AgentSession> {
    let conn = st.connections.get_mut(&id)?;
    let agent = conn.agent.take()?;
    let joined = std::mem::take(&mut conn.channels);

    let quit = Message::with_trailing(Some(agent.name.clone()), "QUIT", vec![reason.to_owned()]);
    let mut notify: BTreeSet<String> = BTreeSet::new();
    for channel_id in &joined {
        if let Some(channel) = st.channels.get_mut(channel_id) {
            channel.members.remove(&agent.id);
            notify.extend(channel.members.iter().cloned());
        }
    }
    for member in &notify {
        st.send_to_agent(member, &quit);
    }

    st.commands.remove(&agent.id);
    if st.agents.get(&agent.id) == Some(&id) {
        st.agents.remove(&agent.id);
    }
    Some(agent)
}
