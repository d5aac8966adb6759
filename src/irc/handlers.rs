/// Verb handlers. Each returns `Err` for exactly one reply line; the
/// dispatcher renders it. Successful replies are sent inline.
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::bridge::{spawn_publish, BridgeEvent};
use super::channel::{
    channel_id, is_channel_name, normalize_name, Channel, ModeChange, ModeFlag, Topic,
};
use super::command::{Command, HELP_LINES};
use super::error::GatewayError;
use super::identity::AgentIdentity;
use super::message::Message;
use super::metrics;
use super::server::{unix_now, AgentSession, Caller, Gateway, GatewayState, Outbound};

type HandlerResult = Result<(), GatewayError>;

/// True when a newer AUTH has taken the agent's session since the caller
/// was snapshotted. Replaced sessions act on nothing.
fn replaced(st: &GatewayState, caller: &Caller, agent: &AgentSession) -> bool {
    if st.holds_session(caller.id, &agent.id) {
        return false;
    }
    debug!(conn = caller.id, agent = %agent.name, "session replaced mid-line; dropped");
    true
}

pub(crate) async fn dispatch(gw: &Gateway, caller: &Caller, command: Command) -> HandlerResult {
    // Pre-auth verbs first; everything below needs a session.
    let agent = match command {
        Command::Auth { token } => return auth(gw, caller, &token).await,
        Command::Ping { token } => return ping(gw, caller, &token),
        Command::Pong => return Ok(()),
        Command::Quit { reason } => return quit(gw, caller, reason).await,
        _ => match &caller.agent {
            Some(agent) => agent,
            None => return Err(GatewayError::NotAuthenticated),
        },
    };

    match command {
        Command::Join { channels } => {
            for raw in &channels {
                if let Err(e) = join(gw, caller, agent, raw).await {
                    gw.reply_error(caller, &e);
                }
            }
            Ok(())
        }
        Command::Part { channels, reason } => {
            for raw in &channels {
                if let Err(e) = part(gw, caller, agent, raw, reason.as_deref()).await {
                    gw.reply_error(caller, &e);
                }
            }
            Ok(())
        }
        Command::Privmsg { target, text } => privmsg(gw, caller, agent, &target, &text).await,
        Command::Who { channel } => who(gw, caller, &channel).await,
        Command::List => list(gw, caller).await,
        Command::Whois { target } => whois(gw, caller, &target).await,
        Command::Names { channel } => names(gw, caller, &channel).await,
        Command::Topic { channel, text } => match text {
            None => topic_query(gw, caller, &channel).await,
            Some(text) => topic_set(gw, caller, agent, &channel, &text).await,
        },
        Command::Query { target, verb, data } => query(gw, caller, agent, &target, &verb, &data).await,
        Command::Register { name, description } => register(gw, caller, agent, name, description).await,
        Command::Commands { agent: target } => commands(gw, caller, target.as_deref()).await,
        Command::Cmd { target, command, args } => cmd(gw, caller, agent, &target, &command, &args).await,
        Command::Mode { channel, change, target } => {
            mode(gw, caller, agent, &channel, change.as_deref(), target.as_deref()).await
        }
        Command::Kick { channel, target, reason } => {
            kick(gw, caller, agent, &channel, &target, reason.as_deref()).await
        }
        Command::Help => {
            for line in HELP_LINES {
                caller.send(gw.notice(caller.nick(), *line));
            }
            caller.send(gw.notice(caller.nick(), "End of HELP"));
            Ok(())
        }
        Command::Auth { .. } | Command::Ping { .. } | Command::Pong | Command::Quit { .. } => Ok(()),
    }
}

// ── Connection state ─────────────────────────────────────────────

async fn auth(gw: &Gateway, caller: &Caller, token: &str) -> HandlerResult {
    if caller.agent.is_some() {
        return Err(GatewayError::AlreadyAuthenticated);
    }

    let identity = match gw.identity.lookup(token).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            metrics::auth(false);
            warn!(conn = caller.id, "auth failed: unknown credential");
            return Err(GatewayError::AuthFailed);
        }
        Err(e) => {
            metrics::auth(false);
            warn!(conn = caller.id, "auth failed: {e}");
            return Err(GatewayError::AuthFailed);
        }
    };

    let session = AgentSession {
        id: identity.id.clone(),
        name: identity.name.clone(),
        description: identity.description.clone(),
        capabilities: identity.capabilities.clone(),
    };

    {
        let mut st = gw.state.write().await;
        match st.connections.get(&caller.id) {
            // Closed while the lookup was in flight.
            None => return Ok(()),
            Some(conn) if conn.agent.is_some() => return Err(GatewayError::AlreadyAuthenticated),
            Some(_) => {}
        }

        if let Some(&old) = st.agents.get(&session.id) {
            if old != caller.id {
                gw.take_over(&mut st, old);
            }
        }

        if let Some(conn) = st.connections.get_mut(&caller.id) {
            conn.agent = Some(session.clone());
        }
        st.agents.insert(session.id.clone(), caller.id);
        gw.mark_online(&mut st, &session.id);

        for line in gw.welcome(&st, &session.name) {
            caller.send(line);
        }
        st.refresh_gauges();
    }

    metrics::auth(true);
    info!(conn = caller.id, agent = %session.name, id = %session.id, "agent authenticated");
    gw.sync_presence(&session.id).await;
    Ok(())
}

fn ping(gw: &Gateway, caller: &Caller, token: &str) -> HandlerResult {
    let token = if token.is_empty() { gw.server() } else { token };
    caller.send(Message::with_trailing(
        Some(gw.server().to_owned()),
        "PONG",
        vec![gw.server().to_owned(), token.to_owned()],
    ));
    Ok(())
}

async fn quit(gw: &Gateway, caller: &Caller, reason: Option<String>) -> HandlerResult {
    let reason = reason.unwrap_or_else(|| super::server::DEFAULT_QUIT_REASON.into());
    {
        let mut st = gw.state.write().await;
        if let Some(conn) = st.connections.get_mut(&caller.id) {
            conn.quit_reason = Some(reason.clone());
        }
    }
    caller.send(Message::with_trailing(
        None,
        "ERROR",
        vec![format!("Closing link: {} ({reason})", caller.nick())],
    ));
    caller.close();
    Ok(())
}

// ── Channels ─────────────────────────────────────────────────────

async fn join(gw: &Gateway, caller: &Caller, agent: &AgentSession, raw: &str) -> HandlerResult {
    let name = normalize_name(raw)?;
    let id = channel_id(&name);
    let mut st = gw.state.write().await;
    if replaced(&st, caller, agent) {
        return Ok(());
    }

    if let Some(channel) = st.channels.get(&id) {
        if channel.is_banned(&agent.id) {
            return Err(GatewayError::BannedFromChannel(channel.name.clone()));
        }
    }

    let (chan_name, topic, newly_joined) = {
        let channel = st.channels.entry(id.clone()).or_insert_with(|| {
            info!(channel = %name, creator = %agent.name, "channel created");
            Channel::new(&name, &agent.id, unix_now())
        });
        let newly_joined = channel.members.insert(agent.id.clone());
        (channel.name.clone(), channel.topic.clone(), newly_joined)
    };
    if let Some(conn) = st.connections.get_mut(&caller.id) {
        conn.channels.insert(id.clone());
    }

    if newly_joined {
        let join = Message::new(Some(agent.name.clone()), "JOIN", vec![chan_name.clone()]);
        st.broadcast_channel(&id, &join, None);
        debug!(channel = %chan_name, agent = %agent.name, "joined");
    }
    if let Some(topic) = topic {
        send_topic(gw, caller, &chan_name, &topic);
    }
    send_names(gw, caller, &st, &id);
    st.refresh_gauges();
    Ok(())
}

async fn part(
    gw: &Gateway,
    caller: &Caller,
    agent: &AgentSession,
    raw: &str,
    reason: Option<&str>,
) -> HandlerResult {
    let name = normalize_name(raw)?;
    let id = channel_id(&name);
    let mut st = gw.state.write().await;
    if replaced(&st, caller, agent) {
        return Ok(());
    }

    let chan_name = match st.channels.get(&id) {
        Some(channel) if channel.is_member(&agent.id) => channel.name.clone(),
        Some(channel) => return Err(GatewayError::NotOnChannel(channel.name.clone())),
        None => return Err(GatewayError::NotOnChannel(name)),
    };

    let mut params = vec![chan_name.clone()];
    params.extend(reason.map(str::to_owned));
    let part = Message::with_trailing(Some(agent.name.clone()), "PART", params);
    st.broadcast_channel(&id, &part, None);

    if let Some(channel) = st.channels.get_mut(&id) {
        channel.members.remove(&agent.id);
    }
    if let Some(conn) = st.connections.get_mut(&caller.id) {
        conn.channels.remove(&id);
    }
    debug!(channel = %chan_name, agent = %agent.name, "parted");
    Ok(())
}

async fn names(gw: &Gateway, caller: &Caller, raw: &str) -> HandlerResult {
    let id = channel_id(&normalize_name(raw)?);
    let st = gw.state.read().await;
    if st.channels.contains_key(&id) {
        send_names(gw, caller, &st, &id);
    }
    Ok(())
}

async fn list(gw: &Gateway, caller: &Caller) -> HandlerResult {
    let nick = caller.nick();
    let st = gw.state.read().await;
    caller.send(gw.numeric("321", nick, vec!["Channel".into(), "Users  Name".into()]));
    for channel in st.channels.values() {
        let topic = channel.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default();
        caller.send(gw.numeric(
            "322",
            nick,
            vec![channel.name.clone(), channel.members.len().to_string(), topic],
        ));
    }
    caller.send(gw.numeric("323", nick, vec!["End of /LIST".into()]));
    Ok(())
}

async fn who(gw: &Gateway, caller: &Caller, raw: &str) -> HandlerResult {
    let id = channel_id(&normalize_name(raw)?);
    let nick = caller.nick();
    let st = gw.state.read().await;
    let Some(channel) = st.channels.get(&id) else {
        return Err(GatewayError::NoSuchChannel(raw.to_owned()));
    };

    for member in &channel.members {
        let (name, description) = match st.session(member) {
            Some(s) => (s.name.clone(), s.description.clone()),
            None => (member.clone(), String::new()),
        };
        let here = if st.online.contains(member) { "H" } else { "G" };
        let flags = format!("{here}{}", channel.prefix_for(member));
        caller.send(gw.numeric(
            "352",
            nick,
            vec![
                channel.name.clone(),
                member.clone(),
                "swarm".into(),
                gw.server().to_owned(),
                name,
                flags,
                format!("0 {description}").trim_end().to_owned(),
            ],
        ));
    }
    caller.send(gw.numeric("315", nick, vec![channel.name.clone(), "End of /WHO list".into()]));
    Ok(())
}

async fn topic_query(gw: &Gateway, caller: &Caller, raw: &str) -> HandlerResult {
    let id = channel_id(&normalize_name(raw)?);
    let st = gw.state.read().await;
    let Some(channel) = st.channels.get(&id) else {
        return Err(GatewayError::NoSuchChannel(raw.to_owned()));
    };
    match &channel.topic {
        Some(topic) => send_topic(gw, caller, &channel.name, topic),
        None => caller.send(gw.numeric(
            "331",
            caller.nick(),
            vec![channel.name.clone(), "No topic is set".into()],
        )),
    }
    Ok(())
}

async fn topic_set(
    gw: &Gateway,
    caller: &Caller,
    agent: &AgentSession,
    raw: &str,
    text: &str,
) -> HandlerResult {
    let id = channel_id(&normalize_name(raw)?);
    let clean = gw.sanitizer.sanitize(text);
    let mut st = gw.state.write().await;
    if replaced(&st, caller, agent) {
        return Ok(());
    }

    let chan_name = {
        let Some(channel) = st.channels.get_mut(&id) else {
            return Err(GatewayError::NoSuchChannel(raw.to_owned()));
        };
        if !channel.is_member(&agent.id) {
            return Err(GatewayError::NotOnChannel(channel.name.clone()));
        }
        if !channel.may_set_topic(&agent.id) {
            return Err(GatewayError::ChanOpPrivsNeeded(channel.name.clone()));
        }
        channel.topic = (!clean.is_empty()).then(|| Topic {
            text: clean.clone(),
            set_by: agent.name.clone(),
            set_at: unix_now(),
        });
        channel.name.clone()
    };

    let msg = Message::with_trailing(
        Some(agent.name.clone()),
        "TOPIC",
        vec![chan_name.clone(), clean],
    );
    st.broadcast_channel(&id, &msg, None);
    info!(channel = %chan_name, agent = %agent.name, "topic changed");
    Ok(())
}

fn send_topic(gw: &Gateway, caller: &Caller, channel: &str, topic: &Topic) {
    let nick = caller.nick();
    caller.send(gw.numeric("332", nick, vec![channel.to_owned(), topic.text.clone()]));
    caller.send(Message::new(
        Some(gw.server().to_owned()),
        "333",
        vec![
            nick.to_owned(),
            channel.to_owned(),
            topic.set_by.clone(),
            topic.set_at.to_string(),
        ],
    ));
}

fn send_names(gw: &Gateway, caller: &Caller, st: &GatewayState, id: &str) {
    let Some(channel) = st.channels.get(id) else {
        return;
    };
    let mut names: Vec<String> = channel
        .members
        .iter()
        .map(|m| format!("{}{}", channel.prefix_for(m), st.display_name(m)))
        .collect();
    names.sort_by_key(|n| n.to_lowercase());
    let nick = caller.nick();
    caller.send(gw.numeric("353", nick, vec!["=".into(), channel.name.clone(), names.join(" ")]));
    caller.send(gw.numeric("366", nick, vec![channel.name.clone(), "End of /NAMES list".into()]));
}

// ── Messaging ────────────────────────────────────────────────────

async fn privmsg(
    gw: &Gateway,
    caller: &Caller,
    agent: &AgentSession,
    target: &str,
    text: &str,
) -> HandlerResult {
    let clean = gw.sanitizer.sanitize(text);

    if is_channel_name(target) {
        let id = channel_id(target);
        let chan_name = {
            let mut st = gw.state.write().await;
            if replaced(&st, caller, agent) {
                return Ok(());
            }
            let chan_name = match st.channels.get(&id) {
                None => return Err(GatewayError::NoSuchChannel(target.to_owned())),
                Some(channel) if !channel.is_member(&agent.id) => {
                    return Err(GatewayError::CannotSendToChannel(channel.name.clone()));
                }
                Some(channel) => channel.name.clone(),
            };
            let msg = Message::with_trailing(
                Some(agent.name.clone()),
                "PRIVMSG",
                vec![chan_name.clone(), clean.clone()],
            );
            st.broadcast_channel(&id, &msg, Some(&agent.id));
            st.total_messages += 1;
            chan_name
        };
        metrics::message_delivered();

        spawn_publish(
            gw.bridge.clone(),
            id,
            BridgeEvent {
                channel: chan_name,
                sender_id: agent.id.clone(),
                sender: agent.name.clone(),
                text: clean,
                timestamp: Utc::now(),
            },
        );
        return Ok(());
    }

    let mut st = gw.state.write().await;
    if replaced(&st, caller, agent) {
        return Ok(());
    }
    let Some(recipient) = st
        .find_connected(target)
        .and_then(|c| c.agent.as_ref())
        .map(|a| (a.id.clone(), a.name.clone()))
    else {
        return Err(GatewayError::NoSuchNick(target.to_owned()));
    };
    let msg = Message::with_trailing(
        Some(agent.name.clone()),
        "PRIVMSG",
        vec![recipient.1, clean],
    );
    st.send_to_agent(&recipient.0, &msg);
    st.total_messages += 1;
    metrics::message_delivered();
    Ok(())
}

// ── Identity queries ─────────────────────────────────────────────

/// What WHOIS reports about a connected agent.
struct LiveWhois {
    session: AgentSession,
    channels: Vec<String>,
    commands: Vec<String>,
    idle: u64,
    signon: u64,
}

async fn whois(gw: &Gateway, caller: &Caller, target: &str) -> HandlerResult {
    let live = {
        let st = gw.state.read().await;
        st.find_connected(target).and_then(|conn| {
            let session = conn.agent.clone()?;
            let channels = conn
                .channels
                .iter()
                .filter_map(|id| st.channels.get(id))
                .map(|ch| format!("{}{}", ch.prefix_for(&session.id), ch.name))
                .collect();
            let commands = st
                .commands
                .get(&session.id)
                .map(|cmds| cmds.keys().cloned().collect())
                .unwrap_or_default();
            Some(LiveWhois {
                idle: Instant::now().duration_since(conn.last_activity).as_secs(),
                signon: conn.connected_at,
                session,
                channels,
                commands,
            })
        })
    };

    let (id, name, description, capabilities) = match &live {
        Some(l) => (
            l.session.id.clone(),
            l.session.name.clone(),
            l.session.description.clone(),
            l.session.capabilities.clone(),
        ),
        None => match find_identity(gw, target).await {
            Some(i) => (i.id, i.name, i.description, i.capabilities),
            None => return Err(GatewayError::NoSuchNick(target.to_owned())),
        },
    };

    let nick = caller.nick();
    let about = |rest: Vec<String>| {
        let mut params = vec![name.clone()];
        params.extend(rest);
        params
    };
    caller.send(gw.numeric(
        "311",
        nick,
        about(vec![id, "swarm".into(), "*".into(), description]),
    ));
    caller.send(gw.numeric(
        "312",
        nick,
        about(vec![gw.server().to_owned(), gw.config.network.clone()]),
    ));
    if !capabilities.is_empty() {
        caller.send(gw.numeric(
            "320",
            nick,
            about(vec![format!("Capabilities: {}", capabilities.join(", "))]),
        ));
    }
    match live {
        Some(live) => {
            if !live.channels.is_empty() {
                caller.send(gw.numeric("319", nick, about(vec![live.channels.join(" ")])));
            }
            if !live.commands.is_empty() {
                caller.send(gw.numeric(
                    "320",
                    nick,
                    about(vec![format!("Commands: {}", live.commands.join(", "))]),
                ));
            }
            caller.send(gw.numeric(
                "317",
                nick,
                about(vec![
                    live.idle.to_string(),
                    live.signon.to_string(),
                    "seconds idle, signon time".into(),
                ]),
            ));
        }
        None => caller.send(gw.numeric("320", nick, about(vec!["is offline".into()]))),
    }
    caller.send(gw.numeric("318", nick, about(vec!["End of /WHOIS list".into()])));
    Ok(())
}

async fn query(
    gw: &Gateway,
    caller: &Caller,
    agent: &AgentSession,
    target: &str,
    verb: &str,
    data: &str,
) -> HandlerResult {
    let forward = Message::with_trailing(
        Some(agent.name.clone()),
        "QUERY",
        vec![verb.to_owned(), data.to_owned()],
    );
    match forward_to(gw, caller, agent, target, &forward).await {
        Forward::Sent | Forward::Replaced => return Ok(()),
        Forward::NotConnected => {}
    }

    // Offline: answer from the identity's static declaration.
    let Some(identity) = find_identity(gw, target).await else {
        return Err(GatewayError::NoSuchNick(target.to_owned()));
    };
    let verb = verb.to_ascii_uppercase();
    let answer = if verb == "CAPABILITIES" && !identity.capabilities.is_empty() {
        identity.capabilities.join(",")
    } else if identity.has_capability(&verb) {
        "available".to_owned()
    } else {
        return Err(GatewayError::NoSuchNick(target.to_owned()));
    };
    caller.send(Message::with_trailing(
        Some(identity.name),
        "QUERY",
        vec![verb, answer],
    ));
    Ok(())
}

async fn find_identity(gw: &Gateway, target: &str) -> Option<AgentIdentity> {
    match gw.identity.find(target).await {
        Ok(found) => found,
        Err(e) => {
            warn!(%target, "identity lookup failed: {e}");
            None
        }
    }
}

enum Forward {
    Sent,
    NotConnected,
    /// The sender's own session was taken over; nothing was sent.
    Replaced,
}

/// Deliver a line to a connected agent on behalf of the caller.
async fn forward_to(
    gw: &Gateway,
    caller: &Caller,
    agent: &AgentSession,
    target: &str,
    msg: &Message,
) -> Forward {
    let st = gw.state.read().await;
    if replaced(&st, caller, agent) {
        return Forward::Replaced;
    }
    match st.find_connected(target) {
        Some(conn) if conn.tx.send(Outbound::Line(msg.clone())).is_ok() => Forward::Sent,
        _ => Forward::NotConnected,
    }
}

// ── Command registry ─────────────────────────────────────────────

async fn register(
    gw: &Gateway,
    caller: &Caller,
    agent: &AgentSession,
    name: String,
    description: String,
) -> HandlerResult {
    {
        let mut st = gw.state.write().await;
        if replaced(&st, caller, agent) {
            return Ok(());
        }
        st.commands
            .entry(agent.id.clone())
            .or_default()
            .insert(name.clone(), description);
    }
    debug!(agent = %agent.name, command = %name, "command registered");
    caller.send(gw.notice(caller.nick(), format!("Registered command {name}")));
    Ok(())
}

async fn commands(gw: &Gateway, caller: &Caller, target: Option<&str>) -> HandlerResult {
    let nick = caller.nick();
    let st = gw.state.read().await;

    let owners: Vec<(String, String)> = match target {
        Some(target) => st
            .find_connected(target)
            .and_then(|c| c.agent.as_ref())
            .map(|a| vec![(a.id.clone(), a.name.clone())])
            .unwrap_or_default(),
        None => {
            let mut all: Vec<(String, String)> = st
                .commands
                .keys()
                .map(|id| (id.clone(), st.display_name(id).to_owned()))
                .collect();
            all.sort_by(|a, b| a.1.to_lowercase().cmp(&b.1.to_lowercase()));
            all
        }
    };

    let mut any = false;
    for (id, name) in &owners {
        for (command, description) in st.commands.get(id).into_iter().flatten() {
            any = true;
            caller.send(gw.notice(nick, format!("{name} {command} - {description}")));
        }
    }
    if !any {
        let text = match target {
            Some(target) => format!("No commands registered for {target}"),
            None => "No commands registered".to_owned(),
        };
        caller.send(gw.notice(nick, text));
    }
    caller.send(gw.notice(nick, "End of COMMANDS"));
    Ok(())
}

async fn cmd(
    gw: &Gateway,
    caller: &Caller,
    agent: &AgentSession,
    target: &str,
    command: &str,
    args: &str,
) -> HandlerResult {
    let forward = Message::with_trailing(
        Some(agent.name.clone()),
        "CMD",
        vec![command.to_owned(), args.to_owned()],
    );
    match forward_to(gw, caller, agent, target, &forward).await {
        Forward::Sent | Forward::Replaced => Ok(()),
        Forward::NotConnected => Err(GatewayError::NoSuchNick(target.to_owned())),
    }
}

// ── Moderation ───────────────────────────────────────────────────

/// Resolve an agent named in MODE/KICK to (id, name): connected agents
/// first, then the identity store.
async fn resolve_agent(gw: &Gateway, target: &str) -> Option<(String, String)> {
    let connected = {
        let st = gw.state.read().await;
        st.find_connected(target)
            .and_then(|c| c.agent.as_ref())
            .map(|a| (a.id.clone(), a.name.clone()))
    };
    match connected {
        Some(found) => Some(found),
        None => find_identity(gw, target).await.map(|i| (i.id, i.name)),
    }
}

async fn mode(
    gw: &Gateway,
    caller: &Caller,
    agent: &AgentSession,
    raw: &str,
    change: Option<&str>,
    target: Option<&str>,
) -> HandlerResult {
    let id = channel_id(&normalize_name(raw)?);
    let nick = caller.nick();

    let resolved = match target {
        Some(t) => resolve_agent(gw, t).await,
        None => None,
    };

    let mut st = gw.state.write().await;
    if replaced(&st, caller, agent) {
        return Ok(());
    }
    let Some(channel) = st.channels.get(&id) else {
        return Err(GatewayError::NoSuchChannel(raw.to_owned()));
    };

    let Some(token) = change else {
        caller.send(Message::new(
            Some(gw.server().to_owned()),
            "324",
            vec![nick.to_owned(), channel.name.clone(), "+".into()],
        ));
        return Ok(());
    };

    channel.require_operator(&agent.id)?;
    let change = ModeChange::parse(token)?;
    let chan_name = channel.name.clone();

    let Some(target) = target else {
        if change.setting && change.flag == ModeFlag::Ban {
            for (banned, entry) in &channel.bans {
                caller.send(Message::new(
                    Some(gw.server().to_owned()),
                    "367",
                    vec![
                        nick.to_owned(),
                        chan_name.clone(),
                        st.display_name(banned).to_owned(),
                        entry.set_by.clone(),
                        entry.set_at.to_string(),
                    ],
                ));
            }
            caller.send(gw.numeric("368", nick, vec![chan_name, "End of channel ban list".into()]));
            return Ok(());
        }
        return Err(GatewayError::NeedMoreParams("MODE".into()));
    };

    let Some((target_id, target_name)) = resolved else {
        debug!(channel = %chan_name, %target, "mode target unknown; ignored");
        return Ok(());
    };

    let changed = st
        .channels
        .get_mut(&id)
        .is_some_and(|ch| ch.apply_mode(change, &target_id, &agent.name, unix_now()));
    if changed {
        let msg = Message::new(
            Some(agent.name.clone()),
            "MODE",
            vec![chan_name.clone(), change.token(), target_name.clone()],
        );
        st.broadcast_channel(&id, &msg, None);
        info!(channel = %chan_name, by = %agent.name, mode = %change.token(), target = %target_name, "mode changed");
    }
    Ok(())
}

async fn kick(
    gw: &Gateway,
    caller: &Caller,
    agent: &AgentSession,
    raw: &str,
    target: &str,
    reason: Option<&str>,
) -> HandlerResult {
    let id = channel_id(&normalize_name(raw)?);
    let resolved = resolve_agent(gw, target).await;

    let mut st = gw.state.write().await;
    if replaced(&st, caller, agent) {
        return Ok(());
    }
    let chan_name = {
        let Some(channel) = st.channels.get(&id) else {
            return Err(GatewayError::NoSuchChannel(raw.to_owned()));
        };
        channel.require_operator(&agent.id)?;
        channel.name.clone()
    };
    let Some((target_id, target_name)) = resolved else {
        return Err(GatewayError::NoSuchNick(target.to_owned()));
    };
    if !st.channels.get(&id).is_some_and(|ch| ch.is_member(&target_id)) {
        return Err(GatewayError::UserNotInChannel {
            nick: target_name,
            channel: chan_name,
        });
    }

    let reason = reason.unwrap_or(agent.name.as_str()).to_owned();
    let msg = Message::with_trailing(
        Some(agent.name.clone()),
        "KICK",
        vec![chan_name.clone(), target_name.clone(), reason.clone()],
    );
    st.broadcast_channel(&id, &msg, None);

    if let Some(channel) = st.channels.get_mut(&id) {
        channel.members.remove(&target_id);
    }
    if let Some(conn_id) = st.agents.get(&target_id).copied() {
        if let Some(conn) = st.connections.get_mut(&conn_id) {
            conn.channels.remove(&id);
        }
    }
    info!(channel = %chan_name, by = %agent.name, target = %target_name, %reason, "kicked");
    Ok(())
}
