/// Typed client commands, built from a parsed [`Message`].
///
/// Building a command checks arity only. Semantic checks (membership,
/// privileges, existence) happen in the handlers.
use super::error::GatewayError;
use super::message::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Auth { token: String },
    Join { channels: Vec<String> },
    Part { channels: Vec<String>, reason: Option<String> },
    Privmsg { target: String, text: String },
    Who { channel: String },
    List,
    Whois { target: String },
    Names { channel: String },
    /// `text: None` is the query form.
    Topic { channel: String, text: Option<String> },
    Query { target: String, verb: String, data: String },
    Ping { token: String },
    Pong,
    Quit { reason: Option<String> },
    Register { name: String, description: String },
    Commands { agent: Option<String> },
    Cmd { target: String, command: String, args: String },
    Mode { channel: String, change: Option<String>, target: Option<String> },
    Kick { channel: String, target: String, reason: Option<String> },
    Help,
}

/// Verbs accepted before AUTH succeeds.
const PRE_AUTH: &[&str] = &["AUTH", "PING", "PONG", "QUIT"];

impl Command {
    pub fn allowed_before_auth(verb: &str) -> bool {
        PRE_AUTH.contains(&verb)
    }

    pub fn from_message(msg: &Message) -> Result<Self, GatewayError> {
        let verb = msg.verb();
        let p = &msg.params;
        let need = |n: usize| {
            if p.len() < n || p[..n].iter().any(|s| s.is_empty()) {
                Err(GatewayError::NeedMoreParams(verb.clone()))
            } else {
                Ok(())
            }
        };
        let opt = |i: usize| p.get(i).filter(|s| !s.is_empty()).cloned();
        let channels = |raw: &str| {
            let list = split_list(raw);
            if list.is_empty() {
                Err(GatewayError::NeedMoreParams(verb.clone()))
            } else {
                Ok(list)
            }
        };

        let cmd = match verb.as_str() {
            "AUTH" => {
                need(1)?;
                Self::Auth { token: p[0].clone() }
            }
            "JOIN" => {
                need(1)?;
                Self::Join { channels: channels(&p[0])? }
            }
            "PART" => {
                need(1)?;
                Self::Part {
                    channels: channels(&p[0])?,
                    reason: opt(1),
                }
            }
            "PRIVMSG" => {
                need(1)?;
                let text = rest(p, 1);
                if text.is_empty() {
                    return Err(GatewayError::NeedMoreParams(verb.clone()));
                }
                Self::Privmsg { target: p[0].clone(), text }
            }
            "WHO" => {
                need(1)?;
                Self::Who { channel: p[0].clone() }
            }
            "LIST" => Self::List,
            "WHOIS" => {
                need(1)?;
                // `WHOIS <server> <name>` names the agent last.
                let target = p.last().cloned().unwrap_or_default();
                Self::Whois { target }
            }
            "NAMES" => {
                need(1)?;
                Self::Names { channel: p[0].clone() }
            }
            "TOPIC" => {
                need(1)?;
                Self::Topic {
                    channel: p[0].clone(),
                    text: (p.len() > 1).then(|| rest(p, 1)),
                }
            }
            "QUERY" => {
                need(2)?;
                Self::Query {
                    target: p[0].clone(),
                    verb: p[1].clone(),
                    data: rest(p, 2),
                }
            }
            "PING" => Self::Ping { token: rest(p, 0) },
            "PONG" => Self::Pong,
            "QUIT" => Self::Quit { reason: opt(0) },
            "REGISTER" => {
                need(1)?;
                Self::Register {
                    name: p[0].to_lowercase(),
                    description: rest(p, 1),
                }
            }
            "COMMANDS" => Self::Commands { agent: opt(0) },
            "CMD" => {
                need(2)?;
                Self::Cmd {
                    target: p[0].clone(),
                    command: p[1].clone(),
                    args: rest(p, 2),
                }
            }
            "MODE" => {
                need(1)?;
                Self::Mode {
                    channel: p[0].clone(),
                    change: opt(1),
                    target: opt(2),
                }
            }
            "KICK" => {
                need(2)?;
                Self::Kick {
                    channel: p[0].clone(),
                    target: p[1].clone(),
                    reason: opt(2),
                }
            }
            "HELP" => Self::Help,
            _ => return Err(GatewayError::UnknownCommand(msg.command.clone())),
        };
        Ok(cmd)
    }
}

/// Comma-separated list, empty entries dropped.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parameters from `from` onward joined by single spaces, so clients that
/// omit the trailing colon still get their full text through.
fn rest(params: &[String], from: usize) -> String {
    params.get(from..).map(|p| p.join(" ")).unwrap_or_default()
}

/// Verb synopsis lines for HELP.
pub const HELP_LINES: &[&str] = &[
    "AUTH <api_key> - authenticate this connection",
    "JOIN <#channel>[,<#channel>] - join channels",
    "PART <#channel> [:reason] - leave a channel",
    "PRIVMSG <#channel|agent> :<text> - send a message",
    "WHO <#channel> - list channel members",
    "LIST - list channels",
    "WHOIS <agent> - describe an agent",
    "NAMES <#channel> - list member names",
    "TOPIC <#channel> [:text] - show or set the topic",
    "QUERY <agent> <verb> [:data] - send a query to an agent",
    "PING [:token] - liveness check",
    "QUIT [:reason] - disconnect",
    "REGISTER <name> :<description> - advertise a command",
    "COMMANDS [agent] - list advertised commands",
    "CMD <agent> <command> [:args] - invoke an agent command",
    "MODE <#channel> [<+|-><o|b> [agent]] - channel privileges",
    "KICK <#channel> <agent> [:reason] - remove a member",
    "HELP - this list",
];
