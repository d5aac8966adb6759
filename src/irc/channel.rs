/// Channel directory and per-channel privilege tables.
///
/// Channels are created lazily on first JOIN and never deleted. Membership,
/// operator status and bans are all keyed by agent id, so privileges survive
/// PART, QUIT and reconnects for the channel's lifetime.
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use super::error::GatewayError;

/// Longest accepted channel name, `#` included.
pub const CHANNEL_LEN: usize = 50;

/// Who set a ban, and when (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEntry {
    pub set_by: String,
    pub set_at: u64,
}

/// Current topic text with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: u64,
}

#[derive(Debug, Clone)]
pub struct Channel {
    /// Lowercased name; the directory key.
    pub id: String,
    /// Name as first joined.
    pub name: String,
    /// Agent ids currently joined.
    pub members: BTreeSet<String>,
    pub creator: String,
    pub created_at: u64,
    pub topic: Option<Topic>,
    /// Agent ids holding operator status.
    pub operators: BTreeSet<String>,
    /// Banned agent ids.
    pub bans: BTreeMap<String, BanEntry>,
}

impl Channel {
    /// A fresh channel. The creator is its sole operator.
    pub fn new(name: &str, creator: &str, now: u64) -> Self {
        Self {
            id: channel_id(name),
            name: name.to_owned(),
            members: BTreeSet::new(),
            creator: creator.to_owned(),
            created_at: now,
            topic: None,
            operators: BTreeSet::from([creator.to_owned()]),
            bans: BTreeMap::new(),
        }
    }

    pub fn is_member(&self, agent_id: &str) -> bool {
        self.members.contains(agent_id)
    }

    pub fn is_operator(&self, agent_id: &str) -> bool {
        self.operators.contains(agent_id)
    }

    pub fn is_banned(&self, agent_id: &str) -> bool {
        self.bans.contains_key(agent_id)
    }

    /// Require operator status for a moderation action.
    pub fn require_operator(&self, agent_id: &str) -> Result<(), GatewayError> {
        if self.is_operator(agent_id) {
            Ok(())
        } else {
            Err(GatewayError::ChanOpPrivsNeeded(self.name.clone()))
        }
    }

    /// Topic changes need operator status only once the channel has an operator.
    pub fn may_set_topic(&self, agent_id: &str) -> bool {
        self.operators.is_empty() || self.is_operator(agent_id)
    }

    /// Display prefix for a member in NAMES/WHO/WHOIS.
    pub fn prefix_for(&self, agent_id: &str) -> &'static str {
        if self.is_operator(agent_id) {
            "@"
        } else {
            ""
        }
    }

    /// Apply a privilege change. Returns whether anything changed.
    pub fn apply_mode(&mut self, change: ModeChange, target_id: &str, by: &str, now: u64) -> bool {
        match (change.flag, change.setting) {
            (ModeFlag::Operator, true) => self.operators.insert(target_id.to_owned()),
            (ModeFlag::Operator, false) => self.operators.remove(target_id),
            // Re-banning keeps the original provenance.
            (ModeFlag::Ban, true) => match self.bans.entry(target_id.to_owned()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(BanEntry {
                        set_by: by.to_owned(),
                        set_at: now,
                    });
                    true
                }
            },
            (ModeFlag::Ban, false) => self.bans.remove(target_id).is_some(),
        }
    }
}

/// Directory key for a channel name.
pub fn channel_id(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Whether a target names a channel rather than an agent.
pub fn is_channel_name(target: &str) -> bool {
    target.starts_with('#')
}

/// Normalize a client-supplied channel name: add the `#` if missing and
/// validate length and characters.
pub fn normalize_name(raw: &str) -> Result<String, GatewayError> {
    let name = if is_channel_name(raw) {
        raw.to_owned()
    } else {
        format!("#{raw}")
    };
    let valid = name.len() >= 2
        && name.len() <= CHANNEL_LEN
        && !name.chars().any(|c| c == ' ' || c == ',' || c.is_control());
    if valid {
        Ok(name)
    } else {
        Err(GatewayError::NoSuchChannel(raw.to_owned()))
    }
}

/// Privilege flag carried by a MODE change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeFlag {
    /// `o`: operator status.
    Operator,
    /// `b`: ban.
    Ban,
}

impl ModeFlag {
    pub fn letter(self) -> char {
        match self {
            Self::Operator => 'o',
            Self::Ban => 'b',
        }
    }
}

/// A single parsed mode change: `+o`, `-b`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    /// true = setting (+), false = unsetting (-)
    pub setting: bool,
    pub flag: ModeFlag,
}

impl ModeChange {
    /// Parse a `<+|-><flag>` token.
    pub fn parse(token: &str) -> Result<Self, GatewayError> {
        let mut chars = token.chars();
        let setting = match chars.next() {
            Some('+') => true,
            Some('-') => false,
            _ => return Err(GatewayError::UnknownMode(token.to_owned())),
        };
        let flag = match (chars.next(), chars.next()) {
            (Some('o'), None) => ModeFlag::Operator,
            (Some('b'), None) => ModeFlag::Ban,
            _ => return Err(GatewayError::UnknownMode(token.to_owned())),
        };
        Ok(Self { setting, flag })
    }

    /// Wire form, e.g. `+b`.
    pub fn token(&self) -> String {
        let sign = if self.setting { '+' } else { '-' };
        format!("{sign}{}", self.flag.letter())
    }
}
