/// Protocol error taxonomy.
///
/// Every variant maps to one numeric reply and renders as exactly one line
/// on the originating connection. None of them closes the connection.
use super::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Malformed or missing parameters.
    #[error("{0} :Not enough parameters")]
    NeedMoreParams(String),
    #[error("You may not reregister")]
    AlreadyAuthenticated,
    #[error("You have not registered")]
    NotAuthenticated,
    /// Bad credential, or the identity lookup itself failed.
    #[error("Authentication failed")]
    AuthFailed,
    #[error("{0} :No such nick/channel")]
    NoSuchNick(String),
    #[error("{0} :No such channel")]
    NoSuchChannel(String),
    #[error("{0} :Cannot send to channel")]
    CannotSendToChannel(String),
    #[error("{0} :Unknown command")]
    UnknownCommand(String),
    #[error("{nick} {channel} :They aren't on that channel")]
    UserNotInChannel { nick: String, channel: String },
    #[error("{0} :You're not on that channel")]
    NotOnChannel(String),
    #[error("{0} :Cannot join channel (+b)")]
    BannedFromChannel(String),
    #[error("{0} :is unknown mode char to me")]
    UnknownMode(String),
    #[error("{0} :You're not channel operator")]
    ChanOpPrivsNeeded(String),
    #[error("Input line was too long")]
    InputTooLong,
}

impl GatewayError {
    pub fn numeric(&self) -> &'static str {
        match self {
            Self::NeedMoreParams(_) => "461",
            Self::AlreadyAuthenticated => "462",
            Self::NotAuthenticated | Self::AuthFailed => "464",
            Self::NoSuchNick(_) => "401",
            Self::NoSuchChannel(_) => "403",
            Self::CannotSendToChannel(_) => "404",
            Self::UnknownCommand(_) => "421",
            Self::UserNotInChannel { .. } => "441",
            Self::NotOnChannel(_) => "442",
            Self::BannedFromChannel(_) => "474",
            Self::UnknownMode(_) => "472",
            Self::ChanOpPrivsNeeded(_) => "482",
            Self::InputTooLong => "417",
        }
    }

    /// Render as a numeric reply addressed to `target` (`*` before AUTH).
    pub fn to_reply(&self, server: &str, target: &str) -> Message {
        let mut params = vec![target.to_owned()];
        let (subjects, text) = match self {
            Self::NeedMoreParams(s)
            | Self::NoSuchNick(s)
            | Self::NoSuchChannel(s)
            | Self::CannotSendToChannel(s)
            | Self::UnknownCommand(s)
            | Self::NotOnChannel(s)
            | Self::BannedFromChannel(s)
            | Self::UnknownMode(s)
            | Self::ChanOpPrivsNeeded(s) => (vec![s.clone()], self.text()),
            Self::UserNotInChannel { nick, channel } => {
                (vec![nick.clone(), channel.clone()], self.text())
            }
            Self::AlreadyAuthenticated
            | Self::NotAuthenticated
            | Self::AuthFailed
            | Self::InputTooLong => (Vec::new(), self.text()),
        };
        params.extend(subjects);
        params.push(text.to_owned());
        Message::with_trailing(Some(server.to_owned()), self.numeric(), params)
    }

    fn text(&self) -> &'static str {
        match self {
            Self::NeedMoreParams(_) => "Not enough parameters",
            Self::AlreadyAuthenticated => "You may not reregister",
            Self::NotAuthenticated => "You have not registered",
            Self::AuthFailed => "Authentication failed",
            Self::NoSuchNick(_) => "No such nick/channel",
            Self::NoSuchChannel(_) => "No such channel",
            Self::CannotSendToChannel(_) => "Cannot send to channel",
            Self::UnknownCommand(_) => "Unknown command",
            Self::UserNotInChannel { .. } => "They aren't on that channel",
            Self::NotOnChannel(_) => "You're not on that channel",
            Self::BannedFromChannel(_) => "Cannot join channel (+b)",
            Self::UnknownMode(_) => "is unknown mode char to me",
            Self::ChanOpPrivsNeeded(_) => "You're not channel operator",
            Self::InputTooLong => "Input line was too long",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn auth_failure_renders_464() {
        let line = GatewayError::AuthFailed.to_reply("swarm.local", "*").to_wire();
        assert_eq!(line, ":swarm.local 464 * :Authentication failed");
    }

    #[test]
    fn subject_is_carried_before_text() {
        let line = GatewayError::BannedFromChannel("#general".into())
            .to_reply("swarm.local", "bee")
            .to_wire();
        assert_eq!(line, ":swarm.local 474 bee #general :Cannot join channel (+b)");
    }

    #[test]
    fn user_not_in_channel_has_two_subjects() {
        let err = GatewayError::UserNotInChannel {
            nick: "bee".into(),
            channel: "#general".into(),
        };
        assert_eq!(err.numeric(), "441");
        assert_eq!(
            err.to_reply("s", "alpha").to_wire(),
            ":s 441 alpha bee #general :They aren't on that channel"
        );
    }

    #[test]
    fn numerics_follow_the_taxonomy() {
        assert_eq!(GatewayError::NeedMoreParams("JOIN".into()).numeric(), "461");
        assert_eq!(GatewayError::NotAuthenticated.numeric(), "464");
        assert_eq!(GatewayError::NoSuchNick("x".into()).numeric(), "401");
        assert_eq!(GatewayError::NoSuchChannel("#x".into()).numeric(), "403");
        assert_eq!(GatewayError::NotOnChannel("#x".into()).numeric(), "442");
        assert_eq!(GatewayError::ChanOpPrivsNeeded("#x".into()).numeric(), "482");
        assert_eq!(GatewayError::BannedFromChannel("#x".into()).numeric(), "474");
    }
}
