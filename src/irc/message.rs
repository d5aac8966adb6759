/// Protocol line parsing and serialization.
///
/// Line format:
///   [`:`prefix SPACE] VERB [SPACE params] [SPACE `:` trailing]
///
/// Lines are terminated by CR-LF on the wire; parsing operates on the
/// content without the terminator.
use std::fmt;

/// A parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional prefix (server name or sending agent's name).
    pub prefix: Option<String>,
    /// The verb or three-digit numeric (e.g. `PRIVMSG`, `001`).
    pub command: String,
    /// Parameters. The last one may have been a trailing param (with spaces).
    pub params: Vec<String>,
    /// Whether the last parameter is a trailing parameter.
    pub trailing: bool,
}

/// Errors that can occur while parsing a line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("prefix present but missing verb")]
    MissingCommand,
}

impl Message {
    /// A message with only middle parameters.
    pub fn new(prefix: Option<String>, command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            prefix,
            command: command.into(),
            params,
            trailing: false,
        }
    }

    /// A message whose last parameter is always written as trailing.
    pub fn with_trailing(
        prefix: Option<String>,
        command: impl Into<String>,
        params: Vec<String>,
    ) -> Self {
        Self {
            trailing: !params.is_empty(),
            ..Self::new(prefix, command, params)
        }
    }

    /// Parse a single line (without the trailing `\r\n`).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches(['\r', '\n']).trim_start();

        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = if let Some(stripped) = input.strip_prefix(':') {
            match stripped.find(' ') {
                Some(idx) => (
                    Some(stripped[..idx].to_owned()),
                    stripped[idx + 1..].trim_start(),
                ),
                None => return Err(ParseError::MissingCommand),
            }
        } else {
            (None, input)
        };

        let (command, param_str) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        let mut trailing = false;

        if let Some(mut remaining) = param_str {
            loop {
                remaining = remaining.trim_start_matches(' ');
                if remaining.is_empty() {
                    break;
                }
                if let Some(text) = remaining.strip_prefix(':') {
                    // Everything after the colon, spaces included.
                    params.push(text.to_owned());
                    trailing = true;
                    break;
                }
                match remaining.find(' ') {
                    Some(idx) => {
                        params.push(remaining[..idx].to_owned());
                        remaining = &remaining[idx + 1..];
                    }
                    None => {
                        params.push(remaining.to_owned());
                        break;
                    }
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_owned(),
            params,
            trailing,
        })
    }

    /// The verb, uppercased for dispatch.
    pub fn verb(&self) -> String {
        self.command.to_ascii_uppercase()
    }

    /// Serialize to the wire format (without trailing `\r\n`).
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                out.push(' ');
                out.push_str(param);
            }
            out.push(' ');
            if self.trailing || needs_colon(last) {
                out.push(':');
            }
            out.push_str(last);
        }

        out
    }
}

/// A last parameter that could not be read back as a middle parameter.
fn needs_colon(param: &str) -> bool {
    param.is_empty() || param.contains(' ') || param.starts_with(':')
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}
