//! Text protocol messages
//!
//! | Request                                  | Reply                 |
//! |------------------------------------------|-----------------------|
//! | `LOCK <lockName> <clientId> READ\|WRITE` | `SUCCESS` / `FAILURE` |
//! | `UNLOCK <lockName> <clientId>`           | `SUCCESS` / `FAILURE` |
//!
//! Tokens are separated by whitespace, so lock names and client ids may not
//! contain any.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use locksmith_core::LockMode;

use crate::error::ProtocolError;

pub const LOCK: &str = "LOCK";
pub const UNLOCK: &str = "UNLOCK";
pub const SUCCESS: &str = "SUCCESS";
pub const FAILURE: &str = "FAILURE";

/// A decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Lock {
        name: String,
        client: String,
        mode: LockMode,
    },
    Unlock {
        name: String,
        client: String,
    },
}

impl Command {
    /// Build a validated `LOCK` command.
    pub fn lock(
        name: impl Into<String>,
        client: impl Into<String>,
        mode: LockMode,
    ) -> Result<Self, ProtocolError> {
        let name = validate_token("lock name", name.into())?;
        let client = validate_token("client id", client.into())?;
        Ok(Command::Lock { name, client, mode })
    }

    /// Build a validated `UNLOCK` command.
    pub fn unlock(name: impl Into<String>, client: impl Into<String>) -> Result<Self, ProtocolError> {
        let name = validate_token("lock name", name.into())?;
        let client = validate_token("client id", client.into())?;
        Ok(Command::Unlock { name, client })
    }

    /// Parse one frame of request text.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.split_whitespace();
        let keyword = parts.next().ok_or(ProtocolError::Empty)?;

        let command = match keyword {
            LOCK => {
                let name = next_token(&mut parts, "lock name")?;
                let client = next_token(&mut parts, "client id")?;
                let mode = next_token(&mut parts, "lock mode")?
                    .parse::<LockMode>()
                    .map_err(|e| ProtocolError::InvalidMode(e.0))?;
                Command::Lock { name, client, mode }
            }
            UNLOCK => {
                let name = next_token(&mut parts, "lock name")?;
                let client = next_token(&mut parts, "client id")?;
                Command::Unlock { name, client }
            }
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };

        let extra = parts.count();
        if extra > 0 {
            return Err(ProtocolError::TrailingArguments(extra));
        }

        Ok(command)
    }

    pub fn name(&self) -> &str {
        match self {
            Command::Lock { name, .. } | Command::Unlock { name, .. } => name,
        }
    }

    pub fn client(&self) -> &str {
        match self {
            Command::Lock { client, .. } | Command::Unlock { client, .. } => client,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Lock { .. } => LOCK,
            Command::Unlock { .. } => UNLOCK,
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Lock { name, client, mode } => write!(f, "{LOCK} {name} {client} {mode}"),
            Command::Unlock { name, client } => write!(f, "{UNLOCK} {name} {client}"),
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

/// Server reply to a single command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Success,
    Failure,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        *self == Reply::Success
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reply::Success => SUCCESS,
            Reply::Failure => FAILURE,
        }
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        match line.trim() {
            SUCCESS => Ok(Reply::Success),
            FAILURE => Ok(Reply::Failure),
            other => Err(ProtocolError::UnknownReply(other.to_string())),
        }
    }
}

impl From<bool> for Reply {
    fn from(success: bool) -> Self {
        if success { Reply::Success } else { Reply::Failure }
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reply {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reply::parse(s)
    }
}

fn next_token<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    field: &'static str,
) -> Result<String, ProtocolError> {
    parts
        .next()
        .map(str::to_string)
        .ok_or(ProtocolError::MissingArgument(field))
}

fn validate_token(field: &'static str, value: String) -> Result<String, ProtocolError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(ProtocolError::InvalidToken { field, value });
    }
    Ok(value)
}
