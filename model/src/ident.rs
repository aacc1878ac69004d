use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Both identity tokens travel in the same 1-3 byte wire field, so they share
/// the same syntactic rules: printable ASCII, no field separator.
const MAX_TOKEN_LEN: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("identity token must be 1-3 bytes, got {0}")]
    Length(usize),
    #[error("identity token contains a byte outside printable ASCII")]
    Charset,
}

fn check_token(s: &str) -> Result<(), TokenError> {
    if s.is_empty() || s.len() > MAX_TOKEN_LEN {
        return Err(TokenError::Length(s.len()));
    }
    if s.bytes().any(|b| !b.is_ascii_graphic() || b == b'|') {
        return Err(TokenError::Charset);
    }
    Ok(())
}

/// Stable identity a rover chooses for itself, e.g. `r1`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    pub fn new(s: &str) -> Result<AgentId, TokenError> {
        check_token(s)?;
        Ok(AgentId(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AgentId {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<AgentId, TokenError> {
        AgentId::new(s)
    }
}

impl TryFrom<String> for AgentId {
    type Error = TokenError;

    fn try_from(s: String) -> Result<AgentId, TokenError> {
        AgentId::new(&s)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> String {
        id.0
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for AgentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AgentId({})", self.0)
    }
}

/// Mission identifier, e.g. `M01`. The literal `000` marks a transfer with no
/// mission attached (registration, mission requests).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MissionId(String);

impl MissionId {
    pub fn new(s: &str) -> Result<MissionId, TokenError> {
        check_token(s)?;
        Ok(MissionId(s.to_owned()))
    }

    /// The `000` placeholder used when no mission applies.
    pub fn none() -> MissionId {
        MissionId("000".to_owned())
    }

    pub fn is_none(&self) -> bool {
        self.0 == "000"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MissionId {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<MissionId, TokenError> {
        MissionId::new(s)
    }
}

impl TryFrom<String> for MissionId {
    type Error = TokenError;

    fn try_from(s: String) -> Result<MissionId, TokenError> {
        MissionId::new(&s)
    }
}

impl From<MissionId> for String {
    fn from(id: MissionId) -> String {
        id.0
    }
}

impl Display for MissionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for MissionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MissionId({})", self.0)
    }
}
