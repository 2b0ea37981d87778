//! Endpoint identity: ids, display names and the discovery strategy.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NearbyError;

/// Longest endpoint id accepted from callers or backends.
pub const MAX_ENDPOINT_ID_LEN: usize = 128;

/// Opaque endpoint identifier, unique per discovered peer for the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointId(String);

impl EndpointId {
    /// Validate and wrap an id: non-empty, printable ASCII, no whitespace.
    pub fn parse(raw: &str) -> Result<Self, NearbyError> {
        if raw.is_empty()
            || raw.len() > MAX_ENDPOINT_ID_LEN
            || !raw.bytes().all(|b| b.is_ascii_graphic())
        {
            return Err(NearbyError::InvalidEndpointId(raw.to_string()));
        }
        Ok(EndpointId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EndpointId {
    type Error = NearbyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        EndpointId::parse(&value)
    }
}

impl From<EndpointId> for String {
    fn from(id: EndpointId) -> Self {
        id.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Advertising/discovery topology. Integer encoding matches the native bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Strategy {
    /// Many-to-many.
    Cluster,
    /// One hub, many spokes.
    Star,
    /// Exactly one peer.
    PointToPoint,
}

impl Strategy {
    pub fn id(self) -> i32 {
        match self {
            Strategy::Cluster => 0,
            Strategy::Star => 1,
            Strategy::PointToPoint => 2,
        }
    }
}

impl TryFrom<i32> for Strategy {
    type Error = NearbyError;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(Strategy::Cluster),
            1 => Ok(Strategy::Star),
            2 => Ok(Strategy::PointToPoint),
            other => Err(NearbyError::InvalidStrategy(other)),
        }
    }
}

impl From<Strategy> for i32 {
    fn from(s: Strategy) -> Self {
        s.id()
    }
}

/// A discovered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    pub strategy: Strategy,
}

/// Nicknames are shown to the peer; empty ones are refused.
pub fn validate_nickname(nickname: &str) -> Result<(), NearbyError> {
    if nickname.trim().is_empty() {
        return Err(NearbyError::InvalidNickname);
    }
    Ok(())
}
