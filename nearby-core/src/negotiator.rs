//! Per-endpoint connection state machine.
//!
//! ```text
//! Discovered -> Requested -> Initiating -> Resolving -> Connected -> Terminated
//!                   (incoming) ^                  \-> Terminated
//! ```
//!
//! `Terminated` is represented by the absence of a connection entry.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::endpoint::{Endpoint, EndpointId};
use crate::error::NearbyError;
use crate::protocol::{Event, StatusCodes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We called `request_connection`.
    Outgoing,
    /// The peer requested while we advertised.
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Requested,
    Initiating,
    /// Local decision made, waiting for the transport's result.
    Resolving { accepted: bool },
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub endpoint_id: EndpointId,
    pub direction: Direction,
    pub state: ConnectionState,
    /// Name the peer presented at initiation.
    pub endpoint_name: Option<String>,
    /// Held from initiation until the connection resolves.
    pub authentication_token: Option<String>,
}

/// Discovered endpoints plus at most one live connection per endpoint id.
#[derive(Debug, Default)]
pub struct Negotiator {
    discovered: HashMap<EndpointId, Endpoint>,
    connections: HashMap<EndpointId, Connection>,
}

impl Negotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each sighting replaces what we knew about the id.
    pub fn on_endpoint_found(&mut self, endpoint: Endpoint) -> Event {
        debug!(endpoint = %endpoint.id, name = %endpoint.name, "endpoint found");
        let event = Event::EndpointFound {
            endpoint_id: endpoint.id.clone(),
            endpoint_name: endpoint.name.clone(),
        };
        self.discovered.insert(endpoint.id.clone(), endpoint);
        event
    }

    /// Drop the endpoint from the discoverable set. A live connection is not affected.
    pub fn on_endpoint_lost(&mut self, id: &EndpointId) -> Option<Event> {
        if self.discovered.remove(id).is_none() {
            debug!(endpoint = %id, "lost callback for unknown endpoint ignored");
            return None;
        }
        debug!(endpoint = %id, "endpoint lost");
        Some(Event::EndpointLost {
            endpoint_id: id.clone(),
        })
    }

    /// Forget every discovered endpoint without a live connection.
    pub fn forget_unconnected(&mut self) {
        let connections = &self.connections;
        self.discovered.retain(|id, _| connections.contains_key(id));
    }

    pub fn begin_request(&mut self, id: &EndpointId) -> Result<(), NearbyError> {
        if !self.discovered.contains_key(id) {
            return Err(NearbyError::UnknownEndpoint(id.clone()));
        }
        if self.connections.contains_key(id) {
            return Err(NearbyError::AlreadyConnected(id.clone()));
        }
        self.connections.insert(
            id.clone(),
            Connection {
                endpoint_id: id.clone(),
                direction: Direction::Outgoing,
                state: ConnectionState::Requested,
                endpoint_name: None,
                authentication_token: None,
            },
        );
        debug!(endpoint = %id, "connection requested");
        Ok(())
    }

    /// Undo `begin_request` after the transport refused it.
    pub fn abort_request(&mut self, id: &EndpointId) {
        if self
            .connections
            .get(id)
            .is_some_and(|c| c.state == ConnectionState::Requested)
        {
            self.connections.remove(id);
        }
    }

    pub fn on_connection_initiated(
        &mut self,
        id: &EndpointId,
        endpoint_name: &str,
        token: &str,
    ) -> Option<Event> {
        match self.connections.get_mut(id) {
            Some(conn) if conn.state == ConnectionState::Requested => {
                conn.state = ConnectionState::Initiating;
                conn.endpoint_name = Some(endpoint_name.to_string());
                conn.authentication_token = Some(token.to_string());
            }
            Some(conn) => {
                warn!(endpoint = %id, state = ?conn.state, "initiation out of order, dropped");
                return None;
            }
            None => {
                self.connections.insert(
                    id.clone(),
                    Connection {
                        endpoint_id: id.clone(),
                        direction: Direction::Incoming,
                        state: ConnectionState::Initiating,
                        endpoint_name: Some(endpoint_name.to_string()),
                        authentication_token: Some(token.to_string()),
                    },
                );
            }
        }
        debug!(endpoint = %id, "connection initiated");
        Some(Event::NearbyConnectionInitiated {
            endpoint_id: id.clone(),
            endpoint_name: endpoint_name.to_string(),
            authentication_token: token.to_string(),
        })
    }

    /// Record the local accept/reject. Only one decision per initiation.
    pub fn begin_resolve(&mut self, id: &EndpointId, accept: bool) -> Result<(), NearbyError> {
        match self.connections.get_mut(id) {
            Some(conn) if conn.state == ConnectionState::Initiating => {
                conn.state = ConnectionState::Resolving { accepted: accept };
                debug!(endpoint = %id, accept, "connection decision");
                Ok(())
            }
            _ => Err(NearbyError::NoPendingConnection(id.clone())),
        }
    }

    /// Undo `begin_resolve` after the transport refused the decision.
    pub fn revert_resolve(&mut self, id: &EndpointId) {
        if let Some(conn) = self.connections.get_mut(id) {
            if matches!(conn.state, ConnectionState::Resolving { .. }) {
                conn.state = ConnectionState::Initiating;
            }
        }
    }

    pub fn on_connection_result(
        &mut self,
        id: &EndpointId,
        status: i32,
        codes: &StatusCodes,
    ) -> Option<Event> {
        let Some(conn) = self.connections.get_mut(id) else {
            warn!(endpoint = %id, status, "result for unknown connection dropped");
            return None;
        };
        if !matches!(
            conn.state,
            ConnectionState::Initiating | ConnectionState::Resolving { .. }
        ) {
            warn!(endpoint = %id, state = ?conn.state, status, "result out of order, dropped");
            return None;
        }
        conn.authentication_token = None;
        if codes.is_connection_ok(status) {
            conn.state = ConnectionState::Connected;
            debug!(endpoint = %id, "connected");
        } else {
            self.connections.remove(id);
            debug!(endpoint = %id, status, "connection not established");
        }
        Some(Event::NearbyConnectionResult {
            endpoint_id: id.clone(),
            status,
        })
    }

    /// Remote teardown. Emits only for a connection that was `Connected`.
    pub fn on_disconnected(&mut self, id: &EndpointId) -> Option<Event> {
        self.terminate(id)
    }

    /// Local teardown of any live connection for `id`.
    pub fn disconnect(&mut self, id: &EndpointId) -> Result<Option<Event>, NearbyError> {
        if !self.connections.contains_key(id) {
            return Err(NearbyError::NotConnected(id.clone()));
        }
        Ok(self.terminate(id))
    }

    fn terminate(&mut self, id: &EndpointId) -> Option<Event> {
        let conn = self.connections.remove(id)?;
        if conn.state != ConnectionState::Connected {
            debug!(endpoint = %id, state = ?conn.state, "pending connection dropped");
            return None;
        }
        self.discovered.remove(id);
        debug!(endpoint = %id, "disconnected");
        Some(Event::NearbyConnectionDisconnected {
            endpoint_id: id.clone(),
        })
    }

    pub fn require_connected(&self, id: &EndpointId) -> Result<(), NearbyError> {
        match self.connections.get(id) {
            Some(conn) if conn.state == ConnectionState::Connected => Ok(()),
            _ => Err(NearbyError::NotConnected(id.clone())),
        }
    }

    pub fn is_connected(&self, id: &EndpointId) -> bool {
        self.require_connected(id).is_ok()
    }

    pub fn endpoint(&self, id: &EndpointId) -> Option<&Endpoint> {
        self.discovered.get(id)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.discovered.values()
    }

    pub fn connection(&self, id: &EndpointId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Ids of every connection that has not terminated.
    pub fn live_connections(&self) -> Vec<EndpointId> {
        self.connections.keys().cloned().collect()
    }
}
