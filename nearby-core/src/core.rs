//! Host-driven API: NearbyCore validates operations and returns commands for
//! the host to run on its backend; backend callbacks come back in and turn
//! into application events.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::endpoint::{validate_nickname, Endpoint, EndpointId, Strategy};
use crate::error::NearbyError;
use crate::negotiator::{Connection, Negotiator};
use crate::payload::{decode_payload, Payload, PayloadChannel, PayloadId};
use crate::protocol::{Event, StatusCodes};
use crate::session::{Role, SessionHandle, SessionManager};
use crate::transport::TransportEvent;

/// Backend call the host must perform after a successful validation. If the
/// backend refuses it, pass it to [`NearbyCore::rollback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartAdvertising {
        session: Uuid,
        strategy: Strategy,
        nickname: String,
    },
    StartDiscovery {
        session: Uuid,
        strategy: Strategy,
    },
    StopAdvertising,
    StopDiscovery,
    RequestConnection {
        endpoint_id: EndpointId,
        nickname: String,
    },
    AcceptConnection {
        endpoint_id: EndpointId,
    },
    RejectConnection {
        endpoint_id: EndpointId,
    },
    SendPayload {
        endpoint_id: EndpointId,
        payload: Payload,
    },
    Disconnect {
        endpoint_id: EndpointId,
    },
}

impl Command {
    /// Endpoint the command acts on; `None` for session commands.
    pub fn endpoint_id(&self) -> Option<&EndpointId> {
        match self {
            Command::RequestConnection { endpoint_id, .. }
            | Command::AcceptConnection { endpoint_id }
            | Command::RejectConnection { endpoint_id }
            | Command::SendPayload { endpoint_id, .. }
            | Command::Disconnect { endpoint_id } => Some(endpoint_id),
            Command::StartAdvertising { .. }
            | Command::StartDiscovery { .. }
            | Command::StopAdvertising
            | Command::StopDiscovery => None,
        }
    }
}

/// Main coordinator. No I/O, no locking; the host serializes access.
pub struct NearbyCore {
    sessions: SessionManager,
    negotiator: Negotiator,
    payloads: PayloadChannel,
    codes: StatusCodes,
}

impl NearbyCore {
    pub fn new() -> Self {
        Self::with_status_codes(StatusCodes::default())
    }

    pub fn with_status_codes(codes: StatusCodes) -> Self {
        Self {
            sessions: SessionManager::new(),
            negotiator: Negotiator::new(),
            payloads: PayloadChannel::new(),
            codes,
        }
    }

    pub fn start_advertising(
        &mut self,
        strategy_id: i32,
        nickname: &str,
    ) -> Result<Command, NearbyError> {
        let strategy = Strategy::try_from(strategy_id)?;
        validate_nickname(nickname)?;
        let handle = self
            .sessions
            .begin(Role::Advertising, strategy, nickname)?;
        Ok(Command::StartAdvertising {
            session: handle.id,
            strategy,
            nickname: nickname.to_string(),
        })
    }

    /// The nickname is kept on the session handle; discovery itself does not announce it.
    pub fn start_discovery(
        &mut self,
        strategy_id: i32,
        nickname: &str,
    ) -> Result<Command, NearbyError> {
        let strategy = Strategy::try_from(strategy_id)?;
        validate_nickname(nickname)?;
        let handle = self.sessions.begin(Role::Discovery, strategy, nickname)?;
        Ok(Command::StartDiscovery {
            session: handle.id,
            strategy,
        })
    }

    /// `None` when not advertising.
    pub fn stop_advertising(&mut self) -> Option<Command> {
        self.sessions
            .end(Role::Advertising)
            .map(|_| Command::StopAdvertising)
    }

    /// `None` when not discovering. Forgets discovered endpoints without a connection.
    pub fn stop_discovery(&mut self) -> Option<Command> {
        let ended = self.sessions.end(Role::Discovery)?;
        debug!(session = %ended.id, "discovery stopped, forgetting unconnected endpoints");
        self.negotiator.forget_unconnected();
        Some(Command::StopDiscovery)
    }

    pub fn request_connection(
        &mut self,
        endpoint_id: &str,
        nickname: &str,
    ) -> Result<Command, NearbyError> {
        let endpoint_id = EndpointId::parse(endpoint_id)?;
        validate_nickname(nickname)?;
        self.negotiator.begin_request(&endpoint_id)?;
        Ok(Command::RequestConnection {
            endpoint_id,
            nickname: nickname.to_string(),
        })
    }

    pub fn accept_connection(&mut self, endpoint_id: &str) -> Result<Command, NearbyError> {
        let endpoint_id = EndpointId::parse(endpoint_id)?;
        self.negotiator.begin_resolve(&endpoint_id, true)?;
        Ok(Command::AcceptConnection { endpoint_id })
    }

    pub fn reject_connection(&mut self, endpoint_id: &str) -> Result<Command, NearbyError> {
        let endpoint_id = EndpointId::parse(endpoint_id)?;
        self.negotiator.begin_resolve(&endpoint_id, false)?;
        Ok(Command::RejectConnection { endpoint_id })
    }

    /// `base64_bytes` as carried across the bridge.
    pub fn send_bytes_payload(
        &mut self,
        endpoint_id: &str,
        base64_bytes: &str,
    ) -> Result<Command, NearbyError> {
        let endpoint_id = EndpointId::parse(endpoint_id)?;
        self.negotiator.require_connected(&endpoint_id)?;
        let bytes = decode_payload(base64_bytes)?;
        Ok(self.queue_payload(endpoint_id, bytes))
    }

    /// Raw-bytes variant for Rust hosts; also returns the assigned payload id.
    pub fn send_bytes(
        &mut self,
        endpoint_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(PayloadId, Command), NearbyError> {
        let endpoint_id = EndpointId::parse(endpoint_id)?;
        self.negotiator.require_connected(&endpoint_id)?;
        let payload = self.payloads.prepare(&endpoint_id, bytes);
        Ok((
            payload.id,
            Command::SendPayload {
                endpoint_id,
                payload,
            },
        ))
    }

    fn queue_payload(&mut self, endpoint_id: EndpointId, bytes: Vec<u8>) -> Command {
        let payload = self.payloads.prepare(&endpoint_id, bytes);
        Command::SendPayload {
            endpoint_id,
            payload,
        }
    }

    /// Tear down any live connection. Local state changes immediately; the
    /// returned event (if the connection was established) must be emitted by
    /// the host since backends do not report local disconnects.
    pub fn disconnect_from_endpoint(
        &mut self,
        endpoint_id: &str,
    ) -> Result<(Command, Option<Event>), NearbyError> {
        let endpoint_id = EndpointId::parse(endpoint_id)?;
        let event = self.negotiator.disconnect(&endpoint_id)?;
        self.payloads.discard_endpoint(&endpoint_id);
        Ok((Command::Disconnect { endpoint_id }, event))
    }

    /// Stop both sessions and disconnect everything.
    pub fn stop_all_endpoints(&mut self) -> (Vec<Command>, Vec<Event>) {
        let mut commands = Vec::new();
        let mut events = Vec::new();
        commands.extend(self.stop_advertising());
        commands.extend(self.stop_discovery());
        for endpoint_id in self.negotiator.live_connections() {
            if let Ok(event) = self.negotiator.disconnect(&endpoint_id) {
                events.extend(event);
            }
            self.payloads.discard_endpoint(&endpoint_id);
            commands.push(Command::Disconnect { endpoint_id });
        }
        (commands, events)
    }

    /// Undo the state change of a command the backend refused. Stops and
    /// disconnects are not undone: local teardown is unconditional.
    pub fn rollback(&mut self, command: &Command) {
        debug!(?command, "rolling back");
        match command {
            Command::StartAdvertising { session, .. } => {
                self.sessions.abort(Role::Advertising, *session);
            }
            Command::StartDiscovery { session, .. } => {
                self.sessions.abort(Role::Discovery, *session);
            }
            Command::RequestConnection { endpoint_id, .. } => {
                self.negotiator.abort_request(endpoint_id);
            }
            Command::AcceptConnection { endpoint_id }
            | Command::RejectConnection { endpoint_id } => {
                self.negotiator.revert_resolve(endpoint_id);
            }
            Command::SendPayload { payload, .. } => {
                self.payloads.cancel(payload.id);
            }
            Command::StopAdvertising | Command::StopDiscovery | Command::Disconnect { .. } => {}
        }
    }

    /// Process one backend callback. Returns the event to deliver, if any.
    /// Callbacks that do not fit the current state are dropped.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> Option<Event> {
        match event {
            TransportEvent::EndpointFound {
                endpoint_id,
                endpoint_name,
            } => {
                let Some(strategy) = self.sessions.handle(Role::Discovery).map(|h| h.strategy)
                else {
                    warn!(endpoint = %endpoint_id, "endpoint found while not discovering, dropped");
                    return None;
                };
                Some(self.negotiator.on_endpoint_found(Endpoint {
                    id: endpoint_id,
                    name: endpoint_name,
                    strategy,
                }))
            }
            TransportEvent::EndpointLost { endpoint_id } => {
                self.negotiator.on_endpoint_lost(&endpoint_id)
            }
            TransportEvent::ConnectionInitiated {
                endpoint_id,
                endpoint_name,
                authentication_token,
            } => self.negotiator.on_connection_initiated(
                &endpoint_id,
                &endpoint_name,
                &authentication_token,
            ),
            TransportEvent::ConnectionResult {
                endpoint_id,
                status,
            } => {
                let event = self
                    .negotiator
                    .on_connection_result(&endpoint_id, status, &self.codes);
                if !self.negotiator.is_connected(&endpoint_id) {
                    self.payloads.discard_endpoint(&endpoint_id);
                }
                event
            }
            TransportEvent::Disconnected { endpoint_id } => {
                self.payloads.discard_endpoint(&endpoint_id);
                self.negotiator.on_disconnected(&endpoint_id)
            }
            TransportEvent::PayloadReceived {
                endpoint_id,
                payload_id,
                bytes,
            } => {
                if !self.negotiator.is_connected(&endpoint_id) {
                    warn!(endpoint = %endpoint_id, payload = %payload_id, "payload from unconnected endpoint dropped");
                    return None;
                }
                Some(self.payloads.on_payload_received(&endpoint_id, &bytes))
            }
            TransportEvent::PayloadTransferUpdate {
                endpoint_id,
                payload_id,
                status,
                bytes_transferred,
                ..
            } => {
                if !self.negotiator.is_connected(&endpoint_id) {
                    warn!(endpoint = %endpoint_id, payload = %payload_id, "transfer update for unconnected endpoint dropped");
                    return None;
                }
                Some(self.payloads.on_transfer_update(
                    &endpoint_id,
                    payload_id,
                    status,
                    bytes_transferred,
                    &self.codes,
                ))
            }
        }
    }

    pub fn session(&self, role: Role) -> Option<&SessionHandle> {
        self.sessions.handle(role)
    }

    pub fn endpoint(&self, endpoint_id: &EndpointId) -> Option<&Endpoint> {
        self.negotiator.endpoint(endpoint_id)
    }

    /// Currently discoverable endpoints.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.negotiator.endpoints().cloned().collect()
    }

    pub fn connection(&self, endpoint_id: &EndpointId) -> Option<&Connection> {
        self.negotiator.connection(endpoint_id)
    }

    pub fn payloads(&self) -> &PayloadChannel {
        &self.payloads
    }

    pub fn status_codes(&self) -> &StatusCodes {
        &self.codes
    }
}

impl Default for NearbyCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiator::ConnectionState;

    const CODES: StatusCodes = StatusCodes::NEARBY_CONNECTIONS;

    fn id(s: &str) -> EndpointId {
        EndpointId::parse(s).unwrap()
    }

    fn found(core: &mut NearbyCore, s: &str, name: &str) -> Option<Event> {
        core.on_transport_event(TransportEvent::EndpointFound {
            endpoint_id: id(s),
            endpoint_name: name.into(),
        })
    }

    fn connect(core: &mut NearbyCore, s: &str) {
        found(core, s, "B");
        core.request_connection(s, "A").unwrap();
        core.on_transport_event(TransportEvent::ConnectionInitiated {
            endpoint_id: id(s),
            endpoint_name: "B".into(),
            authentication_token: "t1".into(),
        });
        core.accept_connection(s).unwrap();
        core.on_transport_event(TransportEvent::ConnectionResult {
            endpoint_id: id(s),
            status: CODES.connection_ok,
        });
    }

    #[test]
    fn sequence_scenario() {
        let mut core = NearbyCore::new();
        let cmd = core.start_discovery(1, "A").unwrap();
        assert!(matches!(
            cmd,
            Command::StartDiscovery {
                strategy: Strategy::Star,
                ..
            }
        ));

        assert_eq!(
            found(&mut core, "e1", "B"),
            Some(Event::EndpointFound {
                endpoint_id: id("e1"),
                endpoint_name: "B".into()
            })
        );
        assert_eq!(core.endpoint(&id("e1")).unwrap().strategy, Strategy::Star);

        let cmd = core.request_connection("e1", "A").unwrap();
        assert_eq!(
            cmd,
            Command::RequestConnection {
                endpoint_id: id("e1"),
                nickname: "A".into()
            }
        );

        let ev = core.on_transport_event(TransportEvent::ConnectionInitiated {
            endpoint_id: id("e1"),
            endpoint_name: "B".into(),
            authentication_token: "t1".into(),
        });
        assert_eq!(
            ev,
            Some(Event::NearbyConnectionInitiated {
                endpoint_id: id("e1"),
                endpoint_name: "B".into(),
                authentication_token: "t1".into()
            })
        );

        core.accept_connection("e1").unwrap();
        let ev = core.on_transport_event(TransportEvent::ConnectionResult {
            endpoint_id: id("e1"),
            status: 0,
        });
        assert_eq!(
            ev,
            Some(Event::NearbyConnectionResult {
                endpoint_id: id("e1"),
                status: 0
            })
        );

        let cmd = core.send_bytes_payload("e1", "aGVsbG8=").unwrap();
        match cmd {
            Command::SendPayload {
                endpoint_id,
                payload,
            } => {
                assert_eq!(endpoint_id, id("e1"));
                assert_eq!(payload.bytes, b"hello");
            }
            other => panic!("expected SendPayload, got {other:?}"),
        }
    }

    #[test]
    fn argument_validation() {
        let mut core = NearbyCore::new();
        assert!(matches!(
            core.start_advertising(5, "A"),
            Err(NearbyError::InvalidStrategy(5))
        ));
        assert!(matches!(
            core.start_advertising(0, ""),
            Err(NearbyError::InvalidNickname)
        ));
        assert!(matches!(
            core.request_connection("", "A"),
            Err(NearbyError::InvalidEndpointId(_))
        ));
        // Failed validation leaves no session behind.
        assert!(core.session(Role::Advertising).is_none());
    }

    #[test]
    fn rollback_failed_start_releases_session() {
        let mut core = NearbyCore::new();
        let cmd = core.start_advertising(2, "A").unwrap();
        core.rollback(&cmd);
        assert!(core.session(Role::Advertising).is_none());
        assert!(core.start_advertising(2, "A").is_ok());
    }

    #[test]
    fn rollback_of_second_start_keeps_first() {
        let mut core = NearbyCore::new();
        let first = core.start_advertising(2, "A").unwrap();
        core.rollback(&Command::StartAdvertising {
            session: Uuid::new_v4(),
            strategy: Strategy::PointToPoint,
            nickname: "A".into(),
        });
        let Command::StartAdvertising { session, .. } = first else {
            panic!("expected StartAdvertising");
        };
        assert_eq!(core.session(Role::Advertising).unwrap().id, session);
    }

    #[test]
    fn rollback_request_and_accept() {
        let mut core = NearbyCore::new();
        core.start_discovery(0, "A").unwrap();
        found(&mut core, "e1", "B");
        let cmd = core.request_connection("e1", "A").unwrap();
        core.rollback(&cmd);
        assert!(core.connection(&id("e1")).is_none());

        core.request_connection("e1", "A").unwrap();
        core.on_transport_event(TransportEvent::ConnectionInitiated {
            endpoint_id: id("e1"),
            endpoint_name: "B".into(),
            authentication_token: "t1".into(),
        });
        let cmd = core.accept_connection("e1").unwrap();
        core.rollback(&cmd);
        assert_eq!(
            core.connection(&id("e1")).unwrap().state,
            ConnectionState::Initiating
        );
    }

    #[test]
    fn found_while_not_discovering_is_dropped() {
        let mut core = NearbyCore::new();
        assert!(found(&mut core, "e1", "B").is_none());
        assert!(core.endpoints().is_empty());
    }

    #[test]
    fn stop_discovery_forgets_unconnected() {
        let mut core = NearbyCore::new();
        core.start_discovery(0, "A").unwrap();
        found(&mut core, "e1", "B");
        assert_eq!(core.stop_discovery(), Some(Command::StopDiscovery));
        assert!(matches!(
            core.request_connection("e1", "A"),
            Err(NearbyError::UnknownEndpoint(_))
        ));
        assert_eq!(core.stop_discovery(), None);
    }

    #[test]
    fn send_requires_connection_and_valid_base64() {
        let mut core = NearbyCore::new();
        core.start_discovery(0, "A").unwrap();
        assert!(matches!(
            core.send_bytes_payload("e1", "aGVsbG8="),
            Err(NearbyError::NotConnected(_))
        ));
        connect(&mut core, "e1");
        assert!(matches!(
            core.send_bytes_payload("e1", "%%%"),
            Err(NearbyError::InvalidPayload(_))
        ));
        let (payload_id, cmd) = core.send_bytes("e1", vec![]).unwrap();
        assert!(matches!(cmd, Command::SendPayload { ref payload, .. } if payload.id == payload_id));
        assert_eq!(core.payloads().in_flight(), 1);
        core.rollback(&cmd);
        assert_eq!(core.payloads().in_flight(), 0);
    }

    #[test]
    fn payload_events_only_while_connected() {
        let mut core = NearbyCore::new();
        core.start_discovery(0, "A").unwrap();
        let incoming = |s: &str| TransportEvent::PayloadReceived {
            endpoint_id: id(s),
            payload_id: crate::payload::PayloadId(1),
            bytes: b"hello".to_vec(),
        };
        assert!(core.on_transport_event(incoming("e1")).is_none());
        connect(&mut core, "e1");
        assert_eq!(
            core.on_transport_event(incoming("e1")),
            Some(Event::PayloadReceived {
                endpoint_id: id("e1"),
                data: "aGVsbG8=".into()
            })
        );
    }

    #[test]
    fn disconnect_discards_transfers() {
        let mut core = NearbyCore::new();
        core.start_discovery(0, "A").unwrap();
        connect(&mut core, "e1");
        core.send_bytes("e1", vec![1, 2, 3]).unwrap();
        let ev = core.on_transport_event(TransportEvent::Disconnected {
            endpoint_id: id("e1"),
        });
        assert_eq!(
            ev,
            Some(Event::NearbyConnectionDisconnected {
                endpoint_id: id("e1")
            })
        );
        assert_eq!(core.payloads().in_flight(), 0);
    }

    #[test]
    fn local_disconnect_emits_for_connected() {
        let mut core = NearbyCore::new();
        core.start_discovery(0, "A").unwrap();
        connect(&mut core, "e1");
        let (cmd, ev) = core.disconnect_from_endpoint("e1").unwrap();
        assert_eq!(cmd, Command::Disconnect { endpoint_id: id("e1") });
        assert!(matches!(
            ev,
            Some(Event::NearbyConnectionDisconnected { .. })
        ));
        assert!(matches!(
            core.disconnect_from_endpoint("e1"),
            Err(NearbyError::NotConnected(_))
        ));
    }

    #[test]
    fn stop_all_endpoints_tears_everything_down() {
        let mut core = NearbyCore::new();
        core.start_advertising(0, "A").unwrap();
        core.start_discovery(0, "A").unwrap();
        connect(&mut core, "e1");
        connect(&mut core, "e2");
        let (commands, events) = core.stop_all_endpoints();
        assert!(commands.contains(&Command::StopAdvertising));
        assert!(commands.contains(&Command::StopDiscovery));
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, Command::Disconnect { .. }))
                .count(),
            2
        );
        assert_eq!(events.len(), 2);
        assert!(core.session(Role::Advertising).is_none());
        assert!(core.connection(&id("e1")).is_none());
    }

    #[test]
    fn custom_status_codes() {
        let codes = StatusCodes {
            connection_ok: 200,
            ..StatusCodes::NEARBY_CONNECTIONS
        };
        let mut core = NearbyCore::with_status_codes(codes);
        core.start_discovery(0, "A").unwrap();
        found(&mut core, "e1", "B");
        core.request_connection("e1", "A").unwrap();
        core.on_transport_event(TransportEvent::ConnectionInitiated {
            endpoint_id: id("e1"),
            endpoint_name: "B".into(),
            authentication_token: "t1".into(),
        });
        core.on_transport_event(TransportEvent::ConnectionResult {
            endpoint_id: id("e1"),
            status: 200,
        });
        assert_eq!(
            core.connection(&id("e1")).unwrap().state,
            ConnectionState::Connected
        );
    }
}
