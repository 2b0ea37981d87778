//! In-process backend: a shared [`Medium`] that any number of stations attach
//! to. Stations advertising and discovering under the same service id and
//! strategy see each other; connections and payloads are delivered through
//! the medium with Nearby Connections status codes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::endpoint::{EndpointId, Strategy};
use crate::payload::Payload;
use crate::protocol::{StatusCodes, TransferState};
use crate::transport::{Transport, TransportError, TransportEvent};

const STATUS_ALREADY_ADVERTISING: i32 = 8001;
const STATUS_ALREADY_DISCOVERING: i32 = 8002;
const STATUS_ALREADY_CONNECTED_TO_ENDPOINT: i32 = 8003;
const STATUS_NOT_CONNECTED_TO_ENDPOINT: i32 = 8005;
const STATUS_OUT_OF_ORDER_API_CALL: i32 = 8009;
const STATUS_ENDPOINT_UNKNOWN: i32 = 8011;

const CODES: StatusCodes = StatusCodes::NEARBY_CONNECTIONS;
const ENDPOINT_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ENDPOINT_ID_LEN: usize = 4;

struct Station {
    service_id: String,
    sink: mpsc::UnboundedSender<TransportEvent>,
    advertising: Option<(Strategy, String)>,
    discovering: Option<Strategy>,
    permissions_granted: bool,
}

struct Link {
    token: String,
    decisions: HashMap<EndpointId, bool>,
    connected: bool,
}

type LinkKey = (EndpointId, EndpointId);

fn link_key(a: &EndpointId, b: &EndpointId) -> LinkKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

#[derive(Default)]
struct MediumState {
    stations: HashMap<EndpointId, Station>,
    links: HashMap<LinkKey, Link>,
}

impl MediumState {
    fn emit(&self, to: &EndpointId, event: TransportEvent) {
        if let Some(station) = self.stations.get(to) {
            // receiver gone means the client shut down; nothing to deliver to
            let _ = station.sink.send(event);
        }
    }

    fn station(&self, id: &EndpointId) -> Result<&Station, TransportError> {
        self.stations.get(id).ok_or(TransportError::Closed)
    }

    fn station_mut(&mut self, id: &EndpointId) -> Result<&mut Station, TransportError> {
        self.stations.get_mut(id).ok_or(TransportError::Closed)
    }

    /// Can `discoverer` currently see `advertiser`?
    fn sees(&self, discoverer: &EndpointId, advertiser: &EndpointId) -> Option<String> {
        if discoverer == advertiser {
            return None;
        }
        let d = self.stations.get(discoverer)?;
        let a = self.stations.get(advertiser)?;
        let (strategy, nickname) = a.advertising.as_ref()?;
        (d.service_id == a.service_id && d.discovering == Some(*strategy)).then(|| nickname.clone())
    }

    fn fresh_endpoint_id(&self) -> EndpointId {
        let mut rng = rand::thread_rng();
        loop {
            let raw: String = (0..ENDPOINT_ID_LEN)
                .map(|_| ENDPOINT_ID_CHARSET[rng.gen_range(0..ENDPOINT_ID_CHARSET.len())] as char)
                .collect();
            if let Ok(id) = EndpointId::parse(&raw) {
                if !self.stations.contains_key(&id) {
                    return id;
                }
            }
        }
    }

    fn check_permissions(&self, id: &EndpointId) -> Result<(), TransportError> {
        if self.station(id)?.permissions_granted {
            Ok(())
        } else {
            Err(TransportError::PermissionDenied(
                "nearby radio permissions not granted".into(),
            ))
        }
    }

    fn start_advertising(
        &mut self,
        me: &EndpointId,
        strategy: Strategy,
        nickname: &str,
    ) -> Result<(), TransportError> {
        self.check_permissions(me)?;
        let station = self.station_mut(me)?;
        if station.advertising.is_some() {
            return Err(TransportError::status(
                STATUS_ALREADY_ADVERTISING,
                "already advertising",
            ));
        }
        station.advertising = Some((strategy, nickname.to_string()));
        let others: Vec<EndpointId> = self.stations.keys().cloned().collect();
        for other in others {
            if let Some(name) = self.sees(&other, me) {
                self.emit(
                    &other,
                    TransportEvent::EndpointFound {
                        endpoint_id: me.clone(),
                        endpoint_name: name,
                    },
                );
            }
        }
        Ok(())
    }

    fn start_discovery(&mut self, me: &EndpointId, strategy: Strategy) -> Result<(), TransportError> {
        self.check_permissions(me)?;
        let station = self.station_mut(me)?;
        if station.discovering.is_some() {
            return Err(TransportError::status(
                STATUS_ALREADY_DISCOVERING,
                "already discovering",
            ));
        }
        station.discovering = Some(strategy);
        let others: Vec<EndpointId> = self.stations.keys().cloned().collect();
        for other in others {
            if let Some(name) = self.sees(me, &other) {
                self.emit(
                    me,
                    TransportEvent::EndpointFound {
                        endpoint_id: other,
                        endpoint_name: name,
                    },
                );
            }
        }
        Ok(())
    }

    fn stop_advertising(&mut self, me: &EndpointId) {
        let watchers: Vec<EndpointId> = self
            .stations
            .keys()
            .filter(|other| self.sees(other, me).is_some())
            .cloned()
            .collect();
        if let Some(station) = self.stations.get_mut(me) {
            station.advertising = None;
        }
        for other in watchers {
            self.emit(
                &other,
                TransportEvent::EndpointLost {
                    endpoint_id: me.clone(),
                },
            );
        }
    }

    fn stop_discovery(&mut self, me: &EndpointId) {
        if let Some(station) = self.stations.get_mut(me) {
            station.discovering = None;
        }
    }

    fn request_connection(
        &mut self,
        me: &EndpointId,
        target: &EndpointId,
        nickname: &str,
    ) -> Result<(), TransportError> {
        let target_name = match self.stations.get(target) {
            Some(t) if t.service_id == self.station(me)?.service_id && target != me => t
                .advertising
                .as_ref()
                .map(|(_, name)| name.clone()),
            _ => None,
        }
        .ok_or_else(|| TransportError::status(STATUS_ENDPOINT_UNKNOWN, "endpoint unknown"))?;

        let key = link_key(me, target);
        if self.links.contains_key(&key) {
            return Err(TransportError::status(
                STATUS_ALREADY_CONNECTED_TO_ENDPOINT,
                "already connected to endpoint",
            ));
        }
        let token = authentication_token(me, target);
        self.links.insert(
            key,
            Link {
                token: token.clone(),
                decisions: HashMap::new(),
                connected: false,
            },
        );
        debug!(from = %me, to = %target, "loopback connection initiated");
        self.emit(
            me,
            TransportEvent::ConnectionInitiated {
                endpoint_id: target.clone(),
                endpoint_name: target_name,
                authentication_token: token.clone(),
            },
        );
        self.emit(
            target,
            TransportEvent::ConnectionInitiated {
                endpoint_id: me.clone(),
                endpoint_name: nickname.to_string(),
                authentication_token: token,
            },
        );
        Ok(())
    }

    fn decide(&mut self, me: &EndpointId, peer: &EndpointId, accept: bool) -> Result<(), TransportError> {
        let key = link_key(me, peer);
        let link = self
            .links
            .get_mut(&key)
            .ok_or_else(|| TransportError::status(STATUS_ENDPOINT_UNKNOWN, "no pending connection"))?;
        if link.connected || link.decisions.contains_key(me) {
            return Err(TransportError::status(
                STATUS_OUT_OF_ORDER_API_CALL,
                "connection already resolved",
            ));
        }
        link.decisions.insert(me.clone(), accept);

        let status = if !accept {
            self.links.remove(&key);
            CODES.connection_rejected
        } else if link.decisions.get(peer) == Some(&true) {
            link.connected = true;
            debug!(a = %me, b = %peer, token = %link.token, "loopback connection established");
            CODES.connection_ok
        } else {
            return Ok(());
        };
        self.emit(
            me,
            TransportEvent::ConnectionResult {
                endpoint_id: peer.clone(),
                status,
            },
        );
        self.emit(
            peer,
            TransportEvent::ConnectionResult {
                endpoint_id: me.clone(),
                status,
            },
        );
        Ok(())
    }

    fn send_payload(
        &mut self,
        me: &EndpointId,
        peer: &EndpointId,
        payload: &Payload,
    ) -> Result<(), TransportError> {
        let connected = self
            .links
            .get(&link_key(me, peer))
            .is_some_and(|l| l.connected);
        if !connected {
            return Err(TransportError::status(
                STATUS_NOT_CONNECTED_TO_ENDPOINT,
                "not connected to endpoint",
            ));
        }
        let total = payload.bytes.len() as u64;
        let update = |endpoint_id: &EndpointId, state, done| TransportEvent::PayloadTransferUpdate {
            endpoint_id: endpoint_id.clone(),
            payload_id: payload.id,
            status: CODES.transfer_code(state),
            bytes_transferred: done,
            total_bytes: total,
        };
        self.emit(me, update(peer, TransferState::InProgress, 0));
        self.emit(
            peer,
            TransportEvent::PayloadReceived {
                endpoint_id: me.clone(),
                payload_id: payload.id,
                bytes: payload.bytes.clone(),
            },
        );
        self.emit(peer, update(me, TransferState::Success, total));
        self.emit(me, update(peer, TransferState::Success, total));
        Ok(())
    }

    fn disconnect(&mut self, me: &EndpointId, peer: &EndpointId) {
        let Some(link) = self.links.remove(&link_key(me, peer)) else {
            return;
        };
        let event = if link.connected {
            TransportEvent::Disconnected {
                endpoint_id: me.clone(),
            }
        } else {
            TransportEvent::ConnectionResult {
                endpoint_id: me.clone(),
                status: CODES.connection_error,
            }
        };
        self.emit(peer, event);
    }

    fn detach(&mut self, me: &EndpointId) {
        self.stop_advertising(me);
        let peers: Vec<EndpointId> = self
            .links
            .keys()
            .filter_map(|(a, b)| {
                if a == me {
                    Some(b.clone())
                } else if b == me {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect();
        for peer in peers {
            self.disconnect(me, &peer);
        }
        self.stations.remove(me);
        debug!(station = %me, "loopback station detached");
    }
}

/// Four decimal digits both sides can compare out of band.
fn authentication_token(a: &EndpointId, b: &EndpointId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(a.as_str().as_bytes());
    hasher.update(b.as_str().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    let digest = hasher.finalize();
    let n = u16::from_be_bytes([digest[0], digest[1]]) % 10_000;
    format!("{n:04}")
}

/// Shared in-memory radio. Clones refer to the same medium.
#[derive(Clone, Default)]
pub struct Medium {
    state: Arc<Mutex<MediumState>>,
}

impl Medium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new station. Pass the receiver to the client as its callback stream.
    pub fn attach(
        &self,
        service_id: &str,
    ) -> (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let id = state.fresh_endpoint_id();
        state.stations.insert(
            id.clone(),
            Station {
                service_id: service_id.to_string(),
                sink: tx,
                advertising: None,
                discovering: None,
                permissions_granted: true,
            },
        );
        debug!(station = %id, service_id, "loopback station attached");
        (
            LoopbackTransport {
                id,
                state: self.state.clone(),
            },
            rx,
        )
    }

    pub fn station_count(&self) -> usize {
        self.state.lock().stations.len()
    }
}

/// One station on a [`Medium`]. Dropping it detaches the station: peers see
/// it lost and disconnected.
pub struct LoopbackTransport {
    id: EndpointId,
    state: Arc<Mutex<MediumState>>,
}

impl LoopbackTransport {
    /// The id other stations know this one by.
    pub fn endpoint_id(&self) -> &EndpointId {
        &self.id
    }

    /// Simulate the platform granting or revoking radio permissions.
    pub fn set_permissions_granted(&self, granted: bool) {
        if let Some(station) = self.state.lock().stations.get_mut(&self.id) {
            station.permissions_granted = granted;
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.state.lock().detach(&self.id);
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn start_advertising(
        &self,
        strategy: Strategy,
        nickname: &str,
    ) -> Result<(), TransportError> {
        self.state.lock().start_advertising(&self.id, strategy, nickname)
    }

    async fn start_discovery(&self, strategy: Strategy) -> Result<(), TransportError> {
        self.state.lock().start_discovery(&self.id, strategy)
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        self.state.lock().stop_advertising(&self.id);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        self.state.lock().stop_discovery(&self.id);
        Ok(())
    }

    async fn request_connection(
        &self,
        endpoint_id: &EndpointId,
        nickname: &str,
    ) -> Result<(), TransportError> {
        self.state
            .lock()
            .request_connection(&self.id, endpoint_id, nickname)
    }

    async fn accept_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError> {
        self.state.lock().decide(&self.id, endpoint_id, true)
    }

    async fn reject_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError> {
        self.state.lock().decide(&self.id, endpoint_id, false)
    }

    async fn send_payload(
        &self,
        endpoint_id: &EndpointId,
        payload: &Payload,
    ) -> Result<(), TransportError> {
        self.state.lock().send_payload(&self.id, endpoint_id, payload)
    }

    async fn disconnect(&self, endpoint_id: &EndpointId) -> Result<(), TransportError> {
        self.state.lock().disconnect(&self.id, endpoint_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadId;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn discovery_matches_strategy_and_service() {
        let medium = Medium::new();
        let (adv, _adv_rx) = medium.attach("svc");
        let (other_svc, _o_rx) = medium.attach("other");
        let (disc, mut disc_rx) = medium.attach("svc");

        adv.start_advertising(Strategy::Star, "B").await.unwrap();
        other_svc
            .start_advertising(Strategy::Star, "X")
            .await
            .unwrap();
        disc.start_discovery(Strategy::Cluster).await.unwrap();
        assert!(drain(&mut disc_rx).is_empty());

        disc.stop_discovery().await.unwrap();
        disc.start_discovery(Strategy::Star).await.unwrap();
        assert_eq!(
            drain(&mut disc_rx),
            vec![TransportEvent::EndpointFound {
                endpoint_id: adv.endpoint_id().clone(),
                endpoint_name: "B".into(),
            }]
        );

        adv.stop_advertising().await.unwrap();
        assert_eq!(
            drain(&mut disc_rx),
            vec![TransportEvent::EndpointLost {
                endpoint_id: adv.endpoint_id().clone(),
            }]
        );
    }

    #[tokio::test]
    async fn second_advertising_is_refused() {
        let medium = Medium::new();
        let (t, _rx) = medium.attach("svc");
        t.start_advertising(Strategy::Star, "A").await.unwrap();
        let err = t
            .start_advertising(Strategy::Star, "A")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::status(STATUS_ALREADY_ADVERTISING, "already advertising")
        );
    }

    #[tokio::test]
    async fn permissions() {
        let medium = Medium::new();
        let (t, _rx) = medium.attach("svc");
        t.set_permissions_granted(false);
        assert!(matches!(
            t.start_discovery(Strategy::Star).await,
            Err(TransportError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn handshake_and_payload() {
        let medium = Medium::new();
        let (a, mut a_rx) = medium.attach("svc");
        let (b, mut b_rx) = medium.attach("svc");
        b.start_advertising(Strategy::PointToPoint, "B")
            .await
            .unwrap();
        a.request_connection(b.endpoint_id(), "A").await.unwrap();

        let a_events = drain(&mut a_rx);
        let b_events = drain(&mut b_rx);
        let token_a = match &a_events[0] {
            TransportEvent::ConnectionInitiated {
                endpoint_name,
                authentication_token,
                ..
            } => {
                assert_eq!(endpoint_name, "B");
                authentication_token.clone()
            }
            other => panic!("unexpected {other:?}"),
        };
        match &b_events[0] {
            TransportEvent::ConnectionInitiated {
                endpoint_id,
                endpoint_name,
                authentication_token,
            } => {
                assert_eq!(endpoint_id, a.endpoint_id());
                assert_eq!(endpoint_name, "A");
                assert_eq!(authentication_token, &token_a);
            }
            other => panic!("unexpected {other:?}"),
        }

        a.accept_connection(b.endpoint_id()).await.unwrap();
        assert!(drain(&mut a_rx).is_empty());
        b.accept_connection(a.endpoint_id()).await.unwrap();
        assert_eq!(
            drain(&mut a_rx),
            vec![TransportEvent::ConnectionResult {
                endpoint_id: b.endpoint_id().clone(),
                status: 0
            }]
        );
        drain(&mut b_rx);

        let payload = Payload {
            id: PayloadId(7),
            bytes: b"hello".to_vec(),
        };
        a.send_payload(b.endpoint_id(), &payload).await.unwrap();
        let received = drain(&mut b_rx);
        assert_eq!(
            received[0],
            TransportEvent::PayloadReceived {
                endpoint_id: a.endpoint_id().clone(),
                payload_id: PayloadId(7),
                bytes: b"hello".to_vec(),
            }
        );
        assert_eq!(drain(&mut a_rx).len(), 2);
    }

    #[tokio::test]
    async fn reject_resolves_both_sides() {
        let medium = Medium::new();
        let (a, mut a_rx) = medium.attach("svc");
        let (b, mut b_rx) = medium.attach("svc");
        b.start_advertising(Strategy::Star, "B").await.unwrap();
        a.request_connection(b.endpoint_id(), "A").await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        b.reject_connection(a.endpoint_id()).await.unwrap();
        assert_eq!(
            drain(&mut a_rx),
            vec![TransportEvent::ConnectionResult {
                endpoint_id: b.endpoint_id().clone(),
                status: CODES.connection_rejected
            }]
        );
        assert!(a.accept_connection(b.endpoint_id()).await.is_err());
    }

    #[tokio::test]
    async fn dropping_station_disconnects_peers() {
        let medium = Medium::new();
        let (a, mut a_rx) = medium.attach("svc");
        let (b, _b_rx) = medium.attach("svc");
        b.start_advertising(Strategy::Star, "B").await.unwrap();
        a.start_discovery(Strategy::Star).await.unwrap();
        a.request_connection(b.endpoint_id(), "A").await.unwrap();
        a.accept_connection(b.endpoint_id()).await.unwrap();
        b.accept_connection(a.endpoint_id()).await.unwrap();
        drain(&mut a_rx);

        let b_id = b.endpoint_id().clone();
        drop(b);
        assert_eq!(
            drain(&mut a_rx),
            vec![
                TransportEvent::EndpointLost {
                    endpoint_id: b_id.clone()
                },
                TransportEvent::Disconnected { endpoint_id: b_id },
            ]
        );
        assert_eq!(medium.station_count(), 1);
    }

    #[test]
    fn token_is_four_digits() {
        let a = EndpointId::parse("AAAA").unwrap();
        let b = EndpointId::parse("BBBB").unwrap();
        let token = authentication_token(&a, &b);
        assert_eq!(token.len(), 4);
        assert!(token.bytes().all(|c| c.is_ascii_digit()));
    }
}
