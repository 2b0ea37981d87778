//! Async facade over [`NearbyCore`] for Rust hosts.
//!
//! Every operation validates against the core under one lock, releases the
//! lock, then awaits the backend. A backend failure rolls the core back and
//! surfaces as the operation's error. Backend callbacks are drained in order
//! by a pump task and published on the client's [`EventEmitter`].

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::{Command, NearbyCore};
use crate::endpoint::{Endpoint, EndpointId};
use crate::error::{NearbyError, Result};
use crate::events::{EventEmitter, Subscription};
use crate::negotiator::ConnectionState;
use crate::payload::PayloadId;
use crate::protocol::EventKind;
use crate::session::Role;
use crate::transport::{Transport, TransportEvent};

pub struct NearbyClient {
    core: Arc<Mutex<NearbyCore>>,
    transport: Arc<dyn Transport>,
    emitter: EventEmitter,
    pump: JoinHandle<()>,
}

impl NearbyClient {
    /// Must be called inside a tokio runtime.
    pub fn new<T: Transport + 'static>(
        transport: T,
        callbacks: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self::with_config(transport, callbacks, &Config::default())
    }

    pub fn with_config<T: Transport + 'static>(
        transport: T,
        callbacks: mpsc::UnboundedReceiver<TransportEvent>,
        config: &Config,
    ) -> Self {
        let codes = config
            .status_codes
            .unwrap_or_else(|| transport.status_codes());
        let core = Arc::new(Mutex::new(NearbyCore::with_status_codes(codes)));
        let emitter = EventEmitter::new();
        let pump = tokio::spawn(pump_callbacks(core.clone(), emitter.clone(), callbacks));
        Self {
            core,
            transport: Arc::new(transport),
            emitter,
            pump,
        }
    }

    pub fn subscribe(&self, kind: EventKind) -> Subscription {
        self.emitter.subscribe(kind)
    }

    pub fn subscribe_many(&self, kinds: &[EventKind]) -> Subscription {
        self.emitter.subscribe_many(kinds)
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub async fn start_advertising(&self, strategy_id: i32, nickname: &str) -> Result<()> {
        let command = self
            .core
            .lock()
            .await
            .start_advertising(strategy_id, nickname)?;
        self.perform(command).await
    }

    pub async fn start_discovery(&self, strategy_id: i32, nickname: &str) -> Result<()> {
        let command = self
            .core
            .lock()
            .await
            .start_discovery(strategy_id, nickname)?;
        self.perform(command).await
    }

    pub async fn stop_advertising(&self) -> Result<()> {
        let command = self.core.lock().await.stop_advertising();
        match command {
            Some(command) => self.perform(command).await,
            None => Ok(()),
        }
    }

    pub async fn stop_discovery(&self) -> Result<()> {
        let command = self.core.lock().await.stop_discovery();
        match command {
            Some(command) => self.perform(command).await,
            None => Ok(()),
        }
    }

    pub async fn request_connection(&self, endpoint_id: &str, nickname: &str) -> Result<()> {
        let command = self
            .core
            .lock()
            .await
            .request_connection(endpoint_id, nickname)?;
        self.perform(command).await
    }

    pub async fn accept_connection(&self, endpoint_id: &str) -> Result<()> {
        let command = self.core.lock().await.accept_connection(endpoint_id)?;
        self.perform(command).await
    }

    pub async fn reject_connection(&self, endpoint_id: &str) -> Result<()> {
        let command = self.core.lock().await.reject_connection(endpoint_id)?;
        self.perform(command).await
    }

    /// Completion means the backend accepted the payload, not that it arrived.
    pub async fn send_bytes_payload(&self, endpoint_id: &str, base64_bytes: &str) -> Result<()> {
        let command = self
            .core
            .lock()
            .await
            .send_bytes_payload(endpoint_id, base64_bytes)?;
        self.perform(command).await
    }

    /// Like [`send_bytes_payload`](Self::send_bytes_payload) without the text encoding.
    pub async fn send_bytes(&self, endpoint_id: &str, bytes: Vec<u8>) -> Result<PayloadId> {
        let (id, command) = self.core.lock().await.send_bytes(endpoint_id, bytes)?;
        self.perform(command).await?;
        Ok(id)
    }

    pub async fn disconnect_from_endpoint(&self, endpoint_id: &str) -> Result<()> {
        let command = {
            let mut core = self.core.lock().await;
            let (command, event) = core.disconnect_from_endpoint(endpoint_id)?;
            if let Some(event) = event {
                self.emitter.emit(event);
            }
            command
        };
        self.perform(command).await
    }

    /// Stop both sessions and drop every connection. Every backend call is
    /// attempted; the first failure is returned.
    pub async fn stop_all_endpoints(&self) -> Result<()> {
        let commands = {
            let mut core = self.core.lock().await;
            let (commands, events) = core.stop_all_endpoints();
            for event in events {
                self.emitter.emit(event);
            }
            commands
        };
        let mut first_err = None;
        for command in commands {
            if let Err(err) = self.perform(command).await {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Currently discoverable endpoints.
    pub async fn endpoints(&self) -> Vec<Endpoint> {
        self.core.lock().await.endpoints()
    }

    pub async fn connection_state(&self, endpoint_id: &str) -> Option<ConnectionState> {
        let id = EndpointId::parse(endpoint_id).ok()?;
        self.core.lock().await.connection(&id).map(|c| c.state)
    }

    pub async fn is_active(&self, role: Role) -> bool {
        self.core.lock().await.session(role).is_some()
    }

    async fn perform(&self, command: Command) -> Result<()> {
        let t = &self.transport;
        let result = match &command {
            Command::StartAdvertising {
                strategy, nickname, ..
            } => t.start_advertising(*strategy, nickname).await,
            Command::StartDiscovery { strategy, .. } => t.start_discovery(*strategy).await,
            Command::StopAdvertising => t.stop_advertising().await,
            Command::StopDiscovery => t.stop_discovery().await,
            Command::RequestConnection {
                endpoint_id,
                nickname,
            } => t.request_connection(endpoint_id, nickname).await,
            Command::AcceptConnection { endpoint_id } => t.accept_connection(endpoint_id).await,
            Command::RejectConnection { endpoint_id } => t.reject_connection(endpoint_id).await,
            Command::SendPayload {
                endpoint_id,
                payload,
            } => t.send_payload(endpoint_id, payload).await,
            Command::Disconnect { endpoint_id } => t.disconnect(endpoint_id).await,
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(?command, %err, "backend refused command");
                self.core.lock().await.rollback(&command);
                Err(NearbyError::from(err))
            }
        }
    }
}

impl Drop for NearbyClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_callbacks(
    core: Arc<Mutex<NearbyCore>>,
    emitter: EventEmitter,
    mut callbacks: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(callback) = callbacks.recv().await {
        let mut core = core.lock().await;
        if let Some(event) = core.on_transport_event(callback) {
            emitter.emit(event);
        }
    }
    debug!("transport callback stream closed");
}
