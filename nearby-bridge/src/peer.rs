//! Simulated stations: advertise on the loopback medium, answer connection
//! requests, optionally echo payloads.

use nearby_core::{Event, EventKind, Medium, NearbyClient};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PeerConfig;

pub async fn spawn_peer(
    medium: &Medium,
    client_config: &nearby_core::Config,
    peer: PeerConfig,
) -> nearby_core::Result<JoinHandle<()>> {
    let (transport, callbacks) = medium.attach(&client_config.service_id);
    let station = transport.endpoint_id().clone();
    let client = NearbyClient::with_config(transport, callbacks, client_config);
    let mut events = client.subscribe_many(&[
        EventKind::NearbyConnectionInitiated,
        EventKind::PayloadReceived,
    ]);
    client.start_advertising(peer.strategy.id(), &peer.name).await?;
    info!(%station, name = %peer.name, strategy = ?peer.strategy, "simulated peer advertising");

    Ok(tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let result = match &event {
                Event::NearbyConnectionInitiated { endpoint_id, .. } if peer.auto_accept => {
                    client.accept_connection(endpoint_id.as_str()).await
                }
                Event::NearbyConnectionInitiated { endpoint_id, .. } => {
                    client.reject_connection(endpoint_id.as_str()).await
                }
                Event::PayloadReceived { endpoint_id, data } if peer.echo => {
                    debug!(peer = %peer.name, endpoint = %endpoint_id, "echoing payload");
                    client.send_bytes_payload(endpoint_id.as_str(), data).await
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!(peer = %peer.name, error = %e, "simulated peer call failed");
            }
        }
    }))
}
