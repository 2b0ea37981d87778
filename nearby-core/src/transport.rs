//! Backend seam: the native proximity stack that actually advertises,
//! discovers, connects and moves bytes.
//!
//! A backend implements [`Transport`] for the calls the client makes, and
//! reports what happens on the radio as [`TransportEvent`]s on a channel the
//! client drains in order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::endpoint::{EndpointId, Strategy};
use crate::payload::{Payload, PayloadId};
use crate::protocol::StatusCodes;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("missing permission: {0}")]
    PermissionDenied(String),
    #[error("status {code}: {message}")]
    Status { code: i32, message: String },
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn status(code: i32, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }
}

/// Callback from the backend. Field names in JSON follow the bridge events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportEvent {
    EndpointFound {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
        #[serde(rename = "endpointName")]
        endpoint_name: String,
    },
    EndpointLost {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
    },
    ConnectionInitiated {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
        #[serde(rename = "endpointName")]
        endpoint_name: String,
        #[serde(rename = "authenticationToken")]
        authentication_token: String,
    },
    ConnectionResult {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
        status: i32,
    },
    Disconnected {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
    },
    PayloadReceived {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
        #[serde(rename = "payloadID")]
        payload_id: PayloadId,
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
    PayloadTransferUpdate {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
        #[serde(rename = "payloadID")]
        payload_id: PayloadId,
        status: i32,
        #[serde(rename = "bytesTransferred", default)]
        bytes_transferred: u64,
        #[serde(rename = "totalBytes", default)]
        total_bytes: u64,
    },
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::payload::encode_payload(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        crate::payload::decode_payload(&text).map_err(serde::de::Error::custom)
    }
}

/// Calls into the backend. Every method completes once the backend has
/// accepted the request; outcomes arrive later as [`TransportEvent`]s.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start_advertising(&self, strategy: Strategy, nickname: &str)
        -> Result<(), TransportError>;

    async fn start_discovery(&self, strategy: Strategy) -> Result<(), TransportError>;

    async fn stop_advertising(&self) -> Result<(), TransportError>;

    async fn stop_discovery(&self) -> Result<(), TransportError>;

    async fn request_connection(
        &self,
        endpoint_id: &EndpointId,
        nickname: &str,
    ) -> Result<(), TransportError>;

    async fn accept_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError>;

    async fn reject_connection(&self, endpoint_id: &EndpointId) -> Result<(), TransportError>;

    async fn send_payload(
        &self,
        endpoint_id: &EndpointId,
        payload: &Payload,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self, endpoint_id: &EndpointId) -> Result<(), TransportError>;

    /// Meaning of the integer codes this backend puts in results and updates.
    fn status_codes(&self) -> StatusCodes {
        StatusCodes::NEARBY_CONNECTIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_event_json() {
        let ev: TransportEvent = serde_json::from_str(
            r#"{"type":"PayloadReceived","endpointID":"e1","payloadID":42,"bytes":"aGVsbG8="}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            TransportEvent::PayloadReceived {
                endpoint_id: EndpointId::parse("e1").unwrap(),
                payload_id: PayloadId(42),
                bytes: b"hello".to_vec(),
            }
        );
    }

    #[test]
    fn transfer_update_progress_fields_default() {
        let ev: TransportEvent = serde_json::from_str(
            r#"{"type":"PayloadTransferUpdate","endpointID":"e1","payloadID":1,"status":1}"#,
        )
        .unwrap();
        assert!(matches!(
            ev,
            TransportEvent::PayloadTransferUpdate {
                bytes_transferred: 0,
                total_bytes: 0,
                ..
            }
        ));
    }

    #[test]
    fn malformed_endpoint_rejected() {
        let res = serde_json::from_str::<TransportEvent>(
            r#"{"type":"EndpointLost","endpointID":""}"#,
        );
        assert!(res.is_err());
    }
}
