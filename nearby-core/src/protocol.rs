//! Application-facing event types and status code tables.

use serde::{Deserialize, Serialize};

use crate::endpoint::EndpointId;

/// Version of the event schema. Exposed through the C ABI.
pub const PROTOCOL_VERSION: u8 = 1;

/// Every notification delivered to the application. JSON form carries the
/// variant name in `"event"` and the field names of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    /// Bytes from a connected peer, base64 encoded.
    PayloadReceived {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
        data: String,
    },
    /// Transfer progress. `status` is a raw code from the backend's [`StatusCodes`].
    #[serde(rename = "PayloadTranserUpdate", alias = "PayloadTransferUpdate")]
    PayloadTransferUpdate {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
        status: i32,
    },
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
    NearbyConnectionInitiated {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
        #[serde(rename = "endpointName")]
        endpoint_name: String,
        #[serde(rename = "authenticationToken")]
        authentication_token: String,
    },
    NearbyConnectionResult {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
        status: i32,
    },
    NearbyConnectionDisconnected {
        #[serde(rename = "endpointID")]
        endpoint_id: EndpointId,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::PayloadReceived { .. } => EventKind::PayloadReceived,
            Event::PayloadTransferUpdate { .. } => EventKind::PayloadTransferUpdate,
            Event::EndpointFound { .. } => EventKind::EndpointFound,
            Event::EndpointLost { .. } => EventKind::EndpointLost,
            Event::NearbyConnectionInitiated { .. } => EventKind::NearbyConnectionInitiated,
            Event::NearbyConnectionResult { .. } => EventKind::NearbyConnectionResult,
            Event::NearbyConnectionDisconnected { .. } => EventKind::NearbyConnectionDisconnected,
        }
    }

    pub fn endpoint_id(&self) -> &EndpointId {
        match self {
            Event::PayloadReceived { endpoint_id, .. }
            | Event::PayloadTransferUpdate { endpoint_id, .. }
            | Event::EndpointFound { endpoint_id, .. }
            | Event::EndpointLost { endpoint_id }
            | Event::NearbyConnectionInitiated { endpoint_id, .. }
            | Event::NearbyConnectionResult { endpoint_id, .. }
            | Event::NearbyConnectionDisconnected { endpoint_id } => endpoint_id,
        }
    }
}

/// Discriminant of [`Event`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PayloadReceived,
    PayloadTransferUpdate,
    EndpointFound,
    EndpointLost,
    NearbyConnectionInitiated,
    NearbyConnectionResult,
    NearbyConnectionDisconnected,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::PayloadReceived,
        EventKind::PayloadTransferUpdate,
        EventKind::EndpointFound,
        EventKind::EndpointLost,
        EventKind::NearbyConnectionInitiated,
        EventKind::NearbyConnectionResult,
        EventKind::NearbyConnectionDisconnected,
    ];

    /// Wire name, as in the `"event"` tag.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::PayloadReceived => "PayloadReceived",
            EventKind::PayloadTransferUpdate => "PayloadTranserUpdate",
            EventKind::EndpointFound => "EndpointFound",
            EventKind::EndpointLost => "EndpointLost",
            EventKind::NearbyConnectionInitiated => "NearbyConnectionInitiated",
            EventKind::NearbyConnectionResult => "NearbyConnectionResult",
            EventKind::NearbyConnectionDisconnected => "NearbyConnectionDisconnected",
        }
    }
}

/// Lifecycle of one payload transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    InProgress,
    Success,
    Failure,
    Canceled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransferState::InProgress)
    }
}

/// Integer encodings used by a backend for connection results and transfer
/// updates. The core only compares against this table; it never assumes
/// meanings for raw codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusCodes {
    pub connection_ok: i32,
    pub connection_rejected: i32,
    pub connection_error: i32,
    pub transfer_success: i32,
    pub transfer_failure: i32,
    pub transfer_in_progress: i32,
    pub transfer_canceled: i32,
}

impl StatusCodes {
    /// Google Nearby Connections (`ConnectionsStatusCodes`, `PayloadTransferUpdate.Status`).
    pub const NEARBY_CONNECTIONS: StatusCodes = StatusCodes {
        connection_ok: 0,
        connection_rejected: 8004,
        connection_error: 13,
        transfer_success: 1,
        transfer_failure: 2,
        transfer_in_progress: 3,
        transfer_canceled: 4,
    };

    pub fn is_connection_ok(&self, status: i32) -> bool {
        status == self.connection_ok
    }

    /// Classify a raw transfer code. `None` for codes outside the table.
    pub fn transfer_state(&self, status: i32) -> Option<TransferState> {
        if status == self.transfer_success {
            Some(TransferState::Success)
        } else if status == self.transfer_failure {
            Some(TransferState::Failure)
        } else if status == self.transfer_in_progress {
            Some(TransferState::InProgress)
        } else if status == self.transfer_canceled {
            Some(TransferState::Canceled)
        } else {
            None
        }
    }

    pub fn transfer_code(&self, state: TransferState) -> i32 {
        match state {
            TransferState::InProgress => self.transfer_in_progress,
            TransferState::Success => self.transfer_success,
            TransferState::Failure => self.transfer_failure,
            TransferState::Canceled => self.transfer_canceled,
        }
    }
}

impl Default for StatusCodes {
    fn default() -> Self {
        Self::NEARBY_CONNECTIONS
    }
}
