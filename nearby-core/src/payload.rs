//! Byte payloads: text encoding across the bridge and outgoing transfer tracking.

use std::collections::HashMap;
use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::endpoint::EndpointId;
use crate::error::NearbyError;
use crate::protocol::{Event, StatusCodes, TransferState};

/// Encode bytes for the text boundary: standard alphabet, padded, no line breaks.
pub fn encode_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Standard alphabet; trailing `=` padding optional, as Android's decoder allows.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode text from the boundary. ASCII whitespace is ignored since the
/// Android encoder wraps lines; missing padding is accepted.
pub fn decode_payload(text: &str) -> Result<Vec<u8>, NearbyError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(LENIENT.decode(compact)?)
}

/// Opaque payload identifier, assigned when a send is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadId(pub i64);

impl PayloadId {
    pub fn random() -> Self {
        PayloadId(rand::thread_rng().gen())
    }
}

impl fmt::Display for PayloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub id: PayloadId,
    pub bytes: Vec<u8>,
}

/// An outgoing transfer that has not reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingTransfer {
    pub endpoint_id: EndpointId,
    pub state: TransferState,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Default)]
pub struct PayloadChannel {
    outgoing: HashMap<PayloadId, OutgoingTransfer>,
}

impl PayloadChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `bytes` in a payload and start tracking it.
    pub fn prepare(&mut self, endpoint_id: &EndpointId, bytes: Vec<u8>) -> Payload {
        let mut id = PayloadId::random();
        while self.outgoing.contains_key(&id) {
            id = PayloadId::random();
        }
        self.outgoing.insert(
            id,
            OutgoingTransfer {
                endpoint_id: endpoint_id.clone(),
                state: TransferState::InProgress,
                bytes_transferred: 0,
                total_bytes: bytes.len() as u64,
            },
        );
        debug!(endpoint = %endpoint_id, payload = %id, len = bytes.len(), "payload queued");
        Payload { id, bytes }
    }

    /// Stop tracking a payload the transport refused.
    pub fn cancel(&mut self, id: PayloadId) -> bool {
        self.outgoing.remove(&id).is_some()
    }

    pub fn on_transfer_update(
        &mut self,
        endpoint_id: &EndpointId,
        payload_id: PayloadId,
        status: i32,
        bytes_transferred: u64,
        codes: &StatusCodes,
    ) -> Event {
        match codes.transfer_state(status) {
            Some(state) => {
                if let Some(transfer) = self.outgoing.get_mut(&payload_id) {
                    transfer.state = state;
                    transfer.bytes_transferred = bytes_transferred;
                    if state.is_terminal() {
                        self.outgoing.remove(&payload_id);
                        debug!(endpoint = %endpoint_id, payload = %payload_id, ?state, "transfer finished");
                    }
                }
            }
            None => warn!(endpoint = %endpoint_id, payload = %payload_id, status, "unrecognized transfer status"),
        }
        Event::PayloadTransferUpdate {
            endpoint_id: endpoint_id.clone(),
            status,
        }
    }

    pub fn on_payload_received(&self, endpoint_id: &EndpointId, bytes: &[u8]) -> Event {
        Event::PayloadReceived {
            endpoint_id: endpoint_id.clone(),
            data: encode_payload(bytes),
        }
    }

    /// Forget every transfer for `endpoint_id` (connection terminated).
    pub fn discard_endpoint(&mut self, endpoint_id: &EndpointId) -> usize {
        let before = self.outgoing.len();
        self.outgoing.retain(|_, t| &t.endpoint_id != endpoint_id);
        before - self.outgoing.len()
    }

    pub fn transfer(&self, id: PayloadId) -> Option<&OutgoingTransfer> {
        self.outgoing.get(&id)
    }

    pub fn in_flight(&self) -> usize {
        self.outgoing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODES: StatusCodes = StatusCodes::NEARBY_CONNECTIONS;

    fn id(s: &str) -> EndpointId {
        EndpointId::parse(s).unwrap()
    }

    #[test]
    fn hello_encoding() {
        assert_eq!(encode_payload(b"hello"), "aGVsbG8=");
        assert_eq!(decode_payload("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(encode_payload(&[]), "");
        assert_eq!(decode_payload("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn decode_ignores_line_wrapping() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        let text = encode_payload(&bytes);
        let wrapped: String = text
            .as_bytes()
            .chunks(76)
            .map(|c| format!("{}\n", std::str::from_utf8(c).unwrap()))
            .collect();
        assert_eq!(decode_payload(&wrapped).unwrap(), bytes);
    }

    #[test]
    fn decode_accepts_missing_padding() {
        assert_eq!(decode_payload("aGVsbG8").unwrap(), b"hello");
        assert_eq!(decode_payload("aGk").unwrap(), b"hi");
        assert_eq!(decode_payload("aGVs\nbG8=\n").unwrap(), b"hello");
        // A lone leftover symbol is still malformed.
        assert!(decode_payload("aGVsb").is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_payload("not base64!"),
            Err(NearbyError::InvalidPayload(_))
        ));
    }

    #[test]
    fn terminal_update_discards_transfer() {
        let mut ch = PayloadChannel::new();
        let p = ch.prepare(&id("e1"), vec![1, 2, 3]);
        assert_eq!(ch.transfer(p.id).unwrap().total_bytes, 3);

        let ev = ch.on_transfer_update(&id("e1"), p.id, CODES.transfer_in_progress, 1, &CODES);
        assert_eq!(
            ev,
            Event::PayloadTransferUpdate {
                endpoint_id: id("e1"),
                status: CODES.transfer_in_progress
            }
        );
        assert_eq!(ch.transfer(p.id).unwrap().bytes_transferred, 1);

        ch.on_transfer_update(&id("e1"), p.id, CODES.transfer_success, 3, &CODES);
        assert!(ch.transfer(p.id).is_none());
    }

    #[test]
    fn unknown_status_keeps_tracking() {
        let mut ch = PayloadChannel::new();
        let p = ch.prepare(&id("e1"), vec![0; 10]);
        ch.on_transfer_update(&id("e1"), p.id, 777, 5, &CODES);
        assert_eq!(ch.in_flight(), 1);
    }

    #[test]
    fn discard_and_cancel() {
        let mut ch = PayloadChannel::new();
        let a = ch.prepare(&id("e1"), vec![1]);
        ch.prepare(&id("e1"), vec![2]);
        ch.prepare(&id("e2"), vec![3]);
        assert!(ch.cancel(a.id));
        assert!(!ch.cancel(a.id));
        assert_eq!(ch.discard_endpoint(&id("e1")), 1);
        assert_eq!(ch.in_flight(), 1);
    }

    #[test]
    fn received_bytes_become_base64_event() {
        let ch = PayloadChannel::new();
        let ev = ch.on_payload_received(&id("e1"), b"hello");
        assert_eq!(
            ev,
            Event::PayloadReceived {
                endpoint_id: id("e1"),
                data: "aGVsbG8=".into()
            }
        );
    }
}
