//! Error taxonomy for client operations.

use crate::endpoint::EndpointId;
use crate::transport::TransportError;

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, NearbyError>;

/// Coarse classification of every [`NearbyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorKind {
    InvalidArgument,
    StateConflict,
    NotFound,
    PermissionDenied,
    TransportFailure,
}

/// Synchronous failure of a client operation. Asynchronous outcomes (peer
/// rejection, failed transfer) arrive as status codes in events instead.
#[derive(Debug, thiserror::Error)]
pub enum NearbyError {
    #[error("strategy id {0} is not recognized (expected 0, 1 or 2)")]
    InvalidStrategy(i32),
    #[error("malformed endpoint id {0:?}")]
    InvalidEndpointId(String),
    #[error("nickname must not be empty")]
    InvalidNickname,
    #[error("payload is not valid base64: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    #[error("already advertising")]
    AlreadyAdvertising,
    #[error("already discovering")]
    AlreadyDiscovering,
    #[error("endpoint {0} already has a live connection")]
    AlreadyConnected(EndpointId),
    #[error("no pending connection for endpoint {0}")]
    NoPendingConnection(EndpointId),
    #[error("endpoint {0} is not connected")]
    NotConnected(EndpointId),

    #[error("endpoint {0} is unknown or was lost")]
    UnknownEndpoint(EndpointId),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transport failure: {0}")]
    Transport(TransportError),
}

impl NearbyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NearbyError::InvalidStrategy(_)
            | NearbyError::InvalidEndpointId(_)
            | NearbyError::InvalidNickname
            | NearbyError::InvalidPayload(_) => ErrorKind::InvalidArgument,
            NearbyError::AlreadyAdvertising
            | NearbyError::AlreadyDiscovering
            | NearbyError::AlreadyConnected(_)
            | NearbyError::NoPendingConnection(_)
            | NearbyError::NotConnected(_) => ErrorKind::StateConflict,
            NearbyError::UnknownEndpoint(_) => ErrorKind::NotFound,
            NearbyError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            NearbyError::Transport(_) => ErrorKind::TransportFailure,
        }
    }
}

impl From<TransportError> for NearbyError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PermissionDenied(msg) => NearbyError::PermissionDenied(msg),
            other => NearbyError::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        let id = EndpointId::parse("e1").unwrap();
        assert_eq!(
            NearbyError::InvalidStrategy(7).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            NearbyError::NoPendingConnection(id.clone()).kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            NearbyError::UnknownEndpoint(id).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            NearbyError::AlreadyAdvertising.kind(),
            ErrorKind::StateConflict
        );
    }

    #[test]
    fn permission_errors_are_lifted_out_of_transport() {
        let err: NearbyError = TransportError::PermissionDenied("location".into()).into();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err: NearbyError = TransportError::Closed.into();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
    }

    #[test]
    fn display() {
        let err = NearbyError::InvalidStrategy(9);
        assert_eq!(
            err.to_string(),
            "strategy id 9 is not recognized (expected 0, 1 or 2)"
        );
    }
}
