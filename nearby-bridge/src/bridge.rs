//! JSON-lines method protocol: one request per stdin line, one response per
//! request on stdout, interleaved with event lines.

use nearby_core::{ErrorKind, NearbyClient, NearbyError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub call: Call,
}

/// Method surface of the native module.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum Call {
    StartAdvertising {
        #[serde(rename = "strategyID")]
        strategy_id: i32,
        nickname: String,
    },
    StartDiscovery {
        #[serde(rename = "strategyID")]
        strategy_id: i32,
        nickname: String,
    },
    StopAdvertising,
    StopDiscovery,
    RequestConnection {
        #[serde(rename = "endpointID")]
        endpoint_id: String,
        nickname: String,
    },
    AcceptConnection {
        #[serde(rename = "endpointID")]
        endpoint_id: String,
    },
    RejectConnection {
        #[serde(rename = "endpointID")]
        endpoint_id: String,
    },
    SendBytesPayload {
        #[serde(rename = "endpointID")]
        endpoint_id: String,
        #[serde(rename = "payloadBytes")]
        payload_bytes: String,
    },
    DisconnectFromEndpoint {
        #[serde(rename = "endpointID")]
        endpoint_id: String,
    },
    StopAllEndpoints,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct Response {
    /// `None` when the request line could not be parsed far enough to read it.
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl Response {
    pub fn ok(id: u64) -> Self {
        Self {
            id: Some(id),
            ok: true,
            error: None,
        }
    }

    pub fn failed(id: Option<u64>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            error: Some(ErrorBody {
                kind,
                message: message.into(),
            }),
        }
    }

    fn from_result(id: u64, result: Result<(), NearbyError>) -> Self {
        match result {
            Ok(()) => Self::ok(id),
            Err(e) => Self::failed(Some(id), e.kind(), e.to_string()),
        }
    }
}

/// Parse one line. A malformed line yields the response to write instead.
pub fn parse_line(line: &str) -> Result<Request, Response> {
    serde_json::from_str::<Request>(line).map_err(|e| {
        let id = serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_u64()));
        Response::failed(id, ErrorKind::InvalidArgument, e.to_string())
    })
}

pub async fn dispatch(client: &NearbyClient, request: Request) -> Response {
    let result = match request.call {
        Call::StartAdvertising {
            strategy_id,
            nickname,
        } => client.start_advertising(strategy_id, &nickname).await,
        Call::StartDiscovery {
            strategy_id,
            nickname,
        } => client.start_discovery(strategy_id, &nickname).await,
        Call::StopAdvertising => client.stop_advertising().await,
        Call::StopDiscovery => client.stop_discovery().await,
        Call::RequestConnection {
            endpoint_id,
            nickname,
        } => client.request_connection(&endpoint_id, &nickname).await,
        Call::AcceptConnection { endpoint_id } => client.accept_connection(&endpoint_id).await,
        Call::RejectConnection { endpoint_id } => client.reject_connection(&endpoint_id).await,
        Call::SendBytesPayload {
            endpoint_id,
            payload_bytes,
        } => client.send_bytes_payload(&endpoint_id, &payload_bytes).await,
        Call::DisconnectFromEndpoint { endpoint_id } => {
            client.disconnect_from_endpoint(&endpoint_id).await
        }
        Call::StopAllEndpoints => client.stop_all_endpoints().await,
    };
    Response::from_result(request.id, result)
}
