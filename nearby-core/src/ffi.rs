//! C ABI for linking nearby-core as a static library from Android (NDK) or other C/C++ hosts.
//!
//! Operations return a ticket (> 0) naming the backend call the host must now
//! make, or a negative error code. The host must report the backend's answer
//! for every ticket with `nearby_core_complete`; a refusal rolls the core back.
//! Tickets for an endpoint expire once its connection ends (failed result or
//! disconnect); completing an expired ticket returns -1 and changes nothing.
//! Backend callbacks go in as JSON through `nearby_core_on_transport_event`,
//! application events come out as a JSON array.
//!
//! Strings are passed as (pointer, byte length) and must be UTF-8.

use std::collections::HashMap;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;

use serde_json::json;

use crate::core::{Command, NearbyCore};
use crate::endpoint::EndpointId;
use crate::error::{ErrorKind, NearbyError};
use crate::protocol::{Event, PROTOCOL_VERSION};
use crate::transport::TransportEvent;

const ERR_ARG: c_int = -1;

fn error_code(err: &NearbyError) -> c_int {
    match err.kind() {
        ErrorKind::InvalidArgument => -2,
        ErrorKind::StateConflict => -3,
        ErrorKind::NotFound => -4,
        ErrorKind::PermissionDenied => -5,
        ErrorKind::TransportFailure => -6,
    }
}

/// Core plus the commands the host has not yet confirmed, and local events
/// not yet handed out.
struct Host {
    core: NearbyCore,
    pending: HashMap<c_int, Command>,
    next_ticket: c_int,
    outbox: Vec<Event>,
}

impl Host {
    fn issue(&mut self, command: Command) -> c_int {
        let ticket = self.next_ticket;
        self.next_ticket = if ticket == c_int::MAX { 1 } else { ticket + 1 };
        self.pending.insert(ticket, command);
        ticket
    }

    /// Drop unconfirmed commands for an endpoint whose connection ended;
    /// rolling them back would have no effect.
    fn expire_endpoint(&mut self, id: &EndpointId) {
        self.pending
            .retain(|_, command| command.endpoint_id() != Some(id));
    }

    fn ticket_for(&mut self, result: Result<Command, NearbyError>) -> c_int {
        match result {
            Ok(command) => self.issue(command),
            Err(e) => error_code(&e),
        }
    }
}

fn host<'a>(h: *mut c_void) -> Option<&'a mut Host> {
    if h.is_null() {
        return None;
    }
    Some(unsafe { &mut *(h as *mut Host) })
}

fn utf8<'a>(ptr: *const u8, len: usize) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    let bytes = unsafe { slice::from_raw_parts(ptr, len) };
    std::str::from_utf8(bytes).ok()
}

/// Copy `bytes` to out_buf. Returns bytes written, or -1 if out_buf is null or too small.
fn write_out(bytes: &[u8], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() || bytes.len() > out_buf_len || bytes.len() > c_int::MAX as usize {
        return ERR_ARG;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
    bytes.len() as c_int
}

/// Drain the outbox as a JSON array. Events stay queued if they do not fit.
fn flush_events(host: &mut Host, out_buf: *mut u8, out_buf_len: usize) -> c_int {
    let text = match serde_json::to_vec(&host.outbox) {
        Ok(t) => t,
        Err(_) => return ERR_ARG,
    };
    let n = write_out(&text, out_buf, out_buf_len);
    if n >= 0 {
        host.outbox.clear();
    }
    n
}

/// Returns the event format version.
#[no_mangle]
pub extern "C" fn nearby_core_version() -> u8 {
    PROTOCOL_VERSION
}

/// Create a new core instance with the default status codes. Returns opaque handle.
#[no_mangle]
pub extern "C" fn nearby_core_create() -> *mut c_void {
    let host = Host {
        core: NearbyCore::new(),
        pending: HashMap::new(),
        next_ticket: 1,
        outbox: Vec::new(),
    };
    Box::into_raw(Box::new(host)) as *mut c_void
}

/// Destroy core instance. No-op if h is null.
#[no_mangle]
pub extern "C" fn nearby_core_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut Host) };
}

/// Returns a ticket for the backend's startAdvertising, or a negative error.
#[no_mangle]
pub extern "C" fn nearby_core_start_advertising(
    h: *mut c_void,
    strategy_id: c_int,
    nickname: *const u8,
    nickname_len: usize,
) -> c_int {
    let (Some(host), Some(nickname)) = (host(h), utf8(nickname, nickname_len)) else {
        return ERR_ARG;
    };
    let result = host.core.start_advertising(strategy_id, nickname);
    host.ticket_for(result)
}

/// Returns a ticket for the backend's startDiscovery, or a negative error.
#[no_mangle]
pub extern "C" fn nearby_core_start_discovery(
    h: *mut c_void,
    strategy_id: c_int,
    nickname: *const u8,
    nickname_len: usize,
) -> c_int {
    let (Some(host), Some(nickname)) = (host(h), utf8(nickname, nickname_len)) else {
        return ERR_ARG;
    };
    let result = host.core.start_discovery(strategy_id, nickname);
    host.ticket_for(result)
}

/// Returns 1 if the host must stop advertising on the backend, 0 if nothing was active.
#[no_mangle]
pub extern "C" fn nearby_core_stop_advertising(h: *mut c_void) -> c_int {
    let Some(host) = host(h) else {
        return ERR_ARG;
    };
    host.core.stop_advertising().is_some() as c_int
}

/// Returns 1 if the host must stop discovery on the backend, 0 if nothing was active.
#[no_mangle]
pub extern "C" fn nearby_core_stop_discovery(h: *mut c_void) -> c_int {
    let Some(host) = host(h) else {
        return ERR_ARG;
    };
    host.core.stop_discovery().is_some() as c_int
}

#[no_mangle]
pub extern "C" fn nearby_core_request_connection(
    h: *mut c_void,
    endpoint_id: *const u8,
    endpoint_id_len: usize,
    nickname: *const u8,
    nickname_len: usize,
) -> c_int {
    let (Some(host), Some(id), Some(nickname)) = (
        host(h),
        utf8(endpoint_id, endpoint_id_len),
        utf8(nickname, nickname_len),
    ) else {
        return ERR_ARG;
    };
    let result = host.core.request_connection(id, nickname);
    host.ticket_for(result)
}

#[no_mangle]
pub extern "C" fn nearby_core_accept_connection(
    h: *mut c_void,
    endpoint_id: *const u8,
    endpoint_id_len: usize,
) -> c_int {
    let (Some(host), Some(id)) = (host(h), utf8(endpoint_id, endpoint_id_len)) else {
        return ERR_ARG;
    };
    let result = host.core.accept_connection(id);
    host.ticket_for(result)
}

#[no_mangle]
pub extern "C" fn nearby_core_reject_connection(
    h: *mut c_void,
    endpoint_id: *const u8,
    endpoint_id_len: usize,
) -> c_int {
    let (Some(host), Some(id)) = (host(h), utf8(endpoint_id, endpoint_id_len)) else {
        return ERR_ARG;
    };
    let result = host.core.reject_connection(id);
    host.ticket_for(result)
}

/// Validate and decode a base64 payload. Fills out_payload_id (may be null) with
/// the id the backend must send it under. Returns a ticket or a negative error.
#[no_mangle]
pub extern "C" fn nearby_core_send_bytes_payload(
    h: *mut c_void,
    endpoint_id: *const u8,
    endpoint_id_len: usize,
    base64_bytes: *const u8,
    base64_len: usize,
    out_payload_id: *mut i64,
) -> c_int {
    let (Some(host), Some(id), Some(text)) = (
        host(h),
        utf8(endpoint_id, endpoint_id_len),
        utf8(base64_bytes, base64_len),
    ) else {
        return ERR_ARG;
    };
    let command = match host.core.send_bytes_payload(id, text) {
        Ok(c) => c,
        Err(e) => return error_code(&e),
    };
    if let Command::SendPayload { payload, .. } = &command {
        if !out_payload_id.is_null() {
            unsafe {
                *out_payload_id = payload.id.0;
            }
        }
    }
    host.issue(command)
}

/// Tear down a connection locally. The host must disconnect on the backend
/// when this returns 0; a NearbyConnectionDisconnected event (if any) is
/// queued for `nearby_core_take_events`.
#[no_mangle]
pub extern "C" fn nearby_core_disconnect_from_endpoint(
    h: *mut c_void,
    endpoint_id: *const u8,
    endpoint_id_len: usize,
) -> c_int {
    let (Some(host), Some(id)) = (host(h), utf8(endpoint_id, endpoint_id_len)) else {
        return ERR_ARG;
    };
    match host.core.disconnect_from_endpoint(id) {
        Ok((_, event)) => {
            host.outbox.extend(event);
            0
        }
        Err(e) => error_code(&e),
    }
}

/// Stop everything. Writes the backend calls to make as a JSON array, e.g.
/// `[{"call":"stopDiscovery"},{"call":"disconnect","endpointID":"e1"}]`.
/// Returns bytes written, or -1 if out_buf is too small (state is already torn down).
#[no_mangle]
pub extern "C" fn nearby_core_stop_all_endpoints(
    h: *mut c_void,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(host) = host(h) else {
        return ERR_ARG;
    };
    let (commands, events) = host.core.stop_all_endpoints();
    host.outbox.extend(events);
    let calls: Vec<serde_json::Value> = commands
        .iter()
        .filter_map(|c| match c {
            Command::StopAdvertising => Some(json!({ "call": "stopAdvertising" })),
            Command::StopDiscovery => Some(json!({ "call": "stopDiscovery" })),
            Command::Disconnect { endpoint_id } => {
                Some(json!({ "call": "disconnect", "endpointID": endpoint_id.as_str() }))
            }
            _ => None,
        })
        .collect();
    match serde_json::to_vec(&calls) {
        Ok(text) => write_out(&text, out_buf, out_buf_len),
        Err(_) => ERR_ARG,
    }
}

/// Report the backend's answer for a ticket. ok == 0 rolls the operation back.
/// Returns 0, or -1 for an unknown or expired ticket.
#[no_mangle]
pub extern "C" fn nearby_core_complete(h: *mut c_void, ticket: c_int, ok: c_int) -> c_int {
    let Some(host) = host(h) else {
        return ERR_ARG;
    };
    let Some(command) = host.pending.remove(&ticket) else {
        return ERR_ARG;
    };
    if ok == 0 {
        host.core.rollback(&command);
    }
    0
}

/// Feed one backend callback (JSON `TransportEvent`). Writes all queued
/// application events as a JSON array to out_buf. Returns bytes written,
/// -2 if the callback is malformed, -1 on a bad pointer or short buffer.
#[no_mangle]
pub extern "C" fn nearby_core_on_transport_event(
    h: *mut c_void,
    json: *const u8,
    json_len: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let (Some(host), Some(text)) = (host(h), utf8(json, json_len)) else {
        return ERR_ARG;
    };
    let event: TransportEvent = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(_) => return -2,
    };
    let ended = match &event {
        TransportEvent::ConnectionResult { endpoint_id, .. }
        | TransportEvent::Disconnected { endpoint_id } => Some(endpoint_id.clone()),
        _ => None,
    };
    host.outbox.extend(host.core.on_transport_event(event));
    if let Some(id) = ended {
        if host.core.connection(&id).is_none() {
            host.expire_endpoint(&id);
        }
    }
    flush_events(host, out_buf, out_buf_len)
}

/// Write queued local events (from disconnects) as a JSON array. Returns bytes written.
#[no_mangle]
pub extern "C" fn nearby_core_take_events(
    h: *mut c_void,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(host) = host(h) else {
        return ERR_ARG;
    };
    flush_events(host, out_buf, out_buf_len)
}
