//! C ABI for linking fawna-core as a static library from Android (NDK) or other C/C++ hosts.
//! The JNI layer owns the BLE stack: it polls radio commands, performs them, and feeds
//! the results back through the `fawna_node_on_*` functions.
//!
//! Strings are passed as (pointer, byte length) UTF-8. Output buffers return the number
//! of bytes written, 0 when there is nothing to return, or -1 on error.

use std::collections::VecDeque;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::slice;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::config::NodeConfig;
use crate::envelope::Envelope;
use crate::error::MeshError;
use crate::host::{HostPermissions, HostRadio};
use crate::node::NodeContext;
use crate::platform::{NotificationSink, PeerAddress, RadioEvent};
use crate::scheduler::Role;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notifications queued as text lines for the host to poll.
#[derive(Default)]
struct QueueSink {
    lines: Mutex<VecDeque<String>>,
}

impl QueueSink {
    fn push(&self, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(line);
    }

    fn pop(&self) -> Option<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    fn requeue(&self, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_front(line);
    }
}

impl NotificationSink for QueueSink {
    fn on_message(&self, envelope: &Envelope) {
        self.push(format!("message\t{}", envelope.message_id));
    }

    fn on_peers_changed(&self) {
        self.push("peers".to_string());
    }

    fn on_failure(&self, error: &MeshError) {
        self.push(format!("failure\t{}", error));
    }
}

struct FfiNode {
    ctx: NodeContext,
    radio: Arc<HostRadio>,
    permissions: Arc<HostPermissions>,
    sink: Arc<QueueSink>,
}

fn node<'a>(h: *mut c_void) -> Option<&'a FfiNode> {
    if h.is_null() {
        return None;
    }
    Some(unsafe { &*(h as *const FfiNode) })
}

fn str_arg<'a>(ptr: *const u8, len: usize) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    let bytes = unsafe { slice::from_raw_parts(ptr, len) };
    std::str::from_utf8(bytes).ok()
}

fn address_arg(ptr: *const u8, len: usize) -> Option<PeerAddress> {
    str_arg(ptr, len).map(PeerAddress::from)
}

fn copy_out(bytes: &[u8], out_buf: *mut u8, out_buf_len: usize) -> c_int {
    if out_buf.is_null() || bytes.len() > out_buf_len {
        return -1;
    }
    unsafe {
        out_buf.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
    }
    bytes.len() as c_int
}

fn role_code(role: Role) -> c_int {
    match role {
        Role::Central => 0,
        Role::Peripheral => 1,
    }
}

/// Write the crate version string. Returns bytes written, or -1 if out_buf is too small.
#[no_mangle]
pub extern "C" fn fawna_core_version(out_buf: *mut u8, out_buf_len: usize) -> c_int {
    copy_out(VERSION.as_bytes(), out_buf, out_buf_len)
}

/// Create a node. name may be null (adapter name unknown). permission_mask uses bit 0 =
/// scan, 1 = connect, 2 = advertise, 3 = location. Returns opaque handle or null on failure.
#[no_mangle]
pub extern "C" fn fawna_node_create(
    name: *const u8,
    name_len: usize,
    permission_mask: u32,
) -> *mut c_void {
    let config = NodeConfig {
        device_name: str_arg(name, name_len).map(str::to_string),
        ..NodeConfig::default()
    };
    let radio = Arc::new(HostRadio::new());
    let permissions = Arc::new(HostPermissions::from_mask(permission_mask));
    let sink = Arc::new(QueueSink::default());
    let ctx = match NodeContext::new(&config, radio.clone(), permissions.clone(), sink.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "node creation failed");
            return std::ptr::null_mut();
        }
    };
    let node = FfiNode {
        ctx,
        radio,
        permissions,
        sink,
    };
    Box::into_raw(Box::new(node)) as *mut c_void
}

/// Stop and destroy a node. No-op if h is null.
#[no_mangle]
pub extern "C" fn fawna_node_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let node = unsafe { Box::from_raw(h as *mut FfiNode) };
    node.ctx.stop();
}

/// Replace the granted capability mask.
#[no_mangle]
pub extern "C" fn fawna_node_set_permissions(h: *mut c_void, mask: u32) -> c_int {
    match node(h) {
        Some(n) => {
            n.permissions.set_mask(mask);
            0
        }
        None => -1,
    }
}

/// Report adapter power (non-zero = on).
#[no_mangle]
pub extern "C" fn fawna_node_set_radio_enabled(h: *mut c_void, enabled: c_int) -> c_int {
    match node(h) {
        Some(n) => {
            n.radio.set_enabled(enabled != 0);
            0
        }
        None => -1,
    }
}

#[no_mangle]
pub extern "C" fn fawna_node_start(h: *mut c_void) -> c_int {
    match node(h) {
        Some(n) => {
            n.ctx.start();
            0
        }
        None => -1,
    }
}

#[no_mangle]
pub extern "C" fn fawna_node_stop(h: *mut c_void) -> c_int {
    match node(h) {
        Some(n) => {
            n.ctx.stop();
            0
        }
        None => -1,
    }
}

/// Role timer fired. Returns the new role (0 = central, 1 = peripheral), or -1 on error.
#[no_mangle]
pub extern "C" fn fawna_node_tick(h: *mut c_void) -> c_int {
    node(h).map_or(-1, |n| role_code(n.ctx.tick()))
}

/// Current role (0 = central, 1 = peripheral), or -1 on error.
#[no_mangle]
pub extern "C" fn fawna_node_role(h: *mut c_void) -> c_int {
    node(h).map_or(-1, |n| role_code(n.ctx.role()))
}

/// Post a message. Writes the new message id to out_id_buf (36 bytes suffice).
/// Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn fawna_node_post(
    h: *mut c_void,
    content: *const u8,
    content_len: usize,
    out_id_buf: *mut u8,
    out_id_buf_len: usize,
) -> c_int {
    let (Some(n), Some(content)) = (node(h), str_arg(content, content_len)) else {
        return -1;
    };
    let id = n.ctx.post(content);
    if out_id_buf.is_null() {
        return 0;
    }
    copy_out(id.as_str().as_bytes(), out_id_buf, out_id_buf_len)
}

/// Next radio command as a tab-separated line (`start_scan`, `write`, ...). Returns bytes
/// written, 0 if the queue is empty, -1 on error. A command that does not fit stays queued.
#[no_mangle]
pub extern "C" fn fawna_node_poll_command(
    h: *mut c_void,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(n) = node(h) else {
        return -1;
    };
    let Some(command) = n.radio.poll_command() else {
        return 0;
    };
    let written = copy_out(command.to_host_line().as_bytes(), out_buf, out_buf_len);
    if written < 0 {
        n.radio.requeue(command);
    }
    written
}

/// Next notification line (`message\t<id>`, `peers`, `failure\t<text>`). Same return
/// convention as `fawna_node_poll_command`.
#[no_mangle]
pub extern "C" fn fawna_node_poll_notification(
    h: *mut c_void,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(n) = node(h) else {
        return -1;
    };
    let Some(line) = n.sink.pop() else {
        return 0;
    };
    let written = copy_out(line.as_bytes(), out_buf, out_buf_len);
    if written < 0 {
        n.sink.requeue(line);
    }
    written
}

fn deliver(h: *mut c_void, event: impl FnOnce(&FfiNode) -> Option<RadioEvent>) -> c_int {
    let Some(n) = node(h) else {
        return -1;
    };
    match event(n) {
        Some(event) => {
            n.ctx.handle_event(event);
            0
        }
        None => -1,
    }
}

/// Scan result. name may be null.
#[no_mangle]
pub extern "C" fn fawna_node_on_peer_discovered(
    h: *mut c_void,
    address: *const u8,
    address_len: usize,
    name: *const u8,
    name_len: usize,
) -> c_int {
    deliver(h, |_| {
        Some(RadioEvent::PeerDiscovered {
            address: address_arg(address, address_len)?,
            name: str_arg(name, name_len).map(str::to_string),
        })
    })
}

/// GATT client connected. Writes and disconnects for it arrive as radio commands.
#[no_mangle]
pub extern "C" fn fawna_node_on_connected(
    h: *mut c_void,
    address: *const u8,
    address_len: usize,
    name: *const u8,
    name_len: usize,
) -> c_int {
    deliver(h, |n| {
        let address = address_arg(address, address_len)?;
        Some(RadioEvent::Connected {
            link: n.radio.link(&address),
            address,
            name: str_arg(name, name_len).map(str::to_string),
        })
    })
}

#[no_mangle]
pub extern "C" fn fawna_node_on_connect_failed(
    h: *mut c_void,
    address: *const u8,
    address_len: usize,
    reason: *const u8,
    reason_len: usize,
) -> c_int {
    deliver(h, |_| {
        Some(RadioEvent::ConnectFailed {
            address: address_arg(address, address_len)?,
            reason: str_arg(reason, reason_len).unwrap_or("").to_string(),
        })
    })
}

/// Service discovery finished. uuids points to count * 16 bytes, each a UUID in
/// big-endian byte order.
#[no_mangle]
pub extern "C" fn fawna_node_on_services_discovered(
    h: *mut c_void,
    address: *const u8,
    address_len: usize,
    uuids: *const u8,
    count: usize,
) -> c_int {
    deliver(h, |_| {
        let address = address_arg(address, address_len)?;
        let services = if count == 0 {
            Vec::new()
        } else if uuids.is_null() {
            return None;
        } else {
            let raw = unsafe { slice::from_raw_parts(uuids, count * 16) };
            raw.chunks_exact(16)
                .filter_map(|b| Uuid::from_slice(b).ok())
                .collect()
        };
        Some(RadioEvent::ServicesDiscovered { address, services })
    })
}

#[no_mangle]
pub extern "C" fn fawna_node_on_disconnected(
    h: *mut c_void,
    address: *const u8,
    address_len: usize,
) -> c_int {
    deliver(h, |_| {
        Some(RadioEvent::Disconnected {
            address: address_arg(address, address_len)?,
        })
    })
}

/// Characteristic write received (peripheral side) or notified (central side).
#[no_mangle]
pub extern "C" fn fawna_node_on_data_received(
    h: *mut c_void,
    address: *const u8,
    address_len: usize,
    payload: *const u8,
    payload_len: usize,
) -> c_int {
    deliver(h, |_| {
        let address = address_arg(address, address_len)?;
        if payload.is_null() {
            return None;
        }
        let payload = unsafe { slice::from_raw_parts(payload, payload_len) }.to_vec();
        Some(RadioEvent::DataReceived { address, payload })
    })
}

/// Number of processed records, or -1 on error.
#[no_mangle]
pub extern "C" fn fawna_node_post_count(h: *mut c_void) -> c_int {
    node(h).map_or(-1, |n| n.ctx.post_count() as c_int)
}

/// Raw record at index (oldest first). Returns bytes written, or -1 on error.
#[no_mangle]
pub extern "C" fn fawna_node_post_at(
    h: *mut c_void,
    index: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
) -> c_int {
    let Some(n) = node(h) else {
        return -1;
    };
    match n.ctx.post_at(index) {
        Some(record) => copy_out(record.as_bytes(), out_buf, out_buf_len),
        None => -1,
    }
}

/// Number of connected peers, or -1 on error.
#[no_mangle]
pub extern "C" fn fawna_node_peer_count(h: *mut c_void) -> c_int {
    node(h).map_or(-1, |n| n.ctx.list_peers().len() as c_int)
}

/// Peer address at index (address order) and its hop distance. Returns bytes written,
/// or -1 on error.
#[no_mangle]
pub extern "C" fn fawna_node_peer_at(
    h: *mut c_void,
    index: usize,
    out_buf: *mut u8,
    out_buf_len: usize,
    out_hops: *mut u32,
) -> c_int {
    let Some(n) = node(h) else {
        return -1;
    };
    let peers = n.ctx.list_peers();
    let Some((address, hops)) = peers.iter().nth(index) else {
        return -1;
    };
    if !out_hops.is_null() {
        unsafe {
            *out_hops = *hops;
        }
    }
    copy_out(address.as_str().as_bytes(), out_buf, out_buf_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope;

    fn poll_lines(h: *mut c_void) -> Vec<String> {
        let mut lines = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = fawna_node_poll_command(h, buf.as_mut_ptr(), buf.len());
            if n <= 0 {
                break;
            }
            lines.push(String::from_utf8(buf[..n as usize].to_vec()).unwrap());
        }
        lines
    }

    #[test]
    fn null_handle_is_rejected() {
        let h = std::ptr::null_mut();
        assert_eq!(fawna_node_start(h), -1);
        assert_eq!(fawna_node_tick(h), -1);
        assert_eq!(fawna_node_post_count(h), -1);
        fawna_node_destroy(h);
    }

    #[test]
    fn version_is_exported() {
        let mut buf = [0u8; 32];
        let n = fawna_core_version(buf.as_mut_ptr(), buf.len());
        assert_eq!(&buf[..n as usize], VERSION.as_bytes());
        assert_eq!(fawna_core_version(buf.as_mut_ptr(), 0), -1);
    }

    #[test]
    fn host_drives_a_node() {
        let name = b"pixel";
        let h = fawna_node_create(name.as_ptr(), name.len(), 0b1111);
        assert!(!h.is_null());
        assert_eq!(fawna_node_start(h), 0);
        assert!(poll_lines(h)[0].starts_with("start_scan\tservice\t"));

        let addr = b"AA:BB:CC:DD:EE:01";
        assert_eq!(
            fawna_node_on_connected(h, addr.as_ptr(), addr.len(), std::ptr::null(), 0),
            0
        );
        assert_eq!(fawna_node_peer_count(h), 1);
        assert_eq!(
            poll_lines(h),
            vec!["discover_services\tAA:BB:CC:DD:EE:01".to_string()]
        );

        let record = envelope::encode(&Envelope::new("esp", "hi"));
        assert_eq!(
            fawna_node_on_data_received(h, addr.as_ptr(), addr.len(), record.as_ptr(), record.len()),
            0
        );
        assert_eq!(fawna_node_post_count(h), 1);
        let mut buf = [0u8; 256];
        let n = fawna_node_post_at(h, 0, buf.as_mut_ptr(), buf.len());
        assert_eq!(&buf[..n as usize], record.as_slice());
        assert_eq!(fawna_node_post_at(h, 1, buf.as_mut_ptr(), buf.len()), -1);

        let mut hops = 99u32;
        let n = fawna_node_peer_at(h, 0, buf.as_mut_ptr(), buf.len(), &mut hops);
        assert_eq!(&buf[..n as usize], addr);
        assert_eq!(hops, 0);

        let content = b"reply";
        let mut id = [0u8; 64];
        let n = fawna_node_post(h, content.as_ptr(), content.len(), id.as_mut_ptr(), id.len());
        assert_eq!(n, 36);
        let writes = poll_lines(h);
        assert_eq!(writes.len(), 1);
        assert!(writes[0].starts_with("write\tAA:BB:CC:DD:EE:01\t"));
        assert!(writes[0].ends_with(":0:reply"));

        assert_eq!(fawna_node_tick(h), 1);
        assert_eq!(fawna_node_role(h), 1);
        fawna_node_destroy(h);
    }

    #[test]
    fn small_buffer_keeps_command_queued() {
        let h = fawna_node_create(std::ptr::null(), 0, 0b1111);
        fawna_node_start(h);
        let mut tiny = [0u8; 4];
        assert_eq!(fawna_node_poll_command(h, tiny.as_mut_ptr(), tiny.len()), -1);
        assert_eq!(poll_lines(h).len(), 1);
        fawna_node_destroy(h);
    }

    #[test]
    fn failures_surface_as_notifications() {
        let h = fawna_node_create(std::ptr::null(), 0, 0);
        fawna_node_start(h);
        let mut buf = [0u8; 256];
        let n = fawna_node_poll_notification(h, buf.as_mut_ptr(), buf.len());
        let line = std::str::from_utf8(&buf[..n as usize]).unwrap();
        assert!(line.starts_with("failure\t"), "{}", line);
        assert!(poll_lines(h).is_empty());
        assert_eq!(fawna_node_set_permissions(h, 0b1111), 0);
        fawna_node_destroy(h);
    }
}
