// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Server lifecycle and event-loop glue: owns the UDP socket, the device
//! registry, the subscription table, and the periodic cleanup tick.
//!
//! This is a single-threaded cooperative event loop: [`DsuServer::run`] (or
//! the lower-level [`DsuServer::run_once`], for callers embedding the server
//! inside their own main-loop driver) blocks the calling thread and
//! multiplexes socket readability against the 1-second sweep tick. The
//! crate never spawns a thread of its own.

use crate::codec;
use crate::config::{ServerConfig, SLOTS_PER_SERVER, SWEEP_INTERVAL};
use crate::device::{Device, DeviceEvent, DeviceRef};
use crate::emitter;
use crate::error::{RegistrationError, ServerError};
use crate::registry::{DeviceId, DeviceRegistry};
use crate::request::{self, Action, DeviceSlot};
use crate::subscriptions::SubscriptionTable;

use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

/// Maximum datagram size the socket reads into; larger datagrams are
/// truncated by the kernel (acceptable — DSU frames never get this big).
const RECV_BUF_LEN: usize = 2048;

/// mio registration token for the UDP socket (the only source this server
/// multiplexes against the 1-second timer).
const SOCKET_TOKEN: Token = Token(0);

/// The Cemuhook DSU protocol server: parses requests, maintains per-client
/// subscriptions, and fans device updates out to subscribers.
pub struct DsuServer {
    server_id: u32,
    socket: MioUdpSocket,
    poll: Poll,
    events: Events,
    registry: DeviceRegistry,
    subscriptions: SubscriptionTable,
    device_events_tx: Sender<DeviceEvent>,
    device_events_rx: Receiver<DeviceEvent>,
    recv_buf: Vec<u8>,
    last_sweep: Instant,
}

impl DsuServer {
    /// Bind the UDP socket (IPv4 loopback by default) and register it with
    /// an internal `mio::Poll`.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let bind_addr: SocketAddr = (config.bind_address, config.port).into();
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(ServerError::Bind)?;
        raw.set_reuse_address(true).map_err(ServerError::Bind)?;
        raw.set_nonblocking(true).map_err(ServerError::Bind)?;
        raw.bind(&bind_addr.into()).map_err(ServerError::Bind)?;
        let std_socket: std::net::UdpSocket = raw.into();
        let mut socket = MioUdpSocket::from_std(std_socket);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

        let (device_events_tx, device_events_rx) = mpsc::channel();

        Ok(Self {
            server_id: rand::thread_rng().gen(),
            socket,
            poll,
            events: Events::with_capacity(16),
            registry: DeviceRegistry::new(),
            subscriptions: SubscriptionTable::new(),
            device_events_tx,
            device_events_rx,
            recv_buf: vec![0u8; RECV_BUF_LEN],
            last_sweep: Instant::now(),
        })
    }

    /// The 32-bit identifier this server stamps into every outbound header.
    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    /// Number of devices currently exposed (0..=[`SLOTS_PER_SERVER`]).
    pub fn active_devices_count(&self) -> u8 {
        self.registry.active_devices_count() as u8
    }

    /// Register a device, assigning it the next free slot.
    ///
    /// There is no public `remove_device`: disconnection is always
    /// device-initiated, via [`crate::device::DeviceHandle::notify_disconnected`].
    pub fn add_device(&mut self, device: DeviceRef) -> Result<DeviceId, RegistrationError> {
        self.registry.add_device(device, self.device_events_tx.clone())
    }

    /// Run forever, draining the socket and sweeping the subscription table
    /// every [`SWEEP_INTERVAL`], until an I/O error occurs.
    ///
    /// Most hosts embedding this server in a larger application should
    /// prefer [`Self::run_once`] inside their own loop instead.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            self.run_once(SWEEP_INTERVAL)?;
        }
    }

    /// Block for at most `poll_timeout` waiting for socket readability, then
    /// drain every buffered datagram, drain pending device events, and run
    /// the sweep if due. Returns promptly if the socket has no data and the
    /// timeout elapses — callers driving their own loop can call this in a
    /// tight cycle with a short timeout.
    pub fn run_once(&mut self, poll_timeout: Duration) -> Result<(), ServerError> {
        match self.poll.poll(&mut self.events, Some(poll_timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }

        let socket_ready = self
            .events
            .iter()
            .any(|event| event.token() == SOCKET_TOKEN);
        if socket_ready {
            self.drain_socket();
        }

        self.drain_device_events();

        let now = Instant::now();
        if now.duration_since(self.last_sweep) >= SWEEP_INTERVAL {
            let report = self.subscriptions.sweep(now);
            if report.expired_subscriptions > 0 || report.purged_counters > 0 {
                log::debug!(
                    "sweep: expired {} subscriptions, purged {} counters",
                    report.expired_subscriptions,
                    report.purged_counters
                );
            }
            self.last_sweep = now;
        }

        Ok(())
    }

    /// Non-blockingly drain every datagram currently buffered on the socket.
    fn drain_socket(&mut self) {
        loop {
            let (len, src) = match self.socket.recv_from(&mut self.recv_buf[..]) {
                Ok(result) => result,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("recv_from failed: {e}");
                    break;
                }
            };
            self.handle_datagram(&self.recv_buf[..len].to_vec(), src);
        }
    }

    /// Parse and dispatch a single inbound datagram. Any protocol-validation
    /// failure is logged at debug level and the datagram is silently
    /// dropped — defensive against noise, never surfaced to the caller.
    fn handle_datagram(&mut self, buf: &[u8], src: SocketAddr) {
        let header = match codec::parse_header(b'C', buf) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("dropping datagram from {src}: {e}");
                return;
            }
        };
        let payload = &buf[codec::HEADER_LEN..];

        let device_slots = self.device_slots();
        let action = match request::dispatch(header, payload, &device_slots) {
            Ok(a) => a,
            Err(e) => {
                log::debug!("dropping datagram from {src}: {e}");
                return;
            }
        };

        match action {
            Action::SendVersion => {
                let reply = emitter::build_version_reply(self.server_id);
                self.send_to(&reply, src);
            }
            Action::SendPorts(slot_ids) => {
                for slot_id in slot_ids {
                    if slot_id >= SLOTS_PER_SERVER {
                        // Precondition of the slot-descriptor writer; the
                        // sender-controllable count was already clamped to 5,
                        // but slot *validity* is enforced here by skipping
                        // rather than asserting.
                        continue;
                    }
                    let device = self
                        .registry
                        .device_at_slot(slot_id)
                        .and_then(|id| self.registry.get(id));
                    let reply = match device {
                        Some(d) => emitter::build_ports_reply(self.server_id, slot_id, Some(&*d.borrow())),
                        None => emitter::build_ports_reply(self.server_id, slot_id, None),
                    };
                    self.send_to(&reply, src);
                }
            }
            Action::RegisterData { client_id, devices } => {
                let now = Instant::now();
                for device_id in devices {
                    self.subscriptions.register(client_id, device_id, src, now);
                }
            }
        }
    }

    /// Snapshot of every registered device's slot and MAC, for resolving a
    /// DATA request's slot/MAC selection without borrowing `dyn Device`
    /// directly from within the dispatch call.
    fn device_slots(&self) -> Vec<DeviceSlot> {
        self.registry
            .ids()
            .iter()
            .map(|&id| DeviceSlot {
                id,
                slot: self.registry.slot_of(id).expect("id came from ids()"),
                mac: self.registry.get(id).expect("id came from ids()").borrow().get_mac(),
            })
            .collect()
    }

    /// Drain every event a device has pushed since the last drain: an
    /// `Updated` fans a fresh data frame out to its subscribers, a
    /// `Disconnected` drops it from the registry. Subscription-table
    /// entries are deliberately left for the next sweep.
    fn drain_device_events(&mut self) {
        loop {
            let event = match self.device_events_rx.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            };
            match event {
                DeviceEvent::Updated(id) => self.emit_update(id),
                DeviceEvent::Disconnected(id) => {
                    self.registry.remove_device(id);
                }
            }
        }
    }

    /// Assemble one data frame for `id` and fan it out to every subscriber,
    /// patching in each client's own packet number and recomputing the CRC.
    fn emit_update(&mut self, id: DeviceId) {
        let Some(slot) = self.registry.slot_of(id) else {
            return; // already disconnected by the time the event was drained
        };
        assert!(slot < SLOTS_PER_SERVER, "slot_of returned an out-of-range slot");
        let Some(device) = self.registry.get(id) else {
            return;
        };

        let mut frame = {
            let borrowed = device.borrow();
            emitter::build_data_frame(self.server_id, slot, &*borrowed)
        };

        for key in self.subscriptions.subscribers_of(id).to_vec() {
            let Some(record) = self.subscriptions.record(&key) else {
                continue;
            };
            let addr = record.addr;
            let packet_number = self.subscriptions.next_packet_number(key.client_id);
            emitter::patch_packet_number(&mut frame, packet_number);
            self.send_to(&frame, addr);
        }
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddr) {
        if let Err(e) = self.socket.send_to(buf, addr) {
            log::warn!("send_to {addr} failed: {e}");
        }
    }
}

impl Drop for DsuServer {
    /// Detach the socket source (mio does this automatically when the
    /// `Poll` is dropped) and fire `on_removed` for every currently
    /// registered device before the registry itself goes away.
    fn drop(&mut self) {
        for id in self.registry.ids().to_vec() {
            self.registry.remove_device(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BaseData, DeviceHandle, DeviceOrientation, DeviceType};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct TestPad {
        orientation: DeviceOrientation,
        buttons: u16,
        handle: Option<DeviceHandle>,
    }

    impl TestPad {
        fn new() -> Self {
            Self {
                orientation: DeviceOrientation::Normal,
                buttons: 0,
                handle: None,
            }
        }
    }

    impl Device for TestPad {
        fn get_device_type(&self) -> DeviceType {
            DeviceType::NoMotion
        }
        fn get_mac(&self) -> u64 {
            0x00AABB_CCDDEE
        }
        fn orientation(&self) -> DeviceOrientation {
            self.orientation
        }
        fn set_orientation(&mut self, orientation: DeviceOrientation) {
            self.orientation = orientation;
        }
        fn get_base_inputs(&self) -> BaseData {
            BaseData {
                buttons: self.buttons,
                ..Default::default()
            }
        }
        fn on_added(&mut self, handle: DeviceHandle) {
            self.handle = Some(handle);
        }
    }

    fn ephemeral_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..Default::default()
        }
    }

    fn client_socket(server_addr: SocketAddr) -> std::net::UdpSocket {
        let sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.connect(server_addr).unwrap();
        sock.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        sock
    }

    fn server_addr(server: &DsuServer) -> SocketAddr {
        server.socket.local_addr().unwrap()
    }

    #[test]
    #[ignore = "requires a real UDP socket, flaky under CI sandboxing"]
    fn test_version_request_roundtrip_over_real_socket() {
        let mut server = DsuServer::new(ephemeral_config()).unwrap();
        let addr = server_addr(&server);
        let client = client_socket(addr);

        let mut request = Vec::new();
        codec::write_header(&mut request, b'C', 1, codec::MSG_TYPE_VERSION);
        codec::finalize(&mut request);
        client.send(&request).unwrap();

        server.run_once(Duration::from_millis(200)).unwrap();

        let mut buf = [0u8; 64];
        let n = client.recv(&mut buf).unwrap();
        let header = codec::parse_header(b'S', &buf[..n]).unwrap();
        assert_eq!(header.message_type, codec::MSG_TYPE_VERSION);
        assert_eq!(&buf[20..22], &[0xE9, 0x03]);
    }

    #[test]
    #[ignore = "requires a real UDP socket, flaky under CI sandboxing"]
    fn test_ports_query_over_real_socket_reports_unoccupied_slots() {
        let mut server = DsuServer::new(ephemeral_config()).unwrap();
        let addr = server_addr(&server);
        let client = client_socket(addr);

        let mut payload = vec![0u8; 4];
        byteorder::LittleEndian::write_u32(&mut payload, 2);
        payload.extend_from_slice(&[0, 1]);
        let mut request = Vec::new();
        codec::write_header(&mut request, b'C', 1, codec::MSG_TYPE_PORTS);
        request.extend_from_slice(&payload);
        codec::finalize(&mut request);
        client.send(&request).unwrap();

        server.run_once(Duration::from_millis(200)).unwrap();

        for _ in 0..2 {
            let mut buf = [0u8; 64];
            let n = client.recv(&mut buf).unwrap();
            assert_eq!(n, 32);
            assert_eq!(buf[21], 0); // unoccupied: state byte zero
        }
    }

    #[test]
    #[ignore = "requires a real UDP socket, flaky under CI sandboxing"]
    fn test_data_register_all_then_device_update_emits_frame() {
        let mut server = DsuServer::new(ephemeral_config()).unwrap();
        let addr = server_addr(&server);
        let client = client_socket(addr);

        let pad = Rc::new(RefCell::new(TestPad::new()));
        server.add_device(pad.clone()).unwrap();

        // DATA register ALL, client_id 42.
        let mut payload = vec![0u8, 0];
        payload.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        let mut request = Vec::new();
        codec::write_header(&mut request, b'C', 42, codec::MSG_TYPE_DATA);
        request.extend_from_slice(&payload);
        codec::finalize(&mut request);
        client.send(&request).unwrap();

        server.run_once(Duration::from_millis(200)).unwrap();
        // No reply to a DATA request.
        client.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        let mut buf = [0u8; 200];
        assert!(client.recv(&mut buf).is_err());

        pad.borrow().handle.as_ref().unwrap().notify_updated();
        server.run_once(Duration::from_millis(200)).unwrap();

        client.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let n = client.recv(&mut buf).unwrap();
        assert_eq!(n, emitter::DATA_FRAME_LEN);
        assert_eq!(
            byteorder::LittleEndian::read_u32(&buf[emitter::PACKET_NUMBER_OFFSET..]),
            0
        );

        pad.borrow().handle.as_ref().unwrap().notify_updated();
        server.run_once(Duration::from_millis(200)).unwrap();
        let n = client.recv(&mut buf).unwrap();
        assert_eq!(n, emitter::DATA_FRAME_LEN);
        assert_eq!(
            byteorder::LittleEndian::read_u32(&buf[emitter::PACKET_NUMBER_OFFSET..]),
            1
        );
    }

    #[test]
    fn test_add_device_rejects_server_full() {
        let mut server = DsuServer::new(ephemeral_config()).unwrap();
        for _ in 0..SLOTS_PER_SERVER {
            server
                .add_device(Rc::new(RefCell::new(TestPad::new())))
                .unwrap();
        }
        let result = server.add_device(Rc::new(RefCell::new(TestPad::new())));
        assert_eq!(result.unwrap_err(), RegistrationError::ServerFull(SLOTS_PER_SERVER));
    }

    #[test]
    fn test_disconnect_event_drops_device_from_registry() {
        let mut server = DsuServer::new(ephemeral_config()).unwrap();
        let pad = Rc::new(RefCell::new(TestPad::new()));
        server.add_device(pad.clone()).unwrap();
        assert_eq!(server.active_devices_count(), 1);

        pad.borrow().handle.as_ref().unwrap().notify_disconnected();
        server.drain_device_events();
        assert_eq!(server.active_devices_count(), 0);
    }
}
