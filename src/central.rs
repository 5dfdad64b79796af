//! Central role: connecting to peripherals, locating characteristics and subscribing to their
//! notifications over a fixed pool of connection slots.

mod characteristic;
mod connection;
mod delegate;
mod discovery;
mod hub;
mod slot;
mod subscription;

use log::*;
use static_assertions::assert_impl_all;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Error, ErrorKind};
use crate::radio::{NativeConn, NotifyOutcome, Radio, ScanParams};
use crate::sync;
use crate::uuid::Uuid;

use discovery::DiscoveryRegistry;
use hub::ConnectionCallbackHub;
use slot::SlotAllocator;
use subscription::SubscriptionRegistry;

pub use characteristic::{Properties, Value};
pub use connection::Connection;
pub use delegate::RadioEvent;
pub use discovery::{DiscoveryId, Phase};

#[derive(Clone, Debug)]
pub struct CentralBuilder {
    max_connections: usize,
    scan_params: ScanParams,
    discovery_timeout: Option<Duration>,
}

impl CentralBuilder {
    pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

    pub fn new() -> Self {
        Self {
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            scan_params: ScanParams::default(),
            discovery_timeout: None,
        }
    }

    /// Number of connection slots. At least one slot is always allocated.
    pub fn max_connections(&mut self, v: usize) -> &mut Self {
        self.max_connections = v.max(1);
        self
    }

    pub fn scan_params(&mut self, v: ScanParams) -> &mut Self {
        self.scan_params = v;
        self
    }

    /// Age after which [`Central::expire_discoveries`](struct.Central.html#method.expire_discoveries)
    /// aborts an unfinished discovery.
    pub fn discovery_timeout(&mut self, v: Duration) -> &mut Self {
        self.discovery_timeout = Some(v);
        self
    }

    pub fn build(&self, radio: Arc<dyn Radio>) -> Central {
        Central::build(self, radio)
    }
}

impl Default for CentralBuilder {
    fn default() -> Self {
        Self::new()
    }
}

assert_impl_all!(CentralBuilder: Send, Sync);

struct Inner {
    radio: Arc<dyn Radio>,
    scan_params: ScanParams,
    discovery_timeout: Option<Duration>,
    started: AtomicBool,
    // Lock order: `slots` before `discoveries`, `subscriptions` and the hub's request queue.
    // Application callbacks never run while any of these is held.
    slots: Mutex<SlotAllocator>,
    discoveries: Mutex<DiscoveryRegistry>,
    subscriptions: Mutex<SubscriptionRegistry>,
    hub: ConnectionCallbackHub,
}

/// Entry point of the central role.
///
/// Cheap to clone, all clones share the same state. Requests made through it are
/// fire-and-forget: their outcomes arrive through the callbacks once the radio layer reports
/// them via [`handle_event`](#method.handle_event).
#[derive(Clone)]
pub struct Central(Arc<Inner>);

assert_impl_all!(Central: Send, Sync);

impl Central {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        CentralBuilder::new().build(radio)
    }

    fn build(b: &CentralBuilder, radio: Arc<dyn Radio>) -> Self {
        Self(Arc::new(Inner {
            radio,
            scan_params: b.scan_params,
            discovery_timeout: b.discovery_timeout,
            started: AtomicBool::new(false),
            slots: Mutex::new(SlotAllocator::new(b.max_connections)),
            discoveries: Mutex::new(DiscoveryRegistry::new()),
            subscriptions: Mutex::new(SubscriptionRegistry::new()),
            hub: ConnectionCallbackHub::new(),
        }))
    }

    /// Enables the radio. Calling it again once it succeeded does nothing.
    pub fn start(&self) -> Result<(), Error> {
        if self.0.started.load(Ordering::Acquire) {
            return Ok(());
        }
        self.0.radio.enable().map_err(|e| {
            error!("couldn't enable radio: {}", e);
            Error::from_radio(ErrorKind::RadioUnavailable, "couldn't enable the radio", e)
        })?;
        if !self.0.started.swap(true, Ordering::AcqRel) {
            info!("radio started with {} connection slots", self.max_connections());
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.0.started.load(Ordering::Acquire)
    }

    pub fn max_connections(&self) -> usize {
        sync::lock(&self.0.slots).capacity()
    }

    /// Number of connection slots currently taken, including those reserved by pending
    /// [`connect`](#method.connect) requests.
    pub fn connection_count(&self) -> usize {
        sync::lock(&self.0.slots).in_use()
    }

    /// Sets the callback invoked with every established connection, replacing the previous one.
    pub fn set_connected_callback<F>(&self, f: F)
        where F: Fn(Connection) + Send + Sync + 'static
    {
        self.0.hub.set_connected(Some(Arc::new(f)));
    }

    pub fn clear_connected_callback(&self) {
        self.0.hub.set_connected(None);
    }

    /// Sets the callback invoked when a connection goes away, replacing the previous one.
    /// The connection's slot is released once the callback returns.
    pub fn set_disconnected_callback<F>(&self, f: F)
        where F: Fn(Connection) + Send + Sync + 'static
    {
        self.0.hub.set_disconnected(Some(Arc::new(f)));
    }

    pub fn clear_disconnected_callback(&self) {
        self.0.hub.set_disconnected(None);
    }

    /// Reserves a connection slot and scans for a connectable peripheral advertising
    /// `device_uuid`. The connected callback reports the outcome.
    ///
    /// Fails right away with [`CapacityExceeded`](../error/enum.ErrorKind.html#variant.CapacityExceeded)
    /// when every slot is taken, and with `ConnectFailed` when scanning can't be started.
    pub fn connect(&self, device_uuid: Uuid) -> Result<(), Error> {
        self.ensure_started()?;
        let key = sync::lock(&self.0.slots).acquire();
        let key = key.ok_or_else(|| {
            error!("can't connect to {:?}: all connection slots in use", device_uuid);
            Error::new(ErrorKind::CapacityExceeded,
                format!("all {} connection slots in use", self.max_connections()))
        })?;
        info!("looking for {:?} to connect on slot #{}", device_uuid, key);
        self.0.hub.enqueue(key, device_uuid);
        self.resume_scan()
    }

    /// Asks the radio layer to disconnect. Cleanup happens when the disconnection is reported.
    pub fn disconnect(&self, connection: &Connection) -> Result<(), Error> {
        self.ensure_started()?;
        let native = self.resolve(connection)?;
        self.0.radio.disconnect(native).map_err(|e| {
            error!("couldn't disconnect {}: {}", connection, e);
            Error::from_radio(ErrorKind::DisconnectFailed,
                format!("couldn't disconnect {}", connection), e)
        })
    }

    /// Starts locating the characteristic `characteristic_uuid` of service `service_uuid` on
    /// `connection`.
    ///
    /// `on_found` is invoked exactly once: with the [`Value`](struct.Value.html) when the
    /// characteristic and its configuration descriptor are found, or with the error that ended
    /// the search. A request rejected by the radio layer right away is returned instead and
    /// `on_found` is dropped uncalled.
    pub fn discover<F>(
        &self,
        connection: &Connection,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        on_found: F,
    ) -> Result<DiscoveryId, Error>
        where F: FnOnce(Result<Value, Error>) + Send + 'static
    {
        self.ensure_started()?;
        let (native, request) = {
            // Registered under the slot lock so a disconnect either purges the target or refuses it.
            let slots = sync::lock(&self.0.slots);
            let native = slots.resolve(connection.key()).ok_or_else(|| not_connected(connection))?;
            let request = sync::lock(&self.0.discoveries).start(*connection, native, service_uuid,
                characteristic_uuid, Box::new(on_found), Instant::now());
            (native, request)
        };
        if let Err(e) = self.0.radio.discover(native, &request) {
            error!("discovery {}: service request rejected: {}", request.id, e);
            let _target = sync::lock(&self.0.discoveries).remove(request.id);
            return Err(Error::from_radio(ErrorKind::DiscoveryFailed,
                format!("couldn't discover service {:?}", service_uuid), e));
        }
        Ok(request.id)
    }

    /// Aborts a discovery, reporting [`Cancelled`](../error/enum.ErrorKind.html#variant.Cancelled)
    /// to its callback. Returns `false` if it has already finished.
    pub fn cancel_discovery(&self, id: DiscoveryId) -> bool {
        let target = sync::lock(&self.0.discoveries).remove(id);
        match target {
            Some(target) => {
                target.fail(Error::new(ErrorKind::Cancelled, format!("discovery {} cancelled", id)));
                true
            }
            None => false,
        }
    }

    /// Aborts every discovery older than the configured timeout, reporting `Timeout` to their
    /// callbacks. Returns how many were aborted. Does nothing without a timeout.
    pub fn expire_discoveries(&self) -> usize {
        let timeout = match self.0.discovery_timeout {
            Some(v) => v,
            None => return 0,
        };
        let expired = sync::lock(&self.0.discoveries).remove_expired(Instant::now(), timeout);
        let count = expired.len();
        for target in expired {
            let id = target.id();
            warn!("discovery {} timed out", id);
            target.fail(Error::new(ErrorKind::Timeout,
                format!("discovery {} didn't finish within {:?}", id, timeout)));
        }
        count
    }

    pub fn discovery_phase(&self, id: DiscoveryId) -> Option<Phase> {
        sync::lock(&self.0.discoveries).phase(id)
    }

    pub fn pending_discoveries(&self) -> usize {
        sync::lock(&self.0.discoveries).len()
    }

    /// Enables notifications of `value` and routes them to `on_notify`, replacing a previous
    /// subscription to the same value. Subscribing twice isn't an error.
    pub fn subscribe<F>(&self, value: &Value, on_notify: F) -> Result<(), Error>
        where F: Fn(&[u8]) + Send + Sync + 'static
    {
        self.ensure_started()?;
        let connection = value.connection();
        let native = self.resolve(&connection)?;
        match self.0.radio.enable_notify(native, value.subscribe_params()) {
            Ok(NotifyOutcome::Enabled) => {}
            Ok(NotifyOutcome::AlreadyEnabled) => {
                debug!("notifications of {:?} on {} already enabled",
                    value.characteristic_uuid(), connection);
            }
            Err(e) => {
                error!("couldn't subscribe to {:?} on {}: {}", value.characteristic_uuid(), connection, e);
                return Err(Error::from_radio(ErrorKind::SubscribeFailed,
                    format!("couldn't enable notifications of {:?}", value.characteristic_uuid()), e));
            }
        }
        {
            let slots = sync::lock(&self.0.slots);
            if slots.resolve(connection.key()) != Some(native) {
                drop(slots);
                warn!("{} went away while subscribing to {:?}", connection, value.characteristic_uuid());
                return Err(not_connected(&connection));
            }
            sync::lock(&self.0.subscriptions).insert(connection, value.value_handle(), Arc::new(on_notify));
        }
        info!("subscribed to {:?} on {}", value.characteristic_uuid(), connection);
        Ok(())
    }

    /// Stops routing notifications of `value` and disables them on the peripheral.
    pub fn unsubscribe(&self, value: &Value) -> Result<(), Error> {
        self.ensure_started()?;
        let connection = value.connection();
        sync::lock(&self.0.subscriptions).remove(connection, value.value_handle());
        let native = self.resolve(&connection)?;
        self.0.radio.disable_notify(native, value.subscribe_params()).map_err(|e| {
            error!("couldn't unsubscribe from {:?} on {}: {}", value.characteristic_uuid(), connection, e);
            Error::from_radio(ErrorKind::UnsubscribeFailed,
                format!("couldn't disable notifications of {:?}", value.characteristic_uuid()), e)
        })?;
        info!("unsubscribed from {:?} on {}", value.characteristic_uuid(), connection);
        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        sync::lock(&self.0.subscriptions).len()
    }

    fn ensure_started(&self) -> Result<(), Error> {
        if self.is_started() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::NotStarted, "radio not started"))
        }
    }

    fn resolve(&self, connection: &Connection) -> Result<NativeConn, Error> {
        let native = sync::lock(&self.0.slots).resolve(connection.key());
        native.ok_or_else(|| not_connected(connection))
    }

    /// Starts scanning if connect requests are waiting and nothing else is in progress. If the
    /// scan can't be started the waiting requests are dropped and their slots released.
    fn resume_scan(&self) -> Result<(), Error> {
        if !self.0.hub.begin_scan() {
            return Ok(());
        }
        match self.0.radio.start_scan(&self.0.scan_params) {
            Ok(()) => {
                debug!("scanning");
                Ok(())
            }
            Err(e) => {
                error!("couldn't start scanning: {}", e);
                let keys = self.0.hub.abort_scan();
                let mut slots = sync::lock(&self.0.slots);
                for key in keys {
                    slots.release(key);
                }
                Err(Error::from_radio(ErrorKind::ConnectFailed, "couldn't start scanning", e))
            }
        }
    }
}

fn not_connected(connection: &Connection) -> Error {
    Error::new(ErrorKind::NotConnected, format!("connection {} isn't established", connection))
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use crate::radio::{Address, AdvertisementData, Attribute, DiscoverKind, HandleRange, RadioError};
    use crate::radio::mock::{MockRadio, Request};

    type Found = Arc<Mutex<Vec<Result<Value, Error>>>>;
    type Payloads = Arc<Mutex<Vec<Vec<u8>>>>;

    struct Fixture {
        radio: Arc<MockRadio>,
        central: Central,
        connected: Arc<Mutex<Vec<Connection>>>,
        disconnected: Arc<Mutex<Vec<Connection>>>,
    }

    fn setup_with(b: &mut CentralBuilder) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let radio = Arc::new(MockRadio::new());
        let central = b.build(radio.clone());
        central.start().unwrap();
        let connected = Arc::new(Mutex::new(Vec::new()));
        let disconnected = Arc::new(Mutex::new(Vec::new()));
        let c = connected.clone();
        central.set_connected_callback(move |conn| c.lock().unwrap().push(conn));
        let d = disconnected.clone();
        central.set_disconnected_callback(move |conn| d.lock().unwrap().push(conn));
        Fixture { radio, central, connected, disconnected }
    }

    fn setup(max_connections: usize) -> Fixture {
        setup_with(CentralBuilder::new().max_connections(max_connections))
    }

    fn address(uuid: u16) -> Address {
        let b = uuid.to_be_bytes();
        Address::new([0xc0, 0xde, 0, 0, b[0], b[1]])
    }

    fn advertisement(uuid: u16, connectable: bool) -> RadioEvent {
        RadioEvent::AdvertisementSeen {
            address: address(uuid),
            advertisement_data: AdvertisementData::new(connectable)
                .with_local_name("sensor")
                .with_service_uuids(&[Uuid::from_u16(0x180a), Uuid::from_u16(uuid)]),
            rssi: -60,
        }
    }

    fn found_recorder() -> (Found, impl Fn() -> Box<dyn FnOnce(Result<Value, Error>) + Send>) {
        let found = Found::default();
        let f = found.clone();
        (found, move || {
            let f = f.clone();
            Box::new(move |v: Result<Value, Error>| f.lock().unwrap().push(v))
                as Box<dyn FnOnce(Result<Value, Error>) + Send>
        })
    }

    fn payload_recorder() -> (Payloads, impl Fn(&[u8]) + Send + Sync + 'static) {
        let payloads = Payloads::default();
        let p = payloads.clone();
        (payloads, move |v: &[u8]| p.lock().unwrap().push(v.to_vec()))
    }

    impl Fixture {
        /// Runs the scan-connect sequence for a peripheral advertising `uuid`.
        fn connect(&self, uuid: u16) -> (Connection, NativeConn) {
            self.central.connect(Uuid::from_u16(uuid)).unwrap();
            self.central.handle_event(advertisement(uuid, true));
            let native = self.radio.last_conn().unwrap();
            self.central.handle_event(RadioEvent::Connected { conn: native, error: None });
            let conn = *self.connected.lock().unwrap().last().unwrap();
            (conn, native)
        }

        fn attribute(&self, id: DiscoveryId, attribute: Attribute) {
            self.central.handle_event(RadioEvent::AttributeDiscovered { id, attribute: Some(attribute) });
        }

        /// Walks the 0xff21/0xff22 discovery to completion.
        fn discover(&self, conn: &Connection) -> Value {
            let (found, cb) = found_recorder();
            let id = self.central.discover(conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22),
                cb()).unwrap();
            self.attribute(id, Attribute::service(5, Uuid::from_u16(0xff21), 20));
            self.attribute(id, Attribute::characteristic(7, Uuid::from_u16(0xff22), 0x10));
            self.attribute(id, Attribute::descriptor(9, Uuid::CLIENT_CHARACTERISTIC_CONFIGURATION));
            let r = found.lock().unwrap().pop().unwrap();
            r.unwrap()
        }

        fn notify(&self, conn: NativeConn, value_handle: u16, payload: &[u8]) {
            self.central.handle_event(RadioEvent::Notification {
                conn,
                value_handle,
                payload: payload.to_vec(),
            });
        }
    }

    #[test]
    fn capacity_is_enforced_and_slots_are_reused() {
        let f = setup(2);
        let (a, native_a) = f.connect(0xffa1);
        assert_eq!(f.radio.take_requests(), vec![
            Request::Enable,
            Request::StartScan(ScanParams::default()),
            Request::StopScan,
            Request::Connect(address(0xffa1)),
        ]);
        let (b, _) = f.connect(0xffb1);
        assert_eq!((a.key(), b.key()), (0, 1));
        assert_eq!(f.central.connection_count(), 2);

        f.radio.take_requests();
        let e = f.central.connect(Uuid::from_u16(0xffc1)).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::CapacityExceeded);
        assert!(f.radio.requests().is_empty());

        f.central.handle_event(RadioEvent::Disconnected { conn: native_a, reason: 0x13 });
        assert_eq!(*f.disconnected.lock().unwrap(), vec![a]);
        assert_eq!(f.central.connection_count(), 1);

        let (c, _) = f.connect(0xffc1);
        assert_eq!(c.key(), a.key());
        assert_eq!(f.connected.lock().unwrap().len(), 3);
    }

    #[test]
    fn only_connectable_matching_advertisements_are_taken() {
        let f = setup(5);
        f.central.connect(Uuid::from_u16(0xffcc)).unwrap();
        f.central.handle_event(advertisement(0xffcc, false));
        f.central.handle_event(advertisement(0xffdd, true));
        assert_eq!(f.radio.last_conn(), None);
        assert!(!f.radio.requests().contains(&Request::StopScan));

        f.central.handle_event(advertisement(0xffcc, true));
        assert_eq!(f.radio.last_conn(), Some(NativeConn::new(0x101)));
        // One connection request in flight at a time.
        f.central.handle_event(advertisement(0xffcc, true));
        assert_eq!(f.radio.last_conn(), Some(NativeConn::new(0x101)));
    }

    #[test]
    fn pending_requests_resume_scanning() {
        let f = setup(5);
        f.central.connect(Uuid::from_u16(0xffa1)).unwrap();
        f.central.handle_event(advertisement(0xffa1, true));
        f.central.connect(Uuid::from_u16(0xffb1)).unwrap();
        f.radio.take_requests();

        f.central.handle_event(RadioEvent::Connected { conn: NativeConn::new(0x101), error: None });
        assert_eq!(f.radio.take_requests(), vec![Request::StartScan(ScanParams::default())]);
        f.central.handle_event(advertisement(0xffb1, true));
        f.central.handle_event(RadioEvent::Connected { conn: NativeConn::new(0x102), error: None });
        assert_eq!(f.connected.lock().unwrap().len(), 2);
        assert_eq!(f.radio.take_requests(), vec![Request::StopScan, Request::Connect(address(0xffb1))]);
    }

    #[test]
    fn scan_failure_releases_slot() {
        let f = setup(1);
        f.radio.script(|s| s.start_scan = Some(RadioError::new(-5)));
        let e = f.central.connect(Uuid::from_u16(0xffcc)).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::ConnectFailed);
        assert_eq!(e.radio_code(), Some(-5));
        assert_eq!(f.central.connection_count(), 0);

        f.radio.script(|s| s.start_scan = None);
        f.connect(0xffcc);
        assert_eq!(f.central.connection_count(), 1);
    }

    #[test]
    fn stop_scan_failure_keeps_looking() {
        let f = setup(1);
        f.central.connect(Uuid::from_u16(0xffcc)).unwrap();
        f.radio.script(|s| s.stop_scan = Some(RadioError::new(-16)));
        f.central.handle_event(advertisement(0xffcc, true));
        assert_eq!(f.radio.last_conn(), None);

        f.radio.script(|s| s.stop_scan = None);
        f.central.handle_event(advertisement(0xffcc, true));
        assert_eq!(f.radio.last_conn(), Some(NativeConn::new(0x101)));
    }

    #[test]
    fn rejected_connect_releases_slot() {
        let f = setup(1);
        f.central.connect(Uuid::from_u16(0xffcc)).unwrap();
        f.radio.script(|s| s.connect = Some(RadioError::new(-12)));
        f.central.handle_event(advertisement(0xffcc, true));
        assert_eq!(f.central.connection_count(), 0);
        assert!(f.connected.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_handshake_skips_callback() {
        let f = setup(1);
        f.central.connect(Uuid::from_u16(0xffcc)).unwrap();
        f.central.handle_event(advertisement(0xffcc, true));
        let native = f.radio.last_conn().unwrap();
        f.central.handle_event(RadioEvent::Connected { conn: native, error: Some(0x3e) });
        assert!(f.connected.lock().unwrap().is_empty());
        assert_eq!(f.central.connection_count(), 0);

        // Slot is usable again.
        let (conn, _) = f.connect(0xffcc);
        assert_eq!(conn.key(), 0);
    }

    #[test]
    fn incoming_connection_takes_free_slot() {
        let f = setup(1);
        f.central.handle_event(RadioEvent::Connected { conn: NativeConn::new(0x900), error: None });
        assert_eq!(*f.connected.lock().unwrap(), vec![Connection::new(0)]);

        f.central.handle_event(RadioEvent::Connected { conn: NativeConn::new(0x901), error: None });
        assert_eq!(f.connected.lock().unwrap().len(), 1);
        assert!(f.radio.requests().contains(&Request::Disconnect(NativeConn::new(0x901))));

        f.central.handle_event(RadioEvent::Disconnected { conn: NativeConn::new(0x901), reason: 0x16 });
        assert!(f.disconnected.lock().unwrap().is_empty());
    }

    #[test]
    fn discover_then_subscribe() {
        let f = setup(5);
        let (conn, native) = f.connect(0xffcc);

        let (found, cb) = found_recorder();
        let id = f.central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), cb()).unwrap();
        let first = f.radio.last_discover().unwrap();
        assert_eq!(first.id, id);
        assert_eq!(first.kind, DiscoverKind::PrimaryService);
        assert_eq!(first.range, HandleRange::FULL);
        assert_eq!(f.central.discovery_phase(id), Some(Phase::SeekingService));

        f.attribute(id, Attribute::service(5, Uuid::from_u16(0xff21), 20));
        assert_eq!(f.radio.last_discover().unwrap().range, HandleRange::new(6, 20));
        f.attribute(id, Attribute::characteristic(7, Uuid::from_u16(0xff22), 0x12));
        let last = f.radio.last_discover().unwrap();
        assert_eq!(last.uuid, Uuid::CLIENT_CHARACTERISTIC_CONFIGURATION);
        assert_eq!(last.range, HandleRange::new(9, 20));
        assert!(found.lock().unwrap().is_empty());
        f.attribute(id, Attribute::descriptor(9, Uuid::CLIENT_CHARACTERISTIC_CONFIGURATION));

        assert_eq!(f.central.pending_discoveries(), 0);
        assert_eq!(f.central.discovery_phase(id), None);
        let value = {
            let mut found = found.lock().unwrap();
            assert_eq!(found.len(), 1);
            found.pop().unwrap().unwrap()
        };
        assert_eq!(value.service_uuid(), Uuid::from_u16(0xff21));
        assert_eq!(value.characteristic_uuid(), Uuid::from_u16(0xff22));
        assert_eq!(value.value_handle(), 8);
        assert_eq!(value.ccc_handle(), 9);
        assert_eq!(value.connection(), conn);
        assert!(value.properties().is_read());

        let (payloads, on_notify) = payload_recorder();
        f.central.subscribe(&value, on_notify).unwrap();
        assert!(f.radio.is_notifying(native, 9));
        assert_eq!(f.central.subscription_count(), 1);

        f.notify(native, 8, &hex!("e8032a"));
        f.notify(native, 9, &hex!("01"));
        assert!(!f.central.handle_notification(native, 8, &[]));
        assert_eq!(*payloads.lock().unwrap(), vec![hex!("e8032a").to_vec()]);

        f.central.unsubscribe(&value).unwrap();
        assert_eq!(f.central.subscription_count(), 0);
        assert!(!f.radio.is_notifying(native, 9));
        assert!(!f.central.handle_notification(native, 8, &hex!("e9032a")));
        assert_eq!(payloads.lock().unwrap().len(), 1);
    }

    #[test]
    fn interleaved_discoveries_report_to_their_own_callback() {
        let f = setup(5);
        let (conn, _) = f.connect(0xffcc);
        let (first, cb1) = found_recorder();
        let (second, cb2) = found_recorder();
        let a = f.central.discover(&conn, Uuid::from_u16(0xff11), Uuid::from_u16(0xff12), cb1()).unwrap();
        let b = f.central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), cb2()).unwrap();
        assert_eq!(f.central.pending_discoveries(), 2);

        f.attribute(b, Attribute::service(10, Uuid::from_u16(0xff21), 20));
        f.attribute(a, Attribute::service(1, Uuid::from_u16(0xff11), 9));
        f.attribute(a, Attribute::characteristic(2, Uuid::from_u16(0xff12), 0x10));
        f.attribute(b, Attribute::characteristic(11, Uuid::from_u16(0xff22), 0x10));
        f.attribute(a, Attribute::descriptor(4, Uuid::CLIENT_CHARACTERISTIC_CONFIGURATION));
        assert_eq!(first.lock().unwrap().len(), 1);
        assert!(second.lock().unwrap().is_empty());
        f.attribute(b, Attribute::descriptor(13, Uuid::CLIENT_CHARACTERISTIC_CONFIGURATION));

        assert_eq!(first.lock().unwrap()[0].as_ref().unwrap().value_handle(), 3);
        assert_eq!(second.lock().unwrap().len(), 1);
        assert_eq!(second.lock().unwrap()[0].as_ref().unwrap().value_handle(), 12);
        assert_eq!(f.central.pending_discoveries(), 0);
    }

    #[test]
    fn discovery_failures() {
        let f = setup(5);
        let (conn, _) = f.connect(0xffcc);
        let (found, cb) = found_recorder();

        // Dead end.
        let id = f.central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), cb()).unwrap();
        f.central.handle_event(RadioEvent::AttributeDiscovered { id, attribute: None });
        assert_eq!(found.lock().unwrap().pop().unwrap().unwrap_err().kind(), ErrorKind::NotFound);

        // Follow-up request rejected.
        let id = f.central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), cb()).unwrap();
        f.radio.script(|s| s.discover = Some(RadioError::new(-22)));
        f.attribute(id, Attribute::service(5, Uuid::from_u16(0xff21), 20));
        let e = found.lock().unwrap().pop().unwrap().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DiscoveryFailed);
        assert_eq!(e.radio_code(), Some(-22));

        // First request rejected: reported synchronously, callback never runs.
        let e = f.central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), cb()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::DiscoveryFailed);
        assert!(found.lock().unwrap().is_empty());
        assert_eq!(f.central.pending_discoveries(), 0);

        // Late progress for a finished discovery is ignored.
        f.radio.script(|s| s.discover = None);
        f.attribute(id, Attribute::characteristic(7, Uuid::from_u16(0xff22), 0x10));
        assert!(found.lock().unwrap().is_empty());

        let e = f.central.discover(&Connection::new(3), Uuid::from_u16(0xff21), Uuid::from_u16(0xff22),
            cb()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotConnected);
    }

    #[test]
    fn cancel_and_expire_discoveries() {
        let f = setup_with(CentralBuilder::new().discovery_timeout(Duration::from_secs(0)));
        let (conn, _) = f.connect(0xffcc);
        let (found, cb) = found_recorder();

        let id = f.central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), cb()).unwrap();
        assert!(f.central.cancel_discovery(id));
        assert!(!f.central.cancel_discovery(id));
        assert_eq!(found.lock().unwrap().pop().unwrap().unwrap_err().kind(), ErrorKind::Cancelled);

        f.central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), cb()).unwrap();
        assert_eq!(f.central.expire_discoveries(), 1);
        assert_eq!(found.lock().unwrap().pop().unwrap().unwrap_err().kind(), ErrorKind::Timeout);
        assert_eq!(f.central.pending_discoveries(), 0);

        let f = setup(5);
        let (conn, _) = f.connect(0xffcc);
        f.central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), |_| {}).unwrap();
        assert_eq!(f.central.expire_discoveries(), 0);
        assert_eq!(f.central.pending_discoveries(), 1);
    }

    #[test]
    fn disconnect_cleans_up() {
        let f = setup(5);
        let (conn, native) = f.connect(0xffcc);
        let value = f.discover(&conn);
        let (payloads, on_notify) = payload_recorder();
        f.central.subscribe(&value, on_notify).unwrap();
        let (found, cb) = found_recorder();
        f.central.discover(&conn, Uuid::from_u16(0xff31), Uuid::from_u16(0xff32), cb()).unwrap();

        f.central.disconnect(&conn).unwrap();
        assert!(f.radio.requests().contains(&Request::Disconnect(native)));
        f.central.handle_event(RadioEvent::Disconnected { conn: native, reason: 0x16 });

        assert_eq!(f.central.subscription_count(), 0);
        assert_eq!(f.central.pending_discoveries(), 0);
        assert_eq!(found.lock().unwrap().pop().unwrap().unwrap_err().kind(), ErrorKind::NotConnected);
        assert_eq!(*f.disconnected.lock().unwrap(), vec![conn]);
        assert_eq!(f.central.connection_count(), 0);

        assert!(!f.central.handle_notification(native, 8, &hex!("0102")));
        assert!(payloads.lock().unwrap().is_empty());
        assert_eq!(f.central.subscribe(&value, |_| {}).unwrap_err().kind(), ErrorKind::NotConnected);
        assert_eq!(f.central.disconnect(&conn).unwrap_err().kind(), ErrorKind::NotConnected);

        // A second disconnect report for the same native reference is ignored.
        f.central.handle_event(RadioEvent::Disconnected { conn: native, reason: 0x16 });
        assert_eq!(f.disconnected.lock().unwrap().len(), 1);
    }

    #[test]
    fn lost_connection_refuses_new_registrations() {
        let f = setup(1);
        let (conn, native) = f.connect(0xffcc);
        let value = f.discover(&conn);
        let (payloads, on_notify) = payload_recorder();
        let on_notify = Arc::new(on_notify);

        let refused = Arc::new(Mutex::new(Vec::new()));
        let central = f.central.clone();
        let r = refused.clone();
        f.central.set_disconnected_callback(move |conn| {
            let on_notify = on_notify.clone();
            let mut r = r.lock().unwrap();
            r.push(central.subscribe(&value, move |p| on_notify(p)).err().map(|e| e.kind()));
            r.push(central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), |_| {})
                .err().map(|e| e.kind()));
            r.push(central.disconnect(&conn).err().map(|e| e.kind()));
        });
        f.central.handle_event(RadioEvent::Disconnected { conn: native, reason: 0x13 });

        assert_eq!(*refused.lock().unwrap(), vec![Some(ErrorKind::NotConnected); 3]);
        assert_eq!(f.central.subscription_count(), 0);
        assert_eq!(f.central.pending_discoveries(), 0);
        assert_eq!(f.central.connection_count(), 0);

        // The slot goes to another peripheral, which must not reach the old callback.
        let (conn2, native2) = f.connect(0xffdd);
        assert_eq!(conn2, conn);
        assert_ne!(native2, native);
        assert!(!f.central.handle_notification(native2, 8, &hex!("aa")));
        assert!(payloads.lock().unwrap().is_empty());
    }

    #[test]
    fn subscription_outcomes() {
        let f = setup(5);
        let (conn, native) = f.connect(0xffcc);
        let value = f.discover(&conn);

        f.radio.script(|s| s.enable_notify = Some(RadioError::new(-128)));
        let e = f.central.subscribe(&value, |_| {}).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::SubscribeFailed);
        assert_eq!(e.radio_code(), Some(-128));
        assert_eq!(f.central.subscription_count(), 0);
        f.radio.script(|s| s.enable_notify = None);

        let (first, cb1) = payload_recorder();
        let (second, cb2) = payload_recorder();
        f.central.subscribe(&value, cb1).unwrap();
        // Already enabled on the peripheral: succeeds, replaces the callback.
        f.central.subscribe(&value, cb2).unwrap();
        assert_eq!(f.central.subscription_count(), 1);
        f.notify(native, value.value_handle(), &hex!("2a"));
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);

        f.radio.script(|s| s.disable_notify = Some(RadioError::new(-57)));
        let e = f.central.unsubscribe(&value).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UnsubscribeFailed);
        assert_eq!(f.central.subscription_count(), 0);

        // Unsubscribing again is a local no-op plus another radio request.
        f.radio.script(|s| s.disable_notify = None);
        f.central.unsubscribe(&value).unwrap();
    }

    #[test]
    fn stale_notifications_are_dropped() {
        let f = setup(5);
        let (conn, native) = f.connect(0xffcc);
        let value = f.discover(&conn);
        let (payloads, on_notify) = payload_recorder();
        f.central.subscribe(&value, on_notify).unwrap();

        assert!(!f.central.handle_notification(NativeConn::new(0x777), 8, &hex!("01")));
        assert!(!f.central.handle_notification(native, 0x42, &hex!("01")));
        assert!(f.central.handle_notification(native, 8, &hex!("01")));
        assert_eq!(payloads.lock().unwrap().len(), 1);
    }

    #[test]
    fn callbacks_may_reenter() {
        let f = setup(5);
        let central = f.central.clone();
        let (payloads, on_notify) = payload_recorder();
        let on_notify = Arc::new(on_notify);
        f.central.set_connected_callback(move |conn| {
            let central2 = central.clone();
            let on_notify = on_notify.clone();
            central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), move |v| {
                let on_notify = on_notify.clone();
                central2.subscribe(&v.unwrap(), move |p| on_notify(p)).unwrap();
            }).unwrap();
        });
        f.central.connect(Uuid::from_u16(0xffcc)).unwrap();
        f.central.handle_event(advertisement(0xffcc, true));
        let native = f.radio.last_conn().unwrap();
        f.central.handle_event(RadioEvent::Connected { conn: native, error: None });

        let id = f.radio.last_discover().unwrap().id;
        f.attribute(id, Attribute::service(5, Uuid::from_u16(0xff21), 20));
        f.attribute(id, Attribute::characteristic(7, Uuid::from_u16(0xff22), 0x10));
        f.attribute(id, Attribute::descriptor(9, Uuid::CLIENT_CHARACTERISTIC_CONFIGURATION));
        assert_eq!(f.central.subscription_count(), 1);
        assert!(f.central.handle_notification(native, 8, &hex!("ff")));
        assert_eq!(*payloads.lock().unwrap(), vec![vec![0xffu8]]);
    }

    #[test]
    fn concurrent_events_keep_slots_consistent() {
        const MAX: usize = 3;
        const PEERS: u32 = 4;
        const ROUNDS: u32 = 100;

        fn peer_native(peer: u32, round: u32) -> NativeConn {
            NativeConn::new(0x1000 * (peer + 1) + round)
        }

        let f = setup(MAX);
        let bound = Arc::new(Mutex::new(HashSet::new()));
        let central = f.central.clone();
        let b = bound.clone();
        f.central.set_connected_callback(move |conn| {
            assert!(conn.key() < MAX);
            assert!(central.connection_count() <= central.max_connections());
            assert!(b.lock().unwrap().insert(conn.key()), "{} handed out twice", conn);
        });
        let b = bound.clone();
        f.central.set_disconnected_callback(move |conn| {
            assert!(b.lock().unwrap().remove(&conn.key()), "{} wasn't bound", conn);
        });

        let mut handles = Vec::new();

        // Peripherals connecting on their own, each walking discovery and a subscription.
        for peer in 0..PEERS {
            let central = f.central.clone();
            handles.push(thread::spawn(move || {
                for round in 0..ROUNDS {
                    let native = peer_native(peer, round);
                    central.handle_event(RadioEvent::Connected { conn: native, error: None });
                    assert!(central.connection_count() <= MAX);
                    let key = sync::lock(&central.0.slots).find(native);
                    let conn = match key {
                        Some(v) => Connection::new(v),
                        None => continue,
                    };

                    let found = Arc::new(Mutex::new(None));
                    let fd = found.clone();
                    let id = central.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22),
                        move |v| *fd.lock().unwrap() = Some(v)).unwrap();
                    for attribute in &[
                        Attribute::service(5, Uuid::from_u16(0xff21), 20),
                        Attribute::characteristic(7, Uuid::from_u16(0xff22), 0x10),
                        Attribute::descriptor(9, Uuid::CLIENT_CHARACTERISTIC_CONFIGURATION),
                    ] {
                        central.handle_event(RadioEvent::AttributeDiscovered { id, attribute: Some(*attribute) });
                    }
                    let value = found.lock().unwrap().take().unwrap().unwrap();
                    assert_eq!(value.connection(), conn);

                    let hits = Arc::new(AtomicUsize::new(0));
                    let h = hits.clone();
                    central.subscribe(&value, move |_| { h.fetch_add(1, Ordering::SeqCst); }).unwrap();
                    assert!(central.handle_notification(native, 8, &[round as u8]));
                    central.unsubscribe(&value).unwrap();
                    assert!(!central.handle_notification(native, 8, &[round as u8]));
                    assert!(hits.load(Ordering::SeqCst) >= 1);

                    central.handle_event(RadioEvent::Disconnected { conn: native, reason: 0x13 });
                }
            }));
        }

        // Connections we ask for.
        let central = f.central.clone();
        let radio = f.radio.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..ROUNDS {
                if central.connect(Uuid::from_u16(0xffcc)).is_err() {
                    thread::yield_now();
                    continue;
                }
                central.handle_event(advertisement(0xffcc, true));
                let native = radio.last_conn().unwrap();
                central.handle_event(RadioEvent::Connected { conn: native, error: None });
                assert!(central.connection_count() <= MAX);
                central.handle_event(RadioEvent::Disconnected { conn: native, reason: 0x16 });
            }
        }));

        // Notifications racing the subscriptions and their removal.
        let central = f.central.clone();
        handles.push(thread::spawn(move || {
            for round in 0..ROUNDS {
                for peer in 0..PEERS {
                    central.handle_notification(peer_native(peer, round), 8, &hex!("ee"));
                }
            }
        }));

        for h in handles {
            h.join().unwrap();
        }
        assert!(bound.lock().unwrap().is_empty());
        assert_eq!(f.central.connection_count(), 0);
        assert_eq!(f.central.subscription_count(), 0);
        assert_eq!(f.central.pending_discoveries(), 0);
    }

    #[test]
    fn not_started() {
        let radio = Arc::new(MockRadio::new());
        let central = Central::new(radio.clone());
        assert!(!central.is_started());
        assert_eq!(central.max_connections(), CentralBuilder::DEFAULT_MAX_CONNECTIONS);
        assert_eq!(central.connect(Uuid::from_u16(0xffcc)).unwrap_err().kind(), ErrorKind::NotStarted);
        assert_eq!(central.discover(&Connection::new(0), Uuid::from_u16(1), Uuid::from_u16(2), |_| {})
            .unwrap_err().kind(), ErrorKind::NotStarted);
        assert!(radio.requests().is_empty());

        radio.script(|s| s.enable = Some(RadioError::new(-19)));
        assert_eq!(central.start().unwrap_err().kind(), ErrorKind::RadioUnavailable);
        radio.script(|s| s.enable = None);
        central.start().unwrap();
        central.start().unwrap();
        assert_eq!(radio.requests(), vec![Request::Enable, Request::Enable]);

        let central = CentralBuilder::new().max_connections(0).build(radio);
        assert_eq!(central.max_connections(), 1);
    }
}
