//! Radio layer events and their dispatch.

use log::*;
use static_assertions::assert_impl_all;

use crate::error::{Error, ErrorKind};
use crate::radio::{Address, AdvertisementData, Attribute, NativeConn};
use crate::sync;

use super::Central;
use super::connection::Connection;
use super::discovery::{DiscoveryId, Step};

/// Event reported by the radio layer. Feed every one of them into
/// [`Central::handle_event`](struct.Central.html#method.handle_event), from whichever thread the
/// host stack delivers it on.
#[derive(Clone, Debug)]
pub enum RadioEvent {
    AdvertisementSeen {
        address: Address,
        advertisement_data: AdvertisementData,
        rssi: i8,
    },

    /// Outcome of a connection attempt, ours or the peer's. `error` carries the HCI status of a
    /// failed handshake.
    Connected {
        conn: NativeConn,
        error: Option<u8>,
    },

    Disconnected {
        conn: NativeConn,
        reason: u8,
    },

    /// Progress of a discovery request. `None` means the search range held no matching
    /// attribute.
    AttributeDiscovered {
        id: DiscoveryId,
        attribute: Option<Attribute>,
    },

    Notification {
        conn: NativeConn,
        value_handle: u16,
        payload: Vec<u8>,
    },
}

assert_impl_all!(RadioEvent: Send, Sync);

impl Central {
    pub fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::AdvertisementSeen { address, advertisement_data, rssi } => {
                self.advertisement_seen(address, &advertisement_data, rssi);
            }
            RadioEvent::Connected { conn, error } => self.connected(conn, error),
            RadioEvent::Disconnected { conn, reason } => self.disconnected(conn, reason),
            RadioEvent::AttributeDiscovered { id, attribute } => {
                self.attribute_discovered(id, attribute.as_ref());
            }
            RadioEvent::Notification { conn, value_handle, payload } => {
                self.handle_notification(conn, value_handle, &payload);
            }
        }
    }

    /// Routes a notification payload to the subscription registered for
    /// `(connection, value_handle)`. Returns whether a callback received it.
    ///
    /// Payloads for connections or handles without a subscription are logged and dropped, as are
    /// empty payloads.
    pub fn handle_notification(&self, conn: NativeConn, value_handle: u16, payload: &[u8]) -> bool {
        let callback = {
            let slots = sync::lock(&self.0.slots);
            slots.find(conn).and_then(|key| {
                sync::lock(&self.0.subscriptions).lookup(Connection::new(key), value_handle)
            })
        };
        let callback = match callback {
            Some(v) => v,
            None => {
                let err = Error::new(ErrorKind::StaleNotification,
                    format!("notification from {:?} on {:#06x} without subscription", conn, value_handle));
                warn!("{}", err);
                return false;
            }
        };
        if payload.is_empty() {
            debug!("empty notification from {:?} on {:#06x} dropped", conn, value_handle);
            return false;
        }
        trace!("notification from {:?} on {:#06x}: {} bytes", conn, value_handle, payload.len());
        callback(payload);
        true
    }

    fn advertisement_seen(&self, address: Address, advertisement_data: &AdvertisementData, rssi: i8) {
        trace!("advertisement from {} (rssi {}): {:?}", address, rssi, advertisement_data);
        if !advertisement_data.is_connectable() {
            return;
        }
        let (key, uuid) = match self.0.hub.select(advertisement_data) {
            Some(v) => v,
            None => return,
        };
        if let Err(e) = self.0.radio.stop_scan() {
            warn!("couldn't stop scanning to connect to {}: {}", address, e);
            self.0.hub.unselect(key, uuid);
            return;
        }
        self.0.hub.scan_stopped();

        match self.0.radio.connect(address) {
            Ok(native) => {
                info!("connecting to {} ({:?}) on slot #{}", address, uuid, key);
                // The outcome may already have been delivered from inside `connect`.
                if !self.0.hub.connecting(key, native) {
                    return;
                }
                let bound = sync::lock(&self.0.slots).bind(key, native);
                if !bound {
                    // Reported from another thread before `connect` returned, so it went to a
                    // slot of its own.
                    warn!("{:?} already connected elsewhere, slot #{} not needed", native, key);
                    self.0.hub.finish(key);
                    sync::lock(&self.0.slots).release(key);
                    self.scan_for_pending();
                }
            }
            Err(e) => {
                error!("connect request to {} rejected: {}", address, e);
                self.0.hub.finish(key);
                sync::lock(&self.0.slots).release(key);
                self.scan_for_pending();
            }
        }
    }

    fn connected(&self, native: NativeConn, error: Option<u8>) {
        trace!("connected: {:?} error={:?}", native, error);
        let key = {
            let mut slots = sync::lock(&self.0.slots);
            if let Some(key) = slots.find(native) {
                self.0.hub.finish(key);
                Some(key)
            } else if let Some(key) = self.0.hub.take_connecting(native) {
                if slots.bind(key, native) {
                    Some(key)
                } else {
                    slots.release(key);
                    None
                }
            } else if error.is_none() {
                let key = slots.acquire();
                if let Some(key) = key {
                    slots.bind(key, native);
                    debug!("incoming connection {:?} on slot #{}", native, key);
                }
                key
            } else {
                None
            }
        };

        match (key, error) {
            (Some(key), None) => {
                let conn = Connection::new(key);
                info!("connected {} ({:?})", conn, native);
                let callback = self.0.hub.connected();
                if let Some(callback) = callback {
                    callback(conn);
                }
            }
            (Some(key), Some(code)) => {
                warn!("connection on slot #{} failed (status {:#04x})", key, code);
                sync::lock(&self.0.slots).release(key);
            }
            (None, None) => {
                warn!("no free slot for {:?}, disconnecting", native);
                if let Err(e) = self.0.radio.disconnect(native) {
                    error!("couldn't disconnect {:?}: {}", native, e);
                }
            }
            (None, Some(code)) => {
                warn!("unknown connection {:?} failed (status {:#04x})", native, code);
            }
        }

        self.scan_for_pending();
    }

    fn disconnected(&self, native: NativeConn, reason: u8) {
        trace!("disconnected: {:?} reason={:#04x}", native, reason);
        // Unbound but still taken: from here on the connection neither resolves nor receives
        // notifications, so nothing can be registered for it while it is cleaned up.
        let key = {
            let mut slots = sync::lock(&self.0.slots);
            let key = slots.find(native);
            if let Some(key) = key {
                slots.unbind(key);
            }
            key
        };
        let key = match key {
            Some(v) => v,
            None => {
                warn!("disconnect of unknown connection {:?} (reason {:#04x})", native, reason);
                return;
            }
        };
        let conn = Connection::new(key);
        info!("disconnected {} (reason {:#04x})", conn, reason);

        let dropped = sync::lock(&self.0.subscriptions).remove_connection(conn);
        if dropped > 0 {
            debug!("{} subscriptions on {} dropped", dropped, conn);
        }
        let orphaned = sync::lock(&self.0.discoveries).remove_connection(conn);
        for target in orphaned {
            target.fail(Error::new(ErrorKind::NotConnected,
                format!("connection {} lost during discovery", conn)));
        }

        let callback = self.0.hub.disconnected();
        if let Some(callback) = callback {
            callback(conn);
        }

        self.0.hub.finish(key);
        sync::lock(&self.0.slots).release(key);
        self.scan_for_pending();
    }

    fn attribute_discovered(&self, id: DiscoveryId, attribute: Option<&Attribute>) {
        trace!("discovery {}: {:?}", id, attribute);
        let step = sync::lock(&self.0.discoveries).advance(id, attribute);
        match step {
            Step::Continue(native, request) => {
                if let Err(e) = self.0.radio.discover(native, &request) {
                    error!("discovery {}: {:?} request rejected: {}", id, request.kind, e);
                    let target = sync::lock(&self.0.discoveries).remove(id);
                    if let Some(target) = target {
                        target.fail(Error::from_radio(ErrorKind::DiscoveryFailed,
                            format!("couldn't discover {:?}", request.uuid), e));
                    }
                }
            }
            Step::Finished(on_found, result) => {
                match &result {
                    Ok(v) => info!("discovery {}: {:?} value at {:#06x}, configuration at {:#06x}",
                        id, v.characteristic_uuid(), v.value_handle(), v.ccc_handle()),
                    Err(e) => debug!("discovery {}: {}", id, e),
                }
                on_found(result);
            }
            Step::Ignored => {}
            Step::Unknown => warn!("progress for unknown discovery {}", id),
        }
    }

    /// Resumes scanning for connect requests still waiting for their peripheral.
    fn scan_for_pending(&self) {
        if let Err(e) = self.resume_scan() {
            debug!("pending connect requests dropped: {}", e);
        }
    }
}
