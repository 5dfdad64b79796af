//! Interface to the platform's Bluetooth host stack ("the radio layer").
//!
//! The host stack owns link-layer procedures, GATT wire encoding and the native connection
//! objects. This crate only issues fire-and-forget requests through the [`Radio`] trait;
//! their results come back later as [`RadioEvent`](../central/enum.RadioEvent.html)s fed into
//! [`Central::handle_event`](../central/struct.Central.html#method.handle_event).

#[cfg(test)]
#[allow(dead_code)]
pub(in crate) mod mock;

use log::*;
use static_assertions::assert_impl_all;
use std::fmt;

use crate::central::DiscoveryId;
use crate::uuid::Uuid;

opaque_id!(
    /// Reference to a connection object owned by the radio layer.
    ///
    /// Never handed to the application, which only ever sees
    /// [`Connection`](../central/struct.Connection.html).
    NativeConn(u32)
);

/// Request rejected by the radio layer, carrying the host stack's (errno-style) code.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RadioError(i32);

impl RadioError {
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub fn code(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "radio error {}", self.0)
    }
}

impl std::error::Error for RadioError {}

/// Bluetooth device address.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Address([u8; 6]);

impl Address {
    /// Constructs address from bytes in the usual display order (most significant first).
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5])
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

mod ad_type {
    pub const UUID16_SOME: u8 = 0x02;
    pub const UUID16_ALL: u8 = 0x03;
    pub const UUID128_SOME: u8 = 0x06;
    pub const UUID128_ALL: u8 = 0x07;
    pub const NAME_SHORTENED: u8 = 0x08;
    pub const NAME_COMPLETE: u8 = 0x09;
}

#[derive(Clone, Debug, Default)]
pub struct AdvertisementData {
    connectable: bool,
    local_name: Option<String>,
    service_uuids: Vec<Uuid>,
}

assert_impl_all!(AdvertisementData: Send, Sync);

impl AdvertisementData {
    pub fn new(connectable: bool) -> Self {
        Self {
            connectable,
            ..Default::default()
        }
    }

    /// Parses raw advertising data structures (`len`, `type`, `data...`).
    ///
    /// Service UUID lists of invalid length and truncated structures are skipped.
    pub fn parse(connectable: bool, data: &[u8]) -> Self {
        let mut r = Self::new(connectable);
        let mut i = 0;
        while i < data.len() {
            let len = data[i] as usize;
            if len == 0 || i + len >= data.len() {
                break;
            }
            let ty = data[i + 1];
            let payload = &data[i + 2..i + 1 + len];
            match ty {
                ad_type::UUID16_SOME | ad_type::UUID16_ALL => {
                    if payload.len() % 2 != 0 {
                        debug!("malformed uuid16 list ({} bytes)", payload.len());
                    } else {
                        r.service_uuids.extend(payload.chunks_exact(2)
                            .map(|c| Uuid::from_u16(u16::from_le_bytes([c[0], c[1]]))));
                    }
                }
                ad_type::UUID128_SOME | ad_type::UUID128_ALL => {
                    if payload.len() % 16 != 0 {
                        debug!("malformed uuid128 list ({} bytes)", payload.len());
                    } else {
                        r.service_uuids.extend(payload.chunks_exact(16)
                            .map(|c| {
                                let mut bytes = [0; 16];
                                for (d, s) in bytes.iter_mut().zip(c.iter().rev()) {
                                    *d = *s;
                                }
                                Uuid::from_bytes(bytes)
                            }));
                    }
                }
                ad_type::NAME_SHORTENED | ad_type::NAME_COMPLETE => {
                    r.local_name = Some(String::from_utf8_lossy(payload).into_owned());
                }
                _ => {}
            }
            i += len + 1;
        }
        r
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    pub fn with_service_uuids(mut self, uuids: &[Uuid]) -> Self {
        self.service_uuids.extend_from_slice(uuids);
        self
    }

    /// Whether the advertising event type accepts connection requests.
    pub fn is_connectable(&self) -> bool {
        self.connectable
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_ref().map(|v| v.as_str())
    }

    pub fn service_uuids(&self) -> &[Uuid] {
        &self.service_uuids
    }

    pub fn advertises(&self, uuid: Uuid) -> bool {
        self.service_uuids.contains(&uuid)
    }
}

/// Scan parameters, intervals and windows are in 0.625 ms units.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScanParams {
    pub active: bool,
    pub interval: u16,
    pub window: u16,
}

impl Default for ScanParams {
    /// Active scan with the fast interval/window pair (60 ms / 30 ms).
    fn default() -> Self {
        Self {
            active: true,
            interval: 0x0060,
            window: 0x0030,
        }
    }
}

/// Inclusive range of attribute handles.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

impl HandleRange {
    /// The whole attribute table: `0x0001..=0xFFFF`.
    pub const FULL: Self = Self { start: 0x0001, end: 0xFFFF };

    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start == 0 || self.start > self.end
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DiscoverKind {
    PrimaryService,
    Characteristic,
    Descriptor,
}

impl DiscoverKind {
    /// Declaration attribute type the radio layer searches for. Descriptors have none and are
    /// matched by their own type.
    pub fn declaration_type(&self) -> Option<Uuid> {
        match self {
            DiscoverKind::PrimaryService => Some(Uuid::PRIMARY_SERVICE),
            DiscoverKind::Characteristic => Some(Uuid::CHARACTERISTIC),
            DiscoverKind::Descriptor => None,
        }
    }
}

/// Attribute discovery request. Progress is reported back against `id`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiscoverRequest {
    pub id: DiscoveryId,
    pub uuid: Uuid,
    pub range: HandleRange,
    pub kind: DiscoverKind,
}

/// Attribute found by a discovery request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Attribute {
    pub handle: u16,
    pub uuid: Uuid,
    /// Last handle of a service's group; only set for service declarations.
    pub end_handle: Option<u16>,
    /// Value handle of a characteristic declaration, when the radio layer reports it.
    pub value_handle: Option<u16>,
    /// Property bits of a characteristic declaration.
    pub properties: u8,
}

impl Attribute {
    pub fn service(handle: u16, uuid: Uuid, end_handle: u16) -> Self {
        Self {
            handle,
            uuid,
            end_handle: Some(end_handle),
            value_handle: None,
            properties: 0,
        }
    }

    pub fn characteristic(handle: u16, uuid: Uuid, properties: u8) -> Self {
        Self {
            handle,
            uuid,
            end_handle: None,
            value_handle: None,
            properties,
        }
    }

    pub fn descriptor(handle: u16, uuid: Uuid) -> Self {
        Self {
            handle,
            uuid,
            end_handle: None,
            value_handle: None,
            properties: 0,
        }
    }

    pub fn with_value_handle(mut self, value_handle: u16) -> Self {
        self.value_handle = Some(value_handle);
        self
    }
}

/// Client Characteristic Configuration value enabling notifications.
pub const CCC_NOTIFY: u16 = 0x0001;

/// Parameters of a notification subscription on a remote characteristic.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscribeParams {
    pub value_handle: u16,
    pub ccc_handle: u16,
    /// Value written to the CCC descriptor when subscribing.
    pub value: u16,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NotifyOutcome {
    Enabled,
    AlreadyEnabled,
}

/// Requests the orchestration layer issues to the host stack.
///
/// None of the methods may block on the remote peer, and none may call back into
/// [`Central`](../central/struct.Central.html) while still inside the call unless the
/// implementation is prepared for re-entrant event delivery (which `Central` supports).
pub trait Radio: Send + Sync {
    fn enable(&self) -> Result<(), RadioError>;

    fn start_scan(&self, params: &ScanParams) -> Result<(), RadioError>;

    fn stop_scan(&self) -> Result<(), RadioError>;

    /// Issues a connection request, returning the native reference the outcome will be
    /// reported against.
    fn connect(&self, address: Address) -> Result<NativeConn, RadioError>;

    fn disconnect(&self, conn: NativeConn) -> Result<(), RadioError>;

    fn discover(&self, conn: NativeConn, request: &DiscoverRequest) -> Result<(), RadioError>;

    fn enable_notify(&self, conn: NativeConn, params: &SubscribeParams)
        -> Result<NotifyOutcome, RadioError>;

    fn disable_notify(&self, conn: NativeConn, params: &SubscribeParams) -> Result<(), RadioError>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn declaration_types() {
        assert_eq!(DiscoverKind::PrimaryService.declaration_type(), Some(Uuid::PRIMARY_SERVICE));
        assert_eq!(DiscoverKind::Characteristic.declaration_type(), Some(Uuid::CHARACTERISTIC));
        assert_eq!(DiscoverKind::Descriptor.declaration_type(), None);
    }

    #[test]
    fn parse_advertisement() {
        let data = [
            0x02, 0x01, 0x06,
            0x05, 0x03, 0xcc, 0xff, 0x0a, 0x18,
            0x05, 0x09, b't', b'e', b'm', b'p',
        ];
        let adv = AdvertisementData::parse(true, &data);
        assert!(adv.is_connectable());
        assert_eq!(adv.service_uuids(), &[Uuid::from_u16(0xffcc), Uuid::from_u16(0x180a)]);
        assert!(adv.advertises(Uuid::from_u16(0xffcc)));
        assert_eq!(adv.local_name(), Some("temp"));
    }

    #[test]
    fn parse_advertisement_skips_malformed() {
        let data = [
            0x04, 0x03, 0xcc, 0xff, 0x0a,
            0x03, 0x02, 0x21, 0xff,
            0x09, 0x02, 0x00,
        ];
        let adv = AdvertisementData::parse(false, &data);
        assert_eq!(adv.service_uuids(), &[Uuid::from_u16(0xff21)]);
        assert_eq!(adv.local_name(), None);
    }

    #[test]
    fn handle_range() {
        assert!(!HandleRange::FULL.is_empty());
        assert!(HandleRange::new(9, 8).is_empty());
        assert!(!HandleRange::new(9, 9).is_empty());
        assert!(HandleRange::new(0, 9).is_empty());
    }

    #[test]
    fn address_display() {
        let a = Address::new([0xc0, 0x01, 0x02, 0x03, 0x04, 0xfe]);
        assert_eq!(a.to_string(), "C0:01:02:03:04:FE");
    }
}
