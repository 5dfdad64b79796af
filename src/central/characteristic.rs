use enumflags2::BitFlags;
use static_assertions::assert_impl_all;
use std::fmt;

use crate::radio::SubscribeParams;
use crate::uuid::Uuid;

use super::connection::Connection;

#[derive(BitFlags, Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
enum Property {
    Broadcast                       = 0x01,
    Read                            = 0x02,
    WriteWithoutResponse            = 0x04,
    Write                           = 0x08,
    Notify                          = 0x10,
    Indicate                        = 0x20,
    AuthenticatedSignedWrites       = 0x40,
    ExtendedProperties              = 0x80,
}

/// Property bits of a characteristic declaration.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Properties(BitFlags<Property>);

impl Properties {
    pub(in crate) fn from_bits_truncate(bits: u8) -> Self {
        Self(BitFlags::from_bits_truncate(bits))
    }

    pub fn bits(&self) -> u8 {
        self.0.bits()
    }
}

macro_rules! properties {
    ($($(#[$attr:meta])* $f:ident => $e:ident,)*) => {
        impl Properties {
            $(
                $(#[$attr])*
                pub fn $f(&self) -> bool {
                    self.0.contains(Property::$e)
                }
            )*
        }
    };
}

properties!(
    #[doc="Characteristic can broadcast its value using a server characteristic configuration descriptor."]
    is_broadcast => Broadcast,

    #[doc="The characteristic's value can be read."]
    is_read => Read,

    #[doc="The characteristic's value can be written without a response."]
    is_write_without_response => WriteWithoutResponse,

    #[doc="The characteristic's value can be written with a response."]
    is_write => Write,

    #[doc="The peripheral notifies value changes without expecting a confirmation."]
    is_notify => Notify,

    #[doc="The peripheral indicates value changes and expects a confirmation."]
    is_indicate => Indicate,

    #[doc="The characteristic's value can be written with a signed write command."]
    is_authenticated_signed_writes => AuthenticatedSignedWrites,

    #[doc="The characteristic defines additional properties in the extended properties descriptor."]
    is_extended_properties => ExtendedProperties,
);

assert_impl_all!(Properties: Send, Sync);

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Properties(")?;
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{:?}", p)?;
        }
        write!(f, ")")
    }
}

/// Remote characteristic located by
/// [`Central::discover`](../struct.Central.html#method.discover), ready to be subscribed to.
///
/// Immutable; cloning is cheap and every clone refers to the same remote characteristic.
#[derive(Clone, Debug)]
pub struct Value {
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    connection: Connection,
    properties: Properties,
    subscribe_params: SubscribeParams,
}

assert_impl_all!(Value: Send, Sync);

impl Value {
    pub(in crate) fn new(
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        connection: Connection,
        properties: Properties,
        subscribe_params: SubscribeParams,
    ) -> Self {
        Self {
            service_uuid,
            characteristic_uuid,
            connection,
            properties,
            subscribe_params,
        }
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    pub fn characteristic_uuid(&self) -> Uuid {
        self.characteristic_uuid
    }

    /// Handle of the characteristic value attribute; notifications are reported against it.
    pub fn value_handle(&self) -> u16 {
        self.subscribe_params.value_handle
    }

    /// Handle of the Client Characteristic Configuration descriptor.
    pub fn ccc_handle(&self) -> u16 {
        self.subscribe_params.ccc_handle
    }

    pub fn connection(&self) -> Connection {
        self.connection
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub(in crate) fn subscribe_params(&self) -> &SubscribeParams {
        &self.subscribe_params
    }
}
