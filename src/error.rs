use static_assertions::assert_impl_all;
use std::fmt;

use crate::radio::RadioError;

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    description: String,
    radio: Option<RadioError>,
}

assert_impl_all!(Error: Send, Sync);

impl Error {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            radio: None,
        }
    }

    /// Error caused by the radio layer rejecting a request.
    pub fn from_radio(kind: ErrorKind, description: impl Into<String>, err: RadioError) -> Self {
        Self {
            kind,
            description: description.into(),
            radio: Some(err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The code reported by the radio layer, if this error originates from it.
    pub fn radio_code(&self) -> Option<i32> {
        self.radio.map(|e| e.code())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.description)?;
        if let Some(radio) = self.radio {
            write!(f, " ({})", radio)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.radio.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The radio hasn't been started yet.
    NotStarted,

    /// The radio layer couldn't be enabled.
    RadioUnavailable,

    /// The maximum number of concurrent connections has been reached.
    CapacityExceeded,

    /// The connection isn't currently bound to a live native connection.
    NotConnected,

    /// Scanning for or connecting to the peripheral failed.
    ConnectFailed,

    /// The radio layer rejected the request to disconnect.
    DisconnectFailed,

    /// The radio layer rejected an attribute discovery request.
    DiscoveryFailed,

    /// Discovery dead-ended: the service, characteristic or its configuration
    /// descriptor doesn't exist on the peripheral.
    NotFound,

    /// Discovery was cancelled before it completed.
    Cancelled,

    /// Discovery didn't complete within the configured deadline.
    Timeout,

    /// The radio layer rejected the request to enable notifications.
    SubscribeFailed,

    /// The radio layer rejected the request to disable notifications.
    UnsubscribeFailed,

    /// Notification arrived for a connection or characteristic without a live subscription.
    StaleNotification,
}
