use static_assertions::assert_impl_all;
use std::fmt;

/// Connection to a peripheral, as seen by the application.
///
/// Only carries the index of the connection slot it occupies. The native connection it stands
/// for is re-resolved on every use, so a stale `Connection` (one whose peripheral has since
/// disconnected) fails with [`NotConnected`](../error/enum.ErrorKind.html#variant.NotConnected)
/// rather than reaching into freed host-stack state.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Connection {
    key: usize,
}

assert_impl_all!(Connection: Send, Sync);

impl Connection {
    pub(in crate) fn new(key: usize) -> Self {
        Self { key }
    }

    /// Index of the connection slot, always in `[0, max_connections)`.
    pub fn key(&self) -> usize {
        self.key
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Connection(#{})", self.key)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.key)
    }
}
