//! Application connection callbacks and the scan-then-connect pipeline.

use log::*;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, ThreadId};

use crate::radio::{AdvertisementData, NativeConn};
use crate::sync;
use crate::uuid::Uuid;

use super::connection::Connection;

pub type ConnectionCallback = Arc<dyn Fn(Connection) + Send + Sync>;

#[derive(Clone, Copy, Debug)]
struct Waiting {
    key: usize,
    uuid: Uuid,
}

#[derive(Clone, Copy, Debug)]
struct Connecting {
    key: usize,
    native: Option<NativeConn>,
    /// Thread that selected the request and issues the connect call.
    issuer: ThreadId,
}

/// Connect requests: those still waiting for a matching advertisement and the single one
/// whose connection request is in flight. Scanning is stopped while a request is in flight.
#[derive(Debug, Default)]
struct Requests {
    waiting: Vec<Waiting>,
    connecting: Option<Connecting>,
    scanning: bool,
}

#[derive(Default)]
pub(in crate) struct ConnectionCallbackHub {
    connected: RwLock<Option<ConnectionCallback>>,
    disconnected: RwLock<Option<ConnectionCallback>>,
    requests: Mutex<Requests>,
}

impl ConnectionCallbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, callback: Option<ConnectionCallback>) {
        *sync::write(&self.connected) = callback;
    }

    pub fn set_disconnected(&self, callback: Option<ConnectionCallback>) {
        *sync::write(&self.disconnected) = callback;
    }

    pub fn connected(&self) -> Option<ConnectionCallback> {
        sync::read(&self.connected).clone()
    }

    pub fn disconnected(&self) -> Option<ConnectionCallback> {
        sync::read(&self.disconnected).clone()
    }

    /// Queues a connect request for the reserved slot `key`.
    pub fn enqueue(&self, key: usize, uuid: Uuid) {
        sync::lock(&self.requests).waiting.push(Waiting { key, uuid });
    }

    /// Marks scanning as started if requests are waiting for an advertisement, no connection
    /// request is in flight and the scan isn't running already. Returns whether the caller
    /// must start the scan.
    pub fn begin_scan(&self) -> bool {
        let mut requests = sync::lock(&self.requests);
        if requests.scanning || requests.connecting.is_some() || requests.waiting.is_empty() {
            return false;
        }
        requests.scanning = true;
        true
    }

    /// Scan couldn't be started: drops every waiting request and returns their slots.
    pub fn abort_scan(&self) -> Vec<usize> {
        let mut requests = sync::lock(&self.requests);
        requests.scanning = false;
        requests.waiting.drain(..).map(|w| w.key).collect()
    }

    pub fn scan_stopped(&self) {
        sync::lock(&self.requests).scanning = false;
    }

    /// Picks the first waiting request whose UUID the advertisement carries and moves it to
    /// the in-flight position.
    pub fn select(&self, advertisement: &AdvertisementData) -> Option<(usize, Uuid)> {
        let mut requests = sync::lock(&self.requests);
        if requests.connecting.is_some() {
            return None;
        }
        let i = requests.waiting.iter().position(|w| advertisement.advertises(w.uuid))?;
        let Waiting { key, uuid } = requests.waiting.remove(i);
        requests.connecting = Some(Connecting { key, native: None, issuer: thread::current().id() });
        debug!("advertisement matches request for slot #{} ({:?})", key, uuid);
        Some((key, uuid))
    }

    /// Puts a selected request back at the head of the queue.
    pub fn unselect(&self, key: usize, uuid: Uuid) {
        let mut requests = sync::lock(&self.requests);
        if requests.connecting.map_or(false, |c| c.key == key) {
            requests.connecting = None;
            requests.waiting.insert(0, Waiting { key, uuid });
            debug!("request for slot #{} back in queue", key);
        }
    }

    /// Records the native reference returned for the in-flight request. Returns `false` if the
    /// request for `key` isn't in flight anymore.
    pub fn connecting(&self, key: usize, native: NativeConn) -> bool {
        let mut requests = sync::lock(&self.requests);
        match requests.connecting.as_mut().filter(|c| c.key == key) {
            Some(c) => {
                c.native = Some(native);
                true
            }
            None => false,
        }
    }

    /// Clears the in-flight request if it is for `key`.
    pub fn finish(&self, key: usize) -> bool {
        let mut requests = sync::lock(&self.requests);
        if requests.connecting.map_or(false, |c| c.key == key) {
            requests.connecting = None;
            true
        } else {
            false
        }
    }

    /// Takes the in-flight request the outcome for `native` belongs to.
    ///
    /// Until the connect call returns, the native reference of the request is unknown. An outcome
    /// arriving in that window is taken as ours only when it is delivered from inside the connect
    /// call, on the issuing thread. Outcomes from other threads are treated as incoming
    /// connections. A failed handshake reported from another thread before the connect call
    /// returns can't be matched at all; the request then stays in flight until the radio layer
    /// reports the connection again.
    pub fn take_connecting(&self, native: NativeConn) -> Option<usize> {
        let mut requests = sync::lock(&self.requests);
        let ours = match requests.connecting {
            Some(c) => match c.native {
                Some(n) => n == native,
                None => c.issuer == thread::current().id(),
            },
            None => false,
        };
        if !ours {
            return None;
        }
        requests.connecting.take().map(|c| c.key)
    }
}
