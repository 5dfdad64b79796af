//! In-flight attribute discovery.
//!
//! Every [`Central::discover`](../struct.Central.html#method.discover) call creates a target that
//! walks `service -> characteristic -> CCC descriptor`, one radio request per step. The radio
//! layer reports each step's result against the target's [`DiscoveryId`].

use log::*;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{Error, ErrorKind};
use crate::radio::{Attribute, DiscoverKind, DiscoverRequest, HandleRange, NativeConn,
    SubscribeParams, CCC_NOTIFY};
use crate::uuid::Uuid;

use super::characteristic::{Properties, Value};
use super::connection::Connection;

opaque_id!(
    /// Identity of one in-flight discovery, echoed back by the radio layer with every result.
    DiscoveryId(u64)
);

pub type FoundCallback = Box<dyn FnOnce(Result<Value, Error>) + Send>;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
    SeekingService,
    SeekingCharacteristic,
    SeekingCcc,
    Done,
}

pub(in crate) struct DiscoveryTarget {
    connection: Connection,
    native: NativeConn,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    on_found: FoundCallback,
    phase: Phase,
    request: DiscoverRequest,
    service_end: u16,
    value_handle: u16,
    properties: u8,
    started: Instant,
}

enum Advance {
    Request(NativeConn, DiscoverRequest),
    Done(Result<Value, Error>),
}

impl DiscoveryTarget {
    fn advance(&mut self, attr: &Attribute) -> Advance {
        let next = match self.phase {
            Phase::SeekingService => {
                self.service_end = attr.end_handle.unwrap_or(HandleRange::FULL.end);
                (Phase::SeekingCharacteristic, self.characteristic_uuid, DiscoverKind::Characteristic,
                    attr.handle.checked_add(1))
            }
            Phase::SeekingCharacteristic => {
                self.value_handle = attr.value_handle
                    .or_else(|| attr.handle.checked_add(1))
                    .unwrap_or(0);
                self.properties = attr.properties;
                // Skip the declaration and the value attribute.
                (Phase::SeekingCcc, Uuid::CLIENT_CHARACTERISTIC_CONFIGURATION,
                    DiscoverKind::Descriptor, attr.handle.checked_add(2))
            }
            Phase::SeekingCcc => {
                self.phase = Phase::Done;
                return Advance::Done(Ok(Value::new(
                    self.service_uuid,
                    self.characteristic_uuid,
                    self.connection,
                    Properties::from_bits_truncate(self.properties),
                    SubscribeParams {
                        value_handle: self.value_handle,
                        ccc_handle: attr.handle,
                        value: CCC_NOTIFY,
                    })));
            }
            Phase::Done => {
                warn!("discovery {}: {:?} reported after completion", self.request.id, attr.uuid);
                return Advance::Done(Err(Error::new(ErrorKind::DiscoveryFailed,
                    format!("discovery {} already finished", self.request.id))));
            }
        };
        let (phase, uuid, kind, start) = next;
        debug!("discovery {}: {:?} found at {:#06x}, now {:?}",
            self.request.id, self.phase, attr.handle, phase);
        self.phase = phase;
        self.request.uuid = uuid;
        self.request.kind = kind;
        self.request.range = HandleRange::new(start.unwrap_or(0), self.service_end);
        if self.request.range.is_empty() {
            Advance::Done(Err(self.not_found()))
        } else {
            Advance::Request(self.native, self.request)
        }
    }

    fn not_found(&self) -> Error {
        let what = match self.phase {
            Phase::SeekingService => format!("service {}", self.service_uuid),
            Phase::SeekingCharacteristic => format!("characteristic {}", self.characteristic_uuid),
            Phase::SeekingCcc | Phase::Done =>
                format!("configuration descriptor of characteristic {}", self.characteristic_uuid),
        };
        Error::new(ErrorKind::NotFound, format!("{} not found on connection {}", what, self.connection))
    }

    pub fn id(&self) -> DiscoveryId {
        self.request.id
    }

    /// Reports `err` to the discovery's callback.
    pub fn fail(self, err: Error) {
        debug!("discovery {} failed: {}", self.request.id, err);
        (self.on_found)(Err(err))
    }
}

/// Outcome of feeding one discovery result into the registry.
pub(in crate) enum Step {
    /// Issue the target's next request.
    Continue(NativeConn, DiscoverRequest),
    /// The target is gone from the registry; hand the result to its callback.
    Finished(FoundCallback, Result<Value, Error>),
    /// Attribute didn't match the current filter; the target keeps waiting.
    Ignored,
    /// No target with this identity.
    Unknown,
}

/// Not synchronized by itself; `Central` keeps it behind a single mutex.
#[derive(Default)]
pub(in crate) struct DiscoveryRegistry {
    next_id: u64,
    targets: HashMap<DiscoveryId, DiscoveryTarget>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new target in `SeekingService` phase and returns its first request.
    pub fn start(
        &mut self,
        connection: Connection,
        native: NativeConn,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        on_found: FoundCallback,
        now: Instant,
    ) -> DiscoverRequest {
        self.next_id += 1;
        let id = DiscoveryId::new(self.next_id);
        let request = DiscoverRequest {
            id,
            uuid: service_uuid,
            range: HandleRange::FULL,
            kind: DiscoverKind::PrimaryService,
        };
        self.targets.insert(id, DiscoveryTarget {
            connection,
            native,
            service_uuid,
            characteristic_uuid,
            on_found,
            phase: Phase::SeekingService,
            request,
            service_end: HandleRange::FULL.end,
            value_handle: 0,
            properties: 0,
            started: now,
        });
        debug!("discovery {} started: {:?}/{:?} on {}",
            id, service_uuid, characteristic_uuid, connection);
        request
    }

    /// Feeds a discovery result (`None` meaning nothing was found) into the matching target.
    pub fn advance(&mut self, id: DiscoveryId, attribute: Option<&Attribute>) -> Step {
        let attribute = match attribute {
            Some(v) => v,
            None => return match self.targets.remove(&id) {
                Some(target) => {
                    let err = target.not_found();
                    Step::Finished(target.on_found, Err(err))
                }
                None => Step::Unknown,
            },
        };
        let advance = match self.targets.get_mut(&id) {
            Some(target) => {
                if attribute.uuid != target.request.uuid {
                    debug!("discovery {}: ignoring {:?} at {:#06x} while looking for {:?}",
                        id, attribute.uuid, attribute.handle, target.request.uuid);
                    return Step::Ignored;
                }
                target.advance(attribute)
            }
            None => return Step::Unknown,
        };
        match advance {
            Advance::Request(native, request) => Step::Continue(native, request),
            Advance::Done(result) => match self.targets.remove(&id) {
                Some(target) => Step::Finished(target.on_found, result),
                None => Step::Unknown,
            },
        }
    }

    pub fn remove(&mut self, id: DiscoveryId) -> Option<DiscoveryTarget> {
        self.targets.remove(&id)
    }

    /// Removes every target running on `connection`.
    pub fn remove_connection(&mut self, connection: Connection) -> Vec<DiscoveryTarget> {
        self.remove_where(|t| t.connection == connection)
    }

    /// Removes every target started at least `timeout` before `now`.
    pub fn remove_expired(&mut self, now: Instant, timeout: Duration) -> Vec<DiscoveryTarget> {
        self.remove_where(|t| now.saturating_duration_since(t.started) >= timeout)
    }

    fn remove_where(&mut self, f: impl Fn(&DiscoveryTarget) -> bool) -> Vec<DiscoveryTarget> {
        let ids: Vec<_> = self.targets.values()
            .filter(|t| f(t))
            .map(|t| t.id())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.targets.remove(&id))
            .collect()
    }

    pub fn phase(&self, id: DiscoveryId) -> Option<Phase> {
        self.targets.get(&id).map(|t| t.phase)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }
}
