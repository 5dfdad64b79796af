//! Scriptable radio layer for tests.

use std::collections::HashSet;
use std::sync::Mutex;

use super::*;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Enable,
    StartScan(ScanParams),
    StopScan,
    Connect(Address),
    Disconnect(NativeConn),
    Discover(NativeConn, DiscoverRequest),
    EnableNotify(NativeConn, SubscribeParams),
    DisableNotify(NativeConn, SubscribeParams),
}

/// Outcomes the next requests will get. Errors are sticky until reset.
#[derive(Clone, Debug, Default)]
pub struct Script {
    pub enable: Option<RadioError>,
    pub start_scan: Option<RadioError>,
    pub stop_scan: Option<RadioError>,
    pub connect: Option<RadioError>,
    pub disconnect: Option<RadioError>,
    pub discover: Option<RadioError>,
    pub enable_notify: Option<RadioError>,
    pub disable_notify: Option<RadioError>,
}

#[derive(Default)]
struct State {
    requests: Vec<Request>,
    script: Script,
    next_conn: u32,
    notifying: HashSet<(NativeConn, u16)>,
}

#[derive(Default)]
pub struct MockRadio {
    state: Mutex<State>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.state.lock().unwrap().script);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn take_requests(&self) -> Vec<Request> {
        std::mem::replace(&mut self.state.lock().unwrap().requests, Vec::new())
    }

    pub fn discover_requests(&self) -> Vec<DiscoverRequest> {
        self.requests().into_iter()
            .filter_map(|r| match r {
                Request::Discover(_, d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn last_discover(&self) -> Option<DiscoverRequest> {
        self.discover_requests().pop()
    }

    /// Native reference handed out by the latest successful `connect`.
    pub fn last_conn(&self) -> Option<NativeConn> {
        let n = self.state.lock().unwrap().next_conn;
        if n == 0 {
            None
        } else {
            Some(NativeConn::new(0x100 + n))
        }
    }

    /// Whether notifications are enabled on the CCC descriptor.
    pub fn is_notifying(&self, conn: NativeConn, ccc_handle: u16) -> bool {
        self.state.lock().unwrap().notifying.contains(&(conn, ccc_handle))
    }

    fn request(&self, request: Request, outcome: impl FnOnce(&Script) -> Option<RadioError>)
        -> Result<(), RadioError>
    {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request);
        match outcome(&state.script) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Radio for MockRadio {
    fn enable(&self) -> Result<(), RadioError> {
        self.request(Request::Enable, |s| s.enable)
    }

    fn start_scan(&self, params: &ScanParams) -> Result<(), RadioError> {
        self.request(Request::StartScan(*params), |s| s.start_scan)
    }

    fn stop_scan(&self) -> Result<(), RadioError> {
        self.request(Request::StopScan, |s| s.stop_scan)
    }

    fn connect(&self, address: Address) -> Result<NativeConn, RadioError> {
        self.request(Request::Connect(address), |s| s.connect)?;
        let mut state = self.state.lock().unwrap();
        state.next_conn += 1;
        Ok(NativeConn::new(0x100 + state.next_conn))
    }

    fn disconnect(&self, conn: NativeConn) -> Result<(), RadioError> {
        self.request(Request::Disconnect(conn), |s| s.disconnect)
    }

    fn discover(&self, conn: NativeConn, request: &DiscoverRequest) -> Result<(), RadioError> {
        self.request(Request::Discover(conn, *request), |s| s.discover)
    }

    fn enable_notify(&self, conn: NativeConn, params: &SubscribeParams)
        -> Result<NotifyOutcome, RadioError>
    {
        self.request(Request::EnableNotify(conn, *params), |s| s.enable_notify)?;
        let mut state = self.state.lock().unwrap();
        Ok(if state.notifying.insert((conn, params.ccc_handle)) {
            NotifyOutcome::Enabled
        } else {
            NotifyOutcome::AlreadyEnabled
        })
    }

    fn disable_notify(&self, conn: NativeConn, params: &SubscribeParams) -> Result<(), RadioError> {
        self.request(Request::DisableNotify(conn, *params), |s| s.disable_notify)?;
        self.state.lock().unwrap().notifying.remove(&(conn, params.ccc_handle));
        Ok(())
    }
}
