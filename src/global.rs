//! Process-wide central for applications that keep a single radio for their whole lifetime.
//!
//! [`start_radio`] installs a [`Central`](../central/struct.Central.html) every other function
//! forwards to. Until then, and after [`stop_radio`], they fail with
//! [`NotStarted`](../error/enum.ErrorKind.html#variant.NotStarted).

use lazy_static::lazy_static;
use log::*;
use std::sync::{Arc, RwLock};

use crate::central::{Central, CentralBuilder, Connection, DiscoveryId, RadioEvent, Value};
use crate::error::{Error, ErrorKind};
use crate::radio::Radio;
use crate::sync;
use crate::uuid::Uuid;

lazy_static! {
    static ref CENTRAL: RwLock<Option<Central>> = RwLock::new(None);
}

fn central() -> Result<Central, Error> {
    let central = sync::read(&*CENTRAL).clone();
    central.ok_or_else(|| Error::new(ErrorKind::NotStarted, "radio not started"))
}

/// Starts the radio with default settings and installs it as the process-wide central.
pub fn start_radio(radio: Arc<dyn Radio>) -> Result<(), Error> {
    start_radio_with(&CentralBuilder::new(), radio)
}

pub fn start_radio_with(builder: &CentralBuilder, radio: Arc<dyn Radio>) -> Result<(), Error> {
    let central = builder.build(radio);
    central.start()?;
    let prev = sync::write(&*CENTRAL).replace(central);
    if prev.is_some() {
        warn!("replaced the running central");
    }
    Ok(())
}

/// Uninstalls the process-wide central. Returns `false` if none was running.
pub fn stop_radio() -> bool {
    let prev = sync::write(&*CENTRAL).take();
    if prev.is_some() {
        info!("radio stopped");
    }
    prev.is_some()
}

pub fn register_connected_callback<F>(f: F) -> Result<(), Error>
    where F: Fn(Connection) + Send + Sync + 'static
{
    central()?.set_connected_callback(f);
    Ok(())
}

pub fn unregister_connected_callback() -> Result<(), Error> {
    central()?.clear_connected_callback();
    Ok(())
}

pub fn register_disconnected_callback<F>(f: F) -> Result<(), Error>
    where F: Fn(Connection) + Send + Sync + 'static
{
    central()?.set_disconnected_callback(f);
    Ok(())
}

pub fn unregister_disconnected_callback() -> Result<(), Error> {
    central()?.clear_disconnected_callback();
    Ok(())
}

/// Connects to the first peripheral advertising the 16-bit service UUID `device_uuid`.
pub fn try_connect(device_uuid: u16) -> Result<(), Error> {
    central()?.connect(Uuid::from_u16(device_uuid))
}

pub fn scan_for_characteristic<F>(
    connection: &Connection,
    service_uuid: u16,
    characteristic_uuid: u16,
    on_found: F,
) -> Result<DiscoveryId, Error>
    where F: FnOnce(Result<Value, Error>) + Send + 'static
{
    central()?.discover(connection, Uuid::from_u16(service_uuid), Uuid::from_u16(characteristic_uuid),
        on_found)
}

pub fn subscribe_characteristic<F>(value: &Value, on_notify: F) -> Result<(), Error>
    where F: Fn(&[u8]) + Send + Sync + 'static
{
    central()?.subscribe(value, on_notify)
}

pub fn unsubscribe_characteristic(value: &Value) -> Result<(), Error> {
    central()?.unsubscribe(value)
}

/// Dispatches a radio event to the process-wide central.
pub fn handle_event(event: RadioEvent) -> Result<(), Error> {
    central()?.handle_event(event);
    Ok(())
}
