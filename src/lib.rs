//! Central role of a Bluetooth Low Energy (LE) client, on top of a platform host stack.
//!
//! The crate multiplexes connection requests, GATT discovery and notification subscriptions
//! over a small fixed pool of connection slots. The host stack itself (link layer, scanning,
//! GATT wire encoding) stays behind the [`Radio`](radio/trait.Radio.html) trait: requests go out
//! through it and their outcomes come back as [`RadioEvent`](central/enum.RadioEvent.html)s.
//!
//! The application never sees the host stack's connection objects, only
//! [`Connection`](central/struct.Connection.html) values naming a slot. Operations on a connection
//! that has gone away fail with [`NotConnected`](error/enum.ErrorKind.html#variant.NotConnected).
//!
//! ## Example
//!
//! The following example connects to a peripheral advertising service `0xffcc`, locates
//! characteristic `0xff22` of service `0xff21` and subscribes to its notifications.
//!
//! ```no_run
//! use ble_central::central::*;
//! use ble_central::radio::Radio;
//! use ble_central::uuid::Uuid;
//! use std::sync::Arc;
//!
//! # fn host_stack() -> Arc<dyn Radio> { unimplemented!() }
//! # fn next_event() -> RadioEvent { unimplemented!() }
//! let central = CentralBuilder::new()
//!     .max_connections(2)
//!     .build(host_stack());
//! central.start().unwrap();
//!
//! let c = central.clone();
//! central.set_connected_callback(move |conn| {
//!     let c2 = c.clone();
//!     c.discover(&conn, Uuid::from_u16(0xff21), Uuid::from_u16(0xff22), move |value| {
//!         match value {
//!             Ok(value) => c2.subscribe(&value, |payload| {
//!                 // Decode the value.
//!                 let t = i16::from_le_bytes([payload[0], payload[1]]) as f64 / 100.0;
//!                 println!("t = {} C", t);
//!             }).unwrap(),
//!             Err(e) => println!("characteristic not found: {}", e),
//!         }
//!     }).unwrap();
//! });
//! central.connect(Uuid::from_u16(0xffcc)).unwrap();
//!
//! // Host stack callbacks feed every event into the central.
//! loop {
//!     central.handle_event(next_event());
//! }
//! ```
//!
//! Applications that keep one radio for the whole process can use the [`global`](global/index.html)
//! functions instead of passing a `Central` around.
#![deny(dead_code)]
#![deny(non_snake_case)]
#![deny(unused_imports)]
#![deny(unused_must_use)]

#[macro_use]
mod macros;

pub mod central;
pub mod error;
pub mod global;
pub mod radio;
mod sync;
pub mod uuid;

pub use central::{Central, CentralBuilder, Connection, Value};
pub use error::{Error, ErrorKind};
