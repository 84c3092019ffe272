// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core protocol engine for Cemuhook DSU (DualShock UDP) motion/button servers.
//!
//! This crate implements the wire format, subscription bookkeeping, and
//! single-threaded event loop a DSU server needs; it does not implement any
//! particular device. Callers supply their own [`Device`] adapters (real
//! gamepads, phone sensors, synthetic test fixtures) and hand them to a
//! [`DsuServer`].
//!
//! # Example
//!
//! ```no_run
//! use dsu_server::{DsuServer, ServerConfig};
//!
//! let mut server = DsuServer::new(ServerConfig::default())?;
//! server.run()?;
//! # Ok::<(), dsu_server::ServerError>(())
//! ```

mod codec;
mod config;
mod device;
mod emitter;
mod error;
mod registry;
mod request;
mod server;
mod subscriptions;

pub use config::{ServerConfig, DEFAULT_PORT, SLOTS_PER_SERVER};
pub use device::{
    AnalogButtonsData, BaseData, BatteryStatus, ConnectionType, Device, DeviceEvent, DeviceHandle,
    DeviceOrientation, DeviceRef, DeviceType, MotionData, TouchData,
};
pub use error::{ProtocolError, RegistrationError, ServerError};
pub use registry::DeviceId;
pub use server::DsuServer;
