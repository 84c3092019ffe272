// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The device-abstraction interface consumed by the protocol engine.
//!
//! A [`Device`] is the polymorphic source of button/motion state the core
//! queries when assembling a data frame. Concrete adapters (real gamepads,
//! phone sensors, rumble extensions) are external collaborators and are not
//! part of this crate; only the contract they must satisfy lives here.

use crate::registry::DeviceId;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::Sender;

/// Shared handle to a device, as stored in the server's registry.
///
/// Devices are reference-counted rather than exclusively owned: the same
/// device may legitimately be registered with more than one server, so the
/// registry only ever holds a non-owning-in-spirit clone of this handle.
/// `RefCell` is safe here because every method on [`Device`] is only ever
/// called from the single event-loop thread that owns the server.
pub type DeviceRef = Rc<RefCell<dyn Device>>;

/// Events a registered device pushes back to whichever server(s) it was
/// added to. A channel-based replacement for signal/slot wiring: devices
/// push `updated`/`disconnected` events, the event loop drains them. See
/// DESIGN.md for the rationale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device has fresh button/motion state ready to be fanned out.
    Updated(DeviceId),
    /// The device is gone; the server should drop it from its registry.
    Disconnected(DeviceId),
}

/// Handle a device stores after [`Device::on_added`] to announce its own
/// events. Cheap to clone; a device added to multiple servers holds one
/// per server.
#[derive(Clone)]
pub struct DeviceHandle {
    id: DeviceId,
    tx: Sender<DeviceEvent>,
}

impl DeviceHandle {
    pub(crate) fn new(id: DeviceId, tx: Sender<DeviceEvent>) -> Self {
        Self { id, tx }
    }

    /// The id this device was assigned by the server that issued this handle.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Announce that fresh input/motion state is available. A send failure
    /// means the owning server is already gone; silently ignored, matching
    /// the "UDP is lossy by contract" posture of the rest of the core.
    pub fn notify_updated(&self) {
        let _ = self.tx.send(DeviceEvent::Updated(self.id));
    }

    /// Announce that this device is going away.
    pub fn notify_disconnected(&self) {
        let _ = self.tx.send(DeviceEvent::Disconnected(self.id));
    }
}

/// How much motion data a device can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// No accelerometer or gyro.
    NoMotion,
    /// Accelerometer only, no gyro.
    AccelerometerOnly,
    /// Full six-axis motion (accelerometer + gyro).
    GyroFull,
}

/// Physical transport a device is connected over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    Other,
    Usb,
    Bluetooth,
}

impl ConnectionType {
    pub(crate) fn wire_value(self) -> u8 {
        match self {
            Self::Other => 0,
            Self::Usb => 1,
            Self::Bluetooth => 2,
        }
    }
}

impl DeviceType {
    pub(crate) fn wire_value(self) -> u8 {
        match self {
            Self::NoMotion => 0,
            Self::AccelerometerOnly => 1,
            Self::GyroFull => 2,
        }
    }
}

/// Battery charge level, encoded on the wire as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatteryStatus {
    #[default]
    Na,
    Dying,
    Low,
    Medium,
    High,
    Full,
    Charging,
    Charged,
}

impl BatteryStatus {
    pub(crate) fn wire_value(self) -> u8 {
        match self {
            Self::Na => 0x00,
            Self::Dying => 0x01,
            Self::Low => 0x02,
            Self::Medium => 0x03,
            Self::High => 0x04,
            Self::Full => 0x05,
            Self::Charging => 0xEE,
            Self::Charged => 0xEF,
        }
    }
}

/// Physical mounting orientation, used to remap accelerometer/gyro axes
/// before they are written to the wire (see the emitter's motion-axis remap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceOrientation {
    #[default]
    Normal,
    SidewaysLeft,
    SidewaysRight,
    Inverted,
}

/// The 16 positional buttons plus both sticks, read every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaseData {
    /// Bitmap of the 16 positional buttons (see crate-level glossary for bit order).
    pub buttons: u16,
    pub home: bool,
    pub touch_button: bool,
    pub left_stick_x: u8,
    pub left_stick_y: u8,
    pub right_stick_x: u8,
    pub right_stick_y: u8,
}

impl BaseData {
    /// Neutral stick position, per the wire protocol.
    pub const STICK_NEUTRAL: u8 = 127;
}

impl Default for BaseData {
    fn default() -> Self {
        Self {
            buttons: 0,
            home: false,
            touch_button: false,
            left_stick_x: Self::STICK_NEUTRAL,
            right_stick_x: Self::STICK_NEUTRAL,
            left_stick_y: Self::STICK_NEUTRAL,
            right_stick_y: Self::STICK_NEUTRAL,
        }
    }
}

/// Analog pressure of the d-pad, face, and shoulder/trigger buttons.
///
/// The emitter pre-fills this from the positional button bitmap (255 if
/// pressed, 0 otherwise) before calling [`Device::get_analog_inputs`], which
/// may overwrite any subset with measured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnalogButtonsData {
    pub dpad_left: u8,
    pub dpad_down: u8,
    pub dpad_right: u8,
    pub dpad_up: u8,
    pub y: u8,
    pub b: u8,
    pub a: u8,
    pub x: u8,
    pub r1: u8,
    pub l1: u8,
    pub r2: u8,
    pub l2: u8,
}

/// A single touchpad contact point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TouchData {
    pub id: u8,
    pub x: u16,
    pub y: u16,
}

/// A 3-axis motion sample (accelerometer in Gs, gyro in deg/s).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionData {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// The contract a physical/virtual device must satisfy to be exposed by a server.
///
/// All methods are called synchronously, from the event-loop thread, while
/// the server assembles a reply or a data frame. None of them may block.
pub trait Device {
    /// How much motion data this device can report.
    fn get_device_type(&self) -> DeviceType;

    /// Physical transport. Defaults to [`ConnectionType::Other`].
    fn get_connection_type(&self) -> ConnectionType {
        ConnectionType::Other
    }

    /// 48-bit MAC in the low bits of a u64. `0` means "no unique identity".
    fn get_mac(&self) -> u64 {
        0
    }

    /// Battery level. Defaults to [`BatteryStatus::Na`].
    fn get_battery(&self) -> BatteryStatus {
        BatteryStatus::Na
    }

    /// Current mounting orientation, used for the motion-axis remap.
    fn orientation(&self) -> DeviceOrientation;

    /// Set the mounting orientation.
    fn set_orientation(&mut self, orientation: DeviceOrientation);

    /// Buttons and stick positions for this frame.
    fn get_base_inputs(&self) -> BaseData;

    /// Fill in any measured analog button pressures. `data` arrives
    /// pre-populated from the positional button bitmap; the default
    /// implementation leaves it untouched.
    fn get_analog_inputs(&self, _data: &mut AnalogButtonsData) {}

    /// A touch contact, if any, for touch slot 0 or 1. Defaults to none.
    fn get_touch(&self, _touch_num: u8) -> Option<TouchData> {
        None
    }

    /// Motion sample timestamp in microseconds. Only called if
    /// `get_device_type() != DeviceType::NoMotion`.
    fn get_motion_timestamp(&self) -> u64 {
        0
    }

    /// Accelerometer reading in Gs. Only called if the device has one.
    fn get_accelerometer(&self) -> MotionData {
        MotionData::default()
    }

    /// Gyro reading in deg/s. Only called if `get_device_type() == DeviceType::GyroFull`.
    fn get_gyro(&self) -> MotionData {
        MotionData::default()
    }

    /// Called by the server immediately after a successful `add_device`,
    /// with a [`DeviceHandle`] the device should retain if it wants to push
    /// `updated`/`disconnected` events (the default no-op means the device
    /// never fans out frames, which is a legitimate choice for a static
    /// test fixture).
    fn on_added(&mut self, _handle: DeviceHandle) {}

    /// Called by the server immediately before the device is dropped from
    /// the registry (in response to [`crate::DsuServer::notify_disconnected`]
    /// or server teardown).
    fn on_removed(&mut self) {}
}

/// Apply the orientation-dependent axis remap to a motion sample.
///
/// See the emitter's motion-axis remap table: sideways mounts swap X/Z (with
/// sign flips), an inverted mount negates X and Z.
pub(crate) fn remap_motion(orientation: DeviceOrientation, m: MotionData, is_gyro: bool) -> MotionData {
    match (orientation, is_gyro) {
        (DeviceOrientation::Normal, _) => m,
        (DeviceOrientation::SidewaysLeft, false) => MotionData {
            x: m.z,
            y: m.y,
            z: -m.x,
        },
        (DeviceOrientation::SidewaysLeft, true) => MotionData {
            x: -m.z,
            y: m.y,
            z: m.x,
        },
        (DeviceOrientation::SidewaysRight, false) => MotionData {
            x: -m.z,
            y: m.y,
            z: m.x,
        },
        (DeviceOrientation::SidewaysRight, true) => MotionData {
            x: m.z,
            y: m.y,
            z: -m.x,
        },
        (DeviceOrientation::Inverted, _) => MotionData {
            x: -m.x,
            y: m.y,
            z: -m.z,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sideways_left_accel_remap() {
        // Sideways-left mount: accel (1, 2, 3) remaps to (3, 2, -1).
        let accel = MotionData { x: 1.0, y: 2.0, z: 3.0 };
        let remapped = remap_motion(DeviceOrientation::SidewaysLeft, accel, false);
        assert_eq!(remapped.x, 3.0);
        assert_eq!(remapped.y, 2.0);
        assert_eq!(remapped.z, -1.0);
    }

    #[test]
    fn test_normal_orientation_is_identity() {
        let m = MotionData { x: 1.0, y: 2.0, z: 3.0 };
        assert_eq!(remap_motion(DeviceOrientation::Normal, m, false), m);
        assert_eq!(remap_motion(DeviceOrientation::Normal, m, true), m);
    }

    #[test]
    fn test_inverted_negates_x_and_z() {
        let m = MotionData { x: 1.0, y: 2.0, z: 3.0 };
        let r = remap_motion(DeviceOrientation::Inverted, m, false);
        assert_eq!(r, MotionData { x: -1.0, y: 2.0, z: -3.0 });
    }

    #[test]
    fn test_battery_wire_values() {
        assert_eq!(BatteryStatus::Na.wire_value(), 0x00);
        assert_eq!(BatteryStatus::Charging.wire_value(), 0xEE);
        assert_eq!(BatteryStatus::Charged.wire_value(), 0xEF);
    }

    #[test]
    fn test_base_data_default_sticks_are_neutral() {
        let b = BaseData::default();
        assert_eq!(b.left_stick_x, 127);
        assert_eq!(b.right_stick_y, 127);
    }
}
