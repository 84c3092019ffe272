// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Slot descriptors, data-frame assembly, and the per-client fan-out patch.

use crate::codec::{self, MSG_TYPE_DATA, MSG_TYPE_PORTS, MSG_TYPE_VERSION, PROTOCOL_VERSION};
use crate::config::SLOTS_PER_SERVER;
use crate::device::{AnalogButtonsData, Device, DeviceType};
use byteorder::{ByteOrder, LittleEndian};

/// CONNECTED state byte for an occupied slot descriptor.
const STATE_CONNECTED: u8 = 2;

/// Absolute byte offset, within a DATA frame, of the per-client packet
/// number: 20-byte header + 11-byte descriptor + 1-byte connected flag.
pub const PACKET_NUMBER_OFFSET: usize = 32;

/// Total size of a DATA frame: header (20) + descriptor (11) + connected (1)
/// + packet number (4) + inputs body (64).
pub const DATA_FRAME_LEN: usize = 20 + 11 + 1 + 4 + 64;

// Bit positions within `BaseData::buttons` (see crate-level glossary).
const BIT_LEFT: u16 = 1 << 7;
const BIT_DOWN: u16 = 1 << 6;
const BIT_RIGHT: u16 = 1 << 5;
const BIT_UP: u16 = 1 << 4;
const BIT_Y: u16 = 1 << 15;
const BIT_B: u16 = 1 << 14;
const BIT_A: u16 = 1 << 13;
const BIT_X: u16 = 1 << 12;
const BIT_R1: u16 = 1 << 11;
const BIT_L1: u16 = 1 << 10;
const BIT_R2: u16 = 1 << 9;
const BIT_L2: u16 = 1 << 8;

/// Write the 11-byte slot descriptor body for an unoccupied slot: only
/// byte 0 (slot_id) is meaningful.
pub fn write_empty_slot_descriptor(buf: &mut Vec<u8>, slot_id: u8) {
    buf.push(slot_id);
    buf.extend_from_slice(&[0u8; 10]);
}

/// Write the 11-byte slot descriptor body for an occupied slot.
pub fn write_occupied_slot_descriptor(buf: &mut Vec<u8>, slot_id: u8, device: &dyn Device) {
    buf.push(slot_id);
    buf.push(STATE_CONNECTED);
    buf.push(device.get_device_type().wire_value());
    buf.push(device.get_connection_type().wire_value());
    let mac = device.get_mac();
    let mut mac_bytes = [0u8; 8];
    byteorder::BigEndian::write_u64(&mut mac_bytes, mac);
    buf.extend_from_slice(&mac_bytes[2..8]); // low 48 bits, big-endian
    buf.push(device.get_battery().wire_value());
}

fn synthesize_analog(buttons: u16) -> AnalogButtonsData {
    let bit = |mask: u16| if buttons & mask != 0 { 255 } else { 0 };
    AnalogButtonsData {
        dpad_left: bit(BIT_LEFT),
        dpad_down: bit(BIT_DOWN),
        dpad_right: bit(BIT_RIGHT),
        dpad_up: bit(BIT_UP),
        y: bit(BIT_Y),
        b: bit(BIT_B),
        a: bit(BIT_A),
        x: bit(BIT_X),
        r1: bit(BIT_R1),
        l1: bit(BIT_L1),
        r2: bit(BIT_R2),
        l2: bit(BIT_L2),
    }
}

fn write_f32(buf: &mut Vec<u8>, v: f32) {
    let mut tmp = [0u8; 4];
    LittleEndian::write_f32(&mut tmp, v);
    buf.extend_from_slice(&tmp);
}

fn write_touch(buf: &mut Vec<u8>, touch: Option<crate::device::TouchData>) {
    match touch {
        Some(t) => {
            buf.push(1);
            buf.push(t.id);
            let mut tmp = [0u8; 2];
            LittleEndian::write_u16(&mut tmp, t.x);
            buf.extend_from_slice(&tmp);
            LittleEndian::write_u16(&mut tmp, t.y);
            buf.extend_from_slice(&tmp);
        }
        None => buf.extend_from_slice(&[0u8; 6]),
    }
}

/// Assemble a complete DATA frame for `device` at `slot_id`, with the
/// per-client packet number left at zero. The caller patches that field
/// (via [`patch_packet_number`]) once per subscriber before sending.
pub fn build_data_frame(server_id: u32, slot_id: u8, device: &dyn Device) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DATA_FRAME_LEN);
    codec::write_header(&mut buf, b'S', server_id, MSG_TYPE_DATA);
    write_occupied_slot_descriptor(&mut buf, slot_id, device);
    buf.push(1); // connected flag

    debug_assert_eq!(buf.len(), PACKET_NUMBER_OFFSET, "packet number offset drifted");
    buf.extend_from_slice(&[0u8; 4]); // packet number placeholder

    let base = device.get_base_inputs();
    let mut tmp16 = [0u8; 2];
    LittleEndian::write_u16(&mut tmp16, base.buttons);
    buf.extend_from_slice(&tmp16);
    buf.push(base.home as u8);
    buf.push(base.touch_button as u8);
    buf.push(base.left_stick_x);
    buf.push(base.left_stick_y);
    buf.push(base.right_stick_x);
    buf.push(base.right_stick_y);

    let mut analog = synthesize_analog(base.buttons);
    device.get_analog_inputs(&mut analog);
    buf.push(analog.dpad_left);
    buf.push(analog.dpad_down);
    buf.push(analog.dpad_right);
    buf.push(analog.dpad_up);
    buf.push(analog.y);
    buf.push(analog.b);
    buf.push(analog.a);
    buf.push(analog.x);
    buf.push(analog.r1);
    buf.push(analog.l1);
    buf.push(analog.r2);
    buf.push(analog.l2);

    write_touch(&mut buf, device.get_touch(0));
    write_touch(&mut buf, device.get_touch(1));

    let device_type = device.get_device_type();
    let has_accel = device_type != DeviceType::NoMotion;
    let has_gyro = device_type == DeviceType::GyroFull;

    let mut tmp64 = [0u8; 8];
    LittleEndian::write_u64(&mut tmp64, if has_accel { device.get_motion_timestamp() } else { 0 });
    buf.extend_from_slice(&tmp64);

    let orientation = device.orientation();
    let accel = if has_accel {
        crate::device::remap_motion(orientation, device.get_accelerometer(), false)
    } else {
        crate::device::MotionData::default()
    };
    write_f32(&mut buf, accel.x);
    write_f32(&mut buf, accel.y);
    write_f32(&mut buf, accel.z);

    let gyro = if has_gyro {
        crate::device::remap_motion(orientation, device.get_gyro(), true)
    } else {
        crate::device::MotionData::default()
    };
    write_f32(&mut buf, gyro.x);
    write_f32(&mut buf, gyro.y);
    write_f32(&mut buf, gyro.z);

    debug_assert_eq!(buf.len(), DATA_FRAME_LEN, "DATA frame size drifted from spec");
    codec::finalize(&mut buf);
    buf
}

/// Build the fixed 22-byte VERSION reply.
pub fn build_version_reply(server_id: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(22);
    codec::write_header(&mut buf, b'S', server_id, MSG_TYPE_VERSION);
    let mut tmp = [0u8; 2];
    LittleEndian::write_u16(&mut tmp, PROTOCOL_VERSION);
    buf.extend_from_slice(&tmp);
    codec::finalize(&mut buf);
    buf
}

/// Build a single 32-byte PORTS reply for `slot_id`. `device` is `None` for
/// an unoccupied slot.
///
/// `slot_id` must already have been filtered to `< SLOTS_PER_SERVER` by the
/// caller; this is a precondition, not something this function recovers from.
pub fn build_ports_reply(server_id: u32, slot_id: u8, device: Option<&dyn Device>) -> Vec<u8> {
    assert!(slot_id < SLOTS_PER_SERVER, "slot id out of range in descriptor writer");
    let mut buf = Vec::with_capacity(32);
    codec::write_header(&mut buf, b'S', server_id, MSG_TYPE_PORTS);
    match device {
        Some(d) => write_occupied_slot_descriptor(&mut buf, slot_id, d),
        None => write_empty_slot_descriptor(&mut buf, slot_id),
    }
    buf.push(0); // padding byte, per the 12-byte PORTS body
    codec::finalize(&mut buf);
    buf
}

/// Patch the per-client packet number into a frame built by
/// [`build_data_frame`] and recompute its CRC. Leaves the length field
/// untouched (the frame's size never changes between clients).
pub fn patch_packet_number(buf: &mut [u8], packet_number: u32) {
    LittleEndian::write_u32(
        &mut buf[PACKET_NUMBER_OFFSET..PACKET_NUMBER_OFFSET + 4],
        packet_number,
    );
    codec::recompute_crc(buf);
}
