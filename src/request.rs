// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request parsing and device-selection logic for the three inbound message
//! types. Pure functions only — no socket or registry types — so the
//! branching logic is testable without a running server.

use crate::codec::{MSG_TYPE_DATA, MSG_TYPE_PORTS, MSG_TYPE_VERSION};
use crate::codec::ParsedHeader;
use crate::error::ProtocolError;
use crate::registry::DeviceId;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Maximum number of slot ids a single PORTS request may ask about.
const MAX_PORTS_PER_REQUEST: usize = 5;

/// registration_type bit meaning "subscribe by slot index".
const REG_BY_SLOT: u8 = 0x01;
/// registration_type bit meaning "subscribe by MAC".
const REG_BY_MAC: u8 = 0x02;

/// What the server should do in response to a successfully-parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a single VERSION reply.
    SendVersion,
    /// Send one PORTS reply per requested slot id (already clamped to 5).
    SendPorts(Vec<u8>),
    /// Subscribe `client_id` to the given devices (may be empty).
    RegisterData { client_id: u32, devices: Vec<DeviceId> },
}

/// A minimal snapshot of a registered device, enough to resolve a DATA
/// request's slot/MAC selection without touching `dyn Device` directly.
#[derive(Debug, Clone, Copy)]
pub struct DeviceSlot {
    pub id: DeviceId,
    pub slot: u8,
    pub mac: u64,
}

/// Parse the inbound payload for a request whose header already validated,
/// and decide what the server should do about it.
pub fn dispatch(
    header: ParsedHeader,
    payload: &[u8],
    devices: &[DeviceSlot],
) -> Result<Action, ProtocolError> {
    match header.message_type {
        MSG_TYPE_VERSION => Ok(Action::SendVersion),
        MSG_TYPE_PORTS => Ok(Action::SendPorts(parse_ports_request(payload)?)),
        MSG_TYPE_DATA => {
            let (registration_type, slot, mac) = parse_data_request(payload)?;
            let selected = select_devices(registration_type, slot, mac, devices);
            Ok(Action::RegisterData {
                client_id: header.source_id,
                devices: selected,
            })
        }
        _ => Err(ProtocolError::UnknownMessageType),
    }
}

/// `u32 count` followed by `count` slot ids as `u8`. `count` is clamped to
/// [`MAX_PORTS_PER_REQUEST`] regardless of what the client claims.
fn parse_ports_request(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() < 4 {
        return Err(ProtocolError::TooShort);
    }
    let claimed_count = LittleEndian::read_u32(&payload[0..4]) as usize;
    let count = claimed_count.min(MAX_PORTS_PER_REQUEST);
    if payload.len() < 4 + count {
        return Err(ProtocolError::TooShort);
    }
    Ok(payload[4..4 + count].to_vec())
}

/// `u8 registration_type`, `u8 slot`, `6 bytes MAC big-endian`.
fn parse_data_request(payload: &[u8]) -> Result<(u8, u8, u64), ProtocolError> {
    if payload.len() < 8 {
        return Err(ProtocolError::TooShort);
    }
    let registration_type = payload[0];
    let slot = payload[1];
    let mac = BigEndian::read_uint(&payload[2..8], 6);
    Ok((registration_type, slot, mac))
}

/// Resolve which devices a DATA request selects.
///
/// `registration_type == 0` means ALL currently registered devices. Otherwise
/// the by-slot and by-MAC selections are unioned (a device matching either
/// criterion is included once).
fn select_devices(registration_type: u8, slot: u8, mac: u64, devices: &[DeviceSlot]) -> Vec<DeviceId> {
    if registration_type == 0 {
        return devices.iter().map(|d| d.id).collect();
    }

    let mut selected = Vec::new();
    if registration_type & REG_BY_SLOT != 0 {
        if let Some(d) = devices.iter().find(|d| d.slot == slot) {
            selected.push(d.id);
        }
    }
    if registration_type & REG_BY_MAC != 0 {
        if mac == 0 {
            log::warn!("DATA request registers by MAC 0 (\"no unique identity\"); honouring it anyway");
        }
        // MAC 0 is honoured even though it means "no unique identity" —
        // it will match every device that also reports MAC 0.
        for d in devices.iter().filter(|d| d.mac == mac) {
            if !selected.contains(&d.id) {
                selected.push(d.id);
            }
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(message_type: u32) -> ParsedHeader {
        ParsedHeader {
            source_id: 42,
            message_type,
        }
    }

    #[test]
    fn test_version_request_dispatches_send_version() {
        let action = dispatch(header(MSG_TYPE_VERSION), &[], &[]).unwrap();
        assert_eq!(action, Action::SendVersion);
    }

    #[test]
    fn test_ports_request_clamps_count_to_five() {
        let mut payload = vec![0u8; 4];
        LittleEndian::write_u32(&mut payload, 10);
        payload.extend_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let action = dispatch(header(MSG_TYPE_PORTS), &payload, &[]).unwrap();
        assert_eq!(action, Action::SendPorts(vec![0, 1, 2, 3, 4]));
    }

    #[test]
    fn test_data_all_mode_selects_every_device() {
        let devices = vec![
            DeviceSlot { id: DeviceId(0), slot: 0, mac: 0 },
            DeviceSlot { id: DeviceId(1), slot: 1, mac: 0x00AABBCCDDEE },
        ];
        // registration_type = 0 means ALL.
        let payload = [0u8, 0, 0, 0, 0, 0, 0, 0];
        let action = dispatch(header(MSG_TYPE_DATA), &payload, &devices).unwrap();
        assert_eq!(
            action,
            Action::RegisterData {
                client_id: 42,
                devices: vec![DeviceId(0), DeviceId(1)],
            }
        );
    }

    #[test]
    fn test_data_by_mac_zero_matches_both_devices_with_mac_zero() {
        // Two devices with MAC 0: registering by MAC 0 matches both.
        let devices = vec![
            DeviceSlot { id: DeviceId(0), slot: 0, mac: 0 },
            DeviceSlot { id: DeviceId(1), slot: 1, mac: 0 },
        ];
        let payload = [0x02u8, 0, 0, 0, 0, 0, 0, 0];
        let action = dispatch(header(MSG_TYPE_DATA), &payload, &devices).unwrap();
        assert_eq!(
            action,
            Action::RegisterData {
                client_id: 42,
                devices: vec![DeviceId(0), DeviceId(1)],
            }
        );
    }

    #[test]
    fn test_data_by_slot_and_mac_union_without_duplicates() {
        let devices = vec![
            DeviceSlot { id: DeviceId(0), slot: 0, mac: 0xAA },
            DeviceSlot { id: DeviceId(1), slot: 1, mac: 0xBB },
        ];
        // bit0 selects slot 0 (device 0); bit1 with mac 0xAA also matches device 0.
        let mut payload = vec![0x03u8, 0];
        payload.extend_from_slice(&[0, 0, 0, 0, 0, 0xAA]);
        let action = dispatch(header(MSG_TYPE_DATA), &payload, &devices).unwrap();
        assert_eq!(
            action,
            Action::RegisterData {
                client_id: 42,
                devices: vec![DeviceId(0)],
            }
        );
    }

    #[test]
    fn test_data_request_too_short_is_rejected() {
        let result = dispatch(header(MSG_TYPE_DATA), &[0, 1], &[]);
        assert_eq!(result, Err(ProtocolError::TooShort));
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let result = dispatch(header(0xffff_ffff), &[], &[]);
        assert_eq!(result, Err(ProtocolError::UnknownMessageType));
    }
}
