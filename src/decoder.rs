// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

//! Pure decoding of inbound message fields into [`DaliEvent`]s.
//!
//! Nothing here touches the network or the pending-query registry; the
//! driver's dispatch decides which of these to call and where the result
//! goes.

use crate::constants::{gateway_event_description, InputEventCode};
use crate::event::{AddressType, DaliEvent};

/// Decode the addressing byte of a DALI-2 input notification.
///
/// - `0AAAAAA0`: short address `AAAAAA`
/// - `100GGGG0`: group `GGGG`
/// - `11111111`: broadcast
/// - anything else: unknown (not produced by compliant devices)
pub fn decode_input_address(addressing_byte: u8) -> (AddressType, Option<u8>) {
    if addressing_byte >> 7 == 0 && addressing_byte & 0x01 == 0 {
        (AddressType::Short, Some(addressing_byte >> 1))
    } else if addressing_byte >> 6 == 0b10 && addressing_byte & 0x01 == 0 {
        (AddressType::Group, Some((addressing_byte >> 1) & 0x0F))
    } else if addressing_byte == 0xFF {
        (AddressType::Broadcast, None)
    } else {
        (AddressType::Unknown, None)
    }
}

/// Decode a 24-bit input notification frame (addressing, instance, event).
pub fn decode_input_notification(frame: [u8; 3]) -> DaliEvent {
    let [addressing_byte, instance_number, event_code] = frame;
    let (address_type, address) = decode_input_address(addressing_byte);
    DaliEvent::InputNotification {
        address_type,
        address,
        instance_number,
        event_code: InputEventCode::from_u8(event_code),
    }
}

/// Decode a spontaneous DALI frame of `bits` length seen on the bus.
pub fn decode_dali_frame(bits: u8, frame: &[u8]) -> DaliEvent {
    match (bits, frame) {
        (16, &[address_byte, opcode_byte]) => DaliEvent::Command {
            address_byte,
            opcode_byte,
        },
        (24, &[a, b, c]) => decode_input_notification([a, b, c]),
        _ => DaliEvent::Generic {
            raw: frame.to_vec(),
            description: format!("DALI Event ({bits}-bit)"),
        },
    }
}

/// Decode a special gateway event code. Unrecognised codes are kept.
pub fn decode_gateway_event(code: u8) -> DaliEvent {
    DaliEvent::SpecialGateway {
        event_code: code,
        description: gateway_event_description(code),
    }
}

pub fn decode_config_response(item_number: u8, value: u16) -> DaliEvent {
    DaliEvent::ConfigResponse { item_number, value }
}

/// Event for a backward frame that matched no pending query, if it carries
/// an answer byte.
pub fn decode_unsolicited_answer(answer: &[u8]) -> Option<DaliEvent> {
    answer.first().map(|&value| DaliEvent::QueryResponse {
        address: None,
        value,
    })
}
