// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

use bitflags::bitflags;

use crate::constants::{message_type_name, MessageType};
use crate::error::{DaliError, Result};
use crate::frame::build_frame;

bitflags! {
    /// Parameter byte trailing a `SendDaliCommand` message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SendFlags: u8 {
        /// Gateway transmits the DALI frame twice (config commands)
        const REPEAT = 0b0000_0001;
    }
}

/// Messages the driver sends to the gateway.
///
/// # Wire payloads
///
/// ```text
/// QueryConfigItem   06 <item>
/// SendDaliCommand   0B 00 <bit length> <dali frame bytes...> <flags>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read a gateway configuration item. Answered by a config response.
    QueryConfigItem { item: u8 },
    /// Transmit a DALI forward frame of 1-8 bytes.
    SendDaliCommand { frame: Vec<u8>, flags: SendFlags },
}

impl Request {
    /// A standard 16-bit DALI command (address byte + opcode).
    pub fn dali_command(address_byte: u8, opcode_byte: u8, repeat: bool) -> Self {
        let flags = if repeat { SendFlags::REPEAT } else { SendFlags::empty() };
        Request::SendDaliCommand {
            frame: vec![address_byte, opcode_byte],
            flags,
        }
    }

    /// Binary payload of this request, checksum excluded.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        match self {
            Request::QueryConfigItem { item } => {
                Ok(vec![MessageType::QueryConfigItem.as_u8(), *item])
            }
            Request::SendDaliCommand { frame, flags } => {
                let bits = frame.len() * 8;
                if !(8..=64).contains(&bits) {
                    return Err(DaliError::InvalidCommandLength { bits });
                }
                let mut payload = Vec::with_capacity(frame.len() + 4);
                payload.push(MessageType::SendDaliCommand.as_u8());
                payload.push(0x00);
                payload.push(bits as u8);
                payload.extend_from_slice(frame);
                payload.push(flags.bits());
                Ok(payload)
            }
        }
    }

    /// Complete SOH…ETB frame of this request.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        Ok(build_frame(&self.to_payload()?))
    }
}

/// A validated inbound payload, split into its type-specific fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Type 0x03/0x04: a DALI frame observed on the bus.
    DaliEvent {
        with_answer: bool,
        bits: u8,
        frame: Vec<u8>,
    },
    /// Type 0x05: gateway status.
    SpecialGatewayEvent { code: u8 },
    /// Type 0x07: answer to a config item query.
    ConfigResponse { item: u8, value: u16 },
    /// Type 0x0D: differentiated answer to a DALI query.
    ///
    /// `command` is the echoed command we sent (may be empty on firmware
    /// that omits the echo); `answer` is the backward frame, if any.
    DaliResponse { command: Vec<u8>, answer: Vec<u8> },
    /// Type 0x0E: a sent command was put on the bus.
    Confirmation,
    /// Any other type byte; carried for logging.
    Unknown { msg_type: u8 },
}

/// Number of bytes needed to hold `bits` bits.
pub fn bits_to_bytes(bits: u8) -> usize {
    (bits as usize).div_ceil(8)
}

/// Bytes `start..start + len` of `payload`, truncated to what is present.
fn take(payload: &[u8], start: usize, len: usize) -> Vec<u8> {
    let start = start.min(payload.len());
    let end = (start + len).min(payload.len());
    payload[start..end].to_vec()
}

fn malformed(payload: &[u8], what: &str) -> DaliError {
    DaliError::MalformedMessage {
        details: format!(
            "{} ({}): {}",
            message_type_name(payload.first().copied().unwrap_or_default()),
            what,
            hex::encode_upper(payload)
        ),
    }
}

impl Message {
    /// Split a checksum-validated payload into a `Message`.
    ///
    /// DALI frames shorter than their declared bit length are returned as
    /// present; only payloads missing fixed header fields are rejected.
    pub fn parse(payload: &[u8]) -> Result<Message> {
        let Some(&msg_type) = payload.first() else {
            return Err(DaliError::MalformedMessage {
                details: "empty payload".to_string(),
            });
        };

        match MessageType::from_u8(msg_type) {
            Some(t @ (MessageType::DaliEventWithAnswer | MessageType::DaliEventNoAnswer)) => {
                let &bits = payload.get(1).ok_or_else(|| malformed(payload, "missing bit length"))?;
                Ok(Message::DaliEvent {
                    with_answer: t == MessageType::DaliEventWithAnswer,
                    bits,
                    frame: take(payload, 2, bits_to_bytes(bits)),
                })
            }
            Some(MessageType::SpecialGatewayEvent) => {
                let &code = payload.get(1).ok_or_else(|| malformed(payload, "missing event code"))?;
                Ok(Message::SpecialGatewayEvent { code })
            }
            Some(MessageType::ConfigResponse) => {
                if payload.len() < 4 {
                    return Err(malformed(payload, "expected item and 16-bit value"));
                }
                Ok(Message::ConfigResponse {
                    item: payload[1],
                    value: u16::from_be_bytes([payload[2], payload[3]]),
                })
            }
            Some(MessageType::DaliResponseWithAnswer) => {
                if payload.len() < 3 {
                    return Err(malformed(payload, "missing bit lengths"));
                }
                let command_len = bits_to_bytes(payload[1]);
                let answer_len = bits_to_bytes(payload[2]);
                Ok(Message::DaliResponse {
                    command: take(payload, 3, command_len),
                    answer: take(payload, 3 + command_len, answer_len),
                })
            }
            Some(MessageType::ConfirmationNoAnswer) => Ok(Message::Confirmation),
            // Outbound types echoed back are not expected; treat as unknown
            Some(MessageType::QueryConfigItem | MessageType::SendDaliCommand) | None => {
                Ok(Message::Unknown { msg_type })
            }
        }
    }
}
