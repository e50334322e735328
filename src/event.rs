// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

use std::fmt;

use crate::constants::InputEventCode;

/// Addressing mode of a DALI-2 input notification (IEC 62386-301).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    Short,
    Group,
    Broadcast,
    Unknown,
}

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "Short",
            Self::Group => "Group",
            Self::Broadcast => "Broadcast",
            Self::Unknown => "Unknown",
        }
    }
}

/// All events decoded from inbound gateway messages.
///
/// Users receive them one at a time via `driver.get_event()`.
#[derive(Debug, Clone, PartialEq)]
pub enum DaliEvent {
    /// DALI frame of a non-standard length, or otherwise undecodable
    Generic { raw: Vec<u8>, description: String },
    /// 16-bit forward frame observed on the bus
    Command { address_byte: u8, opcode_byte: u8 },
    /// 24-bit DALI-2 input notification (button, sensor)
    InputNotification {
        address_type: AddressType,
        /// Short address (0-63) or group (0-15); `None` for broadcast/unknown
        address: Option<u8>,
        instance_number: u8,
        event_code: InputEventCode,
    },
    /// Gateway or bus power status
    SpecialGateway {
        event_code: u8,
        description: &'static str,
    },
    /// Gateway configuration item value
    ConfigResponse { item_number: u8, value: u16 },
    /// Backward frame that matched none of our queries.
    /// The responding device is not identifiable, so `address` is `None`.
    QueryResponse { address: Option<u8>, value: u8 },
}

impl DaliEvent {
    /// Short human-readable description of the event kind.
    pub fn description(&self) -> String {
        match self {
            Self::Generic { description, .. } => description.clone(),
            Self::Command { .. } => "DALI Command".to_string(),
            Self::InputNotification { .. } => "DALI-2 Input Notification".to_string(),
            Self::SpecialGateway { description, .. } => (*description).to_string(),
            Self::ConfigResponse { item_number, .. } => {
                format!("Config Response for Item {item_number}")
            }
            Self::QueryResponse { address: Some(a), .. } => {
                format!("DALI Query Response for Address {a}")
            }
            Self::QueryResponse { address: None, .. } => {
                "DALI Query Response (unsolicited)".to_string()
            }
        }
    }
}

impl fmt::Display for DaliEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic { raw, description } => {
                write!(f, "Generic(desc='{description}', raw='{}')", hex::encode_upper(raw))
            }
            Self::Command {
                address_byte,
                opcode_byte,
            } => write!(f, "Command(address=0x{address_byte:02X}, opcode=0x{opcode_byte:02X})"),
            Self::InputNotification {
                address_type,
                address,
                instance_number,
                event_code,
            } => {
                match address {
                    Some(a) => write!(f, "InputNotification({} Address={a}", address_type.as_str())?,
                    None => write!(f, "InputNotification({}", address_type.as_str())?,
                }
                write!(
                    f,
                    ", Instance={instance_number}, EventCode={} ({}))",
                    event_code.as_u8(),
                    event_code.name()
                )
            }
            Self::SpecialGateway {
                event_code,
                description,
            } => write!(f, "SpecialGateway(code={event_code}, desc='{description}')"),
            Self::ConfigResponse { item_number, value } => {
                write!(f, "ConfigResponse(item={item_number}, value={value})")
            }
            Self::QueryResponse { address, value } => match address {
                Some(a) => write!(f, "QueryResponse(address={a}, value={value})"),
                None => write!(f, "QueryResponse(address=unknown, value={value})"),
            },
        }
    }
}

/// Type alias for the event queue sender.
pub type EventSender = tokio::sync::mpsc::UnboundedSender<DaliEvent>;

/// Type alias for the event queue receiver.
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<DaliEvent>;

/// Create the unbounded FIFO event queue.
pub fn event_channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
