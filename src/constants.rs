// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

/// Protocol framing bytes.
pub const SOH: u8 = 0x01; // Start of frame
pub const ETB: u8 = 0x17; // End of frame

/// Default TCP port of the first DALI line on a Foxtron gateway.
/// The second line of a DALI2net listens on 24.
pub const DEFAULT_PORT: u16 = 23;

/// Config item holding the gateway firmware version (major in the high byte).
pub const CONFIG_ITEM_FIRMWARE_VERSION: u8 = 0x02;

/// Foxtron message types (first payload byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Spontaneous DALI frame from another master, with a DALI answer
    DaliEventWithAnswer = 0x03,
    /// Spontaneous DALI frame without answer (button presses, other masters)
    DaliEventNoAnswer = 0x04,
    /// Gateway status (bus power, buffer overflow, ...)
    SpecialGatewayEvent = 0x05,
    /// Outbound: query a gateway configuration item
    QueryConfigItem = 0x06,
    /// Answer to `QueryConfigItem`
    ConfigResponse = 0x07,
    /// Outbound: transmit a DALI frame
    SendDaliCommand = 0x0B,
    /// Differentiated answer to one of our DALI queries
    DaliResponseWithAnswer = 0x0D,
    /// Differentiated confirmation of one of our DALI commands
    ConfirmationNoAnswer = 0x0E,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x03 => Some(Self::DaliEventWithAnswer),
            0x04 => Some(Self::DaliEventNoAnswer),
            0x05 => Some(Self::SpecialGatewayEvent),
            0x06 => Some(Self::QueryConfigItem),
            0x07 => Some(Self::ConfigResponse),
            0x0B => Some(Self::SendDaliCommand),
            0x0D => Some(Self::DaliResponseWithAnswer),
            0x0E => Some(Self::ConfirmationNoAnswer),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DaliEventWithAnswer => "DALI Event w/ Answer (Spontaneous)",
            Self::DaliEventNoAnswer => "DALI Event w/o Answer (Spontaneous)",
            Self::SpecialGatewayEvent => "Special Gateway Event",
            Self::QueryConfigItem => "Query Config Item",
            Self::ConfigResponse => "Config Response",
            Self::SendDaliCommand => "Send DALI Command",
            Self::DaliResponseWithAnswer => "DALI Response w/ Answer (Differentiated)",
            Self::ConfirmationNoAnswer => "Confirmation w/o Answer (Differentiated)",
        }
    }
}

/// Name of a raw message type byte, for log lines.
pub fn message_type_name(v: u8) -> &'static str {
    MessageType::from_u8(v).map_or("Unknown", |t| t.name())
}

/// Gateway status codes carried by a special gateway event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayEventCode {
    ValidDaliPower,
    DaliPowerLoss,
    MainsVoltageOnBus,
    DefectivePowerSupply,
    MessageBufferFull,
    ChecksumError,
    InvalidCommand,
}

impl GatewayEventCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::ValidDaliPower),
            1 => Some(Self::DaliPowerLoss),
            2 => Some(Self::MainsVoltageOnBus),
            3 => Some(Self::DefectivePowerSupply),
            4 => Some(Self::MessageBufferFull),
            5 => Some(Self::ChecksumError),
            6 => Some(Self::InvalidCommand),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ValidDaliPower => "Valid DALI Power",
            Self::DaliPowerLoss => "DALI Power Loss",
            Self::MainsVoltageOnBus => "Mains Voltage on Bus",
            Self::DefectivePowerSupply => "Defective Power Supply",
            Self::MessageBufferFull => "Message Buffer Full",
            Self::ChecksumError => "Checksum Error",
            Self::InvalidCommand => "Invalid Command",
        }
    }
}

/// Description of a raw gateway event code; unrecognised codes still get one.
pub fn gateway_event_description(code: u8) -> &'static str {
    GatewayEventCode::from_u8(code).map_or("Unknown Special Event", |c| c.description())
}

/// DALI-2 input notification event codes (IEC 62386-301), third byte of a
/// 24-bit event frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputEventCode {
    ButtonPressed,
    ButtonReleased,
    ShortPress,
    DoublePress,
    LongPressStart,
    LongPressRepeat,
    LongPressStop,
    ButtonStuck,
    ButtonFree,
    Other(u8),
}

impl InputEventCode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => Self::ButtonPressed,
            0x01 => Self::ButtonReleased,
            0x02 => Self::ShortPress,
            0x03 => Self::DoublePress,
            0x04 => Self::LongPressStart,
            0x05 => Self::LongPressRepeat,
            0x06 => Self::LongPressStop,
            0x07 => Self::ButtonStuck,
            0x08 => Self::ButtonFree,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::ButtonPressed => 0x00,
            Self::ButtonReleased => 0x01,
            Self::ShortPress => 0x02,
            Self::DoublePress => 0x03,
            Self::LongPressStart => 0x04,
            Self::LongPressRepeat => 0x05,
            Self::LongPressStop => 0x06,
            Self::ButtonStuck => 0x07,
            Self::ButtonFree => 0x08,
            Self::Other(v) => *v,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ButtonPressed => "Button Pressed",
            Self::ButtonReleased => "Button Released",
            Self::ShortPress => "Short Press",
            Self::DoublePress => "Double Press",
            Self::LongPressStart => "Long Press Start",
            Self::LongPressRepeat => "Long Press Repeat",
            Self::LongPressStop => "Long Press Stop",
            Self::ButtonStuck => "Button Stuck",
            Self::ButtonFree => "Button Free",
            Self::Other(_) => "Unknown",
        }
    }
}

/// DALI standard opcodes (IEC 62386-102) used by the driver.
pub mod opcode {
    pub const OFF: u8 = 0x00;
    pub const RECALL_MAX_LEVEL: u8 = 0x05;
    /// SET FADE TIME (DTR0); a configuration command, must be sent twice.
    pub const SET_FADE_TIME: u8 = 0x2E;
    pub const QUERY_CONTROL_GEAR_PRESENT: u8 = 0x90;
    pub const QUERY_ACTUAL_LEVEL: u8 = 0xA0;
    pub const QUERY_DEVICE_TYPE: u8 = 0x99;
}

/// Address byte of the DALI special command DTR0 (data byte = value).
pub const DALI_SPECIAL_DTR0: u8 = 0xA3;

/// Broadcast address byte for commands (selector bit 1).
pub const DALI_BROADCAST: u8 = 0xFF;

/// Highest DALI short address.
pub const MAX_SHORT_ADDRESS: u8 = 63;

/// Highest level accepted by direct arc power control (255 is MASK).
pub const MAX_ARC_LEVEL: u8 = 254;

/// Highest fade time code.
pub const MAX_FADE_CODE: u8 = 15;

/// Nominal fade durations in seconds, indexed by fade code 0-15.
pub const FADE_TIMES: [f32; 16] = [
    0.0, 0.7, 1.0, 1.4, 2.0, 2.8, 4.0, 5.7, 8.0, 11.3, 16.0, 22.6, 32.0, 45.3, 64.0, 90.5,
];

/// Nominal fade duration in seconds of a fade code, or `None` if out of range.
pub fn fade_time_seconds(code: u8) -> Option<f32> {
    FADE_TIMES.get(code as usize).copied()
}

/// Address byte selecting a short address for a direct arc power command.
pub fn arc_address(short_address: u8) -> u8 {
    short_address << 1
}

/// Address byte selecting a short address for a standard command or query.
pub fn command_address(short_address: u8) -> u8 {
    (short_address << 1) | 0x01
}
