//! Message types and the sub-codes carried inside them.

/// Hub property request/update.
pub const HUB_PROPERTY: u8 = 0x01;
/// Hub action (reset, VCC control).
pub const HUB_ACTION: u8 = 0x02;
/// Hub alert enable/disable/request/update.
pub const HUB_ALERT: u8 = 0x03;
/// Device attached to or detached from a port.
pub const HUB_ATTACHED_IO: u8 = 0x04;
/// Device-reported failure of a previous command.
pub const GENERIC_ERROR: u8 = 0x05;
/// Firmware maintenance request.
pub const FIRMWARE_REQUEST: u8 = 0x10;
/// Firmware maintenance response.
pub const FIRMWARE_RESPONSE: u8 = 0x11;
pub const PORT_INFO_REQUEST: u8 = 0x21;
pub const PORT_MODE_REQUEST: u8 = 0x22;
pub const PORT_FORMAT_SETUP_SINGLE: u8 = 0x41;
pub const PORT_FORMAT_SETUP_COMBINED: u8 = 0x42;
pub const PORT_INFO: u8 = 0x43;
pub const PORT_MODE: u8 = 0x44;
pub const PORT_VALUE_SINGLE: u8 = 0x45;
pub const PORT_VALUE_COMBINED: u8 = 0x46;
pub const PORT_FORMAT_SINGLE: u8 = 0x47;
pub const PORT_FORMAT_COMBINED: u8 = 0x48;
pub const VIRTUAL_PORT_SETUP: u8 = 0x61;
pub const PORT_OUTPUT: u8 = 0x81;
pub const PORT_OUTPUT_FEEDBACK: u8 = 0x82;

/// Hub property ids and operations.
pub mod property {
    pub const FW_VERSION: u8 = 3;
    pub const HW_VERSION: u8 = 4;
    pub const OP_REQUEST: u8 = 5;
    pub const OP_UPDATE: u8 = 6;
}

/// Hub action codes.
pub mod action {
    pub const RESET: u8 = 0x01;
    pub const VCC_ON: u8 = 0x03;
    pub const VCC_OFF: u8 = 0x04;
}

/// Hub alert ids and operations.
pub mod alert {
    pub const OP_ENABLE: u8 = 1;
    pub const OP_DISABLE: u8 = 2;
    pub const OP_REQUEST: u8 = 3;
    pub const OP_UPDATE: u8 = 4;

    pub const LOW_VOLTAGE: u8 = 1;
    pub const HIGH_CURRENT: u8 = 2;
    pub const LOW_SIGNAL: u8 = 3;
    pub const OVER_POWER: u8 = 4;
    /// One past the highest alert id.
    pub const COUNT: usize = 5;
}

/// Attached-IO event codes.
pub mod attach {
    pub const DETACHED: u8 = 0;
    pub const ATTACHED: u8 = 1;
    pub const ATTACHED_VIRTUAL: u8 = 2;
}

/// Port information request kinds.
pub mod port_info {
    pub const VALUE: u8 = 0;
    pub const MODE: u8 = 1;
    pub const MODE_COMBINATIONS: u8 = 2;
}

/// Port mode information kinds.
pub mod mode_info {
    pub const NAME: u8 = 0;
    pub const RAW: u8 = 1;
    pub const PCT: u8 = 2;
    pub const SI: u8 = 3;
    pub const SYMBOL: u8 = 4;
    pub const MAPPING: u8 = 5;
    pub const CAPABILITY: u8 = 8;
    pub const VALUE_FORMAT: u8 = 0x80;
}

/// Combined-format setup sub-commands.
pub mod combined {
    pub const SET_COMBINATION: u8 = 0x01;
    pub const LOCK: u8 = 0x02;
    pub const UNLOCK_AND_START_MULTI_UPDATE: u8 = 0x03;
    pub const UNLOCK_MULTI_UPDATE_DISABLED: u8 = 0x04;
    pub const RESET: u8 = 0x06;
}

/// Port output sub-commands and flags.
pub mod output {
    /// Execute immediately and ask for command feedback.
    pub const STARTUP_AND_FEEDBACK: u8 = 0x11;

    pub const START_POWER_DUAL: u8 = 0x02;
    pub const SET_ACC_TIME: u8 = 0x05;
    pub const SET_DEC_TIME: u8 = 0x06;
    pub const START_SPEED: u8 = 0x07;
    pub const START_SPEED_DUAL: u8 = 0x08;
    pub const START_SPEED_FOR_TIME: u8 = 0x09;
    pub const START_SPEED_FOR_TIME_DUAL: u8 = 0x0A;
    pub const START_SPEED_FOR_DEGREES: u8 = 0x0B;
    pub const START_SPEED_FOR_DEGREES_DUAL: u8 = 0x0C;
    pub const GOTO_ABSOLUTE_POSITION: u8 = 0x0D;
    pub const GOTO_ABSOLUTE_POSITION_DUAL: u8 = 0x0E;
    pub const PRESET_ENCODER_DUAL: u8 = 0x14;
    pub const WRITE_DIRECT_MODE_DATA: u8 = 0x51;

    /// Direct mode carrying motor power.
    pub const MODE_POWER: u8 = 0;
    /// Direct mode carrying an encoder preset.
    pub const MODE_PRESET_ENCODER: u8 = 2;

    pub const POWER_FLOAT: i8 = 0;
    pub const POWER_BRAKE: i8 = 127;
}

/// Output feedback status bits.
pub mod feedback {
    pub const BUSY: u8 = 0x01;
    pub const COMPLETED: u8 = 0x02;
    pub const DISCARDED: u8 = 0x04;
    pub const IDLE: u8 = 0x08;
    pub const STALLED: u8 = 0x20;
}

/// Virtual port setup operations.
pub mod virtual_port {
    pub const DISCONNECT: u8 = 0x00;
    pub const CONNECT: u8 = 0x01;
}

/// Firmware maintenance operations.
pub mod firmware {
    pub const INITIALIZE: u8 = 1;
    pub const STORE: u8 = 2;
    pub const READ_LENGTH: u8 = 3;
    pub const CHECKSUM: u8 = 4;
    pub const READ_FLASH: u8 = 5;
    pub const VALIDATE_IMAGE: u8 = 6;
    pub const FLASH_DEVICE_ID: u8 = 7;

    pub const CHECKSUM_STORED: u8 = 0;
    pub const CHECKSUM_CALCULATED: u8 = 1;

    /// Largest chunk a single store request may carry.
    pub const STORE_CHUNK: usize = 64;
    /// Bytes returned by one flash read.
    pub const FLASH_READ_LEN: usize = 16;
}

/// Human-readable name for a message type, for logs and diagnostics.
pub fn message_name(message_type: u8) -> &'static str {
    match message_type {
        HUB_PROPERTY => "HUB_PROPERTY",
        HUB_ACTION => "HUB_ACTION",
        HUB_ALERT => "HUB_ALERT",
        HUB_ATTACHED_IO => "HUB_ATTACHED_IO",
        GENERIC_ERROR => "GENERIC_ERROR",
        FIRMWARE_REQUEST => "FIRMWARE_REQUEST",
        FIRMWARE_RESPONSE => "FIRMWARE_RESPONSE",
        PORT_INFO_REQUEST => "PORT_INFO_REQUEST",
        PORT_MODE_REQUEST => "PORT_MODE_REQUEST",
        PORT_FORMAT_SETUP_SINGLE => "PORT_FORMAT_SETUP_SINGLE",
        PORT_FORMAT_SETUP_COMBINED => "PORT_FORMAT_SETUP_COMBINED",
        PORT_INFO => "PORT_INFO",
        PORT_MODE => "PORT_MODE",
        PORT_VALUE_SINGLE => "PORT_VALUE_SINGLE",
        PORT_VALUE_COMBINED => "PORT_VALUE_COMBINED",
        PORT_FORMAT_SINGLE => "PORT_FORMAT_SINGLE",
        PORT_FORMAT_COMBINED => "PORT_FORMAT_COMBINED",
        VIRTUAL_PORT_SETUP => "VIRTUAL_PORT_SETUP",
        PORT_OUTPUT => "PORT_OUTPUT",
        PORT_OUTPUT_FEEDBACK => "PORT_OUTPUT_FEEDBACK",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cover_wire_table() {
        assert_eq!(message_name(0x04), "HUB_ATTACHED_IO");
        assert_eq!(message_name(0x47), "PORT_FORMAT_SINGLE");
        assert_eq!(message_name(0x82), "PORT_OUTPUT_FEEDBACK");
        assert_eq!(message_name(0xEE), "UNKNOWN");
    }
}
