//! Wire-compatible GATT identifiers.
//!
//! These UUIDs must match the device firmware exactly; they identify the
//! line-console service, the OAD firmware-update service, and the companion
//! services the operator surface shows for information only.

use uuid::{Uuid, uuid};

/// Line-oriented console (comms) service.
pub const CONSOLE_SERVICE: Uuid = uuid!("25FB9E91-1616-448D-B5A3-F70A64BDA73A");

/// Console input characteristic (device-to-host, notify).
pub const INPUT_CHARACTERISTIC: Uuid = uuid!("C3FBC9E2-676B-9FB5-3749-2F471DCF07B2");

/// Console output characteristic (host-to-device, write-with-response).
pub const OUTPUT_CHARACTERISTIC: Uuid = uuid!("D6AF9B3C-FE92-1CB2-F74B-7AFB7DE57E6D");

/// OAD firmware-update service. A device exposing only this service is in
/// recovery (bootloader) mode.
pub const OAD_SERVICE: Uuid = uuid!("F000FFC0-0451-4000-B000-000000000000");

/// OAD image-identity characteristic.
pub const OAD_IMG_IDENTITY: Uuid = uuid!("F000FFC1-0451-4000-B000-000000000000");

/// OAD image-block characteristic.
pub const OAD_IMG_BLOCK: Uuid = uuid!("F000FFC2-0451-4000-B000-000000000000");

/// Standard device-information service (display only).
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180A-0000-1000-8000-00805F9B34FB");

/// Firmware-revision characteristic (display only).
pub const FIRMWARE_REVISION: Uuid = uuid!("00002A26-0000-1000-8000-00805F9B34FB");

/// System-id characteristic (display only).
pub const SYSTEM_ID: Uuid = uuid!("00002A23-0000-1000-8000-00805F9B34FB");

/// Battery service used by the BlueBattery device family (display only).
pub const BATTERY_SERVICE: Uuid = uuid!("AA021474-780D-439F-AF20-6B46446A610E");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_and_oad_services_differ() {
        assert_ne!(CONSOLE_SERVICE, OAD_SERVICE);
        assert_ne!(INPUT_CHARACTERISTIC, OUTPUT_CHARACTERISTIC);
    }

    #[test]
    fn test_device_info_is_sig_base_uuid() {
        // 16-bit SIG ids expand onto the Bluetooth base UUID
        let s = DEVICE_INFO_SERVICE.to_string();
        assert!(s.starts_with("0000180a"));
        assert!(s.ends_with("00805f9b34fb"));
    }
}
