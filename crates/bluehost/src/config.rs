//! Stack configuration
//!
//! One explicit configuration struct passed into the stack constructor; no
//! process-wide mutable state anywhere in the library.

use std::path::PathBuf;

/// Policy for RFCOMM frames whose checksum does not verify.
///
/// The lenient default matches the behavior real peers were qualified
/// against: a mismatch is logged but the frame is still processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FcsPolicy {
    /// Log the mismatch and process the frame anyway
    #[default]
    LogOnly,
    /// Drop frames with a bad checksum
    Reject,
}

/// Firmware image pushed to a UART-attached controller during bring-up
#[derive(Debug, Clone)]
pub struct VendorFirmware {
    /// Raw firmware bytes, written in chunks
    pub data: Vec<u8>,
    /// Controller RAM address the image is written to and launched from
    pub load_address: u32,
}

/// Configuration for a [`crate::stack::BtStack`]
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Local device name advertised via WRITE_LOCAL_NAME (up to 248 bytes)
    pub local_name: String,
    /// Class of device, little-endian wire order
    pub class_of_device: [u8; 3],
    /// Fixed PIN offered in response to PIN_CODE_REQUEST
    pub pin: String,
    /// Scan enable mode written during bring-up (page + inquiry scan by default)
    pub scan_enable: u8,
    /// Optional vendor firmware image for UART-attached controllers
    pub vendor_firmware: Option<VendorFirmware>,
    /// RFCOMM checksum enforcement policy
    pub fcs_policy: FcsPolicy,
    /// Path of the paired-device record file; `None` disables persistence
    pub store_path: Option<PathBuf>,
    /// Initial ACL packet allowance before the first
    /// NUMBER_OF_COMPLETED_PACKETS event arrives
    pub initial_data_credits: u16,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            local_name: "bluehost".to_string(),
            // Major class: computer
            class_of_device: [0x04, 0x01, 0x00],
            pin: "0000".to_string(),
            scan_enable: crate::hci::constants::SCAN_ENABLE_INQUIRY_AND_PAGE,
            vendor_firmware: None,
            fcs_policy: FcsPolicy::default(),
            store_path: None,
            initial_data_credits: 8,
        }
    }
}
