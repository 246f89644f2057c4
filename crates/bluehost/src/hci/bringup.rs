//! Controller bring-up state machine
//!
//! Strictly sequential: each step is triggered by the command-complete event
//! for the previous command and issues exactly one new command. For
//! UART-attached controllers an optional vendor firmware image is pushed
//! first (one WRITE_RAM command per chunk, then LAUNCH_RAM). There is no
//! timeout; a lost event stalls bring-up indefinitely, observable only in
//! the logs.

use crate::config::{StackConfig, VendorFirmware};
use crate::hci::constants::*;
use crate::hci::packet::{opcode, HciCommand};
use log::{debug, error, info};

/// Largest WRITE_RAM payload: 255 parameter bytes minus the 4-byte address
const FIRMWARE_CHUNK_SIZE: usize = 251;

/// The step whose command is currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BringupState {
    Idle,
    Reset,
    VendorFirmware { offset: usize },
    VendorLaunch,
    ReadBdAddr,
    WriteClassOfDevice,
    WriteLocalName,
    WriteScanEnable,
    Ready,
}

/// Sequencer that drives the controller from reset to ready
#[derive(Debug)]
pub struct Bringup {
    state: BringupState,
    firmware: Option<VendorFirmware>,
}

impl Bringup {
    pub fn new(firmware: Option<VendorFirmware>) -> Self {
        Self {
            state: BringupState::Idle,
            firmware,
        }
    }

    /// Begin the sequence; returns the first command to send
    pub fn start(&mut self) -> HciCommand {
        self.state = BringupState::Reset;
        HciCommand::Reset
    }

    pub fn is_ready(&self) -> bool {
        self.state == BringupState::Ready
    }

    pub fn is_started(&self) -> bool {
        self.state != BringupState::Idle
    }

    /// Advance on a command-complete event.
    ///
    /// Returns the next command to issue, or `None` when the sequence is
    /// finished or has soft-failed.
    pub fn on_command_complete(
        &mut self,
        completed_opcode: u16,
        status: u8,
        config: &StackConfig,
    ) -> Option<HciCommand> {
        if status != 0 {
            error!(
                "bring-up command 0x{:04X} failed: {}",
                completed_opcode,
                status_to_str(status)
            );
            return None;
        }

        match self.state {
            BringupState::Reset if completed_opcode == opcode(OGF_HOST_CTL, OCF_RESET) => {
                match &self.firmware {
                    Some(_) => {
                        info!("controller reset, starting vendor firmware download");
                        self.state = BringupState::VendorFirmware { offset: 0 };
                        self.firmware_chunk(0)
                    }
                    None => {
                        self.state = BringupState::ReadBdAddr;
                        Some(HciCommand::ReadBdAddr)
                    }
                }
            }

            BringupState::VendorFirmware { offset }
                if completed_opcode == opcode(OGF_VENDOR, OCF_WRITE_RAM) =>
            {
                let firmware = self.firmware.as_ref()?;
                let next = offset + FIRMWARE_CHUNK_SIZE.min(firmware.data.len() - offset);
                if next < firmware.data.len() {
                    self.state = BringupState::VendorFirmware { offset: next };
                    self.firmware_chunk(next)
                } else {
                    let address = firmware.load_address;
                    info!("firmware download complete ({} bytes), launching", firmware.data.len());
                    self.state = BringupState::VendorLaunch;
                    Some(HciCommand::LaunchRam { address })
                }
            }

            BringupState::VendorLaunch
                if completed_opcode == opcode(OGF_VENDOR, OCF_LAUNCH_RAM) =>
            {
                self.state = BringupState::ReadBdAddr;
                Some(HciCommand::ReadBdAddr)
            }

            BringupState::ReadBdAddr
                if completed_opcode == opcode(OGF_INFO_PARAM, OCF_READ_BD_ADDR) =>
            {
                self.state = BringupState::WriteClassOfDevice;
                Some(HciCommand::WriteClassOfDevice {
                    class_of_device: config.class_of_device,
                })
            }

            BringupState::WriteClassOfDevice
                if completed_opcode == opcode(OGF_HOST_CTL, OCF_WRITE_CLASS_OF_DEVICE) =>
            {
                self.state = BringupState::WriteLocalName;
                Some(HciCommand::WriteLocalName {
                    name: config.local_name.clone(),
                })
            }

            BringupState::WriteLocalName
                if completed_opcode == opcode(OGF_HOST_CTL, OCF_WRITE_LOCAL_NAME) =>
            {
                self.state = BringupState::WriteScanEnable;
                Some(HciCommand::WriteScanEnable {
                    enable: config.scan_enable,
                })
            }

            BringupState::WriteScanEnable
                if completed_opcode == opcode(OGF_HOST_CTL, OCF_WRITE_SCAN_ENABLE) =>
            {
                info!("controller bring-up complete");
                self.state = BringupState::Ready;
                None
            }

            _ => {
                debug!(
                    "bring-up: ignoring command complete 0x{:04X} in state {:?}",
                    completed_opcode, self.state
                );
                None
            }
        }
    }

    fn firmware_chunk(&self, offset: usize) -> Option<HciCommand> {
        let firmware = self.firmware.as_ref()?;
        let end = (offset + FIRMWARE_CHUNK_SIZE).min(firmware.data.len());
        Some(HciCommand::WriteRam {
            address: firmware.load_address + offset as u32,
            data: firmware.data[offset..end].to_vec(),
        })
    }
}
