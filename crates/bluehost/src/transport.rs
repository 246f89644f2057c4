//! Transport boundary between the stack and the controller
//!
//! The stack sends fully framed, type-prefixed packets through the
//! [`Transport`] trait and receives packets through
//! [`crate::hci::HciRx::receive`]. For UART-attached controllers this module
//! also provides the H4 byte-stream delimiter and a raw Unix serial port
//! implementation.

use crate::hci::constants::{HCI_ACL_PKT, HCI_COMMAND_PKT, HCI_EVENT_PKT, HCI_SCO_PKT};
use log::{trace, warn};
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Errors that can occur on the transport boundary
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open device: {0}")]
    Open(std::io::Error),

    #[error("Failed to configure device: {0}")]
    Configure(std::io::Error),

    #[error("Failed to write to device: {0}")]
    Write(std::io::Error),

    #[error("Failed to read from device: {0}")]
    Read(std::io::Error),

    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    #[error("Invalid device path")]
    InvalidPath,
}

/// Outbound half of the transport boundary.
///
/// `packet[0]` is the H4 type prefix (command, ACL data); the rest is the
/// already-framed HCI packet.
pub trait Transport {
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError>;
}

/// Splits a raw H4 byte stream into type-prefixed packets.
///
/// UART controllers deliver an undelimited byte stream; this accumulates
/// bytes until the type-specific header announces the full packet length and
/// then yields `(packet_type, packet_bytes)` pairs. An unknown type byte is
/// dropped one byte at a time to resynchronize.
#[derive(Debug, Default)]
pub struct H4Deframer {
    buf: Vec<u8>,
}

impl H4Deframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every packet completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
        self.buf.extend_from_slice(bytes);
        let mut packets = Vec::new();

        loop {
            let Some(&packet_type) = self.buf.first() else {
                break;
            };

            let total = match Self::packet_len(packet_type, &self.buf[1..]) {
                PacketLen::Known(payload_len) => 1 + payload_len,
                PacketLen::NeedMore => break,
                PacketLen::BadType => {
                    warn!("H4 deframer: unknown packet type 0x{packet_type:02X}, resyncing");
                    self.buf.remove(0);
                    continue;
                }
            };

            if self.buf.len() < total {
                break;
            }

            let rest = self.buf.split_off(total);
            let packet = std::mem::replace(&mut self.buf, rest);
            trace!("H4 deframer: packet type 0x{packet_type:02X}, {} bytes", total - 1);
            packets.push((packet_type, packet[1..].to_vec()));
        }

        packets
    }

    fn packet_len(packet_type: u8, body: &[u8]) -> PacketLen {
        match packet_type {
            HCI_EVENT_PKT => {
                if body.len() < 2 {
                    PacketLen::NeedMore
                } else {
                    PacketLen::Known(2 + body[1] as usize)
                }
            }
            HCI_ACL_PKT => {
                if body.len() < 4 {
                    PacketLen::NeedMore
                } else {
                    PacketLen::Known(4 + u16::from_le_bytes([body[2], body[3]]) as usize)
                }
            }
            HCI_COMMAND_PKT | HCI_SCO_PKT => {
                if body.len() < 3 {
                    PacketLen::NeedMore
                } else {
                    PacketLen::Known(3 + body[2] as usize)
                }
            }
            _ => PacketLen::BadType,
        }
    }
}

enum PacketLen {
    Known(usize),
    NeedMore,
    BadType,
}

/// Raw Unix serial port carrying the H4 protocol
#[derive(Debug)]
pub struct UartTransport {
    fd: RawFd,
    deframer: H4Deframer,
}

impl UartTransport {
    /// Open and configure a serial device (raw mode, 8N1, no flow control)
    pub fn open(path: &str, baud: u32) -> Result<Self, TransportError> {
        let speed = baud_constant(baud).ok_or(TransportError::UnsupportedBaud(baud))?;
        let cpath = std::ffi::CString::new(path).map_err(|_| TransportError::InvalidPath)?;

        let fd = unsafe {
            libc::open(
                cpath.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK,
            )
        };
        if fd < 0 {
            return Err(TransportError::Open(std::io::Error::last_os_error()));
        }

        let mut tio: libc::termios = unsafe { std::mem::zeroed() };
        let result = unsafe { libc::tcgetattr(fd, &mut tio) };
        if result < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Configure(err));
        }

        unsafe {
            libc::cfmakeraw(&mut tio);
            libc::cfsetispeed(&mut tio, speed);
            libc::cfsetospeed(&mut tio, speed);
        }
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;

        let result = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) };
        if result < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Configure(err));
        }

        unsafe { libc::tcflush(fd, libc::TCIOFLUSH) };

        Ok(Self {
            fd,
            deframer: H4Deframer::new(),
        })
    }

    /// Drain everything currently readable into the receive handle.
    ///
    /// Non-blocking: returns once the device would block.
    pub fn poll_read(&mut self, rx: &mut crate::hci::HciRx) -> Result<(), TransportError> {
        let mut buffer = [0u8; 512];

        loop {
            let n = unsafe {
                libc::read(
                    self.fd,
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };

            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Ok(());
                }
                return Err(TransportError::Read(err));
            }
            if n == 0 {
                return Ok(());
            }

            for (packet_type, packet) in self.deframer.push(&buffer[..n as usize]) {
                rx.receive(packet_type, &packet);
            }
        }
    }
}

impl Transport for UartTransport {
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let mut written = 0;
        while written < packet.len() {
            let n = unsafe {
                libc::write(
                    self.fd,
                    packet[written..].as_ptr() as *const libc::c_void,
                    packet.len() - written,
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    continue;
                }
                return Err(TransportError::Write(err));
            }
            written += n as usize;
        }
        Ok(())
    }
}

impl Drop for UartTransport {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    match baud {
        9600 => Some(libc::B9600),
        19200 => Some(libc::B19200),
        38400 => Some(libc::B38400),
        57600 => Some(libc::B57600),
        115200 => Some(libc::B115200),
        230400 => Some(libc::B230400),
        921600 => Some(libc::B921600),
        _ => None,
    }
}

/// Test transport capturing every sent packet
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockTransport {
    pub sent: Vec<Vec<u8>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl Transport for MockTransport {
    fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.sent.push(packet.to_vec());
        Ok(())
    }
}
