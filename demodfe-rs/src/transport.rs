//! Byte-oriented transport to the demodulator and its tuners.
//!
//! The core never touches a concrete bus. Hosts implement [`TransportPort`]
//! over whatever carries the traffic (I2C, and optionally SPI for the bulk
//! firmware channel), and the core treats any non-success as an opaque
//! transport failure.
//!
//! Tuners sit behind the demodulator's internal bus switch. The switch is a
//! single-owner resource, so it is only ever opened through
//! [`PassthroughGuard`], which closes it again on every exit path.

use log::warn;
use thiserror::Error;

/// Transport-level failures. Never retried by the core except the single
/// bulk-to-command fallback in the firmware loader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A write to the device was not acknowledged.
    #[error("Bus write to 0x{addr:02X} failed")]
    WriteFailed { addr: u8 },

    /// A read from the device failed.
    #[error("Bus read from 0x{addr:02X} failed")]
    ReadFailed { addr: u8 },

    /// The device never raised clear-to-send for the last command.
    #[error("Device 0x{addr:02X} did not raise clear-to-send within {waited_ms} ms")]
    CtsTimeout { addr: u8, waited_ms: u64 },

    /// The device flagged the last command as invalid.
    #[error("Device 0x{addr:02X} rejected command 0x{opcode:02X}")]
    CommandRejected { addr: u8, opcode: u8 },

    /// The bulk channel rejected a transfer.
    #[error("Bulk transport rejected {len}-byte write")]
    BulkFailed { len: usize },

    /// No bulk channel is wired up on this transport.
    #[error("Bulk transport not available")]
    BulkUnavailable,

    /// The tuner-bus pass-through switch could not be moved.
    #[error("Pass-through gate switch failed")]
    GateFailed,
}

/// Host-provided access to the register/command bus.
pub trait TransportPort {
    /// Read `buf.len()` bytes from `addr`.
    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Write `bytes` to `addr`.
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), TransportError>;

    /// Open or close the demodulator's tuner-bus switch.
    fn set_passthrough(&mut self, open: bool) -> Result<(), TransportError>;

    /// Address that reaches every demodulator at once for batch firmware
    /// loading.
    fn broadcast_address(&self) -> u8;

    /// Largest single write the bulk channel accepts, or `None` when no
    /// bulk channel exists.
    fn bulk_capacity(&self) -> Option<usize> {
        None
    }

    /// Push one contiguous block over the bulk channel.
    fn bulk_write(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::BulkUnavailable)
    }
}

/// RAII ownership of the open tuner-bus switch.
///
/// Dropping the guard closes the switch again, so no exit path, early
/// return or error propagation can leave the gate open.
pub struct PassthroughGuard<'a, T: TransportPort> {
    port: &'a mut T,
}

impl<'a, T: TransportPort> PassthroughGuard<'a, T> {
    /// Open the gate and take ownership of it.
    pub fn open(port: &'a mut T) -> Result<Self, TransportError> {
        port.set_passthrough(true)?;
        Ok(Self { port })
    }

    /// The transport, usable while the gate is held open.
    pub fn port(&mut self) -> &mut T {
        self.port
    }
}

impl<T: TransportPort> Drop for PassthroughGuard<'_, T> {
    fn drop(&mut self) {
        if self.port.set_passthrough(false).is_err() {
            warn!("Failed to close tuner pass-through gate");
        }
    }
}
