//! Demodulator property access with diff-based writes.
//!
//! Firmware exposes its tunables as 16-bit properties. Writes go through a
//! cache seeded from the device's post-load defaults, so re-asserting an
//! unchanged value costs no bus traffic and `seek_end` can restore exactly
//! what a blind scan overrode.

use std::collections::BTreeMap;

use crate::command::{self, opcode};
use crate::time::Clock;
use crate::transport::{TransportError, TransportPort};

/// Property codes understood by the firmware.
pub mod prop {
    /// Active standard selector.
    pub const STANDARD: u16 = 0x0101;
    /// AFC capture range, kHz.
    pub const AFC_RANGE: u16 = 0x0102;
    /// Spectrum inversion: 0 normal, 1 inverted, 2 auto.
    pub const SPECTRUM_INV: u16 = 0x0103;
    /// Channel bandwidth, kHz.
    pub const BANDWIDTH: u16 = 0x0104;
    /// Constellation hint; 0 = auto.
    pub const CONSTELLATION: u16 = 0x0105;
    /// Symbol rate, low word (Baud).
    pub const SYMBOL_RATE_LO: u16 = 0x0106;
    /// Symbol rate, high word.
    pub const SYMBOL_RATE_HI: u16 = 0x0107;
    /// PLP / ISI selector; 0xFFFF = auto.
    pub const STREAM_SELECT: u16 = 0x0108;
    /// Fast-fade (FEF) protection for second-generation terrestrial.
    pub const FEF_PROTECT: u16 = 0x0109;
    /// Blind-scan symbol-rate floor, kBd.
    pub const SCAN_SR_MIN: u16 = 0x010A;
    /// Blind-scan symbol-rate ceiling, kBd.
    pub const SCAN_SR_MAX: u16 = 0x010B;
    /// Standard auto-detection enable.
    pub const AUTO_DETECT: u16 = 0x010C;
}

/// Properties captured into the defaults snapshot after a firmware load.
pub const SNAPSHOT_PROPS: [u16; 9] = [
    prop::STANDARD,
    prop::AFC_RANGE,
    prop::SPECTRUM_INV,
    prop::BANDWIDTH,
    prop::CONSTELLATION,
    prop::STREAM_SELECT,
    prop::SCAN_SR_MIN,
    prop::SCAN_SR_MAX,
    prop::AUTO_DETECT,
];

/// Cached device property state.
#[derive(Debug, Default, Clone)]
pub struct PropertyCache {
    values: BTreeMap<u16, u16>,
    defaults: BTreeMap<u16, u16>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything; called before re-capturing post-load defaults.
    pub fn clear(&mut self) {
        self.values.clear();
        self.defaults.clear();
    }

    /// Record a freshly read post-load default.
    pub fn record_default(&mut self, code: u16, value: u16) {
        self.defaults.insert(code, value);
        self.values.insert(code, value);
    }

    /// Last value written (or captured) for `code`.
    pub fn get(&self, code: u16) -> Option<u16> {
        self.values.get(&code).copied()
    }

    /// Post-load default for `code`, if captured.
    pub fn default_of(&self, code: u16) -> Option<u16> {
        self.defaults.get(&code).copied()
    }

    fn note_written(&mut self, code: u16, value: u16) {
        self.values.insert(code, value);
    }
}

/// Write `value` to `code` unless the cache already holds it.
pub fn write_property<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    cache: &mut PropertyCache,
    addr: u8,
    code: u16,
    value: u16,
) -> Result<(), TransportError> {
    if cache.get(code) == Some(value) {
        return Ok(());
    }
    let cmd = [
        opcode::SET_PROPERTY,
        (code & 0xFF) as u8,
        (code >> 8) as u8,
        (value & 0xFF) as u8,
        (value >> 8) as u8,
    ];
    command::exec_simple(port, clock, addr, &cmd)?;
    cache.note_written(code, value);
    Ok(())
}

/// Read `code` from the device, bypassing the cache.
pub fn read_property<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    addr: u8,
    code: u16,
) -> Result<u16, TransportError> {
    let cmd = [opcode::GET_PROPERTY, (code & 0xFF) as u8, (code >> 8) as u8];
    let mut reply = [0u8; 3];
    command::exec(port, clock, addr, &cmd, &mut reply)?;
    Ok(u16::from(reply[1]) | (u16::from(reply[2]) << 8))
}

/// Restore the captured defaults for every property in `codes`.
pub fn restore_defaults<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    cache: &mut PropertyCache,
    addr: u8,
    codes: &[u16],
) -> Result<(), TransportError> {
    for &code in codes {
        if let Some(default) = cache.default_of(code) {
            write_property(port, clock, cache, addr, code, default)?;
        }
    }
    Ok(())
}
