//! Shared type definitions for LNB / outdoor-unit control.

use serde::{Deserialize, Serialize};

/// Installed single-cable distribution mode.
///
/// `Unicable1` is EN50494 (8 user bands, 4 MHz tuning granularity),
/// `Unicable2` is EN50607 / JESS (32 user bands, 1 MHz granularity).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnicableMode {
    /// Plain DiSEqC / direct cable, no frequency translation.
    #[default]
    Disabled,
    /// EN50494 ("Unicable I").
    Unicable1,
    /// EN50607 ("Unicable II" / JESS).
    Unicable2,
}

/// Signal polarization selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarization {
    Vertical,
    Horizontal,
}

/// Ku-band half selected by the 22 kHz tone in a classic installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    Low,
    High,
}

/// Satellite position selector (DiSEqC position A/B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SatPosition {
    A,
    B,
}

/// The three selector bits routed into a Unicable bank / switch nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub position: SatPosition,
    pub polarization: Polarization,
    pub band: Band,
}

impl Bank {
    /// EN50494 3-bit bank value: position, polarization, band, MSB first.
    pub fn en50494_bits(&self) -> u8 {
        (self.position_bit() << 2) | (self.polarization_bit() << 1) | self.band_bit()
    }

    /// Position bit (1 = position B).
    pub fn position_bit(&self) -> u8 {
        match self.position {
            SatPosition::A => 0,
            SatPosition::B => 1,
        }
    }

    /// Polarization bit (1 = horizontal).
    pub fn polarization_bit(&self) -> u8 {
        match self.polarization {
            Polarization::Vertical => 0,
            Polarization::Horizontal => 1,
        }
    }

    /// Band bit (1 = high band).
    pub fn band_bit(&self) -> u8 {
        match self.band {
            Band::Low => 0,
            Band::High => 1,
        }
    }
}

/// One user band of the single-cable equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBand {
    /// Slot index on the outdoor equipment (0-based).
    pub index: u8,
    /// Center frequency of the slot on the shared cable, in kHz.
    pub center_khz: u32,
}

/// Tone-burst (mini-DiSEqC) selector sent after a message, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToneBurst {
    /// Unmodulated burst, selects satellite A.
    SatA,
    /// Modulated burst, selects satellite B.
    SatB,
}

/// A raw DiSEqC message before framing onto the supply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiseqcMessage {
    /// Framing byte (first transmission, no reply: 0xE0).
    pub framing: u8,
    /// Addressed device family (any switcher: 0x10).
    pub address: u8,
    /// Command byte.
    pub command: u8,
    /// Up to [`MAX_DATA_BYTES`](crate::codec::MAX_DATA_BYTES) payload bytes.
    pub data: Vec<u8>,
}

impl DiseqcMessage {
    pub fn new(framing: u8, address: u8, command: u8, data: &[u8]) -> Self {
        Self {
            framing,
            address,
            command,
            data: data.to_vec(),
        }
    }

    /// Total length on the wire, including framing, address and command.
    pub fn wire_len(&self) -> usize {
        3 + self.data.len()
    }
}
