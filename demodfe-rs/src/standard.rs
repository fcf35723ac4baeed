//! Broadcast standards handled by the front end and their lock timing.

use serde::{Deserialize, Serialize};

/// Number of constellation orders a cable auto-detect search walks through.
const QAM_ORDERS: u64 = 5;

/// AFC window swept during cable acquisition, kHz.
const CABLE_AFC_RANGE_KHZ: u64 = 100;

/// Sweep cost constant for the cable lock-time formula, ms·kBd per kHz.
const CABLE_SWEEP_UNIT: u64 = 70_000;

/// Floor of the cable lock-time formula, ms.
const CABLE_BASE_LOCK_MS: u64 = 500;

/// One broadcast standard the demodulator can be asked to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Standard {
    /// First-generation terrestrial digital.
    DvbT,
    /// Second-generation terrestrial digital.
    DvbT2,
    /// Japanese terrestrial digital.
    IsdbT,
    /// First-generation cable digital.
    DvbC,
    /// Second-generation cable digital.
    DvbC2,
    /// Legacy North-American cable QAM.
    LegacyQam,
    /// Analog terrestrial reception through the terrestrial tuner.
    Analog,
    /// First-generation satellite digital.
    DvbS,
    /// Second-generation satellite digital.
    DvbS2,
    /// Legacy DSS satellite.
    Dss,
    /// Everything powered down except policy-forced clocks.
    Sleep,
}

/// Media domain a standard is received through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Media {
    Terrestrial,
    Satellite,
}

impl Standard {
    /// Media domain of this standard; `None` for [`Standard::Sleep`].
    pub fn media(self) -> Option<Media> {
        match self {
            Standard::DvbT
            | Standard::DvbT2
            | Standard::IsdbT
            | Standard::DvbC
            | Standard::DvbC2
            | Standard::LegacyQam
            | Standard::Analog => Some(Media::Terrestrial),
            Standard::DvbS | Standard::DvbS2 | Standard::Dss => Some(Media::Satellite),
            Standard::Sleep => None,
        }
    }

    pub fn is_terrestrial(self) -> bool {
        self.media() == Some(Media::Terrestrial)
    }

    pub fn is_satellite(self) -> bool {
        self.media() == Some(Media::Satellite)
    }

    /// True for cable standards timed by the closed-form symbol-rate formula.
    pub fn is_cable(self) -> bool {
        matches!(self, Standard::DvbC | Standard::LegacyQam)
    }

    /// Wire code used by status/property commands.
    pub fn code(self) -> u8 {
        match self {
            Standard::DvbT => 0x01,
            Standard::DvbT2 => 0x02,
            Standard::IsdbT => 0x03,
            Standard::DvbC => 0x04,
            Standard::DvbC2 => 0x05,
            Standard::LegacyQam => 0x06,
            Standard::Analog => 0x07,
            Standard::DvbS => 0x08,
            Standard::DvbS2 => 0x09,
            Standard::Dss => 0x0A,
            Standard::Sleep => 0x00,
        }
    }

    /// Minimum time the demodulator needs before a lock poll is meaningful.
    pub fn min_lock_ms(self) -> u64 {
        match self {
            Standard::DvbT | Standard::DvbT2 => 100,
            Standard::IsdbT => 100,
            Standard::DvbC | Standard::LegacyQam => 20,
            Standard::DvbC2 => 100,
            Standard::DvbS | Standard::DvbS2 | Standard::Dss => 50,
            Standard::Analog => 10,
            Standard::Sleep => 0,
        }
    }

    /// Worst-case acquisition time before a search is declared timed out.
    ///
    /// Cable standards use the closed-form formula seeded by the symbol
    /// rate; everything else has a fixed ceiling.
    pub fn max_lock_ms(self, symbol_rate_baud: u32, auto_detect: bool) -> u64 {
        match self {
            Standard::DvbC | Standard::LegacyQam => {
                cable_max_lock_ms(symbol_rate_baud, auto_detect)
            }
            Standard::DvbT | Standard::DvbT2 => 2_000,
            Standard::IsdbT => 2_500,
            Standard::DvbC2 => 5_000,
            Standard::DvbS | Standard::DvbS2 | Standard::Dss => 3_000,
            Standard::Analog => 1_000,
            Standard::Sleep => 0,
        }
    }
}

/// Closed-form cable acquisition ceiling.
///
/// Sweeping the AFC window costs time inversely proportional to the symbol
/// rate, and auto-detect repeats the sweep once per constellation order.
pub fn cable_max_lock_ms(symbol_rate_baud: u32, auto_detect: bool) -> u64 {
    let sr_kbd = u64::from(symbol_rate_baud / 1_000).max(1);
    let orders = if auto_detect { QAM_ORDERS } else { 1 };
    CABLE_BASE_LOCK_MS + orders * (CABLE_AFC_RANGE_KHZ * CABLE_SWEEP_UNIT) / sr_kbd
}
