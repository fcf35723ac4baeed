//! Error types for LNB control message construction.

use thiserror::Error;

/// Errors raised while building or translating an LNB bus message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// DiSEqC message carries more data bytes than the bus allows.
    #[error("Too many DiSEqC data bytes: {0} (max: {1})")]
    TooManyDataBytes(usize, usize),

    /// Requested frequency translates outside the tuning-word range.
    #[error("Tuning word out of range: {word} (max: {max})")]
    TuningWordOutOfRange { word: u32, max: u32 },

    /// User-band index is not addressable by the selected Unicable variant.
    #[error("User band {0} not addressable (max: {1})")]
    UserBandOutOfRange(u8, u8),

    /// Requested frequency lies below the user-band center, so no
    /// non-negative tuning word exists.
    #[error("Frequency {if_khz} kHz below translatable floor {floor_khz} kHz")]
    FrequencyBelowFloor { if_khz: u32, floor_khz: u32 },
}
