//! Encoding and frequency translation for LNB bus messages.
//!
//! DiSEqC wire format (before supply-line modulation):
//! ```text
//! +---------+---------+---------+------------------+
//! | Framing | Address | Command |       Data       |
//! |  0xE0   |  0x10   |   u8    |  0..=6 bytes     |
//! +---------+---------+---------+------------------+
//! ```
//!
//! Unicable messages are DiSEqC derivatives carried the same way; the
//! encoders here produce the full byte sequence ready for the supply-line
//! modulator.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MessageError;
use crate::types::{Bank, DiseqcMessage, UserBand};

/// Maximum data bytes in one DiSEqC message.
pub const MAX_DATA_BYTES: usize = 6;

/// Nominal time to clock one message byte onto the bus, in milliseconds.
pub const BYTE_TIME_MS: u64 = 12;

/// Longest message the bus can carry (framing + address + command + data).
pub const MAX_MESSAGE_LEN: usize = 3 + MAX_DATA_BYTES;

/// EN50494 tuning-word granularity, kHz.
pub const EN50494_STEP_KHZ: u32 = 4000;
/// EN50494 tuning-word offset.
pub const EN50494_T_OFFSET: u32 = 350;
/// EN50494 tuning words are 10 bits wide.
pub const EN50494_T_MAX: u32 = 0x3FF;
/// EN50494 addresses 8 user bands.
pub const EN50494_UB_MAX: u8 = 7;

/// EN50607 tuning-word granularity, kHz.
pub const EN50607_STEP_KHZ: u32 = 1000;
/// EN50607 tuning-word offset, in 1 MHz steps.
pub const EN50607_T_OFFSET: u32 = 100;
/// EN50607 tuning words are 11 bits wide.
pub const EN50607_T_MAX: u32 = 0x7FF;
/// EN50607 addresses 32 user bands.
pub const EN50607_UB_MAX: u8 = 31;

/// Encode a raw DiSEqC message into its wire bytes.
pub fn encode_diseqc(msg: &DiseqcMessage) -> Result<Bytes, MessageError> {
    if msg.data.len() > MAX_DATA_BYTES {
        return Err(MessageError::TooManyDataBytes(msg.data.len(), MAX_DATA_BYTES));
    }

    let mut buf = BytesMut::with_capacity(msg.wire_len());
    buf.put_u8(msg.framing);
    buf.put_u8(msg.address);
    buf.put_u8(msg.command);
    buf.put_slice(&msg.data);
    Ok(buf.freeze())
}

/// Compute the EN50494 tuning word for a tuner IF and a user-band center.
///
/// `T = round((IF + UBcenter) / 4 MHz) - 350`, all in kHz.
pub fn en50494_tuning_word(if_khz: u32, ub: &UserBand) -> Result<u16, MessageError> {
    let sum = if_khz + ub.center_khz;
    let word = (sum + EN50494_STEP_KHZ / 2) / EN50494_STEP_KHZ;
    if word < EN50494_T_OFFSET {
        return Err(MessageError::FrequencyBelowFloor {
            if_khz,
            floor_khz: EN50494_T_OFFSET * EN50494_STEP_KHZ - ub.center_khz,
        });
    }
    let word = word - EN50494_T_OFFSET;
    if word > EN50494_T_MAX {
        return Err(MessageError::TuningWordOutOfRange {
            word,
            max: EN50494_T_MAX,
        });
    }
    Ok(word as u16)
}

/// Invert [`en50494_tuning_word`]: recover the tuner IF from a tuning word.
pub fn en50494_detranslate(word: u16, ub: &UserBand) -> u32 {
    (u32::from(word) + EN50494_T_OFFSET) * EN50494_STEP_KHZ - ub.center_khz
}

/// Build the 5-byte EN50494 channel-change message.
///
/// Layout: `E0 10 5A` followed by
/// `[UB(3) | pos(1) | pol(1) | band(1) | T(2 msb)]` and `[T(8 lsb)]`.
pub fn encode_en50494(
    ub: &UserBand,
    bank: &Bank,
    if_khz: u32,
) -> Result<Bytes, MessageError> {
    if ub.index > EN50494_UB_MAX {
        return Err(MessageError::UserBandOutOfRange(ub.index, EN50494_UB_MAX));
    }
    let word = en50494_tuning_word(if_khz, ub)?;

    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(0xE0);
    buf.put_u8(0x10);
    buf.put_u8(0x5A);
    buf.put_u8(
        (ub.index << 5)
            | (bank.position_bit() << 4)
            | (bank.polarization_bit() << 3)
            | (bank.band_bit() << 2)
            | ((word >> 8) as u8 & 0x03),
    );
    buf.put_u8((word & 0xFF) as u8);
    Ok(buf.freeze())
}

/// Compute the EN50607 tuning word for a tuner IF.
///
/// `T = round(IF / 1 MHz) - 100`, IF in kHz.
pub fn en50607_tuning_word(if_khz: u32) -> Result<u16, MessageError> {
    let mhz = (if_khz + EN50607_STEP_KHZ / 2) / EN50607_STEP_KHZ;
    if mhz < EN50607_T_OFFSET {
        return Err(MessageError::FrequencyBelowFloor {
            if_khz,
            floor_khz: EN50607_T_OFFSET * EN50607_STEP_KHZ,
        });
    }
    let word = mhz - EN50607_T_OFFSET;
    if word > EN50607_T_MAX {
        return Err(MessageError::TuningWordOutOfRange {
            word,
            max: EN50607_T_MAX,
        });
    }
    Ok(word as u16)
}

/// Invert [`en50607_tuning_word`].
pub fn en50607_detranslate(word: u16) -> u32 {
    (u32::from(word) + EN50607_T_OFFSET) * EN50607_STEP_KHZ
}

/// Build the 4-byte EN50607 channel-change message, or the 5-byte PIN-coded
/// variant when `pin` is given.
///
/// Layout: `7x` `[UB(5) | T(3 msb)]` `[T(8 lsb)]`
/// `[pos(1) | pol(1) | band(1)]` `(pin)`.
pub fn encode_en50607(
    ub: &UserBand,
    bank: &Bank,
    if_khz: u32,
    pin: Option<u8>,
) -> Result<Bytes, MessageError> {
    if ub.index > EN50607_UB_MAX {
        return Err(MessageError::UserBandOutOfRange(ub.index, EN50607_UB_MAX));
    }
    let word = en50607_tuning_word(if_khz)?;

    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(if pin.is_some() { 0x71 } else { 0x70 });
    buf.put_u8((ub.index << 3) | ((word >> 8) as u8 & 0x07));
    buf.put_u8((word & 0xFF) as u8);
    buf.put_u8((bank.position_bit() << 2) | (bank.polarization_bit() << 1) | bank.band_bit());
    if let Some(pin) = pin {
        buf.put_u8(pin);
    }
    Ok(buf.freeze())
}
