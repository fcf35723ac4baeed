//! LNB control message definitions for the demodfe front-end core.
//!
//! This crate defines the outdoor-unit control messages carried on the
//! satellite tuner's supply line: classic DiSEqC frames and the Unicable
//! single-cable derivatives (EN50494 / EN50607), together with the
//! frequency-translation math that maps a wanted tuner IF into a shared
//! user-band slot.
//!
//! # DiSEqC wire format
//!
//! ```text
//! +---------+---------+---------+------------------+
//! | Framing | Address | Command |       Data       |
//! |  0xE0   |  0x10   |   u8    |  0..=6 bytes     |
//! +---------+---------+---------+------------------+
//! ```
//!
//! # Example
//!
//! ```rust
//! use demodfe_protocol::{encode_en50494, en50494_detranslate, en50494_tuning_word};
//! use demodfe_protocol::{Band, Bank, Polarization, SatPosition, UserBand};
//!
//! let ub = UserBand { index: 1, center_khz: 1_420_000 };
//! let bank = Bank {
//!     position: SatPosition::A,
//!     polarization: Polarization::Vertical,
//!     band: Band::High,
//! };
//!
//! // Translate an 1.6 GHz tuner IF into the user band...
//! let msg = encode_en50494(&ub, &bank, 1_600_000).unwrap();
//! assert_eq!(msg.len(), 5);
//!
//! // ...and recover it (within the 4 MHz slot granularity).
//! let word = en50494_tuning_word(1_600_000, &ub).unwrap();
//! assert!(en50494_detranslate(word, &ub).abs_diff(1_600_000) <= 4_000);
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{
    en50494_detranslate, en50494_tuning_word, en50607_detranslate, en50607_tuning_word,
    encode_diseqc, encode_en50494, encode_en50607, BYTE_TIME_MS, EN50494_STEP_KHZ,
    EN50494_UB_MAX, EN50607_STEP_KHZ, EN50607_UB_MAX, MAX_DATA_BYTES, MAX_MESSAGE_LEN,
};
pub use error::MessageError;
pub use types::{
    Band, Bank, DiseqcMessage, Polarization, SatPosition, ToneBurst, UnicableMode, UserBand,
};
