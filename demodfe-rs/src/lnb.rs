//! Outdoor-unit control: DiSEqC sends and Unicable user-band routing.
//!
//! Satellite tunes go through here before the tuner is touched. In a
//! classic installation the layer drives the committed switch and the
//! 13/18 V + 22 kHz selection; in a Unicable installation it translates
//! the wanted IF into the owned user-band slot and the tuner is parked on
//! the slot's center instead of the wanted frequency. Either way the layer
//! reports the frequency the tuner must actually tune, so downstream AFC
//! math stays consistent.

use log::debug;
use thiserror::Error;

use demodfe_protocol::{
    codec, encode_diseqc, encode_en50494, encode_en50607, Band, Bank, DiseqcMessage,
    MessageError, Polarization, SatPosition, ToneBurst, UnicableMode, UserBand,
};

use crate::command::opcode;
use crate::frontend::FrontEnd;
use crate::time::Clock;
use crate::transport::{TransportError, TransportPort};

/// Supply settle time after raising the command voltage, ms.
const SUPPLY_SETTLE_MS: u64 = 15;

/// Extra hold after the proportional message time, ms.
const POST_SEND_HOLD_MS: u64 = 6;

/// Low-pass filter margin above the carried frequency, kHz.
const LPF_MARGIN_KHZ: u32 = 40_000;

/// Downlink frequencies are distinguished from first-IF inputs by this
/// floor, kHz.
const DOWNLINK_FLOOR_KHZ: u32 = 5_000_000;

/// LNB supply levels as sent to the supply controller.
pub mod supply {
    pub const OFF: u8 = 0x00;
    /// Steady 13 V (vertical / right-hand).
    pub const STEADY_13V: u8 = 0x01;
    /// Steady 18 V (horizontal / left-hand).
    pub const STEADY_18V: u8 = 0x02;
    /// Boosted level used while clocking a message out.
    pub const COMMAND: u8 = 0x03;
}

/// LNB layer failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LnbError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Message(#[from] MessageError),

    /// The bus never reported ready within the bounded wait.
    #[error("DiSEqC bus not ready after {waited_ms} ms")]
    BusNotReady { waited_ms: u64 },

    /// A satellite operation was requested on a front end without a
    /// satellite tuner.
    #[error("No satellite tuner fitted")]
    NoSatelliteTuner,
}

/// Result of one Unicable translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub word: u16,
    /// Frequency the tuner is parked on (the user-band center), kHz.
    pub tuner_khz: u32,
    pub bank: Bank,
    pub mode: UnicableMode,
}

/// Mutable LNB link state on the front end.
#[derive(Debug, Clone)]
pub struct LnbLink {
    pub position: SatPosition,
    pub polarization: Polarization,
    /// Band of the last routed frequency.
    pub band: Band,
    /// Last computed translation; only valid for the media/bank it was
    /// computed for.
    pub last_translation: Option<Translation>,
}

impl Default for LnbLink {
    fn default() -> Self {
        Self {
            position: SatPosition::A,
            polarization: Polarization::Vertical,
            band: Band::Low,
            last_translation: None,
        }
    }
}

impl<T: TransportPort, C: Clock> FrontEnd<T, C> {
    /// Select the satellite position and polarization used on the next
    /// satellite tune.
    pub fn set_satellite_route(&mut self, position: SatPosition, polarization: Polarization) {
        self.lnb.position = position;
        self.lnb.polarization = polarization;
        self.lnb.last_translation = None;
    }

    /// Send one framed DiSEqC message, passing the continuous-tone and
    /// tone-burst flags through unchanged.
    pub fn send_diseqc(
        &mut self,
        msg: &DiseqcMessage,
        continuous_tone: bool,
        burst: Option<ToneBurst>,
    ) -> Result<(), LnbError> {
        let bytes = encode_diseqc(msg)?;
        self.send_raw_diseqc(&bytes, continuous_tone, burst)
    }

    /// Route a satellite frequency through the installed outdoor unit and
    /// return the frequency the satellite tuner must actually tune, kHz.
    ///
    /// `freq_khz` is either a Ku-band downlink frequency (band and IF are
    /// derived through the configured LO pair) or a first IF directly, in
    /// which case the previously selected band applies.
    pub fn route_satellite(&mut self, freq_khz: u32) -> Result<u32, LnbError> {
        if self.sat.is_none() {
            return Err(LnbError::NoSatelliteTuner);
        }
        let lnb_cfg = self.config.lnb;
        let (if_khz, band) = resolve_if(freq_khz, lnb_cfg.band_switch_khz, lnb_cfg.lo_low_khz, lnb_cfg.lo_high_khz, self.lnb.band);
        self.lnb.band = band;
        let bank = Bank {
            position: self.lnb.position,
            polarization: self.lnb.polarization,
            band,
        };

        match lnb_cfg.mode {
            UnicableMode::Disabled => {
                // Committed switch, then steady supply with the 22 kHz tone
                // selecting the band.
                let msg = DiseqcMessage::new(0xE0, 0x10, 0x38, &[0xF0 | bank.en50494_bits()]);
                self.send_diseqc(&msg, band == Band::High, None)?;
                self.lnb.last_translation = None;
                self.tuner_lpf(if_khz + LPF_MARGIN_KHZ)?;
                Ok(if_khz)
            }
            UnicableMode::Unicable1 => {
                let ub = UserBand {
                    index: lnb_cfg.user_band,
                    center_khz: lnb_cfg.user_band_center_khz,
                };
                let bytes = encode_en50494(&ub, &bank, if_khz)?;
                let word = codec::en50494_tuning_word(if_khz, &ub)?;
                self.send_raw_diseqc(&bytes, false, None)?;
                self.finish_translation(word, ub.center_khz, bank, UnicableMode::Unicable1)
            }
            UnicableMode::Unicable2 => {
                let ub = UserBand {
                    index: lnb_cfg.user_band,
                    center_khz: lnb_cfg.user_band_center_khz,
                };
                let bytes = encode_en50607(&ub, &bank, if_khz, lnb_cfg.pin)?;
                let word = codec::en50607_tuning_word(if_khz)?;
                self.send_raw_diseqc(&bytes, false, None)?;
                self.finish_translation(word, ub.center_khz, bank, UnicableMode::Unicable2)
            }
        }
    }

    fn finish_translation(
        &mut self,
        word: u16,
        tuner_khz: u32,
        bank: Bank,
        mode: UnicableMode,
    ) -> Result<u32, LnbError> {
        self.lnb.last_translation = Some(Translation {
            word,
            tuner_khz,
            bank,
            mode,
        });
        // The tuner sits on the user band, so the filter follows the slot,
        // not the wanted frequency.
        self.tuner_lpf(tuner_khz + LPF_MARGIN_KHZ)?;
        debug!("Unicable word {word} routes tuner to {tuner_khz} kHz");
        Ok(tuner_khz)
    }

    fn send_raw_diseqc(
        &mut self,
        bytes: &[u8],
        continuous_tone: bool,
        burst: Option<ToneBurst>,
    ) -> Result<(), LnbError> {
        self.wait_bus_ready()?;

        self.demod_command(&[opcode::LNB_SUPPLY, supply::COMMAND, 0])?;
        self.clock.sleep(std::time::Duration::from_millis(SUPPLY_SETTLE_MS));

        let burst_code = match burst {
            None => 0u8,
            Some(ToneBurst::SatA) => 1,
            Some(ToneBurst::SatB) => 2,
        };
        let mut cmd = Vec::with_capacity(3 + bytes.len());
        cmd.push(opcode::DISEQC_SEND);
        cmd.push(burst_code);
        cmd.push(bytes.len() as u8);
        cmd.extend_from_slice(bytes);
        self.demod_command(&cmd)?;

        // Hold the command level until the message has clocked out.
        let hold = bytes.len() as u64 * codec::BYTE_TIME_MS + POST_SEND_HOLD_MS;
        self.clock.sleep(std::time::Duration::from_millis(hold));

        let steady = match (self.config.lnb.mode, self.lnb.polarization) {
            (UnicableMode::Disabled, Polarization::Horizontal) => supply::STEADY_18V,
            (UnicableMode::Disabled, Polarization::Vertical) => supply::STEADY_13V,
            // Single-cable supplies idle at 13 V regardless of polarization.
            _ => supply::STEADY_13V,
        };
        self.demod_command(&[opcode::LNB_SUPPLY, steady, u8::from(continuous_tone)])?;
        Ok(())
    }

    /// Poll the bus-ready flag, bounded by one byte-time per maximum
    /// message byte.
    fn wait_bus_ready(&mut self) -> Result<(), LnbError> {
        let bound_ms = codec::BYTE_TIME_MS * codec::MAX_MESSAGE_LEN as u64;
        let started = self.clock.now();
        loop {
            let mut reply = [0u8; 2];
            self.demod_read(&[opcode::DISEQC_STATUS], &mut reply)?;
            if reply[1] != 0 {
                return Ok(());
            }
            if self.clock.elapsed_ms(started) >= bound_ms {
                return Err(LnbError::BusNotReady {
                    waited_ms: bound_ms,
                });
            }
            self.clock
                .sleep(std::time::Duration::from_millis(codec::BYTE_TIME_MS));
        }
    }
}

/// Split an incoming satellite frequency into (first IF, band).
fn resolve_if(
    freq_khz: u32,
    band_switch_khz: u32,
    lo_low_khz: u32,
    lo_high_khz: u32,
    current_band: Band,
) -> (u32, Band) {
    if freq_khz >= DOWNLINK_FLOOR_KHZ {
        let band = if freq_khz >= band_switch_khz {
            Band::High
        } else {
            Band::Low
        };
        let lo = match band {
            Band::Low => lo_low_khz,
            Band::High => lo_high_khz,
        };
        (freq_khz.abs_diff(lo), band)
    } else {
        // Already a first IF; keep the previously selected band.
        (freq_khz, current_band)
    }
}

/// Recover the Ku-band downlink frequency a translation was computed for.
///
/// Inverse of the translate path for round-trip checks: the result is
/// within one tuning-word granule of the original request.
pub fn detranslate(
    translation: &Translation,
    ub_center_khz: u32,
    lo_low_khz: u32,
    lo_high_khz: u32,
) -> u32 {
    let if_khz = match translation.mode {
        UnicableMode::Unicable2 => codec::en50607_detranslate(translation.word),
        _ => codec::en50494_detranslate(
            translation.word,
            &UserBand {
                index: 0,
                center_khz: ub_center_khz,
            },
        ),
    };
    let lo = match translation.bank.band {
        Band::Low => lo_low_khz,
        Band::High => lo_high_khz,
    };
    lo + if_khz
}
