//! Standard-switch orchestrator.
//!
//! Computes, from the outgoing and incoming standards, the minimal set of
//! power/clock/init transitions and executes them in a fixed order:
//! demodulator sleep decision, satellite tuner, terrestrial tuner,
//! demodulator bring-up, then the always-run tail (spectrum inversion,
//! standard select, soft restart). A transport failure anywhere aborts the
//! switch with the failing phase; `previous_standard` is only committed on
//! full success, so a failed switch can simply be retried.

use std::fmt;

use log::{debug, info};
use thiserror::Error;

use crate::command::{opcode, tuner_opcode};
use crate::config::DiePackage;
use crate::firmware::{self, LoadError, LoadOptions, TransferHint};
use crate::frontend::power::{self, DomainUse};
use crate::frontend::{FirmwareState, FrontEnd, PowerState, TunerState};
use crate::properties::prop;
use crate::standard::{Media, Standard};
use crate::time::Clock;
use crate::transport::{TransportError, TransportPort};

/// Forced-transition knobs for one switch, replacing the original's
/// re-init bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchOptions {
    /// The part is already powered; skip the power-up command.
    pub skip_power_up: bool,
    /// Never load firmware, even on a cold demodulator.
    pub skip_fw_load: bool,
    /// Transfer firmware but leave it unstarted.
    pub skip_fw_start: bool,
    /// Redo the terrestrial tuner's one-time hardware init.
    pub force_ter_init: bool,
    /// Redo the satellite tuner's one-time hardware init.
    pub force_sat_init: bool,
    /// Redo the demodulator bring-up and per-domain configuration.
    pub force_demod_init: bool,
    /// Keep the terrestrial tuner clock running regardless of derivation.
    pub use_ter_clock: bool,
    /// Keep the satellite tuner clock running regardless of derivation.
    pub use_sat_clock: bool,
    /// Full platform bring-up: execute the switch, then a second pass with
    /// nothing needed, leaving every initialized sub-system idle.
    pub full_bringup: bool,
}

/// Phase of the switch procedure that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPhase {
    DemodSilence,
    DemodPowerDown,
    SatTunerStop,
    SatTunerStart,
    SatClock,
    TerTunerStop,
    TerTunerStart,
    TerClock,
    DemodWake,
    DemodConfigure,
    DemodRestart,
}

impl fmt::Display for SwitchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwitchPhase::DemodSilence => "demod-silence",
            SwitchPhase::DemodPowerDown => "demod-power-down",
            SwitchPhase::SatTunerStop => "sat-tuner-stop",
            SwitchPhase::SatTunerStart => "sat-tuner-start",
            SwitchPhase::SatClock => "sat-clock",
            SwitchPhase::TerTunerStop => "ter-tuner-stop",
            SwitchPhase::TerTunerStart => "ter-tuner-start",
            SwitchPhase::TerClock => "ter-clock",
            SwitchPhase::DemodWake => "demod-wake",
            SwitchPhase::DemodConfigure => "demod-configure",
            SwitchPhase::DemodRestart => "demod-restart",
        };
        f.write_str(name)
    }
}

/// Standard-switch failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SwitchError {
    /// The requested standard needs a tuner this front end does not carry.
    #[error("Standard {standard:?} not supported by this front end")]
    Unsupported { standard: Standard },

    /// Firmware bootstrap failed during demodulator bring-up.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A hardware transition failed; the gate is closed and
    /// `previous_standard` still names the last successful switch.
    #[error("Switch phase {phase} failed: {source}")]
    Phase {
        phase: SwitchPhase,
        #[source]
        source: TransportError,
    },
}

fn at(phase: SwitchPhase) -> impl FnOnce(TransportError) -> SwitchError {
    move |source| SwitchError::Phase { phase, source }
}

impl<T: TransportPort, C: Clock> FrontEnd<T, C> {
    /// Move the front end to `standard`, powering up, down or leaving
    /// untouched each of the five domains as required.
    pub fn switch_to(
        &mut self,
        standard: Standard,
        opts: &SwitchOptions,
    ) -> Result<(), SwitchError> {
        if let Some(media) = standard.media() {
            let fitted = match media {
                Media::Terrestrial => self.config.capabilities.has_terrestrial,
                Media::Satellite => self.config.capabilities.has_satellite,
            };
            if !fitted {
                return Err(SwitchError::Unsupported { standard });
            }
        }

        self.switch_once(standard, opts)?;

        if opts.full_bringup {
            // Second pass with nothing needed: every sub-system that was
            // just initialized is put back to a clean idle state.
            self.switch_once(Standard::Sleep, &SwitchOptions::default())?;
        }
        Ok(())
    }

    fn switch_once(&mut self, standard: Standard, opts: &SwitchOptions) -> Result<(), SwitchError> {
        let caps = self.config.capabilities;
        let clocks = self.config.clocks;
        let mut used = DomainUse::effective(self.previous_standard, &caps, &clocks);
        let mut needed = DomainUse::effective(standard, &caps, &clocks);

        // Forced re-inits clear the corresponding "already used" state so
        // the transitions below run even when the derivation says no-op.
        if opts.force_demod_init {
            used.demod = false;
            self.ter_configured = false;
            self.sat_configured = false;
        }
        if opts.force_ter_init {
            used.ter_tuner = false;
            if let Some(t) = self.ter.as_mut() {
                t.init_done = false;
            }
        }
        if opts.force_sat_init {
            used.sat_tuner = false;
            if let Some(t) = self.sat.as_mut() {
                t.init_done = false;
            }
        }
        if opts.use_ter_clock {
            needed.ter_clock = caps.has_terrestrial;
        }
        if opts.use_sat_clock {
            needed.sat_clock = caps.has_satellite;
        }
        debug!(
            "Switch {:?} -> {:?}: used {:?}, needed {:?}",
            self.previous_standard, standard, used, needed
        );

        // A clock-domain flip always restarts the demodulator; a demod no
        // longer needed is silenced first, then powered down.
        if power::demod_sleep_request(&used, &needed) && !self.demod.sleeping {
            if !needed.demod {
                self.demod_command(&[opcode::TRISTATE, 0x01])
                    .map_err(at(SwitchPhase::DemodSilence))?;
                self.ter_configured = false;
                self.sat_configured = false;
            }
            self.demod_command(&[opcode::POWER_DOWN])
                .map_err(at(SwitchPhase::DemodPowerDown))?;
            self.demod.sleeping = true;
        }

        self.transition_tuner(Media::Satellite, &used, &needed)?;
        self.transition_tuner(Media::Terrestrial, &used, &needed)?;

        if needed.demod {
            self.bring_up_demod(standard, opts)?;

            // Always restore inversion and re-issue a soft restart so the
            // newly selected standard's properties take effect.
            let inversion = self.config.spectrum_inversion;
            self.write_prop(prop::SPECTRUM_INV, inversion)
                .map_err(at(SwitchPhase::DemodConfigure))?;
            self.write_prop(prop::STANDARD, u16::from(standard.code()))
                .map_err(at(SwitchPhase::DemodConfigure))?;
            self.restart_demod().map_err(at(SwitchPhase::DemodRestart))?;
        }

        self.previous_standard = standard;
        self.current_standard = standard;
        info!("Front end switched to {:?}", standard);
        Ok(())
    }

    fn transition_tuner(
        &mut self,
        media: Media,
        used: &DomainUse,
        needed: &DomainUse,
    ) -> Result<(), SwitchError> {
        if self.tuner(media).is_none() {
            return Ok(());
        }
        let was_tuner = used.tuner(media);
        let now_tuner = needed.tuner(media);
        let was_clock = used.clock(media);
        let now_clock = needed.clock(media);
        let (stop_phase, start_phase, clock_phase) = match media {
            Media::Satellite => (
                SwitchPhase::SatTunerStop,
                SwitchPhase::SatTunerStart,
                SwitchPhase::SatClock,
            ),
            Media::Terrestrial => (
                SwitchPhase::TerTunerStop,
                SwitchPhase::TerTunerStart,
                SwitchPhase::TerClock,
            ),
        };

        if was_tuner && !now_tuner {
            if !now_clock && self.tuner_clock_on(media) {
                self.tuner_command(media, &[tuner_opcode::CLOCK, 0x00])
                    .map_err(at(clock_phase))?;
                self.set_tuner(media, |t| t.clock_on = false);
            }
            if self.tuner_power(media) == PowerState::Active {
                self.tuner_command(media, &[tuner_opcode::STANDBY])
                    .map_err(at(stop_phase))?;
                self.set_tuner(media, |t| t.power = PowerState::Standby);
            }
        }

        if !was_tuner && now_tuner {
            if !self.tuner_init_done(media) {
                self.tuner_command(media, &[tuner_opcode::INIT])
                    .map_err(at(start_phase))?;
                self.set_tuner(media, |t| {
                    t.init_done = true;
                    t.power = PowerState::Active;
                });
            } else if self.tuner_power(media) != PowerState::Active {
                self.tuner_command(media, &[tuner_opcode::WAKE])
                    .map_err(at(start_phase))?;
                self.set_tuner(media, |t| t.power = PowerState::Active);
            }
        }

        if now_clock {
            // A clock supplier must be initialized even when it is not the
            // active media.
            if !self.tuner_init_done(media) {
                self.tuner_command(media, &[tuner_opcode::INIT])
                    .map_err(at(start_phase))?;
                self.set_tuner(media, |t| {
                    t.init_done = true;
                    t.power = PowerState::Active;
                });
            }
            if !self.tuner_clock_on(media) {
                self.tuner_command(media, &[tuner_opcode::CLOCK, 0x01])
                    .map_err(at(clock_phase))?;
                self.set_tuner(media, |t| t.clock_on = true);
            }
            // Clock-passthrough power saving: a pure clock supplier parks
            // in standby with its clock output alive.
            if !now_tuner && self.tuner_power(media) == PowerState::Active {
                self.tuner_command(media, &[tuner_opcode::STANDBY])
                    .map_err(at(stop_phase))?;
                self.set_tuner(media, |t| t.power = PowerState::Standby);
            }
        } else if self.tuner_clock_on(media) && !was_clock {
            // Startup drift: the clock is running although neither side of
            // the transition wants it.
            self.tuner_command(media, &[tuner_opcode::CLOCK, 0x00])
                .map_err(at(clock_phase))?;
            self.set_tuner(media, |t| t.clock_on = false);
        }
        Ok(())
    }

    fn bring_up_demod(&mut self, standard: Standard, opts: &SwitchOptions) -> Result<(), SwitchError> {
        if matches!(self.demod.firmware, FirmwareState::NotLoaded) && !opts.skip_fw_load {
            let hint = if self.port.bulk_capacity().is_some() {
                TransferHint::PreferBulk
            } else {
                TransferHint::CommandOnly
            };
            let load_opts = LoadOptions {
                skip_power_up: opts.skip_power_up,
                skip_start: opts.skip_fw_start,
            };
            let Self {
                port,
                clock,
                cache,
                sink,
                demod,
                catalog,
                ..
            } = self;
            let info = firmware::bootstrap(
                port,
                clock,
                cache,
                sink.as_mut(),
                demod.addr,
                catalog,
                hint,
                &load_opts,
            )?;
            self.demod.firmware = FirmwareState::Loaded(info.version);
            self.demod.identity = Some(info.identity);
            self.demod.sleeping = false;
        } else if self.demod.sleeping {
            if !opts.skip_power_up {
                self.demod_command(&[opcode::POWER_UP, 0x01])
                    .map_err(at(SwitchPhase::DemodWake))?;
            }
            self.demod.sleeping = false;
        }

        // Per-domain post-load configuration, once until torn down.
        let Some(media) = standard.media() else {
            return Ok(());
        };
        let configured = match media {
            Media::Terrestrial => self.ter_configured,
            Media::Satellite => self.sat_configured,
        };
        if !configured {
            let media_code = match media {
                Media::Terrestrial => 0x01,
                Media::Satellite => 0x02,
            };
            self.demod_command(&[opcode::AGC_SETUP, media_code])
                .map_err(at(SwitchPhase::DemodConfigure))?;
            self.demod_command(&[opcode::PIN_SETUP, 0x00])
                .map_err(at(SwitchPhase::DemodConfigure))?;
            if self.config.capabilities.die != DiePackage::Single {
                // Dual-die packages park the sibling die's pins.
                self.demod_command(&[opcode::TRISTATE, 0x02])
                    .map_err(at(SwitchPhase::DemodConfigure))?;
            }
            match media {
                Media::Terrestrial => self.ter_configured = true,
                Media::Satellite => self.sat_configured = true,
            }
        }
        Ok(())
    }

    fn set_tuner<F: FnOnce(&mut TunerState)>(&mut self, media: Media, f: F) {
        if let Some(t) = self.tuner_state_mut(media) {
            f(t);
        }
    }

    fn tuner_power(&self, media: Media) -> PowerState {
        self.tuner(media).map_or(PowerState::Off, |t| t.power)
    }

    fn tuner_clock_on(&self, media: Media) -> bool {
        self.tuner(media).is_some_and(|t| t.clock_on)
    }

    fn tuner_init_done(&self, media: Media) -> bool {
        self.tuner(media).is_some_and(|t| t.init_done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Capabilities, ClockPolicy, FrontEndConfig};
    use crate::frontend::PowerState;
    use crate::testutil::{front_end, front_end_with, Op};

    #[test]
    fn test_sleep_to_t2_powers_ter_and_demod_only() {
        // Scenario: a terrestrial-only board comes out of sleep into T2.
        let mut config = FrontEndConfig::default();
        config.capabilities = Capabilities {
            has_satellite: false,
            ..Capabilities::default()
        };
        let mut fe = front_end_with(config);

        fe.switch_to(Standard::DvbT2, &SwitchOptions::default()).unwrap();

        assert_eq!(fe.previous_standard(), Standard::DvbT2);
        let ter = fe.tuner(Media::Terrestrial).unwrap();
        assert_eq!(ter.power, PowerState::Active);
        assert!(ter.init_done && ter.clock_on);
        assert!(fe.tuner(Media::Satellite).is_none());
        assert!(matches!(fe.firmware_state(), FirmwareState::Loaded(_)));
        assert!(!fe.port.gate_open);
    }

    #[test]
    fn test_switch_is_idempotent_on_power_transitions() {
        let mut fe = front_end();
        fe.switch_to(Standard::DvbT2, &SwitchOptions::default()).unwrap();

        fe.port.ops.clear();
        fe.switch_to(Standard::DvbT2, &SwitchOptions::default()).unwrap();

        let power_ops: Vec<_> = fe
            .port
            .ops
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    Op::PowerUp(_)
                        | Op::PowerDown
                        | Op::TunerInit(_)
                        | Op::TunerWake(_)
                        | Op::TunerStandby(_)
                        | Op::TunerClock(_, _)
                )
            })
            .collect();
        assert!(power_ops.is_empty(), "unexpected power ops: {power_ops:?}");
    }

    #[test]
    fn test_ter_to_sat_flips_clock_domains_and_restarts_demod() {
        let mut fe = front_end();
        fe.switch_to(Standard::DvbT2, &SwitchOptions::default()).unwrap();
        fe.port.ops.clear();

        fe.switch_to(Standard::DvbS2, &SwitchOptions::default()).unwrap();

        // The clock flip forces a demod power cycle.
        assert!(fe.port.ops.contains(&Op::PowerDown));
        assert!(fe.port.ops.contains(&Op::PowerUp(0x01)));
        let sat_addr = fe.config().addresses.sat_tuner;
        let ter_addr = fe.config().addresses.ter_tuner;
        assert!(fe.port.ops.contains(&Op::TunerInit(sat_addr)));
        assert!(fe.port.ops.contains(&Op::TunerClock(ter_addr, false)));
        assert_eq!(fe.tuner(Media::Terrestrial).unwrap().power, PowerState::Standby);
        assert_eq!(fe.tuner(Media::Satellite).unwrap().power, PowerState::Active);
    }

    #[test]
    fn test_always_on_clock_survives_sleep() {
        let mut config = FrontEndConfig::default();
        config.clocks.sat_policy = ClockPolicy::AlwaysOn;
        let mut fe = front_end_with(config);

        fe.switch_to(Standard::DvbT, &SwitchOptions::default()).unwrap();
        assert!(fe.tuner(Media::Satellite).unwrap().clock_on);

        fe.switch_to(Standard::Sleep, &SwitchOptions::default()).unwrap();
        assert!(fe.tuner(Media::Satellite).unwrap().clock_on);
        // The supplier parks in standby, clock alive.
        assert_eq!(fe.tuner(Media::Satellite).unwrap().power, PowerState::Standby);
    }

    #[test]
    fn test_always_off_clock_never_turns_on() {
        let mut config = FrontEndConfig::default();
        config.clocks.ter_policy = ClockPolicy::AlwaysOff;
        let mut fe = front_end_with(config);

        fe.switch_to(Standard::DvbT2, &SwitchOptions::default()).unwrap();
        assert!(!fe.tuner(Media::Terrestrial).unwrap().clock_on);

        fe.switch_to(Standard::Sleep, &SwitchOptions::default()).unwrap();
        assert!(!fe.tuner(Media::Terrestrial).unwrap().clock_on);
    }

    #[test]
    fn test_unsupported_standard_rejected() {
        let mut config = FrontEndConfig::default();
        config.capabilities.has_satellite = false;
        let mut fe = front_end_with(config);

        let err = fe
            .switch_to(Standard::DvbS2, &SwitchOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            SwitchError::Unsupported {
                standard: Standard::DvbS2
            }
        );
    }

    #[test]
    fn test_failed_phase_leaves_gate_closed_and_standard_uncommitted() {
        let mut fe = front_end();
        let ter_addr = fe.config().addresses.ter_tuner;
        fe.port.fail_tuner_cmds.insert(ter_addr);

        let err = fe
            .switch_to(Standard::DvbT2, &SwitchOptions::default())
            .unwrap_err();

        assert!(matches!(err, SwitchError::Phase { .. }));
        assert!(!fe.port.gate_open);
        assert_eq!(fe.previous_standard(), Standard::Sleep);
    }

    #[test]
    fn test_full_bringup_runs_two_phases_and_idles_down() {
        let mut fe = front_end();
        let opts = SwitchOptions {
            full_bringup: true,
            ..SwitchOptions::default()
        };
        fe.switch_to(Standard::DvbT2, &opts).unwrap();

        // Everything initialized, then idled.
        assert_eq!(fe.previous_standard(), Standard::Sleep);
        let ter = fe.tuner(Media::Terrestrial).unwrap();
        assert!(ter.init_done);
        assert_eq!(ter.power, PowerState::Standby);
        assert!(matches!(fe.firmware_state(), FirmwareState::Loaded(_)));
    }

    #[test]
    fn test_force_ter_init_reinitializes_tuner() {
        let mut fe = front_end();
        fe.switch_to(Standard::DvbT2, &SwitchOptions::default()).unwrap();
        fe.port.ops.clear();

        let opts = SwitchOptions {
            force_ter_init: true,
            ..SwitchOptions::default()
        };
        fe.switch_to(Standard::DvbT2, &opts).unwrap();

        let ter_addr = fe.config().addresses.ter_tuner;
        assert!(fe.port.ops.contains(&Op::TunerInit(ter_addr)));
    }
}
