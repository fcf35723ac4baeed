//! Carrier lock engine.
//!
//! Tunes one carrier and waits for a terminal verdict: locked, never-lock
//! (the signal is structurally absent), timed out, or aborted. With
//! handshake mode enabled the poll loop periodically returns a
//! [`LockResult::Searching`] sentinel instead of blocking, and the next
//! `lock` call resumes polling without re-tuning.

use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

use crate::command::opcode;
use crate::diag::DiagEvent;
use crate::frontend::{FrontEnd, SignalQuality};
use crate::lnb::LnbError;
use crate::properties::prop;
use crate::standard::{Media, Standard};
use crate::time::Clock;
use crate::transport::{TransportError, TransportPort};

/// What to do with the tuner before waiting for lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierTarget {
    /// Tune to this frequency, kHz.
    Frequency(u32),
    /// Leave everything untouched and measure the current lock.
    Current,
    /// Re-issue a soft restart only, to measure a cold relock.
    Relock,
}

/// One carrier acquisition request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarrierParams {
    pub standard: Standard,
    pub target: CarrierTarget,
    /// Channel bandwidth, kHz. Ignored by satellite standards.
    pub bandwidth_khz: u32,
    /// Symbol rate, Baud. Seeds the cable timeout formula.
    pub symbol_rate: u32,
    /// PLP / ISI selector; `None` lets the demodulator pick.
    pub stream_selector: Option<u16>,
}

/// Verdict of one `lock` call.
#[derive(Debug, Clone, PartialEq)]
pub enum LockResult {
    Locked(LockReport),
    /// The demodulator concluded no compatible signal is present. Distinct
    /// from [`LockResult::TimedOut`], which only means "not yet".
    NeverLock,
    TimedOut,
    Aborted,
    /// Handshake sentinel: still searching, control returned to the
    /// caller. `elapsed_ms` is always at least 2.
    Searching { elapsed_ms: u64 },
}

/// Details of a successful lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LockReport {
    /// Frequency the caller asked for, kHz.
    pub frequency_khz: u32,
    /// Frequency the tuner actually sits on (the user-band center under
    /// Unicable), kHz.
    pub tuner_khz: u32,
    pub elapsed_ms: u64,
    pub quality: SignalQuality,
}

/// Failures while configuring or tuning; terminal search verdicts are
/// [`LockResult`] values, not errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TuneError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Lnb(#[from] LnbError),
}

/// Saved poll state carried across handshake suspensions.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockContext {
    search_start: Instant,
    max_lock_ms: u64,
    frequency_khz: u32,
    tuner_khz: u32,
}

impl<T: TransportPort, C: Clock> FrontEnd<T, C> {
    /// Acquire one carrier.
    ///
    /// Returns within the standard's maximum lock time plus one poll tick.
    /// With handshake enabled, a [`LockResult::Searching`] return means the
    /// same call must be re-issued later; it resumes where it left off.
    pub fn lock(&mut self, params: &CarrierParams) -> Result<LockResult, TuneError> {
        if self.config.handshake.enabled {
            if let Some(ctx) = self.lock_ctx.take() {
                // Handshake on: skip configuration and tuning, keep polling.
                return self.poll_lock(params, ctx);
            }
        } else {
            self.lock_ctx = None;
        }

        let standard = params.standard;
        self.current_standard = standard;
        let media = standard.media();

        let mut frequency_khz = 0;
        let mut tuner_khz = 0;
        match params.target {
            CarrierTarget::Frequency(freq) => {
                frequency_khz = freq;
                self.configure_carrier(params)?;
                tuner_khz = match media {
                    Some(Media::Satellite) => self.route_satellite(freq)?,
                    _ => freq,
                };
                if let Some(media) = media {
                    self.tuner_tune(media, tuner_khz, params.bandwidth_khz)?;
                }
                self.restart_demod()?;
            }
            CarrierTarget::Relock => {
                self.restart_demod()?;
            }
            CarrierTarget::Current => {}
        }

        let auto = media.is_some_and(|m| self.auto_detect(m));
        let max_lock_ms = standard.max_lock_ms(params.symbol_rate, auto);
        let search_start = self.clock.now();
        if params.target != CarrierTarget::Current {
            self.clock
                .sleep(Duration::from_millis(standard.min_lock_ms()));
        }

        self.poll_lock(
            params,
            LockContext {
                search_start,
                max_lock_ms,
                frequency_khz,
                tuner_khz,
            },
        )
    }

    fn poll_lock(
        &mut self,
        params: &CarrierParams,
        ctx: LockContext,
    ) -> Result<LockResult, TuneError> {
        let handshake_start = self.clock.now();
        loop {
            if self.lock_abort {
                // The abort flag auto-clears once observed.
                self.lock_abort = false;
                self.lock_ctx = None;
                return Ok(LockResult::Aborted);
            }

            let status = self.demod_status()?;
            if status.dl {
                self.on_locked(params)?;
                let elapsed_ms = self.clock.elapsed_ms(ctx.search_start);
                self.sink.event(&DiagEvent {
                    phase: "lock/locked",
                    elapsed_ms,
                    snapshot: None,
                });
                return Ok(LockResult::Locked(LockReport {
                    frequency_khz: ctx.frequency_khz,
                    tuner_khz: ctx.tuner_khz,
                    elapsed_ms,
                    quality: status.quality,
                }));
            }
            if status.never_lock {
                let elapsed_ms = self.clock.elapsed_ms(ctx.search_start);
                self.sink.event(&DiagEvent {
                    phase: "lock/never-lock",
                    elapsed_ms,
                    snapshot: None,
                });
                return Ok(LockResult::NeverLock);
            }

            let elapsed_ms = self.clock.elapsed_ms(ctx.search_start);
            if elapsed_ms >= ctx.max_lock_ms {
                debug!("Lock timed out after {elapsed_ms} ms");
                return Ok(LockResult::TimedOut);
            }
            if self.config.handshake.enabled
                && self.clock.elapsed_ms(handshake_start) >= self.config.handshake.period_ms
            {
                self.lock_ctx = Some(ctx);
                return Ok(LockResult::Searching {
                    elapsed_ms: elapsed_ms.max(2),
                });
            }
            self.clock
                .sleep(Duration::from_millis(self.config.timing.lock_poll_ms));
        }
    }

    /// Standard-specific property setup before tuning.
    fn configure_carrier(&mut self, params: &CarrierParams) -> Result<(), TransportError> {
        let standard = params.standard;
        self.write_prop(prop::BANDWIDTH, params.bandwidth_khz.min(65_535) as u16)?;
        if params.symbol_rate > 0 {
            self.write_prop(prop::SYMBOL_RATE_LO, (params.symbol_rate & 0xFFFF) as u16)?;
            self.write_prop(prop::SYMBOL_RATE_HI, (params.symbol_rate >> 16) as u16)?;
        }
        // Absent selector means "let the demodulator pick".
        let selector = params.stream_selector.unwrap_or(0xFFFF);
        self.write_prop(prop::STREAM_SELECT, selector)?;
        self.write_prop(prop::CONSTELLATION, 0)?;
        if let Some(media) = standard.media() {
            let auto = self.auto_detect(media);
            self.write_prop(prop::AUTO_DETECT, u16::from(auto))?;
        }
        Ok(())
    }

    /// Post-lock housekeeping: clear the error counters, and arm fast-fade
    /// protection on second-generation terrestrial locks.
    fn on_locked(&mut self, params: &CarrierParams) -> Result<(), TransportError> {
        self.demod_command(&[opcode::BER_CLEAR])?;
        if params.standard == Standard::DvbT2 {
            self.write_prop(prop::FEF_PROTECT, 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrontEndConfig;
    use crate::standard::cable_max_lock_ms;
    use crate::testutil::{front_end, front_end_with, locked_front_end, Op};
    use demodfe_protocol::UnicableMode;

    fn params(standard: Standard, freq_khz: u32) -> CarrierParams {
        CarrierParams {
            standard,
            target: CarrierTarget::Frequency(freq_khz),
            bandwidth_khz: 8_000,
            symbol_rate: 6_900_000,
            stream_selector: None,
        }
    }

    #[test]
    fn test_lock_success_reports_quality_and_clears_counters() {
        let mut fe = locked_front_end(Standard::DvbT2);
        fe.port.channel_at(474_000, 0); // terrestrial carrier present

        let result = fe.lock(&params(Standard::DvbT2, 474_000)).unwrap();
        let report = match result {
            LockResult::Locked(report) => report,
            other => panic!("expected lock, got {other:?}"),
        };
        assert_eq!(report.frequency_khz, 474_000);
        assert_eq!(report.tuner_khz, 474_000);
        assert!(fe.port.ops.contains(&Op::BerClear));
        // T2 locks arm fast-fade protection.
        assert!(fe.port.ops.contains(&Op::SetProp(prop::FEF_PROTECT, 1)));
    }

    #[test]
    fn test_never_lock_is_distinct_and_early() {
        // Scenario: DVB-C tune with no signal returns NeverLock before the
        // closed-form cable ceiling elapses.
        let mut fe = locked_front_end(Standard::DvbC);
        fe.port.never_lock_after_polls = Some(3);

        let p = params(Standard::DvbC, 474_000);
        let started = fe.clock.now();
        let result = fe.lock(&p).unwrap();
        assert_eq!(result, LockResult::NeverLock);

        let max = cable_max_lock_ms(p.symbol_rate, false);
        assert!(fe.clock.elapsed_ms(started) < max);
    }

    #[test]
    fn test_timeout_is_bounded_by_max_plus_one_tick() {
        let mut fe = locked_front_end(Standard::DvbT);
        // No channel anywhere; flags never rise.
        let started = fe.clock.now();
        let result = fe.lock(&params(Standard::DvbT, 474_000)).unwrap();
        assert_eq!(result, LockResult::TimedOut);

        let max = Standard::DvbT.max_lock_ms(6_900_000, false);
        let tick = fe.config().timing.lock_poll_ms;
        assert!(fe.clock.elapsed_ms(started) <= max + tick);
    }

    #[test]
    fn test_abort_clears_flag_and_wins_over_polling() {
        let mut fe = locked_front_end(Standard::DvbT);
        fe.abort_lock();
        let result = fe.lock(&params(Standard::DvbT, 474_000)).unwrap();
        assert_eq!(result, LockResult::Aborted);
        assert!(!fe.lock_abort);
    }

    #[test]
    fn test_handshake_suspends_and_resumes_without_retuning() {
        let mut config = FrontEndConfig::default();
        config.handshake.enabled = true;
        config.handshake.period_ms = 100;
        let mut fe = front_end_with(config);
        fe.switch_to(Standard::DvbT2, &crate::frontend::switch::SwitchOptions::default())
            .unwrap();
        fe.port.lock_after_polls = Some(40); // locks well past one period

        let p = params(Standard::DvbT2, 474_000);
        let mut suspensions = 0;
        let report = loop {
            match fe.lock(&p).unwrap() {
                LockResult::Searching { elapsed_ms } => {
                    assert!(elapsed_ms >= 2);
                    suspensions += 1;
                }
                LockResult::Locked(report) => break report,
                other => panic!("unexpected {other:?}"),
            }
        };
        assert!(suspensions >= 1);
        assert!(report.elapsed_ms >= 100);

        // Tuned exactly once across all resumptions.
        let tunes = fe
            .port
            .ops
            .iter()
            .filter(|op| matches!(op, Op::TunerTune(_, _)))
            .count();
        assert_eq!(tunes, 1);
    }

    #[test]
    fn test_measure_only_target_touches_nothing() {
        let mut fe = locked_front_end(Standard::DvbT2);
        fe.port.ops.clear();
        fe.port.lock_after_polls = Some(0); // already locked

        let p = CarrierParams {
            target: CarrierTarget::Current,
            ..params(Standard::DvbT2, 0)
        };
        let result = fe.lock(&p).unwrap();
        assert!(matches!(result, LockResult::Locked(_)));
        assert!(!fe.port.ops.iter().any(|op| matches!(op, Op::TunerTune(_, _))));
        assert!(!fe.port.ops.contains(&Op::Restart));
    }

    #[test]
    fn test_relock_target_restarts_only() {
        let mut fe = locked_front_end(Standard::DvbT2);
        fe.port.ops.clear();
        fe.port.lock_after_polls = Some(1);

        let p = CarrierParams {
            target: CarrierTarget::Relock,
            ..params(Standard::DvbT2, 0)
        };
        let result = fe.lock(&p).unwrap();
        assert!(matches!(result, LockResult::Locked(_)));
        assert!(fe.port.ops.contains(&Op::Restart));
        assert!(!fe.port.ops.iter().any(|op| matches!(op, Op::TunerTune(_, _))));
    }

    #[test]
    fn test_satellite_lock_routes_through_user_band() {
        let mut config = FrontEndConfig::default();
        config.lnb.mode = UnicableMode::Unicable1;
        config.lnb.user_band = 2;
        config.lnb.user_band_center_khz = 1_400_000;
        let mut fe = front_end_with(config);
        fe.switch_to(Standard::DvbS2, &crate::frontend::switch::SwitchOptions::default())
            .unwrap();
        fe.port.lock_after_polls = Some(1);

        let p = CarrierParams {
            standard: Standard::DvbS2,
            target: CarrierTarget::Frequency(11_170_000), // Ku downlink
            bandwidth_khz: 0,
            symbol_rate: 27_500_000,
            stream_selector: None,
        };
        let report = match fe.lock(&p).unwrap() {
            LockResult::Locked(report) => report,
            other => panic!("unexpected {other:?}"),
        };
        // The tuner parks on the user band, not the wanted frequency.
        assert_eq!(report.tuner_khz, 1_400_000);
        let sat_addr = fe.config().addresses.sat_tuner;
        assert!(fe.port.ops.contains(&Op::TunerTune(sat_addr, 1_400_000)));
        assert!(fe
            .port
            .ops
            .iter()
            .any(|op| matches!(op, Op::DiseqcSend(bytes) if bytes.len() == 5)));
    }

    #[test]
    fn test_lock_is_terminal_exactly_once_per_verdict() {
        // All verdict kinds observable through one front end.
        let mut fe = front_end();
        fe.switch_to(Standard::DvbT, &crate::frontend::switch::SwitchOptions::default())
            .unwrap();

        fe.port.lock_after_polls = Some(2);
        assert!(matches!(
            fe.lock(&params(Standard::DvbT, 474_000)).unwrap(),
            LockResult::Locked(_)
        ));

        fe.port.lock_after_polls = None;
        fe.port.never_lock_after_polls = Some(1);
        assert_eq!(
            fe.lock(&params(Standard::DvbT, 482_000)).unwrap(),
            LockResult::NeverLock
        );

        fe.port.never_lock_after_polls = None;
        assert_eq!(
            fe.lock(&params(Standard::DvbT, 490_000)).unwrap(),
            LockResult::TimedOut
        );
    }
}
