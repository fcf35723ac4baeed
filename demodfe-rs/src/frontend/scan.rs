//! Blind-scan engine.
//!
//! Discovers channels across a frequency range with no prior knowledge of
//! their parameters. Terrestrial-like standards are host-stepped: the host
//! tunes every candidate, restarts the demodulator and polls the lock/
//! never-lock pair before advancing. Cable-1 and satellite standards are
//! hardware-autonomous: the chip walks the range itself and raises events
//! the host must service promptly, acknowledging the busy flag before each
//! resume.

use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

use crate::command::{opcode, scan_action};
use crate::diag::DiagEvent;
use crate::frontend::FrontEnd;
use crate::lnb::LnbError;
use crate::properties::prop;
use crate::standard::{Media, Standard};
use crate::time::Clock;
use crate::transport::{TransportError, TransportPort};

/// AFC range forced while blind-scanning, kHz. Narrow, so neighbouring
/// carriers are not mistaken for the one under test.
const SCAN_AFC_KHZ: u16 = 50;

/// Hardware scan event codes as reported by SCAN_STATUS.
pub(crate) mod event {
    pub const IDLE: u8 = 0x00;
    pub const SEARCHING: u8 = 0x01;
    pub const TUNE_REQUEST: u8 = 0x02;
    pub const CHANNEL_FOUND: u8 = 0x03;
    pub const ERROR: u8 = 0x04;
    pub const ENDED: u8 = 0x05;
    pub const DEBUG: u8 = 0x06;
}

/// Immutable description of one scan run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    /// Swept range, kHz, inclusive bounds.
    pub range_khz: (u32, u32),
    /// Step between stepped-mode candidates, kHz. Ignored in autonomous
    /// mode, where the hardware chooses its own walk.
    pub step_khz: u32,
    /// Symbol rates considered during detection, Baud.
    pub symbol_rate_bounds: (u32, u32),
    /// Candidates below this RSSI are skipped without a lock wait, dBm.
    pub min_rssi_dbm: i16,
    /// Channels below this SNR are still reported; the bound is recorded
    /// with the session for the host's post-filtering.
    pub min_snr_db: f32,
}

impl Default for SeekRequest {
    fn default() -> Self {
        Self {
            range_khz: (0, 0),
            step_khz: 8_000,
            symbol_rate_bounds: (1_000_000, 45_000_000),
            min_rssi_dbm: -127,
            min_snr_db: 0.0,
        }
    }
}

/// Driving mode, decided by the standard at `seek_init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanMode {
    Stepped,
    Autonomous,
}

/// A channel reported by `seek_next`.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundChannel {
    pub frequency_khz: u32,
    pub symbol_rate: u32,
    pub standard: Standard,
    pub constellation: u8,
    /// Streams / PLPs carried.
    pub streams: u16,
    /// Floor for the next `seek_next`, past this channel.
    pub next_floor_khz: u32,
}

/// Verdict of one `seek_next` call.
#[derive(Debug, Clone, PartialEq)]
pub enum SeekResult {
    Found(FoundChannel),
    /// The range is exhausted or the hardware ended the sweep.
    NotFound,
    TimedOut,
    Aborted,
    /// Handshake sentinel; `elapsed_ms` is always at least 2.
    Searching { elapsed_ms: u64 },
}

/// Scan-engine failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Lnb(#[from] LnbError),

    /// The hardware "busy" flag never cleared; the firmware is stuck and
    /// the session is dead.
    #[error("Scan busy flag stuck for {waited_ms} ms")]
    BusyStuck { waited_ms: u64 },

    /// `seek_next`/`seek_end` without a session.
    #[error("No scan session active")]
    NoSession,

    /// `seek_init` while a session is active.
    #[error("A scan session is already active")]
    SessionActive,

    /// The request is self-contradictory.
    #[error("Invalid seek request: {0}")]
    InvalidRequest(&'static str),
}

/// Live scan state between `seek_init` and `seek_end`.
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub(crate) standard: Standard,
    pub(crate) req: SeekRequest,
    pub(crate) mode: ScanMode,
    /// Advancing floor; never decreases within a session.
    pub(crate) floor_khz: u32,
    pub(crate) started: Instant,
    pub(crate) scan_ms_total: u64,
    pub(crate) timeout_ms_total: u64,
    /// Channel decisions reached (found channels).
    pub(crate) decisions: u32,
    pub(crate) timeouts: u32,
    pub(crate) hw_active: bool,
    pub(crate) pending_resume: bool,
    /// Reset on every serviced hardware event, not just at start.
    pub(crate) event_ref: Instant,
    /// Property values to put back at `seek_end`.
    pub(crate) saved_props: Vec<(u16, u16)>,
}

impl ScanSession {
    /// Current floor of the swept range, kHz.
    pub fn floor_khz(&self) -> u32 {
        self.floor_khz
    }

    pub fn decisions(&self) -> u32 {
        self.decisions
    }

    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }
}

impl<T: TransportPort, C: Clock> FrontEnd<T, C> {
    /// Begin a scan session over `req` for the current standard.
    ///
    /// Narrows the acquisition parameters (AFC range, symbol-rate bounds)
    /// for blind detection; `seek_end` restores the caller's values.
    pub fn seek_init(&mut self, req: SeekRequest) -> Result<(), ScanError> {
        if self.scan.is_some() {
            return Err(ScanError::SessionActive);
        }
        if req.range_khz.0 > req.range_khz.1 {
            return Err(ScanError::InvalidRequest("range bounds reversed"));
        }
        let standard = self.current_standard;
        let mode = match standard {
            Standard::DvbC | Standard::LegacyQam => ScanMode::Autonomous,
            s if s.is_satellite() => ScanMode::Autonomous,
            Standard::Sleep => return Err(ScanError::InvalidRequest("front end is asleep")),
            _ => ScanMode::Stepped,
        };
        if mode == ScanMode::Stepped && req.step_khz == 0 {
            return Err(ScanError::InvalidRequest("zero step in stepped mode"));
        }

        // Remember what we are about to override.
        let save_codes = [
            prop::AFC_RANGE,
            prop::SCAN_SR_MIN,
            prop::SCAN_SR_MAX,
            prop::AUTO_DETECT,
        ];
        let saved_props: Vec<(u16, u16)> = save_codes
            .iter()
            .filter_map(|&code| self.cache.get(code).map(|v| (code, v)))
            .collect();

        self.write_prop(prop::AFC_RANGE, u16::from(SCAN_AFC_KHZ))?;
        self.write_prop(prop::SCAN_SR_MIN, (req.symbol_rate_bounds.0 / 1_000) as u16)?;
        self.write_prop(prop::SCAN_SR_MAX, (req.symbol_rate_bounds.1 / 1_000) as u16)?;
        self.write_prop(prop::AUTO_DETECT, 1)?;

        let now = self.clock.now();
        self.scan = Some(ScanSession {
            standard,
            req,
            mode,
            floor_khz: req.range_khz.0,
            started: now,
            scan_ms_total: 0,
            timeout_ms_total: 0,
            decisions: 0,
            timeouts: 0,
            hw_active: false,
            pending_resume: false,
            event_ref: now,
            saved_props,
        });
        debug!("Scan session opened: {:?} over {:?} kHz", mode, req.range_khz);
        Ok(())
    }

    /// Service the scan until a channel is found, the range is exhausted,
    /// or a terminal condition arises.
    pub fn seek_next(&mut self) -> Result<SeekResult, ScanError> {
        let mut session = self.scan.take().ok_or(ScanError::NoSession)?;
        let entered = self.clock.now();

        let result = match session.mode {
            ScanMode::Stepped => self.seek_stepped(&mut session),
            ScanMode::Autonomous => self.seek_autonomous(&mut session),
        };

        session.scan_ms_total += self.clock.elapsed_ms(entered);
        self.scan = Some(session);
        result
    }

    /// Accessor for the live session, if any.
    pub fn scan_session(&self) -> Option<&ScanSession> {
        self.scan.as_ref()
    }

    /// Close the session and restore every acquisition parameter the scan
    /// overrode, whether or not anything was found.
    pub fn seek_end(&mut self) -> Result<(), ScanError> {
        let session = self.scan.take().ok_or(ScanError::NoSession)?;
        if session.hw_active {
            self.scan_ctrl(scan_action::ABORT)?;
        }
        for (code, value) in &session.saved_props {
            self.write_prop(*code, *value)?;
        }
        debug!(
            "Scan session closed: {} decisions, {} timeouts, {} ms scanning ({} ms in timeouts)",
            session.decisions, session.timeouts, session.scan_ms_total, session.timeout_ms_total
        );
        Ok(())
    }

    // ---- stepped mode ---------------------------------------------------

    fn seek_stepped(&mut self, session: &mut ScanSession) -> Result<SeekResult, ScanError> {
        let standard = session.standard;
        let Some(media) = standard.media() else {
            return Err(ScanError::InvalidRequest("front end is asleep"));
        };
        let (range_lo, range_hi) = session.req.range_khz;
        let step = session.req.step_khz;
        let handshake_start = self.clock.now();

        let mut freq = session.floor_khz.max(range_lo);
        loop {
            if freq > range_hi {
                session.floor_khz = freq;
                return Ok(SeekResult::NotFound);
            }
            if self.seek_abort {
                self.seek_abort = false;
                session.floor_khz = freq;
                return Ok(SeekResult::Aborted);
            }

            self.tuner_tune(media, freq, session.req.step_khz)?;

            // Cheap pre-read: skip silent candidates without a lock wait.
            let rssi = self.tuner_rssi(media)?;
            if rssi < session.req.min_rssi_dbm {
                freq += step;
                session.floor_khz = freq;
                continue;
            }

            self.restart_demod()?;
            self.clock
                .sleep(Duration::from_millis(standard.min_lock_ms()));

            let deadline_ms =
                standard.max_lock_ms(session.req.symbol_rate_bounds.1, true);
            let candidate_start = self.clock.now();
            let verdict = loop {
                if self.seek_abort {
                    self.seek_abort = false;
                    session.floor_khz = freq;
                    return Ok(SeekResult::Aborted);
                }
                let status = self.demod_status()?;
                if status.dl {
                    break Some(status);
                }
                if status.never_lock {
                    break None;
                }
                if self.clock.elapsed_ms(candidate_start) >= deadline_ms {
                    session.timeouts += 1;
                    session.timeout_ms_total += self.clock.elapsed_ms(candidate_start);
                    break None;
                }
                if self.config.handshake.enabled
                    && self.clock.elapsed_ms(handshake_start) >= self.config.handshake.period_ms
                {
                    session.floor_khz = freq;
                    let elapsed_ms = self.clock.elapsed_ms(session.started);
                    return Ok(SeekResult::Searching {
                        elapsed_ms: elapsed_ms.max(2),
                    });
                }
                self.clock
                    .sleep(Duration::from_millis(self.config.timing.scan_poll_ms));
            };

            if verdict.is_some() {
                let detail = self.scan_detail()?;
                session.decisions += 1;
                let next_floor = freq + step;
                session.floor_khz = next_floor;
                return Ok(SeekResult::Found(FoundChannel {
                    frequency_khz: freq,
                    symbol_rate: detail.symbol_rate,
                    standard: detail.standard.unwrap_or(standard),
                    constellation: detail.constellation,
                    streams: detail.streams,
                    next_floor_khz: next_floor,
                }));
            }
            freq += step;
            session.floor_khz = freq;
        }
    }

    // ---- autonomous mode ------------------------------------------------

    fn seek_autonomous(&mut self, session: &mut ScanSession) -> Result<SeekResult, ScanError> {
        let standard = session.standard;
        let media = standard.media().unwrap_or(Media::Satellite);
        let handshake_start = self.clock.now();

        if !session.hw_active {
            self.scan_ctrl(scan_action::START)?;
            session.hw_active = true;
            session.event_ref = self.clock.now();
        } else if session.pending_resume {
            // The previous seek stopped on a found channel; release the
            // hardware before listening again.
            self.ack_and_resume(session)?;
            session.pending_resume = false;
            session.event_ref = self.clock.now();
        }

        loop {
            if self.seek_abort {
                self.seek_abort = false;
                self.scan_ctrl(scan_action::ABORT)?;
                session.hw_active = false;
                return Ok(SeekResult::Aborted);
            }

            let (_busy, code, freq_khz) = self.scan_status()?;
            match code {
                event::TUNE_REQUEST => {
                    session.event_ref = self.clock.now();
                    let tune_khz = if standard.is_satellite() {
                        self.route_satellite(freq_khz)?
                    } else {
                        freq_khz
                    };
                    self.tuner_tune(media, tune_khz, 0)?;
                    session.floor_khz = session.floor_khz.max(freq_khz);
                    self.ack_and_resume(session)?;
                }
                event::CHANNEL_FOUND => {
                    session.event_ref = self.clock.now();
                    let detail = self.scan_detail()?;
                    session.decisions += 1;
                    // Skip past the carrier's width so the same channel is
                    // not re-discovered by the next seek.
                    let width_khz = detail.symbol_rate / 1_000;
                    let next_floor = session.floor_khz.max(freq_khz + width_khz);
                    session.floor_khz = next_floor;
                    session.pending_resume = true;
                    return Ok(SeekResult::Found(FoundChannel {
                        frequency_khz: freq_khz,
                        symbol_rate: detail.symbol_rate,
                        standard: detail.standard.unwrap_or(standard),
                        constellation: detail.constellation,
                        streams: detail.streams,
                        next_floor_khz: next_floor,
                    }));
                }
                event::ERROR | event::ENDED => {
                    self.scan_ctrl(scan_action::ABORT)?;
                    session.hw_active = false;
                    return Ok(SeekResult::NotFound);
                }
                event::DEBUG => {
                    session.event_ref = self.clock.now();
                    let elapsed_ms = self.clock.elapsed_ms(session.started);
                    self.sink.event(&DiagEvent {
                        phase: "scan/debug",
                        elapsed_ms,
                        snapshot: None,
                    });
                    self.ack_and_resume(session)?;
                }
                _ => {
                    // IDLE / SEARCHING: nothing to service yet.
                }
            }

            let since_event = self.clock.elapsed_ms(session.event_ref);
            if since_event >= self.config.timing.scan_event_timeout_ms {
                session.timeouts += 1;
                session.timeout_ms_total += since_event;
                // A stuck decision (carrier found, lock never concluded)
                // is worth a register dump before the timeout surfaces.
                let status = self.demod_status()?;
                if status.pcl && !status.dl {
                    self.dump_scan_diagnostics(session)?;
                }
                self.scan_ctrl(scan_action::ABORT)?;
                session.hw_active = false;
                warn!("Blind scan timed out {since_event} ms after last event");
                return Ok(SeekResult::TimedOut);
            }
            if self.config.handshake.enabled
                && self.clock.elapsed_ms(handshake_start) >= self.config.handshake.period_ms
            {
                let elapsed_ms = self.clock.elapsed_ms(session.started);
                return Ok(SeekResult::Searching {
                    elapsed_ms: elapsed_ms.max(2),
                });
            }
            self.clock
                .sleep(Duration::from_millis(self.config.timing.scan_poll_ms));
        }
    }

    /// Wait for the hardware busy flag to clear, bounded by wall clock,
    /// then issue the resume command.
    fn ack_and_resume(&mut self, session: &mut ScanSession) -> Result<(), ScanError> {
        let bound_ms = self.config.timing.scan_busy_stuck_ms;
        let started = self.clock.now();
        loop {
            let (busy, _, _) = self.scan_status()?;
            if !busy {
                break;
            }
            if self.clock.elapsed_ms(started) >= bound_ms {
                // Stuck firmware: kill the whole scan.
                let _ = self.scan_ctrl(scan_action::ABORT);
                session.hw_active = false;
                return Err(ScanError::BusyStuck { waited_ms: bound_ms });
            }
            self.clock
                .sleep(Duration::from_millis(self.config.timing.scan_poll_ms));
        }
        self.scan_ctrl(scan_action::RESUME)?;
        Ok(())
    }

    fn scan_ctrl(&mut self, action: u8) -> Result<(), TransportError> {
        self.demod_command(&[opcode::SCAN_CTRL, action])
    }

    /// Read `(busy, event, frequency_khz)` from the scanner.
    fn scan_status(&mut self) -> Result<(bool, u8, u32), TransportError> {
        let mut reply = [0u8; 7];
        self.demod_read(&[opcode::SCAN_STATUS], &mut reply)?;
        let freq = u32::from_le_bytes([reply[3], reply[4], reply[5], reply[6]]);
        Ok((reply[1] != 0, reply[2], freq))
    }

    fn scan_detail(&mut self) -> Result<ScanDetail, TransportError> {
        let mut reply = [0u8; 9];
        self.demod_read(&[opcode::SCAN_DETAIL], &mut reply)?;
        let symbol_rate = u32::from_le_bytes([reply[1], reply[2], reply[3], reply[4]]);
        let standard = decode_standard(reply[8]);
        Ok(ScanDetail {
            symbol_rate,
            constellation: reply[5],
            streams: u16::from(reply[6]) | (u16::from(reply[7]) << 8),
            standard,
        })
    }

    fn dump_scan_diagnostics(&mut self, session: &ScanSession) -> Result<(), TransportError> {
        let mut demod_raw = [0u8; 8];
        self.demod_read(
            &[opcode::DEMOD_STATUS, session.standard.code()],
            &mut demod_raw,
        )?;
        let mut scan_raw = [0u8; 7];
        self.demod_read(&[opcode::SCAN_STATUS], &mut scan_raw)?;
        let mut snapshot = Vec::with_capacity(demod_raw.len() + scan_raw.len());
        snapshot.extend_from_slice(&demod_raw);
        snapshot.extend_from_slice(&scan_raw);

        let elapsed_ms = self.clock.elapsed_ms(session.started);
        self.sink.event(&DiagEvent {
            phase: "scan/timeout-dump",
            elapsed_ms,
            snapshot: Some(&snapshot),
        });
        Ok(())
    }
}

/// Detail registers read after a found-channel event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScanDetail {
    symbol_rate: u32,
    constellation: u8,
    streams: u16,
    standard: Option<Standard>,
}

fn decode_standard(code: u8) -> Option<Standard> {
    Some(match code {
        0x01 => Standard::DvbT,
        0x02 => Standard::DvbT2,
        0x03 => Standard::IsdbT,
        0x04 => Standard::DvbC,
        0x05 => Standard::DvbC2,
        0x06 => Standard::LegacyQam,
        0x07 => Standard::Analog,
        0x08 => Standard::DvbS,
        0x09 => Standard::DvbS2,
        0x0A => Standard::Dss,
        _ => return None,
    })
}
