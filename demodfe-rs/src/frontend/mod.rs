//! The front-end aggregate and its hardware helpers.
//!
//! [`FrontEnd`] owns one demodulator, the fitted tuners, and every piece of
//! cross-cutting state the engines share: standards, init flags, abort
//! flags, the property cache, the LNB link and the handshake bookkeeping.
//! The orchestrator, lock engine, scan engine and LNB layer are implemented
//! in their own modules as `impl FrontEnd` blocks:
//!
//! - [`switch`]: standard-switch orchestrator
//! - [`lock`]: carrier lock engine
//! - [`scan`]: blind-scan engine
//! - [`power`]: power/clock domain derivation

pub mod lock;
pub mod power;
pub mod scan;
pub mod switch;

use crate::command::{self, opcode, tuner_opcode};
use crate::config::{ConfigError, FrontEndConfig};
use crate::diag::{DiagnosticsSink, NullSink};
use crate::firmware::catalog::{FirmwareVersion, ImageCatalog, PartIdentity};
use crate::firmware::{self, FirmwareInfo, LoadError, LoadOptions, TransferHint};
use crate::lnb::LnbLink;
use crate::properties::{self, PropertyCache};
use crate::standard::{Media, Standard};
use crate::time::Clock;
use crate::transport::{PassthroughGuard, TransportError, TransportPort};

/// Firmware presence on the demodulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareState {
    NotLoaded,
    Loaded(FirmwareVersion),
}

/// Power state of one tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    Standby,
    Active,
}

/// Mutable state of one fitted tuner.
#[derive(Debug, Clone)]
pub struct TunerState {
    pub addr: u8,
    pub power: PowerState,
    pub clock_on: bool,
    /// One-time hardware init performed.
    pub init_done: bool,
}

impl TunerState {
    fn new(addr: u8) -> Self {
        Self {
            addr,
            power: PowerState::Off,
            clock_on: false,
            init_done: false,
        }
    }
}

/// Demodulator identity and liveness.
#[derive(Debug, Clone)]
pub struct Demodulator {
    pub addr: u8,
    pub firmware: FirmwareState,
    pub sleeping: bool,
    pub identity: Option<PartIdentity>,
}

/// Decoded demodulation status for the active standard.
///
/// The per-standard register decode lives outside the core; this is the
/// fixed shape every standard's decode produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemodStatus {
    /// Carrier found (pcl).
    pub pcl: bool,
    /// Full demodulator lock (dl).
    pub dl: bool,
    /// The search concluded no compatible signal is present.
    pub never_lock: bool,
    pub quality: SignalQuality,
}

/// Signal measurements reported alongside the lock flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalQuality {
    pub rssi_dbm: i16,
    pub snr_db: f32,
    /// Bit-error-rate exponent (larger is better).
    pub ber_exp: u8,
    pub uncorrected: u16,
}

/// One physical front end: a demodulator plus its fitted tuners.
pub struct FrontEnd<T: TransportPort, C: Clock> {
    pub(crate) port: T,
    pub(crate) clock: C,
    pub(crate) sink: Box<dyn DiagnosticsSink>,
    pub(crate) config: FrontEndConfig,
    pub(crate) catalog: ImageCatalog,
    pub(crate) demod: Demodulator,
    pub(crate) ter: Option<TunerState>,
    pub(crate) sat: Option<TunerState>,
    pub(crate) cache: PropertyCache,
    pub(crate) lnb: LnbLink,
    pub(crate) previous_standard: Standard,
    pub(crate) current_standard: Standard,
    /// Post-load domain configuration (AGC routing, pin defaults) done.
    pub(crate) ter_configured: bool,
    pub(crate) sat_configured: bool,
    pub(crate) auto_detect_ter: bool,
    pub(crate) auto_detect_sat: bool,
    pub(crate) lock_abort: bool,
    pub(crate) seek_abort: bool,
    pub(crate) lock_ctx: Option<lock::LockContext>,
    pub(crate) scan: Option<scan::ScanSession>,
}

impl<T: TransportPort, C: Clock> FrontEnd<T, C> {
    /// Build a front end over a transport. The catalog is consulted
    /// whenever the orchestrator must bring up an unloaded demodulator.
    pub fn new(
        port: T,
        clock: C,
        config: FrontEndConfig,
        catalog: ImageCatalog,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ter = config
            .capabilities
            .has_terrestrial
            .then(|| TunerState::new(config.addresses.ter_tuner));
        let sat = config
            .capabilities
            .has_satellite
            .then(|| TunerState::new(config.addresses.sat_tuner));
        let demod = Demodulator {
            addr: config.addresses.demod,
            firmware: FirmwareState::NotLoaded,
            sleeping: true,
            identity: None,
        };
        Ok(Self {
            port,
            clock,
            sink: Box::new(NullSink),
            config,
            catalog,
            demod,
            ter,
            sat,
            cache: PropertyCache::new(),
            lnb: LnbLink::default(),
            previous_standard: Standard::Sleep,
            current_standard: Standard::Sleep,
            ter_configured: false,
            sat_configured: false,
            auto_detect_ter: false,
            auto_detect_sat: false,
            lock_abort: false,
            seek_abort: false,
            lock_ctx: None,
            scan: None,
        })
    }

    /// Install a diagnostics sink; replaces the discarding default.
    pub fn set_diagnostics_sink(&mut self, sink: Box<dyn DiagnosticsSink>) {
        self.sink = sink;
    }

    pub fn config(&self) -> &FrontEndConfig {
        &self.config
    }

    /// Standard of the last completed switch.
    pub fn previous_standard(&self) -> Standard {
        self.previous_standard
    }

    pub fn current_standard(&self) -> Standard {
        self.current_standard
    }

    pub fn firmware_state(&self) -> FirmwareState {
        self.demod.firmware
    }

    pub fn demodulator(&self) -> &Demodulator {
        &self.demod
    }

    /// Bootstrap the demodulator firmware outside a standard switch, e.g.
    /// at cold start before the first `switch_to`.
    pub fn bootstrap(&mut self, hint: TransferHint) -> Result<FirmwareInfo, LoadError> {
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
            &LoadOptions::default(),
        )?;
        self.demod.firmware = FirmwareState::Loaded(info.version);
        self.demod.identity = Some(info.identity);
        self.demod.sleeping = false;
        Ok(info)
    }

    pub fn tuner(&self, media: Media) -> Option<&TunerState> {
        match media {
            Media::Terrestrial => self.ter.as_ref(),
            Media::Satellite => self.sat.as_ref(),
        }
    }

    /// Request cancellation of an in-flight `lock`. Observed (and cleared)
    /// at the next poll tick.
    pub fn abort_lock(&mut self) {
        self.lock_abort = true;
    }

    /// Request cancellation of an in-flight scan session.
    pub fn abort_seek(&mut self) {
        self.seek_abort = true;
    }

    /// Standard auto-detection flag for a media domain.
    pub fn set_auto_detect(&mut self, media: Media, enabled: bool) {
        match media {
            Media::Terrestrial => self.auto_detect_ter = enabled,
            Media::Satellite => self.auto_detect_sat = enabled,
        }
    }

    pub(crate) fn auto_detect(&self, media: Media) -> bool {
        match media {
            Media::Terrestrial => self.auto_detect_ter,
            Media::Satellite => self.auto_detect_sat,
        }
    }

    /// Signal measurements for the currently tuned standard.
    pub fn measure(&mut self) -> Result<SignalQuality, TransportError> {
        Ok(self.demod_status()?.quality)
    }

    // ---- hardware helpers shared by the engines -------------------------

    pub(crate) fn tuner_state_mut(&mut self, media: Media) -> Option<&mut TunerState> {
        match media {
            Media::Terrestrial => self.ter.as_mut(),
            Media::Satellite => self.sat.as_mut(),
        }
    }

    pub(crate) fn demod_command(&mut self, cmd: &[u8]) -> Result<(), TransportError> {
        let Self { port, clock, demod, .. } = self;
        command::exec_simple(port, clock, demod.addr, cmd)
    }

    pub(crate) fn demod_read(&mut self, cmd: &[u8], reply: &mut [u8]) -> Result<(), TransportError> {
        let Self { port, clock, demod, .. } = self;
        command::exec(port, clock, demod.addr, cmd, reply)
    }

    /// Diff-based property write through the cache.
    pub(crate) fn write_prop(&mut self, code: u16, value: u16) -> Result<(), TransportError> {
        let Self {
            port,
            clock,
            cache,
            demod,
            ..
        } = self;
        properties::write_property(port, clock, cache, demod.addr, code, value)
    }

    /// Soft demodulator restart: re-acquire with the current properties.
    pub(crate) fn restart_demod(&mut self) -> Result<(), TransportError> {
        self.demod_command(&[opcode::RESTART])
    }

    /// Read and decode the demodulation status for the active standard.
    pub(crate) fn demod_status(&mut self) -> Result<DemodStatus, TransportError> {
        let standard = self.current_standard;
        let mut reply = [0u8; 8];
        self.demod_read(&[opcode::DEMOD_STATUS, standard.code()], &mut reply)?;
        Ok(DemodStatus {
            pcl: reply[1] & 0x01 != 0,
            dl: reply[1] & 0x02 != 0,
            never_lock: reply[1] & 0x04 != 0,
            quality: SignalQuality {
                rssi_dbm: i16::from(reply[2] as i8),
                snr_db: f32::from(reply[3]) / 4.0,
                ber_exp: reply[4],
                uncorrected: u16::from(reply[5]) | (u16::from(reply[6]) << 8),
            },
        })
    }

    /// Issue one command to a tuner behind the pass-through gate. The gate
    /// is closed again before returning, on every path.
    pub(crate) fn tuner_command(&mut self, media: Media, cmd: &[u8]) -> Result<(), TransportError> {
        let addr = match self.tuner(media) {
            Some(t) => t.addr,
            None => return Ok(()),
        };
        let Self { port, clock, .. } = self;
        let mut gate = PassthroughGuard::open(port)?;
        command::exec_simple(gate.port(), clock, addr, cmd)
    }

    /// Command with a reply, through the gate.
    pub(crate) fn tuner_read(
        &mut self,
        media: Media,
        cmd: &[u8],
        reply: &mut [u8],
    ) -> Result<(), TransportError> {
        let addr = match self.tuner(media) {
            Some(t) => t.addr,
            None => return Ok(()),
        };
        let Self { port, clock, .. } = self;
        let mut gate = PassthroughGuard::open(port)?;
        command::exec(gate.port(), clock, addr, cmd, reply)
    }

    /// Tune a tuner. Frequencies are kHz on the wire throughout the core.
    pub(crate) fn tuner_tune(
        &mut self,
        media: Media,
        freq_khz: u32,
        bandwidth_khz: u32,
    ) -> Result<(), TransportError> {
        let f = freq_khz.to_le_bytes();
        let bw_code = (bandwidth_khz / 1_000).min(u32::from(u8::MAX)) as u8;
        self.tuner_command(
            media,
            &[tuner_opcode::TUNE, f[0], f[1], f[2], f[3], bw_code],
        )
    }

    /// Wideband RSSI estimate from a tuner, dBm.
    pub(crate) fn tuner_rssi(&mut self, media: Media) -> Result<i16, TransportError> {
        let mut reply = [0u8; 2];
        self.tuner_read(media, &[tuner_opcode::RSSI], &mut reply)?;
        Ok(i16::from(reply[1] as i8))
    }

    /// Program the satellite tuner's low-pass filter cutoff.
    pub(crate) fn tuner_lpf(&mut self, cutoff_khz: u32) -> Result<(), TransportError> {
        let c = cutoff_khz.to_le_bytes();
        self.tuner_command(Media::Satellite, &[tuner_opcode::LPF, c[0], c[1], c[2], c[3]])
    }
}
