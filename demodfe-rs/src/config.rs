//! Front-end configuration.
//!
//! Everything the core cannot learn from the hardware itself lives here:
//! which tuners are fitted, who supplies the demodulator clock in each
//! media, clock-keepalive policies, handshake pacing, and the LNB / single-
//! cable installation. Hosts typically deserialize this from a TOML file
//! next to their own configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use demodfe_protocol::{UnicableMode, EN50494_UB_MAX, EN50607_UB_MAX};

/// Configuration errors detected before any hardware is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The TOML text did not parse.
    #[error("Configuration parse error: {0}")]
    Parse(String),

    /// Handshake mode is enabled with a zero period.
    #[error("Handshake period must be non-zero when handshake is enabled")]
    ZeroHandshakePeriod,

    /// The low-band LO must sit below the high-band LO.
    #[error("LNB LO frequencies out of order: low {low_khz} kHz >= high {high_khz} kHz")]
    LoOutOfOrder { low_khz: u32, high_khz: u32 },

    /// The configured user band is not addressable in the installed mode.
    #[error("User band {index} not addressable in {mode:?}")]
    UserBandOutOfRange { index: u8, mode: UnicableMode },

    /// The user-band center must lie inside the satellite IF range.
    #[error("User band center {0} kHz outside 950000..=2150000 kHz")]
    UserBandCenterOutOfRange(u32),

    /// A front end with no tuner at all cannot do anything.
    #[error("At least one of terrestrial/satellite must be fitted")]
    NoTunersFitted,
}

/// Which dies and tuners this particular board carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub has_terrestrial: bool,
    pub has_satellite: bool,
    pub die: DiePackage,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            has_terrestrial: true,
            has_satellite: true,
            die: DiePackage::Single,
        }
    }
}

/// Die selection for dual-die packages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiePackage {
    #[default]
    Single,
    A,
    B,
}

/// Who feeds the demodulator's reference clock in a given media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockSource {
    /// The demodulator's own crystal.
    Xtal,
    /// Clock output of the terrestrial tuner.
    TerTuner,
    /// Clock output of the satellite tuner.
    SatTuner,
}

/// Keepalive policy for one tuner's clock output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockPolicy {
    /// Clock follows need, computed per standard switch.
    #[default]
    Managed,
    /// Clock is never switched off.
    AlwaysOn,
    /// Clock is never switched on.
    AlwaysOff,
}

/// Clock routing and keepalive configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Demodulator clock source while in a terrestrial standard.
    pub ter_source: ClockSource,
    /// Demodulator clock source while in a satellite standard.
    pub sat_source: ClockSource,
    pub ter_policy: ClockPolicy,
    pub sat_policy: ClockPolicy,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            ter_source: ClockSource::TerTuner,
            sat_source: ClockSource::SatTuner,
            ter_policy: ClockPolicy::Managed,
            sat_policy: ClockPolicy::Managed,
        }
    }
}

/// Cooperative-resumption configuration shared by both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub enabled: bool,
    /// How long an engine may poll before returning control, ms.
    pub period_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_ms: 500,
        }
    }
}

/// Outdoor-unit installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LnbConfig {
    pub mode: UnicableMode,
    /// User-band slot this receiver owns.
    pub user_band: u8,
    /// Center frequency of the owned slot, kHz.
    pub user_band_center_khz: u32,
    /// Low-band local oscillator, kHz.
    pub lo_low_khz: u32,
    /// High-band local oscillator, kHz.
    pub lo_high_khz: u32,
    /// Downlink frequency above which the high band is used, kHz.
    pub band_switch_khz: u32,
    /// PIN for the EN50607 protected variant.
    pub pin: Option<u8>,
}

impl Default for LnbConfig {
    fn default() -> Self {
        Self {
            mode: UnicableMode::Disabled,
            user_band: 0,
            user_band_center_khz: 1_210_000,
            lo_low_khz: 9_750_000,
            lo_high_khz: 10_600_000,
            band_switch_khz: 11_700_000,
            pin: None,
        }
    }
}

/// Bus addresses of the three devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusAddresses {
    pub demod: u8,
    pub ter_tuner: u8,
    pub sat_tuner: u8,
}

impl Default for BusAddresses {
    fn default() -> Self {
        Self {
            demod: 0x64,
            ter_tuner: 0x60,
            sat_tuner: 0x58,
        }
    }
}

/// Poll pacing for the lock and scan engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Lock-status poll cadence, ms.
    pub lock_poll_ms: u64,
    /// Scan-event poll cadence, ms.
    pub scan_poll_ms: u64,
    /// Wall-clock bound on a stuck hardware "busy" flag, ms.
    pub scan_busy_stuck_ms: u64,
    /// Ceiling between serviced scan events before a timeout, ms.
    pub scan_event_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            lock_poll_ms: 40,
            scan_poll_ms: 40,
            scan_busy_stuck_ms: 2_000,
            scan_event_timeout_ms: 10_000,
        }
    }
}

/// Complete front-end configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontEndConfig {
    pub capabilities: Capabilities,
    pub clocks: ClockConfig,
    pub handshake: HandshakeConfig,
    pub lnb: LnbConfig,
    pub addresses: BusAddresses,
    pub timing: TimingConfig,
    /// Spectrum inversion restored after every standard switch:
    /// 0 normal, 1 inverted, 2 auto.
    pub spectrum_inversion: u16,
}

impl FrontEndConfig {
    /// Parse and validate a TOML rendition.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.capabilities.has_terrestrial && !self.capabilities.has_satellite {
            return Err(ConfigError::NoTunersFitted);
        }
        if self.handshake.enabled && self.handshake.period_ms == 0 {
            return Err(ConfigError::ZeroHandshakePeriod);
        }
        if self.lnb.lo_low_khz >= self.lnb.lo_high_khz {
            return Err(ConfigError::LoOutOfOrder {
                low_khz: self.lnb.lo_low_khz,
                high_khz: self.lnb.lo_high_khz,
            });
        }
        let ub_max = match self.lnb.mode {
            UnicableMode::Disabled => None,
            UnicableMode::Unicable1 => Some(EN50494_UB_MAX),
            UnicableMode::Unicable2 => Some(EN50607_UB_MAX),
        };
        if let Some(max) = ub_max {
            if self.lnb.user_band > max {
                return Err(ConfigError::UserBandOutOfRange {
                    index: self.lnb.user_band,
                    mode: self.lnb.mode,
                });
            }
            if !(950_000..=2_150_000).contains(&self.lnb.user_band_center_khz) {
                return Err(ConfigError::UserBandCenterOutOfRange(
                    self.lnb.user_band_center_khz,
                ));
            }
        }
        Ok(())
    }
}
