//! Power and clock domain bookkeeping.
//!
//! Every standard switch reduces to comparing two five-flag sets: what the
//! outgoing standard was using and what the incoming one needs, across
//! {demodulator, terrestrial tuner, terrestrial clock, satellite tuner,
//! satellite clock}. A tuner is "used" only when it is the active media; a
//! clock is "used" when it feeds the demodulator's reference — possibly
//! from the other domain's tuner — or when policy pins it on.

use crate::config::{Capabilities, ClockConfig, ClockPolicy, ClockSource};
use crate::standard::{Media, Standard};

/// One side (used or needed) of a switch computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainUse {
    pub demod: bool,
    pub ter_tuner: bool,
    pub ter_clock: bool,
    pub sat_tuner: bool,
    pub sat_clock: bool,
}

impl DomainUse {
    /// Nothing powered.
    pub fn none() -> Self {
        Self::default()
    }

    /// Raw derivation for a standard, before policy overrides.
    pub fn for_standard(standard: Standard, caps: &Capabilities, clocks: &ClockConfig) -> Self {
        let mut use_ = Self::none();
        let Some(media) = standard.media() else {
            return use_;
        };

        use_.demod = true;
        match media {
            Media::Terrestrial => {
                use_.ter_tuner = caps.has_terrestrial;
                match clocks.ter_source {
                    ClockSource::Xtal => {}
                    ClockSource::TerTuner => use_.ter_clock = caps.has_terrestrial,
                    ClockSource::SatTuner => use_.sat_clock = caps.has_satellite,
                }
            }
            Media::Satellite => {
                use_.sat_tuner = caps.has_satellite;
                match clocks.sat_source {
                    ClockSource::Xtal => {}
                    ClockSource::TerTuner => use_.ter_clock = caps.has_terrestrial,
                    ClockSource::SatTuner => use_.sat_clock = caps.has_satellite,
                }
            }
        }
        use_
    }

    /// Clock-policy overrides: `AlwaysOn` forces a clock needed,
    /// `AlwaysOff` forces it not needed, overriding the raw derivation.
    pub fn apply_policy(&mut self, caps: &Capabilities, clocks: &ClockConfig) {
        match clocks.ter_policy {
            ClockPolicy::AlwaysOn => self.ter_clock = caps.has_terrestrial,
            ClockPolicy::AlwaysOff => self.ter_clock = false,
            ClockPolicy::Managed => {}
        }
        match clocks.sat_policy {
            ClockPolicy::AlwaysOn => self.sat_clock = caps.has_satellite,
            ClockPolicy::AlwaysOff => self.sat_clock = false,
            ClockPolicy::Managed => {}
        }
    }

    /// Derivation with policy applied.
    pub fn effective(standard: Standard, caps: &Capabilities, clocks: &ClockConfig) -> Self {
        let mut use_ = Self::for_standard(standard, caps, clocks);
        use_.apply_policy(caps, clocks);
        use_
    }

    /// Per-media tuner flag.
    pub fn tuner(&self, media: Media) -> bool {
        match media {
            Media::Terrestrial => self.ter_tuner,
            Media::Satellite => self.sat_tuner,
        }
    }

    /// Per-media clock flag.
    pub fn clock(&self, media: Media) -> bool {
        match media {
            Media::Terrestrial => self.ter_clock,
            Media::Satellite => self.sat_clock,
        }
    }
}

/// Must the demodulator be powered down before this transition?
///
/// Yes when it was used and no longer is, and also whenever either clock
/// domain flips in either direction: a clock-source change always requires
/// a demodulator restart.
pub fn demod_sleep_request(used: &DomainUse, needed: &DomainUse) -> bool {
    (used.demod && !needed.demod)
        || used.ter_clock != needed.ter_clock
        || used.sat_clock != needed.sat_clock
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities::default()
    }

    #[test]
    fn test_sleep_needs_nothing() {
        let use_ = DomainUse::for_standard(Standard::Sleep, &caps(), &ClockConfig::default());
        assert_eq!(use_, DomainUse::none());
    }

    #[test]
    fn test_terrestrial_standard_uses_ter_tuner_and_its_clock() {
        let use_ = DomainUse::for_standard(Standard::DvbT2, &caps(), &ClockConfig::default());
        assert!(use_.demod && use_.ter_tuner && use_.ter_clock);
        assert!(!use_.sat_tuner && !use_.sat_clock);
    }

    #[test]
    fn test_cross_domain_clock_supply() {
        // Satellite reception clocked from the terrestrial tuner: the ter
        // clock is used even though the ter tuner is not the active media.
        let clocks = ClockConfig {
            sat_source: ClockSource::TerTuner,
            ..ClockConfig::default()
        };
        let use_ = DomainUse::for_standard(Standard::DvbS2, &caps(), &clocks);
        assert!(use_.sat_tuner);
        assert!(use_.ter_clock);
        assert!(!use_.ter_tuner);
        assert!(!use_.sat_clock);
    }

    #[test]
    fn test_xtal_source_needs_no_tuner_clock() {
        let clocks = ClockConfig {
            ter_source: ClockSource::Xtal,
            ..ClockConfig::default()
        };
        let use_ = DomainUse::for_standard(Standard::DvbT, &caps(), &clocks);
        assert!(use_.ter_tuner && !use_.ter_clock && !use_.sat_clock);
    }

    #[test]
    fn test_missing_capability_suppresses_flags() {
        let caps = Capabilities {
            has_terrestrial: false,
            ..Capabilities::default()
        };
        let use_ = DomainUse::for_standard(Standard::DvbT, &caps, &ClockConfig::default());
        assert!(use_.demod);
        assert!(!use_.ter_tuner && !use_.ter_clock);
    }

    #[test]
    fn test_policy_always_on_forces_clock_even_in_sleep() {
        let clocks = ClockConfig {
            sat_policy: ClockPolicy::AlwaysOn,
            ..ClockConfig::default()
        };
        let use_ = DomainUse::effective(Standard::Sleep, &caps(), &clocks);
        assert!(use_.sat_clock);
        assert!(!use_.demod);
    }

    #[test]
    fn test_policy_always_off_overrides_raw_derivation() {
        let clocks = ClockConfig {
            ter_policy: ClockPolicy::AlwaysOff,
            ..ClockConfig::default()
        };
        // Raw derivation wants the ter clock (ter_source = TerTuner).
        let use_ = DomainUse::effective(Standard::DvbT, &caps(), &clocks);
        assert!(use_.ter_tuner);
        assert!(!use_.ter_clock);
    }

    #[test]
    fn test_clock_flip_requests_demod_sleep() {
        let clocks = ClockConfig::default();
        let ter = DomainUse::effective(Standard::DvbT2, &caps(), &clocks);
        let sat = DomainUse::effective(Standard::DvbS2, &caps(), &clocks);
        // T2 -> S2 flips both tuner clocks, so the demod must restart.
        assert!(demod_sleep_request(&ter, &sat));
        // Same standard twice: no sleep request.
        assert!(!demod_sleep_request(&ter, &ter));
    }

    #[test]
    fn test_demod_teardown_requests_sleep() {
        let clocks = ClockConfig {
            ter_source: ClockSource::Xtal,
            sat_source: ClockSource::Xtal,
            ..ClockConfig::default()
        };
        let ter = DomainUse::effective(Standard::DvbT, &caps(), &clocks);
        let off = DomainUse::effective(Standard::Sleep, &caps(), &clocks);
        assert!(demod_sleep_request(&ter, &off));
        assert!(!demod_sleep_request(&off, &ter));
    }
}
