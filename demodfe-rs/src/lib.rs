//! demodfe - control core for a multi-standard broadcast demodulator
//! front end.
//!
//! The crate drives a demodulator chip plus one terrestrial and one
//! satellite tuner over a narrow register/command bus: firmware bootstrap,
//! standard switching with minimal power/clock transitions, carrier
//! acquisition with bounded lock waits, hardware-assisted blind scanning,
//! and outdoor-unit control (DiSEqC / Unicable) on the satellite path.
//!
//! Hosts supply a [`transport::TransportPort`] over their bus, a firmware
//! [`firmware::catalog::ImageCatalog`], and a [`config::FrontEndConfig`];
//! everything else is in-memory state owned by [`frontend::FrontEnd`].
//!
//! The core is single-threaded and poll-driven: all waiting is explicit
//! sleeping through an injected [`time::Clock`], and the only suspension
//! points are the lock/scan engines' optional handshake mode, which
//! returns a `Searching` sentinel instead of blocking.

pub mod command;
pub mod config;
pub mod diag;
pub mod firmware;
pub mod frontend;
pub mod lnb;
pub mod properties;
pub mod standard;
pub mod time;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use config::{
    BusAddresses, Capabilities, ClockConfig, ClockPolicy, ClockSource, ConfigError, DiePackage,
    FrontEndConfig, HandshakeConfig, LnbConfig, TimingConfig,
};
pub use diag::{CollectingSink, DiagEvent, DiagnosticsSink, NullSink};
pub use firmware::catalog::{
    FirmwareImage, FirmwareVersion, ImageCatalog, PartIdentity, TransferPolicy,
    TransferPolicyKind,
};
pub use firmware::{BatchLoadError, FirmwareInfo, LoadError, TransferHint};
pub use frontend::lock::{
    CarrierParams, CarrierTarget, LockReport, LockResult, TuneError,
};
pub use frontend::scan::{FoundChannel, ScanError, ScanSession, SeekRequest, SeekResult};
pub use frontend::switch::{SwitchError, SwitchOptions, SwitchPhase};
pub use frontend::{DemodStatus, FirmwareState, FrontEnd, PowerState, SignalQuality};
pub use lnb::{LnbError, LnbLink, Translation};
pub use standard::{Media, Standard};
pub use time::{Clock, MonotonicClock, SimClock};
pub use transport::{PassthroughGuard, TransportError, TransportPort};
