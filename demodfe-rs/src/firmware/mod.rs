//! Firmware bootstrap.
//!
//! Brings a part from power-on into running firmware: reset into the
//! bootloader, read the part identity, pick the matching catalog image,
//! move the payload over (command bus line-by-line, command bus chunked, or
//! the bulk channel with an optional split), start it, and verify the
//! running version. A failed bulk transfer falls back to the command bus
//! exactly once; nothing else is ever retried automatically.

pub mod catalog;

use log::{debug, info, warn};
use thiserror::Error;

use crate::command::{self, opcode};
use crate::diag::{DiagEvent, DiagnosticsSink};
use crate::properties::{self, PropertyCache, SNAPSHOT_PROPS};
use crate::time::Clock;
use crate::transport::{TransportError, TransportPort};

use catalog::{FirmwareVersion, ImageCatalog, PartIdentity, TransferPolicy, TransferPolicyKind};

/// Largest payload one FW_CHUNK command carries.
pub const MAX_CHUNK: usize = 16;

/// Pacing between broadcast chunk writes, ms. Broadcast targets cannot be
/// polled for clear-to-send, so the host paces blindly.
const BROADCAST_PACE_MS: u64 = 1;

/// Preferred transfer path when the image allows a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferHint {
    /// Stay on the command bus even if a bulk channel exists.
    CommandOnly,
    /// Use the bulk channel when both image and transport support it.
    PreferBulk,
}

/// Firmware bootstrap failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Bus failure outside the chunk-0 special case.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No catalog image matches the part identity.
    #[error("No compatible firmware image for part {part:04X} rom {rom_id:02X} rev {chip_rev:02X}")]
    NoCompatibleImage { part: u16, rom_id: u8, chip_rev: u8 },

    /// The part rejected the very first firmware chunk.
    #[error("Firmware incompatible: part rejected the first chunk")]
    IncompatibleFirmware,

    /// The image payload or split table is self-inconsistent.
    #[error("Malformed firmware image: {0}")]
    MalformedImage(&'static str),

    /// The started firmware does not report the catalog version.
    #[error("Firmware version mismatch: expected {expected}, running {running}")]
    VersionMismatch {
        expected: FirmwareVersion,
        running: FirmwareVersion,
    },
}

/// Outcome of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub identity: PartIdentity,
    pub version: FirmwareVersion,
    pub policy_used: TransferPolicyKind,
    /// Transfer attempts performed; 2 after a bulk-to-command fallback.
    pub transfer_attempts: u8,
}

/// Batch bootstrap failure, tagged with the target that caused it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Batch load failed at target 0x{addr:02X}: {source}")]
pub struct BatchLoadError {
    pub addr: u8,
    #[source]
    pub source: LoadError,
}

/// Loader knobs derived from the orchestrator's force mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Part is already held in its bootloader; skip the reset.
    pub skip_power_up: bool,
    /// Transfer only; leave the firmware unstarted and unverified.
    pub skip_start: bool,
}

/// Bootstrap one part and capture its post-load property defaults.
pub fn bootstrap<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    cache: &mut PropertyCache,
    sink: &mut dyn DiagnosticsSink,
    addr: u8,
    catalog: &ImageCatalog,
    hint: TransferHint,
    opts: &LoadOptions,
) -> Result<FirmwareInfo, LoadError> {
    let started = clock.now();

    if !opts.skip_power_up {
        enter_bootloader(port, clock, addr)?;
    }

    let identity = read_part_info(port, clock, addr)?;
    sink.event(&DiagEvent {
        phase: "fw/part-info",
        elapsed_ms: clock.elapsed_ms(started),
        snapshot: None,
    });

    let image = catalog
        .select(&identity)
        .ok_or(LoadError::NoCompatibleImage {
            part: identity.part,
            rom_id: identity.rom_id,
            chip_rev: identity.chip_rev,
        })?;
    debug!(
        "Selected firmware {} for part {:04X} rev {:02X}",
        image.version(),
        identity.part,
        identity.chip_rev
    );

    let mut attempts = 1u8;
    let policy_used = match &image.policy {
        TransferPolicy::Bulk { split_offsets }
            if hint == TransferHint::PreferBulk && port.bulk_capacity().is_some() =>
        {
            match bulk_transfer(port, &image.payload, split_offsets) {
                Ok(()) => TransferPolicyKind::Bulk,
                Err(LoadError::Transport(e)) => {
                    // The one automatic retry in the core.
                    warn!("Bulk firmware transfer failed ({e}), retrying over the command bus");
                    attempts += 1;
                    chunked_contiguous_transfer(port, clock, addr, &image.payload)?;
                    TransferPolicyKind::Chunked
                }
                Err(other) => return Err(other),
            }
        }
        TransferPolicy::Bulk { .. } => {
            chunked_contiguous_transfer(port, clock, addr, &image.payload)?;
            TransferPolicyKind::Chunked
        }
        TransferPolicy::Lines { line_len } => {
            line_transfer(port, clock, addr, &image.payload, *line_len)?;
            TransferPolicyKind::Lines
        }
        TransferPolicy::Chunked => {
            chunked_lines_transfer(port, clock, addr, &image.payload)?;
            TransferPolicyKind::Chunked
        }
    };
    sink.event(&DiagEvent {
        phase: "fw/transfer",
        elapsed_ms: clock.elapsed_ms(started),
        snapshot: None,
    });

    if opts.skip_start {
        debug!("Firmware transferred but left unstarted on request");
        return Ok(FirmwareInfo {
            identity,
            version: image.version(),
            policy_used,
            transfer_attempts: attempts,
        });
    }

    command::exec_simple(port, clock, addr, &[opcode::FW_START])?;
    let running = read_version(port, clock, addr)?;
    if running != image.version() {
        return Err(LoadError::VersionMismatch {
            expected: image.version(),
            running,
        });
    }
    sink.event(&DiagEvent {
        phase: "fw/start",
        elapsed_ms: clock.elapsed_ms(started),
        snapshot: None,
    });

    snapshot_defaults(port, clock, cache, addr)?;
    info!("Firmware {} running on part {:04X}", running, identity.part);

    Ok(FirmwareInfo {
        identity,
        version: running,
        policy_used,
        transfer_attempts: attempts,
    })
}

/// Bootstrap several parts sharing one bus via the broadcast address.
///
/// Every target is held in its bootloader and probed individually, the
/// single matching image is pushed once to the broadcast address, then each
/// target is started and verified on its own. The first failing target
/// aborts the batch with that target's error. Property snapshots are not
/// captured here; each front end re-captures on its own first bootstrap.
pub fn bootstrap_many<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    sink: &mut dyn DiagnosticsSink,
    addrs: &[u8],
    catalog: &ImageCatalog,
) -> Result<Vec<FirmwareInfo>, BatchLoadError> {
    let started = clock.now();
    let fail = |addr: u8, source: LoadError| BatchLoadError { addr, source };
    if addrs.is_empty() {
        return Ok(Vec::new());
    }

    for &addr in addrs {
        enter_bootloader(port, clock, addr).map_err(|e| fail(addr, e.into()))?;
    }

    let mut identities = Vec::with_capacity(addrs.len());
    for &addr in addrs {
        identities.push(read_part_info(port, clock, addr).map_err(|e| fail(addr, e.into()))?);
    }

    let first = &identities[0];
    let image = catalog.select(first).ok_or_else(|| {
        fail(
            addrs[0],
            LoadError::NoCompatibleImage {
                part: first.part,
                rom_id: first.rom_id,
                chip_rev: first.chip_rev,
            },
        )
    })?;
    for (&addr, id) in addrs.iter().zip(&identities) {
        if !image.matches(id) {
            return Err(fail(
                addr,
                LoadError::NoCompatibleImage {
                    part: id.part,
                    rom_id: id.rom_id,
                    chip_rev: id.chip_rev,
                },
            ));
        }
    }

    broadcast_transfer(port, clock, &image.payload).map_err(|e| fail(addrs[0], e.into()))?;
    sink.event(&DiagEvent {
        phase: "fw/broadcast-transfer",
        elapsed_ms: clock.elapsed_ms(started),
        snapshot: None,
    });

    let mut infos = Vec::with_capacity(addrs.len());
    for (&addr, &identity) in addrs.iter().zip(&identities) {
        command::exec_simple(port, clock, addr, &[opcode::FW_START])
            .map_err(|e| fail(addr, e.into()))?;
        let running = read_version(port, clock, addr).map_err(|e| fail(addr, e.into()))?;
        if running != image.version() {
            return Err(fail(
                addr,
                LoadError::VersionMismatch {
                    expected: image.version(),
                    running,
                },
            ));
        }
        infos.push(FirmwareInfo {
            identity,
            version: running,
            policy_used: TransferPolicyKind::Chunked,
            transfer_attempts: 1,
        });
    }
    info!("Batch-loaded firmware {} on {} parts", image.version(), addrs.len());
    Ok(infos)
}

/// Reset the part and hold it in its bootloader.
pub(crate) fn enter_bootloader<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    addr: u8,
) -> Result<(), TransportError> {
    command::exec_simple(port, clock, addr, &[opcode::POWER_UP, 0x00])
}

fn read_part_info<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    addr: u8,
) -> Result<PartIdentity, TransportError> {
    let mut reply = [0u8; 8];
    command::exec(port, clock, addr, &[opcode::PART_INFO], &mut reply)?;
    Ok(PartIdentity {
        part: u16::from(reply[1]) | (u16::from(reply[2]) << 8),
        chip_rev: reply[3],
        rom_id: reply[4],
        major: reply[5],
        minor: reply[6],
        build: reply[7],
    })
}

fn read_version<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    addr: u8,
) -> Result<FirmwareVersion, TransportError> {
    let mut reply = [0u8; 4];
    command::exec(port, clock, addr, &[opcode::GET_VERSION], &mut reply)?;
    Ok(FirmwareVersion {
        major: reply[1],
        minor: reply[2],
        build: reply[3],
    })
}

fn send_chunk<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    addr: u8,
    chunk: &[u8],
) -> Result<(), TransportError> {
    debug_assert!(chunk.len() <= MAX_CHUNK);
    let mut cmd = [0u8; 1 + MAX_CHUNK];
    cmd[0] = opcode::FW_CHUNK;
    cmd[1..=chunk.len()].copy_from_slice(chunk);
    command::exec_simple(port, clock, addr, &cmd[..=chunk.len()])
}

/// Fixed-size sequential lines; a rejected first line means the part and
/// image disagree about the download format.
fn line_transfer<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    addr: u8,
    payload: &[u8],
    line_len: usize,
) -> Result<(), LoadError> {
    if line_len == 0 || line_len > MAX_CHUNK {
        return Err(LoadError::MalformedImage("line length out of range"));
    }
    for (index, line) in payload.chunks(line_len).enumerate() {
        send_chunk(port, clock, addr, line).map_err(|e| {
            if index == 0 {
                LoadError::IncompatibleFirmware
            } else {
                LoadError::Transport(e)
            }
        })?;
    }
    Ok(())
}

/// Length-prefixed variable chunks; zero-length lines are skipped.
fn chunked_lines_transfer<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    addr: u8,
    payload: &[u8],
) -> Result<(), LoadError> {
    let mut pos = 0usize;
    while pos < payload.len() {
        let len = payload[pos] as usize;
        pos += 1;
        if len == 0 {
            continue;
        }
        if len > MAX_CHUNK {
            return Err(LoadError::MalformedImage("chunk length exceeds 16"));
        }
        let end = pos
            .checked_add(len)
            .filter(|&end| end <= payload.len())
            .ok_or(LoadError::MalformedImage("truncated chunk"))?;
        send_chunk(port, clock, addr, &payload[pos..end])?;
        pos = end;
    }
    Ok(())
}

/// A contiguous (bulk-format) payload pushed over the command bus.
fn chunked_contiguous_transfer<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    addr: u8,
    payload: &[u8],
) -> Result<(), LoadError> {
    for chunk in payload.chunks(MAX_CHUNK) {
        send_chunk(port, clock, addr, chunk)?;
    }
    Ok(())
}

/// Bulk-channel transfer, split at the image's offsets when the payload
/// exceeds the channel buffer.
fn bulk_transfer<T: TransportPort>(
    port: &mut T,
    payload: &[u8],
    split_offsets: &[usize],
) -> Result<(), LoadError> {
    let capacity = port.bulk_capacity().ok_or(TransportError::BulkUnavailable)?;

    if payload.len() <= capacity {
        port.bulk_write(payload)?;
        return Ok(());
    }

    let mut ends: Vec<usize> = split_offsets.to_vec();
    if ends.last() != Some(&payload.len()) {
        ends.push(payload.len());
    }

    let mut start = 0usize;
    let mut slices = Vec::with_capacity(ends.len());
    for end in ends {
        if end <= start || end > payload.len() {
            return Err(LoadError::MalformedImage("split offsets not ascending"));
        }
        if end - start > capacity {
            return Err(LoadError::MalformedImage("split slice exceeds bulk buffer"));
        }
        slices.push(&payload[start..end]);
        start = end;
    }
    for slice in slices {
        port.bulk_write(slice)?;
    }
    Ok(())
}

/// Broadcast chunk writes cannot wait on clear-to-send, so they are paced
/// blindly.
fn broadcast_transfer<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    payload: &[u8],
) -> Result<(), TransportError> {
    let addr = port.broadcast_address();
    for chunk in payload.chunks(MAX_CHUNK) {
        let mut cmd = [0u8; 1 + MAX_CHUNK];
        cmd[0] = opcode::FW_CHUNK;
        cmd[1..=chunk.len()].copy_from_slice(chunk);
        port.write(addr, &cmd[..=chunk.len()])?;
        clock.sleep(std::time::Duration::from_millis(BROADCAST_PACE_MS));
    }
    Ok(())
}

/// Capture the device's post-load property state for diff-based writes.
fn snapshot_defaults<T: TransportPort, C: Clock>(
    port: &mut T,
    clock: &mut C,
    cache: &mut PropertyCache,
    addr: u8,
) -> Result<(), TransportError> {
    cache.clear();
    for &code in &SNAPSHOT_PROPS {
        let value = properties::read_property(port, clock, addr, code)?;
        cache.record_default(code, value);
    }
    Ok(())
}
