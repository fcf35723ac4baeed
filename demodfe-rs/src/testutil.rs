//! Scripted transport and chip model shared by the unit tests.
//!
//! `MockTransport` implements [`TransportPort`] over a small behavioral
//! model: demodulator chips that answer the command protocol, tuners that
//! are only reachable while the pass-through gate is open, a scan-event
//! script, and knobs for fault injection. Every hardware-visible action is
//! recorded as an [`Op`] so tests can assert on transition sequences.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::command::{opcode, scan_action, tuner_opcode, STATUS_CTS};
use crate::config::FrontEndConfig;
use crate::diag::{DiagEvent, DiagnosticsSink};
use crate::firmware::catalog::{
    FirmwareImage, ImageCatalog, PartIdentity, TransferPolicy,
};
use crate::frontend::scan::event;
use crate::frontend::FrontEnd;
use crate::standard::Standard;
use crate::time::SimClock;
use crate::transport::{TransportError, TransportPort};

/// Front end as every unit test drives it.
pub(crate) type MockFrontEnd = FrontEnd<MockTransport, SimClock>;

pub(crate) const DEMOD_ADDR: u8 = 0x64;
pub(crate) const SECOND_DEMOD_ADDR: u8 = 0x65;
pub(crate) const TER_TUNER_ADDR: u8 = 0x60;
pub(crate) const SAT_TUNER_ADDR: u8 = 0x58;
pub(crate) const BROADCAST_ADDR: u8 = 0x33;

/// Hardware-visible action recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    PowerUp(u8),
    PowerDown,
    Tristate(u8),
    FwStart,
    Restart,
    BerClear,
    AgcSetup(u8),
    PinSetup,
    ScanCtrl(u8),
    SetProp(u16, u16),
    LnbSupply(u8, u8),
    DiseqcSend(Vec<u8>),
    TunerInit(u8),
    TunerWake(u8),
    TunerStandby(u8),
    TunerTune(u8, u32),
    TunerClock(u8, bool),
    TunerLpf(u8, u32),
    GateOpen,
    GateClose,
}

/// One simulated demodulator die.
#[derive(Debug, Clone)]
pub(crate) struct MockChip {
    pub identity: PartIdentity,
    pub fw_chunks: Vec<Vec<u8>>,
    pub started: bool,
    /// Version reported after start instead of the identity's own.
    pub running_version_override: Option<(u8, u8, u8)>,
    /// Fail the n-th firmware chunk write.
    pub fail_chunk: Option<usize>,
    pub props: BTreeMap<u16, u16>,
}

impl MockChip {
    fn new() -> Self {
        Self {
            identity: default_identity(),
            fw_chunks: Vec::new(),
            started: false,
            running_version_override: None,
            fail_chunk: None,
            props: BTreeMap::new(),
        }
    }
}

/// Scripted autonomous-scan behavior.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScanScript {
    entries: Vec<(u8, u32)>,
    index: usize,
    scanning: bool,
    /// Report SEARCHING forever, never advancing.
    stuck: bool,
}

impl ScanScript {
    pub fn events(entries: Vec<(u8, u32)>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    /// `n` transient searching reads, then the sweep ends.
    pub fn searching_polls(n: usize) -> Self {
        let mut entries = vec![(event::SEARCHING, 0); n];
        entries.push((event::ENDED, 0));
        Self::events(entries)
    }

    pub fn stuck_searching() -> Self {
        Self {
            stuck: true,
            ..Self::default()
        }
    }

    fn current(&self) -> (u8, u32) {
        if self.stuck {
            return (event::SEARCHING, 0);
        }
        self.entries
            .get(self.index)
            .copied()
            .unwrap_or((event::ENDED, 0))
    }

    fn on_status_read(&mut self) -> (u8, u32) {
        let entry = self.current();
        // Transient states pass by on their own; discrete events hold
        // until the host resumes.
        if !self.stuck && matches!(entry.0, event::IDLE | event::SEARCHING) {
            self.index += 1;
        }
        entry
    }

    fn on_resume(&mut self) {
        if !self.stuck {
            self.index += 1;
        }
    }
}

/// Scripted bus with one or two demodulators and both tuners.
pub(crate) struct MockTransport {
    chips: BTreeMap<u8, MockChip>,
    pending: BTreeMap<u8, Vec<u8>>,
    pub gate_open: bool,
    pub ops: Vec<Op>,

    // Fault injection.
    pub fail_tuner_cmds: BTreeSet<u8>,
    pub fail_bulk: bool,
    pub bulk_capacity: Option<usize>,
    pub bulk_writes: Vec<usize>,
    pub diseqc_busy: bool,

    // Lock behavior.
    pub lock_after_polls: Option<u32>,
    pub never_lock_after_polls: Option<u32>,
    /// Carrier found but lock never concludes (stuck decision).
    pub pcl_only: bool,
    /// Candidates with no registered channel raise never-lock immediately.
    pub miss_never_lock: bool,
    channels: BTreeMap<u32, u32>,
    polls_since_restart: u32,
    pub last_tune_khz: u32,

    // Measurements.
    pub default_rssi_dbm: i8,
    pub rssi_at: BTreeMap<u32, i8>,

    // Scan behavior.
    pub scan_script: ScanScript,
    pub busy_stuck: bool,
    pub channel_detail: Option<(u32, u8, u16, u8)>,
}

fn default_identity() -> PartIdentity {
    PartIdentity {
        part: 0x2183,
        rom_id: 0xA0,
        chip_rev: 2,
        major: 6,
        minor: 0,
        build: 5,
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let mut chips = BTreeMap::new();
        chips.insert(DEMOD_ADDR, MockChip::new());
        Self {
            chips,
            pending: BTreeMap::new(),
            gate_open: false,
            ops: Vec::new(),
            fail_tuner_cmds: BTreeSet::new(),
            fail_bulk: false,
            bulk_capacity: None,
            bulk_writes: Vec::new(),
            diseqc_busy: false,
            lock_after_polls: None,
            never_lock_after_polls: None,
            pcl_only: false,
            miss_never_lock: false,
            channels: BTreeMap::new(),
            polls_since_restart: 0,
            last_tune_khz: 0,
            default_rssi_dbm: -50,
            rssi_at: BTreeMap::new(),
            scan_script: ScanScript::default(),
            busy_stuck: false,
            channel_detail: None,
        }
    }

    pub fn with_second_demod(mut self) -> Self {
        self.chips.insert(SECOND_DEMOD_ADDR, MockChip::new());
        self
    }

    pub fn chip(&self, addr: u8) -> &MockChip {
        &self.chips[&addr]
    }

    pub fn chip_mut(&mut self, addr: u8) -> &mut MockChip {
        self.chips.get_mut(&addr).unwrap()
    }

    /// Register a carrier at `freq_khz` that locks after `lock_after`
    /// status polls once tuned there.
    pub fn channel_at(&mut self, freq_khz: u32, lock_after: u32) {
        self.channels.insert(freq_khz, lock_after);
    }

    fn demod_flags(&mut self) -> u8 {
        self.polls_since_restart += 1;
        let polls = self.polls_since_restart;
        if self.pcl_only {
            return 0x01;
        }
        let lock_after = self
            .channels
            .get(&self.last_tune_khz)
            .copied()
            .or(self.lock_after_polls);
        if let Some(n) = lock_after {
            if polls > n {
                return 0x03; // pcl + dl
            }
            return 0x01;
        }
        if let Some(n) = self.never_lock_after_polls {
            if polls > n {
                return 0x04;
            }
            return 0x00;
        }
        if self.miss_never_lock {
            return 0x04;
        }
        0x00
    }

    fn handle_demod_write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), TransportError> {
        let mut reply = vec![STATUS_CTS];
        match bytes[0] {
            opcode::POWER_UP => self.ops.push(Op::PowerUp(bytes[1])),
            opcode::POWER_DOWN => self.ops.push(Op::PowerDown),
            opcode::TRISTATE => self.ops.push(Op::Tristate(bytes[1])),
            opcode::FW_CHUNK => {
                let chip = self.chips.get_mut(&addr).unwrap();
                if chip.fail_chunk == Some(chip.fw_chunks.len()) {
                    return Err(TransportError::WriteFailed { addr });
                }
                chip.fw_chunks.push(bytes[1..].to_vec());
            }
            opcode::FW_START => {
                self.chips.get_mut(&addr).unwrap().started = true;
                self.ops.push(Op::FwStart);
            }
            opcode::PART_INFO => {
                let id = self.chips[&addr].identity;
                reply = vec![
                    STATUS_CTS,
                    (id.part & 0xFF) as u8,
                    (id.part >> 8) as u8,
                    id.chip_rev,
                    id.rom_id,
                    id.major,
                    id.minor,
                    id.build,
                ];
            }
            opcode::GET_VERSION => {
                let chip = &self.chips[&addr];
                let (major, minor, build) = if chip.started {
                    chip.running_version_override.unwrap_or((
                        chip.identity.major,
                        chip.identity.minor,
                        chip.identity.build,
                    ))
                } else {
                    (0, 0, 0)
                };
                reply = vec![STATUS_CTS, major, minor, build];
            }
            opcode::SET_PROPERTY => {
                let code = u16::from(bytes[1]) | (u16::from(bytes[2]) << 8);
                let value = u16::from(bytes[3]) | (u16::from(bytes[4]) << 8);
                self.chips.get_mut(&addr).unwrap().props.insert(code, value);
                self.ops.push(Op::SetProp(code, value));
            }
            opcode::GET_PROPERTY => {
                let code = u16::from(bytes[1]) | (u16::from(bytes[2]) << 8);
                let value = self.chips[&addr].props.get(&code).copied().unwrap_or(0);
                reply = vec![STATUS_CTS, (value & 0xFF) as u8, (value >> 8) as u8];
            }
            opcode::RESTART => {
                self.polls_since_restart = 0;
                self.ops.push(Op::Restart);
            }
            opcode::DEMOD_STATUS => {
                let flags = self.demod_flags();
                // flags, rssi, snr (quarter dB), ber exponent, uncorrected.
                reply = vec![STATUS_CTS, flags, 0xCE, 100, 7, 0, 0, 0];
            }
            opcode::SCAN_CTRL => {
                let action = bytes[1];
                self.ops.push(Op::ScanCtrl(action));
                match action {
                    scan_action::START => {
                        self.scan_script.scanning = true;
                        self.scan_script.index = 0;
                    }
                    scan_action::RESUME => self.scan_script.on_resume(),
                    scan_action::ABORT => self.scan_script.scanning = false,
                    _ => {}
                }
            }
            opcode::SCAN_STATUS => {
                let busy = u8::from(self.busy_stuck);
                let (code, freq) = if self.scan_script.scanning {
                    self.scan_script.on_status_read()
                } else {
                    (event::IDLE, 0)
                };
                let f = freq.to_le_bytes();
                reply = vec![STATUS_CTS, busy, code, f[0], f[1], f[2], f[3]];
            }
            opcode::SCAN_DETAIL => {
                let (sr, constellation, streams, std_code) =
                    self.channel_detail.unwrap_or((6_900_000, 3, 1, 0x01));
                let s = sr.to_le_bytes();
                reply = vec![
                    STATUS_CTS,
                    s[0],
                    s[1],
                    s[2],
                    s[3],
                    constellation,
                    (streams & 0xFF) as u8,
                    (streams >> 8) as u8,
                    std_code,
                ];
            }
            opcode::LNB_SUPPLY => self.ops.push(Op::LnbSupply(bytes[1], bytes[2])),
            opcode::DISEQC_SEND => {
                let len = bytes[2] as usize;
                self.ops.push(Op::DiseqcSend(bytes[3..3 + len].to_vec()));
            }
            opcode::DISEQC_STATUS => {
                reply = vec![STATUS_CTS, u8::from(!self.diseqc_busy)];
            }
            opcode::AGC_SETUP => self.ops.push(Op::AgcSetup(bytes[1])),
            opcode::PIN_SETUP => self.ops.push(Op::PinSetup),
            opcode::BER_CLEAR => self.ops.push(Op::BerClear),
            _ => return Err(TransportError::WriteFailed { addr }),
        }
        self.pending.insert(addr, reply);
        Ok(())
    }

    fn handle_tuner_write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.gate_open {
            // A tuner reached with the gate closed is a core bug.
            return Err(TransportError::WriteFailed { addr });
        }
        if self.fail_tuner_cmds.contains(&addr) {
            return Err(TransportError::WriteFailed { addr });
        }
        let mut reply = vec![STATUS_CTS];
        match bytes[0] {
            tuner_opcode::INIT => self.ops.push(Op::TunerInit(addr)),
            tuner_opcode::STANDBY => self.ops.push(Op::TunerStandby(addr)),
            tuner_opcode::WAKE => self.ops.push(Op::TunerWake(addr)),
            tuner_opcode::TUNE => {
                let freq = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
                self.last_tune_khz = freq;
                self.polls_since_restart = 0;
                self.ops.push(Op::TunerTune(addr, freq));
            }
            tuner_opcode::CLOCK => self.ops.push(Op::TunerClock(addr, bytes[1] != 0)),
            tuner_opcode::RSSI => {
                let rssi = self
                    .rssi_at
                    .get(&self.last_tune_khz)
                    .copied()
                    .unwrap_or(self.default_rssi_dbm);
                reply = vec![STATUS_CTS, rssi as u8];
            }
            tuner_opcode::LPF => {
                let cutoff = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
                self.ops.push(Op::TunerLpf(addr, cutoff));
            }
            _ => return Err(TransportError::WriteFailed { addr }),
        }
        self.pending.insert(addr, reply);
        Ok(())
    }
}

impl TransportPort for MockTransport {
    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), TransportError> {
        if (addr == TER_TUNER_ADDR || addr == SAT_TUNER_ADDR) && !self.gate_open {
            return Err(TransportError::ReadFailed { addr });
        }
        let pending = self
            .pending
            .get(&addr)
            .ok_or(TransportError::ReadFailed { addr })?;
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = pending.get(i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), TransportError> {
        if addr == BROADCAST_ADDR {
            if bytes[0] == opcode::FW_CHUNK {
                let payload = bytes[1..].to_vec();
                for chip in self.chips.values_mut() {
                    chip.fw_chunks.push(payload.clone());
                }
            }
            return Ok(());
        }
        if self.chips.contains_key(&addr) {
            return self.handle_demod_write(addr, bytes);
        }
        if addr == TER_TUNER_ADDR || addr == SAT_TUNER_ADDR {
            return self.handle_tuner_write(addr, bytes);
        }
        Err(TransportError::WriteFailed { addr })
    }

    fn set_passthrough(&mut self, open: bool) -> Result<(), TransportError> {
        self.gate_open = open;
        self.ops
            .push(if open { Op::GateOpen } else { Op::GateClose });
        Ok(())
    }

    fn broadcast_address(&self) -> u8 {
        BROADCAST_ADDR
    }

    fn bulk_capacity(&self) -> Option<usize> {
        self.bulk_capacity
    }

    fn bulk_write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.bulk_capacity.is_none() {
            return Err(TransportError::BulkUnavailable);
        }
        if self.fail_bulk {
            return Err(TransportError::BulkFailed { len: bytes.len() });
        }
        self.bulk_writes.push(bytes.len());
        Ok(())
    }
}

/// Diagnostics sink with externally observable storage.
#[derive(Clone, Default)]
pub(crate) struct SharedSink {
    events: Rc<RefCell<Vec<(String, u64, Option<Vec<u8>>)>>>,
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_phase(&self, phase: &str) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|(p, _, _)| p == phase)
            .count()
    }
}

impl DiagnosticsSink for SharedSink {
    fn event(&mut self, event: &DiagEvent<'_>) {
        self.events.borrow_mut().push((
            event.phase.to_string(),
            event.elapsed_ms,
            event.snapshot.map(<[u8]>::to_vec),
        ));
    }
}

/// Catalog holding one line-transfer image matching the default identity.
pub(crate) fn default_catalog() -> ImageCatalog {
    let id = default_identity();
    ImageCatalog::new(vec![FirmwareImage {
        part: id.part,
        rom_id: id.rom_id,
        chip_rev: id.chip_rev,
        major: id.major,
        minor: id.minor,
        build: id.build,
        policy: TransferPolicy::Lines { line_len: 8 },
        payload: vec![0x5A; 32],
    }])
}

/// Fresh front end over a mock transport and simulated clock.
pub(crate) fn front_end() -> FrontEnd<MockTransport, SimClock> {
    front_end_with(FrontEndConfig::default())
}

pub(crate) fn front_end_with(config: FrontEndConfig) -> FrontEnd<MockTransport, SimClock> {
    FrontEnd::new(MockTransport::new(), SimClock::new(), config, default_catalog()).unwrap()
}

/// Front end already switched to `standard`.
pub(crate) fn locked_front_end(standard: Standard) -> FrontEnd<MockTransport, SimClock> {
    let mut fe = front_end();
    fe.switch_to(standard, &crate::frontend::switch::SwitchOptions::default())
        .unwrap();
    fe
}
