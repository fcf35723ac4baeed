//! Firmware image catalog.
//!
//! Images are opaque payloads selected by the full part signature read out
//! of the bootloader. The catalog is supplied by the host and consumed
//! read-only.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity read from a part held in its bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartIdentity {
    pub part: u16,
    pub rom_id: u8,
    pub chip_rev: u8,
    pub major: u8,
    pub minor: u8,
    pub build: u8,
}

/// Version of a running firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// How an image's payload is moved onto the part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferPolicy {
    /// Fixed-size lines over the command bus.
    Lines { line_len: usize },
    /// Length-prefixed variable chunks (≤ 16 bytes each) over the command
    /// bus; zero-length lines are padding and are skipped.
    Chunked,
    /// One contiguous write over the bulk channel, or several slices cut at
    /// `split_offsets` when the bulk buffer is smaller than the image.
    Bulk { split_offsets: Vec<usize> },
}

/// Policy actually used for a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferPolicyKind {
    Lines,
    Chunked,
    Bulk,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub part: u16,
    pub rom_id: u8,
    pub chip_rev: u8,
    pub major: u8,
    pub minor: u8,
    pub build: u8,
    pub policy: TransferPolicy,
    pub payload: Vec<u8>,
}

impl FirmwareImage {
    /// Does this image's signature match the identity read from a part?
    pub fn matches(&self, id: &PartIdentity) -> bool {
        self.part == id.part
            && self.rom_id == id.rom_id
            && self.chip_rev == id.chip_rev
            && self.major == id.major
            && self.minor == id.minor
            && self.build == id.build
    }

    /// Version this image reports once started.
    pub fn version(&self) -> FirmwareVersion {
        FirmwareVersion {
            major: self.major,
            minor: self.minor,
            build: self.build,
        }
    }
}

/// Ordered collection of candidate images.
#[derive(Debug, Clone, Default)]
pub struct ImageCatalog {
    images: Vec<FirmwareImage>,
}

impl ImageCatalog {
    pub fn new(images: Vec<FirmwareImage>) -> Self {
        Self { images }
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// First image whose signature matches `id`.
    pub fn select(&self, id: &PartIdentity) -> Option<&FirmwareImage> {
        self.images.iter().find(|img| img.matches(id))
    }
}
