//! # Page Records
//!
//! Every page file begins with a 64-byte page record identifying the file and
//! carrying the crash-detection state. All multi-byte fields are big-endian.
//!
//! ## Layout (64 bytes)
//!
//! ```text
//! Offset  Size  Field       Description
//! ------  ----  ----------  ----------------------------------------
//! 0       4     sequence    Position of this file in the page chain
//! 4       1     exit_status OPEN (0x00) or CLEAN (0x01)
//! 5       10    magic       "BurrowDB\0\0"
//! 15      2     version     On-disk format version
//! 17      1     shift       Size exponent; file size = 4096 << shift
//! 18      1     free        Whole-file free flag (reserved for compaction)
//! 19      2     reserved
//! 21      8     used        Data-region allocation watermark
//! 29      8     crc64       CRC-64/ECMA of the data region
//! 37      27    padding     Must be zero
//! ```
//!
//! `used` and `crc64` are only trustworthy when `exit_status` is CLEAN: both
//! are rewritten at checkpoints and stale at any other time.

use zerocopy::big_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{FORMAT_VERSION, PAGE_RECORD_SIZE};
use crate::error::{Error, Result};

pub const PAGE_MAGIC: &[u8; 10] = b"BurrowDB\x00\x00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Written before the first data write after a checkpoint. Reading this
    /// on open means the store was not cleanly shut down.
    Open,
    /// Written by sync/close together with a fresh CRC.
    Clean,
}

impl ExitStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            ExitStatus::Open => 0x00,
            ExitStatus::Clean => 0x01,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => ExitStatus::Clean,
            _ => ExitStatus::Open,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageRecord {
    sequence: U32,
    exit_status: u8,
    magic: [u8; 10],
    version: U16,
    shift: u8,
    free: u8,
    reserved: [u8; 2],
    used: U64,
    crc64: U64,
    padding: [u8; 27],
}

const _: () = assert!(std::mem::size_of::<PageRecord>() == PAGE_RECORD_SIZE);

impl PageRecord {
    pub fn new(sequence: u32, shift: u8) -> Self {
        Self {
            sequence: U32::new(sequence),
            exit_status: ExitStatus::Open.as_byte(),
            magic: *PAGE_MAGIC,
            version: U16::new(FORMAT_VERSION),
            shift,
            free: 0,
            reserved: [0; 2],
            used: U64::new(0),
            crc64: U64::new(0),
            padding: [0; 27],
        }
    }

    /// Decodes and validates a record read from the head of a page file.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PAGE_RECORD_SIZE {
            return Err(Error::corruption(format!(
                "page record truncated: {} < {} bytes",
                bytes.len(),
                PAGE_RECORD_SIZE
            )));
        }

        let record = Self::read_from_bytes(&bytes[..PAGE_RECORD_SIZE])
            .map_err(|e| Error::corruption(format!("unreadable page record: {e:?}")))?;

        if &record.magic != PAGE_MAGIC {
            return Err(Error::corruption("bad magic in page record"));
        }

        if record.version.get() != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported format version {} (expected {})",
                record.version.get(),
                FORMAT_VERSION
            )));
        }

        Ok(record)
    }

    pub fn sequence(&self) -> u32 {
        self.sequence.get()
    }

    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus::from_byte(self.exit_status)
    }

    pub fn set_exit_status(&mut self, status: ExitStatus) {
        self.exit_status = status.as_byte();
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    pub fn used(&self) -> u64 {
        self.used.get()
    }

    pub fn set_used(&mut self, used: u64) {
        self.used = U64::new(used);
    }

    pub fn crc64(&self) -> u64 {
        self.crc64.get()
    }

    pub fn set_crc64(&mut self, crc: u64) {
        self.crc64 = U64::new(crc);
    }
}
