//! # Pager
//!
//! The [`Pager`] owns the ordered table of open page files and implements the
//! logical address space on top of them: bump allocation of contiguous byte
//! ranges, translation of logical offsets to (file, in-file offset), and
//! seek-based reads and writes.
//!
//! ## Allocation
//!
//! Allocation is append-only at this layer; reuse of freed space belongs to
//! the heap and index allocators above. An allocation never spans two page
//! files — when the tail data region cannot hold the request, the cursor
//! advances to the next file boundary and a new full-size file is created.
//! The skipped tail bytes are unreachable until a vacuum rewrites the store.
//!
//! ## Checkpointing
//!
//! `sync` recomputes each file's data-region CRC-64, stores the allocation
//! watermark, writes a CLEAN exit marker, and flushes. Any data write after
//! that first re-marks the touched file OPEN, so the marker state on disk is
//! always: CLEAN means "CRC and watermark describe the data region", OPEN
//! means "in flux; if you read this at open time, the process died here".
//!
//! ## Recovery Policy
//!
//! On open with all-CLEAN markers, every CRC is verified and a mismatch
//! refuses the open: a clean checkpoint guarantees fresh CRCs, so a mismatch
//! is genuine corruption. With any non-CLEAN marker the CRCs are stale by
//! construction and skipped; the store opens flagged unclean with the
//! allocation cursor placed past all existing files, and the caller is
//! expected to rebuild into a fresh store.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_64_ECMA_182};
use tracing::{error, warn};
use zerocopy::IntoBytes;

use crate::config::{BASE_PAGE_SIZE, PAGE_RECORD_SIZE};
use crate::error::{Error, Result};

use super::page::{ExitStatus, PageRecord};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Byte offset of the exit-status marker within a page record.
const EXIT_STATUS_OFFSET: u64 = 4;

const CRC_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
pub struct Pager {
    dir: PathBuf,
    files: Vec<File>,
    /// Whether each file's on-disk marker already reads OPEN.
    marked_open: Vec<bool>,
    /// Next free logical offset.
    tail: u64,
    shift: u8,
    clean: bool,
}

fn page_file_name(sequence: usize) -> String {
    format!("page.{:06}", sequence)
}

impl Pager {
    /// Creates a fresh store directory with a single empty page file.
    pub fn create<P: AsRef<Path>>(dir: P, shift: u8) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut pager = Self {
            dir,
            files: Vec::new(),
            marked_open: Vec::new(),
            tail: 0,
            shift,
            clean: true,
        };
        pager.add_page_file()?;

        Ok(pager)
    }

    /// Opens an existing store directory, validating every page record.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        let mut sequences: Vec<(usize, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(suffix) = name.strip_prefix("page.") {
                if let Ok(seq) = suffix.parse::<usize>() {
                    sequences.push((seq, entry.path()));
                }
            }
        }
        sequences.sort_by_key(|(seq, _)| *seq);

        if sequences.is_empty() {
            return Err(Error::corruption(format!(
                "no page files in '{}'",
                dir.display()
            )));
        }

        let mut files = Vec::with_capacity(sequences.len());
        let mut records = Vec::with_capacity(sequences.len());

        for (index, (seq, path)) in sequences.iter().enumerate() {
            if *seq != index {
                return Err(Error::corruption(format!(
                    "page chain has a hole: expected sequence {index}, found {seq}"
                )));
            }

            let mut file = OpenOptions::new().read(true).write(true).open(path)?;
            let mut buf = [0u8; PAGE_RECORD_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;

            let record = PageRecord::decode(&buf)?;
            if record.sequence() as usize != index {
                return Err(Error::corruption(format!(
                    "page file '{}' carries sequence {}, expected {}",
                    path.display(),
                    record.sequence(),
                    index
                )));
            }

            files.push(file);
            records.push(record);
        }

        let shift = records[0].shift();
        if records.iter().any(|r| r.shift() != shift) {
            return Err(Error::corruption("page files disagree on size exponent"));
        }

        let clean = records
            .iter()
            .all(|r| r.exit_status() == ExitStatus::Clean);

        let mut pager = Self {
            dir,
            marked_open: records
                .iter()
                .map(|r| r.exit_status() != ExitStatus::Clean)
                .collect(),
            files,
            tail: 0,
            shift,
            clean,
        };

        if clean {
            for (index, record) in records.iter().enumerate() {
                let actual = pager.file_crc(index)?;
                if actual != record.crc64() {
                    error!(
                        page = index,
                        expected = record.crc64(),
                        actual, "page CRC mismatch on clean store"
                    );
                    return Err(Error::corruption(format!(
                        "CRC mismatch in page file {index}"
                    )));
                }
            }
            let last = records.len() - 1;
            pager.tail = last as u64 * pager.data_size() + records[last].used();
        } else {
            warn!(
                dir = %pager.dir.display(),
                "unclean shutdown detected; skipping CRC verification"
            );
            // Stale watermarks cannot be trusted; treat every existing byte
            // as used so fresh allocations never clobber surviving data.
            pager.tail = pager.files.len() as u64 * pager.data_size();
        }

        Ok(pager)
    }

    /// Whether the previous process shut this store down through sync/close.
    pub fn was_clean(&self) -> bool {
        self.clean
    }

    pub fn page_count(&self) -> usize {
        self.files.len()
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    fn file_size(&self) -> u64 {
        BASE_PAGE_SIZE << self.shift
    }

    /// Usable bytes per page file.
    pub fn data_size(&self) -> u64 {
        self.file_size() - PAGE_RECORD_SIZE as u64
    }

    fn add_page_file(&mut self) -> Result<()> {
        let sequence = self.files.len();
        let path = self.dir.join(page_file_name(sequence));

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.set_len(self.file_size())?;

        let record = PageRecord::new(sequence as u32, self.shift);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(record.as_bytes())?;

        self.files.push(file);
        self.marked_open.push(true);
        Ok(())
    }

    /// Reserves `len` contiguous logical bytes and returns their offset.
    pub fn alloc(&mut self, len: u64) -> Result<u64> {
        let data_size = self.data_size();
        if len == 0 || len > data_size {
            return Err(Error::OutOfMemory { requested: len });
        }

        let in_page = self.tail % data_size;
        if in_page + len > data_size {
            self.tail += data_size - in_page;
        }

        let page_index = (self.tail / data_size) as usize;
        while self.files.len() <= page_index {
            self.add_page_file()?;
        }

        let offset = self.tail;
        self.tail += len;
        Ok(offset)
    }

    /// Translates a logical offset to (file index, in-file offset).
    ///
    /// An offset pointing past the open file table means an offset escaped
    /// the allocator's control; that is a consistency failure.
    pub fn resolve(&self, offset: u64) -> Result<(usize, u64)> {
        let data_size = self.data_size();
        let page_index = (offset / data_size) as usize;

        if page_index >= self.files.len() {
            return Err(Error::corruption(format!(
                "offset {offset} maps to page {page_index}, but only {} pages are open",
                self.files.len()
            )));
        }

        Ok((page_index, PAGE_RECORD_SIZE as u64 + offset % data_size))
    }

    fn check_span(&self, offset: u64, len: usize) -> Result<()> {
        let data_size = self.data_size();
        if offset % data_size + len as u64 > data_size {
            return Err(Error::corruption(format!(
                "range at offset {offset} (len {len}) crosses a page-file boundary"
            )));
        }
        Ok(())
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_span(offset, buf.len())?;
        let (page_index, local) = self.resolve(offset)?;

        let file = &mut self.files[page_index];
        file.seek(SeekFrom::Start(local))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_span(offset, data.len())?;
        let (page_index, local) = self.resolve(offset)?;

        if !self.marked_open[page_index] {
            self.mark_open(page_index)?;
        }

        let file = &mut self.files[page_index];
        file.seek(SeekFrom::Start(local))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Flips a checkpointed file's marker back to OPEN before touching its
    /// data region, so a crash mid-write is detectable at the next open.
    fn mark_open(&mut self, page_index: usize) -> Result<()> {
        let file = &mut self.files[page_index];
        file.seek(SeekFrom::Start(EXIT_STATUS_OFFSET))?;
        file.write_all(&[ExitStatus::Open.as_byte()])?;
        self.marked_open[page_index] = true;
        Ok(())
    }

    fn file_crc(&mut self, page_index: usize) -> Result<u64> {
        let data_size = self.data_size();
        let file = &mut self.files[page_index];
        file.seek(SeekFrom::Start(PAGE_RECORD_SIZE as u64))?;

        let mut digest = CRC64.digest();
        let mut remaining = data_size;
        let mut buf = vec![0u8; CRC_CHUNK];
        while remaining > 0 {
            let take = remaining.min(CRC_CHUNK as u64) as usize;
            file.read_exact(&mut buf[..take])?;
            digest.update(&buf[..take]);
            remaining -= take as u64;
        }
        Ok(digest.finalize())
    }

    /// Checkpoints every page file: recomputes the CRC, stores the watermark,
    /// writes the CLEAN marker, and flushes to disk.
    pub fn sync(&mut self) -> Result<()> {
        let data_size = self.data_size();

        for index in 0..self.files.len() {
            let crc = self.file_crc(index)?;

            let used = self
                .tail
                .saturating_sub(index as u64 * data_size)
                .min(data_size);

            let mut record = PageRecord::new(index as u32, self.shift);
            record.set_exit_status(ExitStatus::Clean);
            record.set_used(used);
            record.set_crc64(crc);

            let file = &mut self.files[index];
            file.seek(SeekFrom::Start(0))?;
            file.write_all(record.as_bytes())?;
            file.sync_all()?;

            self.marked_open[index] = false;
        }
        Ok(())
    }

    /// Checkpoints and drops every file descriptor.
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}
