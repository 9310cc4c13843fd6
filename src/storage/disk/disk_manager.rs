use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::trace;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::config::{PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual page-granular disk I/O.
///
/// Both operations are synchronous. Page `n` lives at byte offset
/// `n * PAGE_SIZE` in the backing file.
pub struct DiskManager {
    db_file: Mutex<File>,
}

impl DiskManager {
    /// Open (or create) the database file at the given path.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(file),
        })
    }

    /// Read a page from disk into `buf`.
    ///
    /// A page that has never been written yet reads back as all zeroes.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        let offset = self.page_offset(page_id)?;
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            // The page lies beyond what has been materialised on disk.
            buf.fill(0);
            trace!("read_page: page {} beyond EOF, zero-filled", page_id);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        trace!("read_page: page {} read from offset {}", page_id, offset);
        Ok(())
    }

    /// Write a page's bytes to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        let offset = self.page_offset(page_id)?;
        let mut file = self.db_file.lock();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        trace!("write_page: page {} written at offset {}", page_id, offset);
        Ok(())
    }

    fn page_offset(&self, page_id: PageId) -> Result<u64, DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        Ok(page_id as u64 * PAGE_SIZE as u64)
    }
}
