use std::fs::{File as OsFile, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::Result;

/// Byte-addressed storage underneath the table files. The in-memory
/// implementation keeps most of the test suite off the filesystem.
pub trait File: Send {
    fn size(&self) -> Result<usize>;
    fn read_block(&mut self, offset: usize, len: usize) -> Result<Vec<u8>>;
    /// Writes `block` at `offset`, growing the file if it ends past the
    /// current size.
    fn write_block(&mut self, offset: usize, block: &[u8]) -> Result<()>;
}

pub struct PosixFile {
    file: OsFile,
    size: usize,
}

impl PosixFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let size = file.metadata()?.len() as usize;
        Ok(Self { file, size })
    }
}

impl File for PosixFile {
    fn size(&self) -> Result<usize> {
        Ok(self.size)
    }

    fn read_block(&mut self, offset: usize, len: usize) -> Result<Vec<u8>> {
        if offset + len > self.size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at {} past end of {}-byte file",
                    len, offset, self.size
                ),
            )
            .into());
        }
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(&mut self, offset: usize, block: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(block)?;
        self.file.flush()?;
        self.size = self.size.max(offset + block.len());
        Ok(())
    }
}

pub struct MemoryFile {
    data: Vec<u8>,
}

impl MemoryFile {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl File for MemoryFile {
    fn size(&self) -> Result<usize> {
        Ok(self.data.len())
    }

    fn read_block(&mut self, offset: usize, len: usize) -> Result<Vec<u8>> {
        if offset + len > self.data.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at {} past end of {}-byte file",
                    len,
                    offset,
                    self.data.len()
                ),
            )
            .into());
        }
        Ok(self.data[offset..offset + len].to_vec())
    }

    fn write_block(&mut self, offset: usize, block: &[u8]) -> Result<()> {
        if offset + block.len() > self.data.len() {
            self.data.resize(offset + block.len(), 0);
        }
        self.data[offset..offset + block.len()].copy_from_slice(block);
        Ok(())
    }
}
