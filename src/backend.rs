//! The backing device contract (§6) and the two adapters this crate ships.
//!
//! The backing device is the lower-level resizable block device the core
//! treats as an external collaborator: reads, writes, resize, info, flush,
//! disconnect, nothing more. The engine is generic over it (`Engine<B>`)
//! rather than boxing a trait object, so a `MemBackingDevice` in tests costs
//! nothing at the call sites that matter in production.

use crate::error::{EngineError, Result};

/// Static facts about a backing device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackingInfo {
    pub sector_size: u64,
    pub size_sectors: u64,
    pub read_write: bool,
}

/// The lower-level resizable block device the engine is built on.
///
/// All I/O is in whole backing-device sectors; `sector` is an index, not a
/// byte offset. Implementations are not required to be `Send`-free of
/// internal locking, but a single `BackingDevice` is only ever driven by one
/// `Engine` at a time.
pub trait BackingDevice {
    /// Queries current device facts. Async because a real device (e.g. a
    /// file) may need a suspension point to answer honestly — its size can
    /// change underneath an in-memory cached value.
    async fn get_info(&self) -> BackingInfo;

    /// Reads one sector per buffer in `bufs`, starting at `sector`. Each
    /// buffer must be exactly `sector_size` bytes.
    async fn read(&mut self, sector: u64, bufs: &mut [&mut [u8]]) -> Result<()>;

    /// Writes one sector per buffer in `bufs`, starting at `sector`. Each
    /// buffer must be exactly `sector_size` bytes.
    async fn write(&mut self, sector: u64, bufs: &[&[u8]]) -> Result<()>;

    /// Resizes the device to exactly `size_sectors` sectors. Implementations
    /// may only grow (the core never shrinks).
    async fn resize(&mut self, size_sectors: u64) -> Result<()>;

    async fn flush(&mut self) -> Result<()>;

    /// Releases any resources. Further calls are implementation-defined;
    /// the engine never issues one after calling this.
    async fn disconnect(&mut self);
}

/// An in-memory backing device, used by tests and as a reference adapter.
#[cfg(feature = "mem-backend")]
#[derive(Debug)]
pub struct MemBackingDevice {
    sector_size: u64,
    data: Vec<u8>,
}

#[cfg(feature = "mem-backend")]
impl MemBackingDevice {
    pub fn new(sector_size: u64) -> Self {
        Self {
            sector_size,
            data: Vec::new(),
        }
    }

    pub fn with_capacity_bytes(sector_size: u64, bytes: u64) -> Self {
        Self {
            sector_size,
            data: vec![0u8; bytes as usize],
        }
    }

    fn size_sectors(&self) -> u64 {
        self.data.len() as u64 / self.sector_size
    }
}

#[cfg(feature = "mem-backend")]
impl BackingDevice for MemBackingDevice {
    async fn get_info(&self) -> BackingInfo {
        BackingInfo {
            sector_size: self.sector_size,
            size_sectors: self.size_sectors(),
            read_write: true,
        }
    }

    async fn read(&mut self, sector: u64, bufs: &mut [&mut [u8]]) -> Result<()> {
        for (i, buf) in bufs.iter_mut().enumerate() {
            let start = ((sector + i as u64) * self.sector_size) as usize;
            let end = start + self.sector_size as usize;
            if end > self.data.len() {
                return Err(EngineError::internal(format!(
                    "mem backend read past end of device: {end} > {}",
                    self.data.len()
                )));
            }
            buf.copy_from_slice(&self.data[start..end]);
        }
        Ok(())
    }

    async fn write(&mut self, sector: u64, bufs: &[&[u8]]) -> Result<()> {
        for (i, buf) in bufs.iter().enumerate() {
            let start = ((sector + i as u64) * self.sector_size) as usize;
            let end = start + self.sector_size as usize;
            if end > self.data.len() {
                return Err(EngineError::internal(format!(
                    "mem backend write past end of device: {end} > {}",
                    self.data.len()
                )));
            }
            self.data[start..end].copy_from_slice(buf);
        }
        Ok(())
    }

    async fn resize(&mut self, size_sectors: u64) -> Result<()> {
        self.data.resize((size_sectors * self.sector_size) as usize, 0);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) {}
}

/// A file-backed backing device, gated behind the `file-backend` feature.
#[cfg(feature = "file-backend")]
pub mod file {
    use super::*;
    use tokio::fs::File;
    use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

    /// A backing device over a real file, opened read-write.
    #[derive(Debug)]
    pub struct FileBackingDevice {
        sector_size: u64,
        file: File,
    }

    impl FileBackingDevice {
        pub async fn open(file: File, sector_size: u64) -> Result<Self> {
            Ok(Self { sector_size, file })
        }

        async fn len_bytes(&self) -> Result<u64> {
            Ok(self
                .file
                .metadata()
                .await
                .map_err(EngineError::backing)?
                .len())
        }
    }

    impl BackingDevice for FileBackingDevice {
        async fn get_info(&self) -> BackingInfo {
            let len = self.len_bytes().await.unwrap_or(0);
            BackingInfo {
                sector_size: self.sector_size,
                size_sectors: len / self.sector_size,
                read_write: true,
            }
        }

        async fn read(&mut self, sector: u64, bufs: &mut [&mut [u8]]) -> Result<()> {
            for (i, buf) in bufs.iter_mut().enumerate() {
                let offset = (sector + i as u64) * self.sector_size;
                self.file
                    .seek(SeekFrom::Start(offset))
                    .await
                    .map_err(EngineError::backing)?;
                self.file.read_exact(buf).await.map_err(EngineError::backing)?;
            }
            Ok(())
        }

        async fn write(&mut self, sector: u64, bufs: &[&[u8]]) -> Result<()> {
            for (i, buf) in bufs.iter().enumerate() {
                let offset = (sector + i as u64) * self.sector_size;
                self.file
                    .seek(SeekFrom::Start(offset))
                    .await
                    .map_err(EngineError::backing)?;
                self.file.write_all(buf).await.map_err(EngineError::backing)?;
            }
            Ok(())
        }

        async fn resize(&mut self, size_sectors: u64) -> Result<()> {
            self.file
                .set_len(size_sectors * self.sector_size)
                .await
                .map_err(EngineError::backing)
        }

        async fn flush(&mut self) -> Result<()> {
            self.file.flush().await.map_err(EngineError::backing)
        }

        async fn disconnect(&mut self) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mem_backend_round_trips() {
        let mut dev = MemBackingDevice::new(512);
        dev.resize(4).await.unwrap();
        let payload = [0x5Au8; 512];
        dev.write(1, &[&payload]).await.unwrap();

        let mut out = [0u8; 512];
        {
            let mut bufs: [&mut [u8]; 1] = [&mut out];
            dev.read(1, &mut bufs).await.unwrap();
        }
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn mem_backend_fresh_sectors_are_zero() {
        let mut dev = MemBackingDevice::new(512);
        dev.resize(2).await.unwrap();
        let mut out = [0xFFu8; 512];
        {
            let mut bufs: [&mut [u8]; 1] = [&mut out];
            dev.read(0, &mut bufs).await.unwrap();
        }
        assert_eq!(out, [0u8; 512]);
    }

    #[tokio::test]
    async fn mem_backend_reports_size() {
        let mut dev = MemBackingDevice::new(512);
        dev.resize(8).await.unwrap();
        assert_eq!(dev.get_info().await.size_sectors, 8);
    }
}
