//! The block façade (§4.6, §4.8): `read`/`write`/`resize`/`connect`/`create`/
//! `disconnect`/`get_info` in terms of 512-byte virtual sectors.

use tokio::sync::Mutex;

use crate::allocator;
use crate::backend::BackingDevice;
use crate::cache::RangeLockCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::header::Header;
use crate::metaio;
use crate::offset::to_sector;
use crate::refcount;
use crate::translator;

/// The engine's reported identity, as distinct from the backing device's
/// own (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineInfo {
    pub sector_size: u64,
    pub size_sectors: u64,
    pub read_write: bool,
}

/// A connected QCOW2 engine instance over a backing device of type `B`.
///
/// `next_cluster` is guarded by a `tokio::sync::Mutex` that doubles as the
/// allocation serialization lock the design notes (§9) call for: an
/// allocating walk holds it for the whole allocate-walk-write-back sequence,
/// not just the increment, because the translator is not safe against a
/// second concurrent allocating walk on the same engine.
pub struct Engine<B: BackingDevice> {
    header: Header,
    config: EngineConfig,
    next_cluster: Mutex<u64>,
    cache: RangeLockCache<B>,
}

const VIRTUAL_SECTOR_SIZE: u64 = crate::config::VIRTUAL_SECTOR_SIZE;

impl<B: BackingDevice> Engine<B> {
    pub fn get_info(&self) -> EngineInfo {
        EngineInfo {
            sector_size: VIRTUAL_SECTOR_SIZE,
            size_sectors: self.header.size / VIRTUAL_SECTOR_SIZE,
            read_write: true,
        }
    }

    /// Reads `bufs.len()` consecutive 512-byte virtual sectors starting at
    /// `start_sector`. An unmapped sector reads back as zeroes.
    pub async fn read(&self, start_sector: u64, bufs: &mut [&mut [u8]]) -> Result<()> {
        for (i, buf) in bufs.iter_mut().enumerate() {
            if buf.len() as u64 != VIRTUAL_SECTOR_SIZE {
                return Err(EngineError::internal("virtual sector buffer must be 512 bytes"));
            }
            let byte = (start_sector + i as u64) * VIRTUAL_SECTOR_SIZE;
            let addr = self.header.geometry().decompose(byte);

            let physical = {
                let mut next_cluster = self.next_cluster.lock().await;
                self.cache
                    .with_device_mut(|dev| {
                        translator::walk(dev, &self.header, &mut *next_cluster, addr, false)
                    })
                    .await?
            };

            match physical {
                None => buf.fill(0),
                Some(offset) => self.read_physical_sector(offset, buf).await?,
            }
        }
        Ok(())
    }

    /// Writes `bufs.len()` consecutive 512-byte virtual sectors starting at
    /// `start_sector`, allocating backing clusters as needed.
    pub async fn write(&self, start_sector: u64, bufs: &[&[u8]]) -> Result<()> {
        for (i, buf) in bufs.iter().enumerate() {
            if buf.len() as u64 != VIRTUAL_SECTOR_SIZE {
                return Err(EngineError::internal("virtual sector buffer must be 512 bytes"));
            }
            let byte = (start_sector + i as u64) * VIRTUAL_SECTOR_SIZE;
            let addr = self.header.geometry().decompose(byte);

            let physical = {
                let mut next_cluster = self.next_cluster.lock().await;
                self.cache
                    .with_device_mut(|dev| {
                        translator::walk_allocating(dev, &self.header, &mut *next_cluster, addr)
                    })
                    .await?
            };

            self.write_physical_sector(physical, buf).await?;
        }
        Ok(())
    }

    async fn read_physical_sector(&self, physical_offset: u64, out: &mut [u8]) -> Result<()> {
        let sector_size = self.cache.sector_size();
        let (phys_sector, within) = to_sector(physical_offset, sector_size);
        if sector_size == VIRTUAL_SECTOR_SIZE {
            let mut bufs: [&mut [u8]; 1] = [out];
            return self.cache.read(phys_sector, &mut bufs).await;
        }
        let mut full = vec![0u8; sector_size as usize];
        {
            let mut bufs: [&mut [u8]; 1] = [&mut full];
            self.cache.read(phys_sector, &mut bufs).await?;
        }
        let within = within as usize;
        out.copy_from_slice(&full[within..within + VIRTUAL_SECTOR_SIZE as usize]);
        Ok(())
    }

    async fn write_physical_sector(&self, physical_offset: u64, data: &[u8]) -> Result<()> {
        let sector_size = self.cache.sector_size();
        let (phys_sector, within) = to_sector(physical_offset, sector_size);
        if sector_size == VIRTUAL_SECTOR_SIZE {
            return self.cache.write(phys_sector, &[data]).await;
        }
        let mut full = vec![0u8; sector_size as usize];
        {
            let mut bufs: [&mut [u8]; 1] = [&mut full];
            self.cache.read(phys_sector, &mut bufs).await?;
        }
        let within = within as usize;
        full[within..within + VIRTUAL_SECTOR_SIZE as usize].copy_from_slice(data);
        self.cache.write(phys_sector, &[&full]).await
    }

    /// Grows the logical disk size. Shrinking is out of scope; growing past
    /// the L1 table's current capacity would require L1 table growth, which
    /// is also out of scope for this core.
    pub async fn resize(&mut self, new_size_bytes: u64) -> Result<()> {
        if new_size_bytes % VIRTUAL_SECTOR_SIZE != 0 {
            return Err(EngineError::internal(
                "resize: new size must be a multiple of the virtual sector size",
            ));
        }
        if new_size_bytes < self.header.size {
            tracing::warn!(new_size_bytes, current = self.header.size, "rejected shrink");
            return Err(EngineError::Unsupported("shrinking the image".into()));
        }
        let capacity = self.header.l1_size as u64 * self.header.geometry().bytes_per_l2_table();
        if new_size_bytes > capacity {
            tracing::warn!(new_size_bytes, capacity, "rejected resize past L1 capacity");
            return Err(EngineError::Unsupported("growing the L1 table".into()));
        }

        self.header.size = new_size_bytes;
        let cluster = self.header.write_cluster();
        self.cache
            .with_device_mut(|dev| metaio::write_span(dev, 0, &cluster))
            .await?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<()> {
        self.cache.flush().await
    }

    pub async fn disconnect(self) -> Result<()> {
        tracing::info!("disconnecting engine");
        self.cache.disconnect().await
    }

    /// Formats a fresh image on `dev` for a `size_bytes`-byte logical disk
    /// and returns a connected engine (§4.8).
    pub async fn create(mut dev: B, size_bytes: u64, config: EngineConfig) -> Result<Engine<B>> {
        const CLUSTER_BITS: u32 = 16;
        let geometry = crate::header::Geometry::new(CLUSTER_BITS);

        let l1_size = geometry.l1_size_for(size_bytes);
        let refcount_table_offset = geometry.cluster_size;
        let l1_table_offset = 2 * geometry.cluster_size;
        let l1_bytes = geometry.round_up_to_cluster(8 * l1_size as u64);
        let l1_clusters = l1_bytes / geometry.cluster_size;

        let mut next_cluster = 2 + l1_clusters;
        let total_bytes = next_cluster * geometry.cluster_size;
        let sector_size = dev.get_info().await.sector_size;
        dev.resize(total_bytes / sector_size).await?;

        let header = Header {
            version: 2,
            backing_file_offset: 0,
            backing_file_size: 0,
            cluster_bits: CLUSTER_BITS,
            size: size_bytes,
            crypt_method: 0,
            l1_size,
            l1_table_offset,
            refcount_table_offset,
            refcount_table_clusters: 1,
            nb_snapshots: 0,
            snapshots_offset: 0,
        };

        metaio::write_span(&mut dev, 0, &header.write_cluster()).await?;
        metaio::write_span(
            &mut dev,
            refcount_table_offset,
            &vec![0u8; geometry.cluster_size as usize],
        )
        .await?;

        refcount::incr_refcount(&mut dev, &header, &mut next_cluster, 0).await?;
        refcount::incr_refcount(&mut dev, &header, &mut next_cluster, 1).await?;
        for cluster_index in 2..2 + l1_clusters {
            refcount::incr_refcount(&mut dev, &header, &mut next_cluster, cluster_index).await?;
        }

        metaio::write_span(
            &mut dev,
            l1_table_offset,
            &vec![0u8; l1_bytes as usize],
        )
        .await?;

        tracing::info!(size_bytes, l1_size, "created qcow2 image");

        Ok(Engine {
            header,
            cache: RangeLockCache::new(dev, config.max_cache_size_bytes).await,
            next_cluster: Mutex::new(next_cluster),
            config,
        })
    }

    /// Opens an existing image on `dev` (§4.8).
    pub async fn connect(mut dev: B, config: EngineConfig) -> Result<Engine<B>> {
        let header_bytes = metaio::read_sector(&mut dev, 0).await?;
        let header = Header::read(&header_bytes)?;
        let geometry = header.geometry();

        let info = dev.get_info().await;
        let size_bytes = info.size_sectors * info.sector_size;
        if size_bytes % geometry.cluster_size != 0 {
            return Err(EngineError::Unknown(
                "connect: backing device size is not a multiple of the cluster size".into(),
            ));
        }
        let next_cluster = size_bytes / geometry.cluster_size;

        tracing::info!(size_bytes = header.size, "connected to qcow2 image");

        Ok(Engine {
            header,
            cache: RangeLockCache::new(dev, config.max_cache_size_bytes).await,
            next_cluster: Mutex::new(next_cluster),
            config,
        })
    }

    /// Exposes the header's cluster geometry, primarily for tests asserting
    /// on-disk layout (§8's concrete scenarios).
    pub fn geometry(&self) -> crate::header::Geometry {
        self.header.geometry()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Used only by tests that need to peek at a cluster's refcount without
/// going through the façade.
#[cfg(test)]
pub(crate) async fn cluster_refcount<B: BackingDevice>(
    engine: &Engine<B>,
    cluster_index: u64,
) -> Result<u16> {
    engine
        .cache
        .with_device_mut(|dev| refcount::read_refcount(dev, &engine.header, cluster_index))
        .await
}

/// Used only by tests asserting `next_cluster`'s advancement.
#[cfg(test)]
pub(crate) async fn next_cluster_for_test<B: BackingDevice>(engine: &Engine<B>) -> u64 {
    *engine.next_cluster.lock().await
}
