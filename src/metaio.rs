//! Raw, uncached single-sector metadata I/O (§4.3–§4.5).
//!
//! Refcount table/blocks, L1 entries, and L2 entries are small point reads
//! and read-modify-writes against the backing device's own sector size —
//! they never go through the range-lock cache, which exists to hold back
//! *virtual* sector payloads (§4.7), not metadata pointers. A metadata write
//! is a read-modify-write of the one physical sector a pointer lives in.

use crate::backend::BackingDevice;
use crate::error::{EngineError, Result};
use crate::offset::{to_sector, OffsetWord};

/// Reads the physical sector containing byte `byte_offset` and returns it.
pub async fn read_sector<B: BackingDevice>(dev: &mut B, byte_offset: u64) -> Result<Vec<u8>> {
    let sector_size = dev.get_info().await.sector_size;
    let (sector, _) = to_sector(byte_offset, sector_size);
    let mut buf = vec![0u8; sector_size as usize];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut buf];
        dev.read(sector, &mut bufs).await?;
    }
    Ok(buf)
}

/// Read-modify-writes `patch` into the physical sector containing
/// `byte_offset`, at the sector-relative position `byte_offset` implies.
pub async fn patch_sector<B: BackingDevice>(
    dev: &mut B,
    byte_offset: u64,
    patch: &[u8],
) -> Result<()> {
    let sector_size = dev.get_info().await.sector_size;
    let (sector, within) = to_sector(byte_offset, sector_size);
    let within = within as usize;
    if within + patch.len() > sector_size as usize {
        return Err(EngineError::internal(format!(
            "patch of {} bytes at offset {byte_offset} crosses a sector boundary",
            patch.len()
        )));
    }
    let mut buf = vec![0u8; sector_size as usize];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut buf];
        dev.read(sector, &mut bufs).await?;
    }
    buf[within..within + patch.len()].copy_from_slice(patch);
    dev.write(sector, &[&buf]).await
}

/// Reads the 8-byte pointer word at `byte_offset`.
pub async fn read_word<B: BackingDevice>(dev: &mut B, byte_offset: u64) -> Result<OffsetWord> {
    let sector_size = dev.get_info().await.sector_size;
    let (sector, within) = to_sector(byte_offset, sector_size);
    let within = within as usize;
    if within + 8 > sector_size as usize {
        return Err(EngineError::internal(format!(
            "8-byte word at offset {byte_offset} crosses a sector boundary"
        )));
    }
    let mut buf = vec![0u8; sector_size as usize];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut buf];
        dev.read(sector, &mut bufs).await?;
    }
    let (word, _) = OffsetWord::read(&buf[within..within + 8])?;
    Ok(word)
}

/// Writes the 8-byte pointer word at `byte_offset`.
pub async fn write_word<B: BackingDevice>(
    dev: &mut B,
    byte_offset: u64,
    word: OffsetWord,
) -> Result<()> {
    let mut encoded = [0u8; 8];
    word.write(&mut encoded)?;
    patch_sector(dev, byte_offset, &encoded).await
}

/// Reads the 16-bit big-endian counter at `byte_offset`.
pub async fn read_u16<B: BackingDevice>(dev: &mut B, byte_offset: u64) -> Result<u16> {
    let sector_size = dev.get_info().await.sector_size;
    let (sector, within) = to_sector(byte_offset, sector_size);
    let within = within as usize;
    if within + 2 > sector_size as usize {
        return Err(EngineError::internal(format!(
            "16-bit counter at offset {byte_offset} crosses a sector boundary"
        )));
    }
    let mut buf = vec![0u8; sector_size as usize];
    {
        let mut bufs: [&mut [u8]; 1] = [&mut buf];
        dev.read(sector, &mut bufs).await?;
    }
    Ok(u16::from_be_bytes([buf[within], buf[within + 1]]))
}

/// Writes the 16-bit big-endian counter at `byte_offset`.
pub async fn write_u16<B: BackingDevice>(dev: &mut B, byte_offset: u64, value: u16) -> Result<()> {
    patch_sector(dev, byte_offset, &value.to_be_bytes()).await
}

/// Reads `len_bytes` worth of a cluster starting at `cluster_offset`, in
/// physical-sector-sized chunks.
pub async fn read_span<B: BackingDevice>(
    dev: &mut B,
    cluster_offset: u64,
    len_bytes: u64,
) -> Result<Vec<u8>> {
    let sector_size = dev.get_info().await.sector_size;
    if cluster_offset % sector_size != 0 || len_bytes % sector_size != 0 {
        return Err(EngineError::internal(
            "read_span: offset/len not sector-aligned",
        ));
    }
    let nsectors = (len_bytes / sector_size) as usize;
    let mut storage = vec![0u8; len_bytes as usize];
    let mut out = Vec::with_capacity(nsectors);
    let mut rest = storage.as_mut_slice();
    for _ in 0..nsectors {
        let (chunk, tail) = rest.split_at_mut(sector_size as usize);
        out.push(chunk);
        rest = tail;
    }
    let first_sector = cluster_offset / sector_size;
    dev.read(first_sector, &mut out).await?;
    Ok(storage)
}

/// Writes a whole cluster-sized (or smaller, sector-aligned) span.
pub async fn write_span<B: BackingDevice>(
    dev: &mut B,
    cluster_offset: u64,
    data: &[u8],
) -> Result<()> {
    let sector_size = dev.get_info().await.sector_size;
    if cluster_offset % sector_size != 0 || data.len() as u64 % sector_size != 0 {
        return Err(EngineError::internal(
            "write_span: offset/len not sector-aligned",
        ));
    }
    let first_sector = cluster_offset / sector_size;
    let bufs: Vec<&[u8]> = data.chunks(sector_size as usize).collect();
    dev.write(first_sector, &bufs).await
}
