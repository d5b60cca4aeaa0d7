//! The cluster allocator (§4.4): hands out the next free cluster by growing
//! the backing device to cover it. Never frees — the core doesn't shrink.

use crate::backend::BackingDevice;
use crate::error::{EngineError, Result};
use crate::header::Geometry;

/// Allocates the next cluster, resizing `dev` so its byte length covers it,
/// and returns that cluster's byte offset.
///
/// `next_cluster` is the caller's single source of truth for the allocation
/// cursor; callers must serialize concurrent calls (§5, §9) — this function
/// does not lock anything itself.
pub async fn extend<B: BackingDevice>(
    dev: &mut B,
    geometry: Geometry,
    next_cluster: &mut u64,
) -> Result<u64> {
    let cluster = *next_cluster;
    *next_cluster += 1;

    let new_size_bytes = *next_cluster * geometry.cluster_size;
    let sector_size = dev.get_info().await.sector_size;
    if new_size_bytes % sector_size != 0 {
        return Err(EngineError::internal(format!(
            "allocator: new size {new_size_bytes} is not a multiple of sector size {sector_size}"
        )));
    }

    dev.resize(new_size_bytes / sector_size).await?;
    tracing::debug!(cluster, new_size_bytes, "grew backing device by one cluster");
    Ok(cluster * geometry.cluster_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemBackingDevice;

    #[tokio::test]
    async fn extend_advances_next_cluster_and_resizes() {
        let geometry = Geometry::new(16);
        let mut dev = MemBackingDevice::with_capacity_bytes(512, geometry.cluster_size * 2);
        let mut next_cluster = 2u64;

        let offset = extend(&mut dev, geometry, &mut next_cluster).await.unwrap();
        assert_eq!(offset, 2 * geometry.cluster_size);
        assert_eq!(next_cluster, 3);
        assert_eq!(
            dev.get_info().await.size_sectors * 512,
            3 * geometry.cluster_size
        );
    }

    #[tokio::test]
    async fn successive_extends_are_monotonic() {
        let geometry = Geometry::new(16);
        let mut dev = MemBackingDevice::with_capacity_bytes(512, 0);
        let mut next_cluster = 0u64;

        let first = extend(&mut dev, geometry, &mut next_cluster).await.unwrap();
        let second = extend(&mut dev, geometry, &mut next_cluster).await.unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, geometry.cluster_size);
        assert_eq!(next_cluster, 2);
    }
}
