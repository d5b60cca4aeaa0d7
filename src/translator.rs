//! The address translator (§4.5): walks L1 → L2 → cluster, materializing
//! missing tables and data clusters when `allocate` is set.

use crate::allocator;
use crate::backend::BackingDevice;
use crate::error::{EngineError, Result};
use crate::header::{Header, VirtualAddress};
use crate::metaio;
use crate::offset::OffsetWord;
use crate::refcount;

/// Resolves `addr` to a physical byte offset, or `None` if unmapped and
/// `allocate` is false.
///
/// In allocating mode, a returned `None` would mean allocation silently
/// failed to produce a mapping — the design treats that as impossible by
/// construction, so callers get `EngineError::Unknown("internal: ...")`
/// instead, never a bare `None`, when `allocate` is true.
pub async fn walk<B: BackingDevice>(
    dev: &mut B,
    header: &Header,
    next_cluster: &mut u64,
    addr: VirtualAddress,
    allocate: bool,
) -> Result<Option<u64>> {
    let l1_entry_offset = header.l1_table_offset + 8 * addr.l1_index;
    let l1_word = metaio::read_word(dev, l1_entry_offset).await?;

    let l2_table_offset = if l1_word.is_unallocated() {
        if !allocate {
            return Ok(None);
        }
        let new_cluster = allocator::extend(dev, header.geometry(), next_cluster).await?;
        let cluster_index = new_cluster / header.geometry().cluster_size;
        refcount::incr_refcount(dev, header, next_cluster, cluster_index).await?;
        metaio::write_word(dev, l1_entry_offset, OffsetWord::new(new_cluster)).await?;
        new_cluster
    } else {
        l1_word.require_uncompressed()?
    };

    let l2_entry_offset = l2_table_offset + 8 * addr.l2_index;
    let l2_word = metaio::read_word(dev, l2_entry_offset).await?;

    let data_cluster_offset = if l2_word.is_unallocated() {
        if !allocate {
            return Ok(None);
        }
        let new_cluster = allocator::extend(dev, header.geometry(), next_cluster).await?;
        let cluster_index = new_cluster / header.geometry().cluster_size;
        refcount::incr_refcount(dev, header, next_cluster, cluster_index).await?;
        metaio::write_word(dev, l2_entry_offset, OffsetWord::new(new_cluster)).await?;
        new_cluster
    } else {
        l2_word.require_uncompressed()?
    };

    Ok(Some(data_cluster_offset + addr.within_cluster))
}

/// Convenience used by the façade's `write` path: allocation must always
/// produce an offset.
pub async fn walk_allocating<B: BackingDevice>(
    dev: &mut B,
    header: &Header,
    next_cluster: &mut u64,
    addr: VirtualAddress,
) -> Result<u64> {
    walk(dev, header, next_cluster, addr, true)
        .await?
        .ok_or_else(|| EngineError::internal("allocating walk returned no mapping"))
}
