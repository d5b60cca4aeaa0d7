//! The range-lock write-back cache (§4.7): sits between the translator and
//! the backing device, holding recently written physical sectors in memory
//! until a size threshold, an explicit flush, or disconnect forces them out.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::backend::BackingDevice;
use crate::error::{EngineError, Result};
use crate::intervalset::{Interval, IntervalSet};
use crate::rangelock::RangeLocks;

struct CacheState {
    cached: HashMap<u64, Vec<u8>>,
    in_cache: IntervalSet,
    current_size_bytes: u64,
}

/// A write-back cache over physical sectors of a `BackingDevice`.
///
/// Every public method is `&self`: concurrent callers are expected, and
/// exclusion is enforced per-interval by `RangeLocks` rather than by a
/// single coarse lock over the whole cache.
pub struct RangeLockCache<B: BackingDevice> {
    dev: Mutex<B>,
    sector_size: u64,
    max_size_bytes: u64,
    state: Mutex<CacheState>,
    range_locks: RangeLocks,
    write_back_m: Mutex<()>,
    disconnected: Mutex<bool>,
}

impl<B: BackingDevice> RangeLockCache<B> {
    pub async fn new(dev: B, max_size_bytes: u64) -> Self {
        let sector_size = dev.get_info().await.sector_size;
        Self {
            dev: Mutex::new(dev),
            sector_size,
            max_size_bytes,
            state: Mutex::new(CacheState {
                cached: HashMap::new(),
                in_cache: IntervalSet::new(),
                current_size_bytes: 0,
            }),
            range_locks: RangeLocks::new(),
            write_back_m: Mutex::new(()),
            disconnected: Mutex::new(false),
        }
    }

    async fn check_connected(&self) -> Result<()> {
        if *self.disconnected.lock().await {
            Err(EngineError::Disconnected)
        } else {
            Ok(())
        }
    }

    /// Reads `bufs.len()` consecutive physical sectors starting at
    /// `start_sector`, each buffer exactly `sector_size` bytes.
    pub async fn read(&self, start_sector: u64, bufs: &mut [&mut [u8]]) -> Result<()> {
        self.check_connected().await?;
        let n = bufs.len() as u64;
        if n == 0 {
            return Ok(());
        }
        let interval = Interval::new(start_sector, start_sector + n - 1);

        self.range_locks
            .with_lock(interval, || async {
                let any_cached = {
                    let state = self.state.lock().await;
                    state.in_cache.intersects(interval)
                };

                if !any_cached {
                    let mut dev = self.dev.lock().await;
                    return dev.read(start_sector, bufs).await;
                }

                for i in 0..n {
                    let sector = start_sector + i;
                    let cached = {
                        let state = self.state.lock().await;
                        state.cached.get(&sector).cloned()
                    };
                    match cached {
                        Some(buf) => bufs[i as usize].copy_from_slice(&buf),
                        None => {
                            let mut dev = self.dev.lock().await;
                            dev.read(sector, core::slice::from_mut(&mut bufs[i as usize]))
                                .await?;
                        }
                    }
                }
                Ok(())
            })
            .await
    }

    /// Stores `bufs.len()` consecutive sectors in the cache without touching
    /// the backing device. May trigger a lazy write-back first if doing so
    /// would exceed `max_size_bytes`.
    pub async fn write(&self, start_sector: u64, bufs: &[&[u8]]) -> Result<()> {
        self.check_connected().await?;
        let n = bufs.len() as u64;
        if n == 0 {
            return Ok(());
        }
        let interval = Interval::new(start_sector, start_sector + n - 1);
        let added_bytes = n * self.sector_size;

        let over_budget = {
            let state = self.state.lock().await;
            state.current_size_bytes + added_bytes > self.max_size_bytes
        };
        if over_budget {
            self.lazy_write_back().await?;
        }

        let disconnected = self.disconnected.lock().await;
        if *disconnected {
            return Err(EngineError::Disconnected);
        }

        self.range_locks
            .with_lock(interval, || async {
                let mut state = self.state.lock().await;
                for i in 0..n {
                    state
                        .cached
                        .insert(start_sector + i, bufs[i as usize].to_vec());
                }
                state.in_cache.insert(interval);
                state.current_size_bytes += added_bytes;
                Ok(())
            })
            .await
    }

    /// Drains every pending interval out of the cache to the backing device,
    /// coalescing each interval's sectors into a single backing-device
    /// write. Serialized so at most one write-back traversal runs at a
    /// time.
    pub async fn lazy_write_back(&self) -> Result<()> {
        let _serialize = self.write_back_m.lock().await;

        loop {
            let interval = {
                let state = self.state.lock().await;
                state.in_cache.iter().next()
            };
            let Some(interval) = interval else {
                break;
            };

            self.range_locks
                .with_lock(interval, || async {
                    let payload = {
                        let mut state = self.state.lock().await;
                        let mut bytes =
                            Vec::with_capacity((interval.len() * self.sector_size) as usize);
                        for sector in interval.start..=interval.end {
                            let buf = state.cached.remove(&sector).ok_or_else(|| {
                                EngineError::internal(
                                    "sector claimed by in_cache has no cached buffer",
                                )
                            })?;
                            bytes.extend_from_slice(&buf);
                        }
                        state.in_cache.remove(interval);
                        state.current_size_bytes -= interval.len() * self.sector_size;
                        bytes
                    };

                    let mut dev = self.dev.lock().await;
                    let chunks: Vec<&[u8]> = payload.chunks(self.sector_size as usize).collect();
                    dev.write(interval.start, &chunks).await
                })
                .await?;
        }

        Ok(())
    }

    async fn flush_inner(&self) -> Result<()> {
        self.lazy_write_back().await?;
        self.dev.lock().await.flush().await
    }

    pub async fn flush(&self) -> Result<()> {
        self.check_connected().await?;
        self.flush_inner().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut disconnected = self.disconnected.lock().await;
            *disconnected = true;
        }
        self.flush_inner().await?;
        self.dev.lock().await.disconnect().await;
        Ok(())
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    /// Runs `f` with exclusive, raw access to the backing device — used for
    /// metadata I/O (§4.3–§4.5), which bypasses the sector cache entirely.
    pub async fn with_device_mut<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut B) -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        let mut dev = self.dev.lock().await;
        f(&mut dev).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemBackingDevice;

    async fn make_cache(sectors: u64, max_size_bytes: u64) -> RangeLockCache<MemBackingDevice> {
        let dev = MemBackingDevice::with_capacity_bytes(512, sectors * 512);
        RangeLockCache::new(dev, max_size_bytes).await
    }

    #[tokio::test]
    async fn write_then_read_hits_cache_before_flush() {
        let cache = make_cache(4, 1024 * 1024).await;
        let payload = [0x5Au8; 512];
        cache.write(1, &[&payload]).await.unwrap();

        let mut out = [0u8; 512];
        {
            let mut bufs: [&mut [u8]; 1] = [&mut out];
            cache.read(1, &mut bufs).await.unwrap();
        }
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn flush_persists_to_backing_device() {
        let cache = make_cache(4, 1024 * 1024).await;
        let payload = [0x7Bu8; 512];
        cache.write(2, &[&payload]).await.unwrap();
        cache.flush().await.unwrap();

        let mut out = [0u8; 512];
        {
            let mut bufs: [&mut [u8]; 1] = [&mut out];
            cache.read(2, &mut bufs).await.unwrap();
        }
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn disconnect_rejects_further_access() {
        let cache = make_cache(2, 1024 * 1024).await;
        cache.disconnect().await.unwrap();
        let result = cache.read(0, &mut []).await;
        assert!(matches!(result, Err(EngineError::Disconnected)));
    }

    #[tokio::test]
    async fn write_over_budget_triggers_write_back() {
        let cache = make_cache(4, 600).await;
        let payload = [0x11u8; 512];
        cache.write(0, &[&payload]).await.unwrap();
        // Second write pushes past max_size_bytes, forcing a write-back of
        // the first before accepting the second.
        let payload2 = [0x22u8; 512];
        cache.write(1, &[&payload2]).await.unwrap();

        let mut out = [0u8; 512];
        {
            let mut bufs: [&mut [u8]; 1] = [&mut out];
            cache.read(0, &mut bufs).await.unwrap();
        }
        assert_eq!(out, payload);
    }
}
