//! Engine-wide configuration.

/// Configuration supplied to [`crate::engine::Engine::create`] and
/// [`crate::engine::Engine::connect`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Threshold, in bytes, at which the range-lock cache triggers a lazy
    /// write-back before accepting more dirty sectors (§4.7).
    pub max_cache_size_bytes: u64,

    /// The virtual sector size the façade exposes and slices requests by.
    /// This is a logical constant of the engine, not read from the backing
    /// device — see `BackingDevice::get_info` for the backing device's own
    /// physical sector size.
    pub sector_size: u64,
}

/// Default cache threshold: 100 MiB.
pub const DEFAULT_MAX_CACHE_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// The only sector size this engine's façade understands.
pub const VIRTUAL_SECTOR_SIZE: u64 = 512;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: DEFAULT_MAX_CACHE_SIZE_BYTES,
            sector_size: VIRTUAL_SECTOR_SIZE,
        }
    }
}
