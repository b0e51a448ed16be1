//! Configuration - all tunable parameters in one place.
//!
//! Every behavioral parameter of the pipeline lives here, so there are no
//! magic numbers scattered through the provider chain. The defaults are what
//! the screenshot browser ships with; hosts override individual fields.

use crate::window::Resolution;
use image::imageops::FilterType;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::System;

/// Master configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Memory budget
    pub memory: MemoryConfig,
    /// Worker pool
    pub pool: PoolConfig,
    /// Prefetch and resampling
    pub prefetch: PrefetchConfig,
    /// On-disk cache
    pub disk: DiskConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            pool: PoolConfig::default(),
            prefetch: PrefetchConfig::default(),
            disk: DiskConfig::default(),
        }
    }
}

/// Share of system RAM used by [`MemoryConfig::detected`].
const DETECT_RATIO: f64 = 0.10;
const DETECT_MIN: usize = 100 * 1024 * 1024; // 100 MB
const DETECT_MAX: usize = 4 * 1024 * 1024 * 1024; // 4 GB

/// Memory budget configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Total byte budget for outstanding pixel buffers.
    pub budget: usize,
    /// Sleep interval while blocked on the budget with nothing to steal.
    pub steal_backoff: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            budget: 100 * 1024 * 1024, // 100 MB
            steal_backoff: Duration::from_millis(10),
        }
    }
}

impl MemoryConfig {
    /// Derive the budget from system RAM (10%, clamped to [100 MB, 4 GB]).
    pub fn detected() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let total_ram = sys.total_memory() as usize;
        let budget = ((total_ram as f64 * DETECT_RATIO) as usize).clamp(DETECT_MIN, DETECT_MAX);
        Self {
            budget,
            ..Self::default()
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum worker threads (0 = available parallelism).
    pub workers: usize,
    /// Idle workers exit after this quiet period.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Resolve the worker cap.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

/// Prefetch and resampling configuration.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Window expansion margin (1.0 = widen each window by its own length).
    pub margin: f64,
    /// Resolution of the always-resident fallback tier.
    pub fallback_resolution: Resolution,
    /// Resampling filter for the post-process stage.
    pub resample_filter: FilterType,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            margin: 1.0,
            fallback_resolution: Resolution::new(64, 64),
            resample_filter: FilterType::CatmullRom, // bicubic
        }
    }
}

/// On-disk cache configuration.
#[derive(Debug, Clone)]
pub struct DiskConfig {
    /// Base directory; per-tier bucket directories are created beneath it.
    pub root: PathBuf,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            root: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("filmstrip"),
        }
    }
}
