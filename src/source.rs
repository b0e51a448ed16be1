//! The synchronous per-item compute chain.
//!
//! A `TileSource` turns one item identifier into one decoded pixel buffer.
//! The concrete chain is decode/fetch -> resample -> disk cache, stacked as
//! decorators; each stage is a pure per-item function holding no buffers
//! between calls, so windowed retention and eviction are entirely the async
//! stage's problem. Every buffer is reserved against the memory budget before
//! the decode that fills it.

use crate::alloc::{PixelBuf, StealingReserver};
use crate::decode;
use crate::error::{Error, Result};
use crate::item::{ItemId, ItemOrigin, ItemSource, RemoteFetch};
use crate::window::Resolution;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Produces the decoded pixels for one item.
pub trait TileSource: Send + Sync {
    fn produce(&self, id: &ItemId) -> Result<Arc<PixelBuf>>;
}

/// Decode encoded bytes into a budget-reserved buffer.
///
/// Dimensions are probed from the header first so the reservation happens
/// before the full decode allocates anything large.
fn decode_reserved(reserver: &StealingReserver, data: &[u8]) -> Result<PixelBuf> {
    let (pw, ph) = decode::probe_dimensions(data)?;
    let mut reservation = reserver.reserve(Resolution::new(pw, ph).rgba_bytes())?;
    let (pixels, width, height) = decode::decode_pixels(data)?;
    if (width, height) != (pw, ph) {
        // Header and decoder disagree; re-reserve at the real size.
        drop(reservation);
        reservation = reserver.reserve(Resolution::new(width, height).rgba_bytes())?;
    }
    Ok(reservation.into_buf(pixels, width, height))
}

/// Head of the chain: reads a local file or fetches from the remote
/// collaborator, then decodes.
pub struct DecodeSource {
    items: Arc<dyn ItemSource>,
    remote: Arc<dyn RemoteFetch>,
    reserver: StealingReserver,
    target: Resolution,
}

impl DecodeSource {
    pub fn new(
        items: Arc<dyn ItemSource>,
        remote: Arc<dyn RemoteFetch>,
        reserver: StealingReserver,
        target: Resolution,
    ) -> Self {
        Self {
            items,
            remote,
            reserver,
            target,
        }
    }
}

impl TileSource for DecodeSource {
    fn produce(&self, id: &ItemId) -> Result<Arc<PixelBuf>> {
        let origin = self
            .items
            .origin(id)
            .ok_or_else(|| Error::MissingItem(id.to_string()))?;
        let data = match origin {
            ItemOrigin::Local(path) => fs::read(path)?,
            // Remote assets arrive pre-scaled to (or near) the target.
            ItemOrigin::Remote { asset } => self.remote.fetch(&asset, self.target)?,
        };
        Ok(Arc::new(decode_reserved(&self.reserver, &data)?))
    }
}

/// Pure resample stage: fits decoded pixels to the target resolution.
///
/// Aspect-preserving and never upscaling; the input buffer is dropped (and
/// its reservation released) as soon as the output exists. Stateless apart
/// from the filter and target baked in at construction.
pub struct ResampleSource {
    inner: Box<dyn TileSource>,
    reserver: StealingReserver,
    target: Resolution,
    filter: image::imageops::FilterType,
}

impl ResampleSource {
    pub fn new(
        inner: Box<dyn TileSource>,
        reserver: StealingReserver,
        target: Resolution,
        filter: image::imageops::FilterType,
    ) -> Self {
        Self {
            inner,
            reserver,
            target,
            filter,
        }
    }

    /// Largest size that fits inside the target without changing aspect
    /// ratio or upscaling.
    fn fit(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = (self.target.width as f64 / width as f64)
            .min(self.target.height as f64 / height as f64)
            .min(1.0);
        let w = ((width as f64 * scale).round() as u32).max(1);
        let h = ((height as f64 * scale).round() as u32).max(1);
        (w, h)
    }
}

impl TileSource for ResampleSource {
    fn produce(&self, id: &ItemId) -> Result<Arc<PixelBuf>> {
        let input = self.inner.produce(id)?;
        let (tw, th) = self.fit(input.width(), input.height());
        if (tw, th) == (input.width(), input.height()) {
            return Ok(input);
        }

        let src = image::ImageBuffer::<image::Rgba<u8>, _>::from_raw(
            input.width(),
            input.height(),
            input.pixels(),
        )
        .ok_or_else(|| Error::Decode(format!("inconsistent buffer for {id}")))?;
        let reservation = self.reserver.reserve(Resolution::new(tw, th).rgba_bytes())?;
        let resized = image::imageops::resize(&src, tw, th, self.filter);
        drop(src);
        drop(input);
        Ok(Arc::new(reservation.into_buf(resized.into_raw(), tw, th)))
    }
}

/// Hit/miss counters for one disk cache directory.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    rewrites: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Corrupt entries regenerated and overwritten.
    pub fn rewrites(&self) -> u64 {
        self.rewrites.load(Ordering::Relaxed)
    }

    /// Hit rate in [0, 1].
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

/// Persistent cache over a resample source, keyed by item inside one
/// resolution-bucket directory.
///
/// Entries are PNG files created lazily on first successful produce and
/// invalidated only by deletion: resized output is immutable once produced
/// for a given source, so mtime checks would buy nothing. A cached read that
/// fails to decode counts as a miss and is silently regenerated over the bad
/// entry.
pub struct DiskCacheSource {
    inner: Box<dyn TileSource>,
    reserver: StealingReserver,
    dir: PathBuf,
    stats: Arc<CacheStats>,
}

impl DiskCacheSource {
    pub fn new(inner: Box<dyn TileSource>, reserver: StealingReserver, dir: PathBuf) -> Self {
        Self {
            inner,
            reserver,
            dir,
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    fn entry_path(&self, id: &ItemId) -> PathBuf {
        self.dir.join(format!("{}.png", id.cache_key()))
    }

    fn write_entry(&self, path: &PathBuf, buf: &PixelBuf) {
        let result = fs::create_dir_all(&self.dir).and_then(|()| {
            image::save_buffer_with_format(
                path,
                buf.pixels(),
                buf.width(),
                buf.height(),
                image::ExtendedColorType::Rgba8,
                image::ImageFormat::Png,
            )
            .map_err(std::io::Error::other)
        });
        // A failed write only costs a recompute next run.
        if let Err(e) = result {
            log::warn!("cache write failed for {}: {e}", path.display());
        }
    }
}

impl TileSource for DiskCacheSource {
    fn produce(&self, id: &ItemId) -> Result<Arc<PixelBuf>> {
        let path = self.entry_path(id);

        if let Ok(data) = fs::read(&path) {
            match decode_reserved(&self.reserver, &data) {
                Ok(buf) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::new(buf));
                }
                Err(Error::BudgetExceeded { requested, budget }) => {
                    return Err(Error::BudgetExceeded { requested, budget });
                }
                Err(e) => {
                    log::warn!("corrupt cache entry {}: {e}, regenerating", path.display());
                    self.stats.rewrites.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let buf = self.inner.produce(id)?;
        self.write_entry(&path, &buf);
        Ok(buf)
    }
}
