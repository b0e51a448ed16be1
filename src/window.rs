//! Windows, resolutions and resolution quantization.
//!
//! A `Window` is a contiguous range of item-list indices the UI currently
//! cares about, plus a scroll-direction hint used to bias prefetch expansion.
//! Resolutions are quantized into a small set of buckets so that minor
//! UI-size jitter (e.g. during a window resize) neither invalidates disk
//! caches nor forces re-decoding.

/// Smallest bucket dimension in pixels.
pub const BUCKET_BASE: u32 = 200;

/// Geometric growth factor between adjacent buckets.
const BUCKET_GROWTH: f64 = 1.3;

/// Quantize one dimension to the nearest bucket.
///
/// Candidates start at [`BUCKET_BASE`] and grow by 30% until one exceeds the
/// request; of the two surrounding candidates the numerically closer wins
/// (ties go to the smaller). The result is idempotent and monotonic, and two
/// requests within the same bucket always map to the same value, so effective
/// resolution stays within ~15% of ideal while the number of distinct cache
/// directories stays bounded.
pub fn quantize(px: u32) -> u32 {
    if px <= BUCKET_BASE {
        return BUCKET_BASE;
    }
    let mut lo = BUCKET_BASE;
    loop {
        let hi = (lo as f64 * BUCKET_GROWTH).round() as u32;
        if hi >= px {
            return if px - lo <= hi - px { lo } else { hi };
        }
        lo = hi;
    }
}

/// A (width, height) pixel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Quantize both dimensions independently.
    pub fn quantized(self) -> Self {
        Self::new(quantize(self.width), quantize(self.height))
    }

    /// Bytes needed for an RGBA buffer at this resolution.
    #[inline]
    pub fn rgba_bytes(self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Scroll direction hint for prefetch expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Unknown,
}

/// A contiguous half-open index range `[start, end)` over the current item
/// list, plus the direction the user is scrolling in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
    pub direction: Direction,
}

impl Window {
    pub const fn new(start: usize, end: usize, direction: Direction) -> Self {
        Self {
            start,
            end,
            direction,
        }
    }

    /// A window with no direction hint.
    pub const fn span(start: usize, end: usize) -> Self {
        Self::new(start, end, Direction::Unknown)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Index range clamped to an item list of `total` entries.
    #[inline]
    pub fn indices(&self, total: usize) -> std::ops::Range<usize> {
        self.start.min(total)..self.end.min(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_small_requests_hit_base() {
        assert_eq!(quantize(1), 200);
        assert_eq!(quantize(64), 200);
        assert_eq!(quantize(200), 200);
    }

    #[test]
    fn test_quantize_picks_closer_candidate() {
        // Candidates: 200, 260, 338, 439, ...
        assert_eq!(quantize(210), 200); // 10 vs 50
        assert_eq!(quantize(250), 260); // 50 vs 10
        assert_eq!(quantize(260), 260);
        assert_eq!(quantize(300), 338); // 40 vs 38
        assert_eq!(quantize(338), 338);
    }

    #[test]
    fn test_quantize_idempotent() {
        for px in [1, 64, 199, 200, 210, 260, 300, 338, 439, 1000, 4096] {
            let b = quantize(px);
            assert_eq!(quantize(b), b, "bucket({px}) = {b} is not a fixed point");
        }
    }

    #[test]
    fn test_quantize_monotonic() {
        let mut last = 0;
        for px in 1..3000 {
            let b = quantize(px);
            assert!(b >= last, "quantize not monotonic at {px}");
            last = b;
        }
    }

    #[test]
    fn test_window_indices_clamp() {
        let w = Window::span(3, 10);
        assert_eq!(w.indices(5), 3..5);
        assert_eq!(w.indices(2), 2..2);
        assert_eq!(w.len(), 7);
        assert!(Window::span(4, 4).is_empty());
    }
}
