//! Filmstrip - windowed image cache and prefetch pipeline.
//!
//! Turns "these item indices are visible right now" into ready-to-display GPU
//! textures: a chain of composable providers that decode, resample and cache
//! screenshot images under a hard memory budget, prioritize interactively
//! important work, transition smoothly between resolution tiers, and keep a
//! cheap minimum-resolution fallback resident for every item.
//!
//! The host supplies three collaborators at the crate boundary: an
//! [`ItemSource`] resolving stable identifiers to local files or remote
//! assets, a [`RemoteFetch`] that delivers pre-scaled encoded bytes, and a
//! [`TextureUploader`] that moves decoded pixels into GPU memory. Everything
//! else - budget, pool, decode chain, disk cache, tier graph - lives here,
//! behind [`ProviderManager::provide`] and [`ProviderManager::provide_focus`],
//! both non-blocking and safe to call every frame.

pub mod alloc;
pub mod combine;
pub mod config;
pub mod decode;
pub mod error;
pub mod item;
pub mod manager;
pub mod pool;
pub mod source;
pub mod stage;
pub mod texture;
pub mod window;

pub use alloc::{MemoryBudget, PixelBuf, Reservation, StealingReserver};
pub use config::{Config, DiskConfig, MemoryConfig, PoolConfig, PrefetchConfig};
pub use error::{Error, Result};
pub use item::{DirectorySource, ItemId, ItemOrigin, ItemSource, RemoteFetch};
pub use manager::ProviderManager;
pub use pool::{Priority, PriorityPool};
pub use texture::{Provider, Texture, TextureKey, TextureUploader};
pub use window::{quantize, Direction, Resolution, Window};
