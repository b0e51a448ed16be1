//! Texture handles, the GPU uploader seam, and the windowed provider trait.
//!
//! `TextureTier` is one resolution-specific branch of the provider graph: it
//! drains finished pixel buffers from its async stage, uploads them through
//! the host's `TextureUploader`, and caches the handles by item id so repeated
//! uploads never happen. Handles for items that drop out of every requested
//! window are released within the same `provide` call. A permanently failed
//! item gets an error-flagged handle instead of endless retries, so the UI can
//! draw a stable "failed" placeholder.

use crate::item::ItemId;
use crate::stage::AsyncStage;
use crate::window::Window;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Opaque GPU-resident backing handle.
pub type TextureKey = u64;

/// A GPU-resident decoded image.
///
/// `failed` marks "known-bad" (decode/fetch permanently failed), never
/// "pending" - pending items are simply absent from result maps.
#[derive(Debug, Clone)]
pub struct Texture {
    pub key: TextureKey,
    pub width: u32,
    pub height: u32,
    pub failed: bool,
}

impl Texture {
    /// Stable placeholder for a permanently failed item.
    pub fn failed_placeholder() -> Self {
        Self {
            key: 0,
            width: 0,
            height: 0,
            failed: true,
        }
    }
}

/// Uploads decoded pixels to GPU memory and releases the handles.
///
/// The UI draws the resulting `Texture` values but never frees them; release
/// is solely the pipeline's responsibility.
pub trait TextureUploader: Send + Sync {
    fn upload(&self, width: u32, height: u32, pixels: &[u8]) -> crate::error::Result<TextureKey>;
    fn release(&self, key: TextureKey);
}

/// A windowed provider: the interface every tier and combinator speaks.
///
/// `provide` is non-blocking and best-effort: it returns whatever is ready
/// for the requested windows right now and schedules the rest. An empty
/// window set releases every held resource.
pub trait Provider {
    fn provide(&mut self, windows: &[Window]) -> HashMap<ItemId, Texture>;

    /// Propagate a changed item list. Identical indices may now denote
    /// different content, so callers follow this with a fresh `provide`.
    fn set_items(&mut self, items: &[ItemId]);
}

/// Resolve a window set to the identifiers it covers.
pub fn ids_in_windows(items: &[ItemId], windows: &[Window]) -> HashSet<ItemId> {
    let mut ids = HashSet::new();
    for window in windows {
        for index in window.indices(items.len()) {
            ids.insert(items[index].clone());
        }
    }
    ids
}

/// One resolution tier: async stage + GPU handle cache.
pub struct TextureTier {
    stage: AsyncStage,
    uploader: Arc<dyn TextureUploader>,
    items: Vec<ItemId>,
    textures: HashMap<ItemId, Texture>,
}

impl TextureTier {
    pub fn new(stage: AsyncStage, uploader: Arc<dyn TextureUploader>) -> Self {
        Self {
            stage,
            uploader,
            items: Vec::new(),
            textures: HashMap::new(),
        }
    }
}

impl Provider for TextureTier {
    fn provide(&mut self, windows: &[Window]) -> HashMap<ItemId, Texture> {
        let wanted = ids_in_windows(&self.items, windows);

        // Release handles for items that fell out of every window.
        let uploader = &self.uploader;
        self.textures.retain(|id, texture| {
            if wanted.contains(id) {
                return true;
            }
            if !texture.failed {
                uploader.release(texture.key);
            }
            log::debug!("released texture for evicted item {id}");
            false
        });

        // Only items without a cached handle (good or failed) need work.
        let need: HashSet<ItemId> = wanted
            .iter()
            .filter(|id| !self.textures.contains_key(*id))
            .cloned()
            .collect();

        for (id, outcome) in self.stage.poll(&need) {
            let texture = match outcome {
                Ok(buf) => match self.uploader.upload(buf.width(), buf.height(), buf.pixels()) {
                    Ok(key) => Texture {
                        key,
                        width: buf.width(),
                        height: buf.height(),
                        failed: false,
                    },
                    Err(e) => {
                        log::warn!("upload failed for {id}: {e}");
                        Texture::failed_placeholder()
                    }
                },
                Err(e) => {
                    log::debug!("produce failed for {id}: {e}");
                    Texture::failed_placeholder()
                }
            };
            self.textures.insert(id, texture);
        }

        wanted
            .into_iter()
            .filter_map(|id| {
                let texture = self.textures.get(&id)?.clone();
                Some((id, texture))
            })
            .collect()
    }

    fn set_items(&mut self, items: &[ItemId]) {
        self.items = items.to_vec();
    }
}

impl Drop for TextureTier {
    fn drop(&mut self) {
        for texture in self.textures.values() {
            if !texture.failed {
                self.uploader.release(texture.key);
            }
        }
    }
}
