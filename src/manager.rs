//! Provider manager: owns the tier graph and reacts to UI state changes.
//!
//! The manager is constructed with exactly the collaborators it needs - item
//! source, remote fetch, uploader, config - rather than reaching into any
//! global state. It owns three tiers built from the same chain
//! (decode/fetch -> resample -> disk cache -> async stage -> textures):
//!
//! - primary: prefetch-expanded, at the quantized preview resolution;
//! - fallback: scope-preserved full span at a fixed minimum resolution, so
//!   every item always has *something* to show;
//! - focus: optional detail-view tier at its own quantized resolution.
//!
//! A resolution-target change swaps a fresh tier into the affected slot
//! behind a `Transition`, so the UI never sees a blank flash while the new
//! tier warms up.

use crate::alloc::{MemoryBudget, StealingReserver};
use crate::combine::{merge_ranked, Expand, FullSpan, Preserve, Transition};
use crate::config::Config;
use crate::item::{ItemId, ItemSource, RemoteFetch};
use crate::pool::{Priority, PriorityPool};
use crate::source::{DecodeSource, DiskCacheSource, ResampleSource};
use crate::stage::AsyncStage;
use crate::texture::{Provider, Texture, TextureTier, TextureUploader};
use crate::window::{Resolution, Window};
use std::collections::HashMap;
use std::sync::Arc;

/// Orchestrates the provider graph for one browser screen.
pub struct ProviderManager {
    items: Vec<ItemId>,
    source: Arc<dyn ItemSource>,
    remote: Arc<dyn RemoteFetch>,
    uploader: Arc<dyn TextureUploader>,
    pool: Arc<PriorityPool>,
    budget: Arc<MemoryBudget>,
    config: Config,
    preview: Resolution,
    focus_resolution: Option<Resolution>,
    primary: Expand,
    fallback: Preserve,
    focus: Option<Box<dyn Provider>>,
    last_window: Option<Window>,
}

impl ProviderManager {
    /// Build the graph for an initial preview resolution (quantized here).
    pub fn new(
        source: Arc<dyn ItemSource>,
        remote: Arc<dyn RemoteFetch>,
        uploader: Arc<dyn TextureUploader>,
        config: Config,
        preview: Resolution,
    ) -> Self {
        let pool = Arc::new(PriorityPool::new(&config.pool));
        let budget = Arc::new(MemoryBudget::new(config.memory.budget));
        let preview = preview.quantized();

        let mut manager = Self {
            items: Vec::new(),
            source,
            remote,
            uploader,
            pool,
            budget,
            config,
            preview,
            focus_resolution: None,
            // Placeholder tiers, replaced right below once `self` exists to
            // build them from.
            primary: Expand::new(Box::new(Idle), 0.0),
            fallback: Preserve::new(Box::new(Idle)),
            focus: None,
            last_window: None,
        };
        manager.primary = Expand::new(
            Box::new(manager.build_tier("preview", preview, Priority::Visible)),
            manager.config.prefetch.margin,
        );
        manager.fallback = Preserve::new(Box::new(FullSpan::new(Box::new(manager.build_tier(
            "fallback",
            manager.config.prefetch.fallback_resolution,
            Priority::Fallback,
        )))));
        manager
    }

    /// One full chain for one tier, down to its own disk-cache bucket.
    fn build_tier(&self, name: &str, resolution: Resolution, priority: Priority) -> TextureTier {
        let reserver = StealingReserver::new(
            Arc::clone(&self.budget),
            Arc::clone(&self.pool),
            self.config.memory.steal_backoff,
        );
        let decode = DecodeSource::new(
            Arc::clone(&self.source),
            Arc::clone(&self.remote),
            reserver.clone(),
            resolution,
        );
        let resample = ResampleSource::new(
            Box::new(decode),
            reserver.clone(),
            resolution,
            self.config.prefetch.resample_filter,
        );
        let dir = self.config.disk.root.join(format!("{name}_{resolution}"));
        let cached = DiskCacheSource::new(Box::new(resample), reserver, dir);
        let stage = AsyncStage::new(Arc::new(cached), Arc::clone(&self.pool), priority);

        let mut tier = TextureTier::new(stage, Arc::clone(&self.uploader));
        tier.set_items(&self.items);
        tier
    }

    /// Replace the item list and propagate it through the whole graph.
    ///
    /// Always follows with a forced re-provide of the last window, even when
    /// the window itself is unchanged: the same indices may now refer to
    /// different content, which a pure "window unchanged" check would miss.
    pub fn set_items(&mut self, items: Vec<ItemId>) {
        self.items = items;
        self.primary.set_items(&self.items);
        self.fallback.set_items(&self.items);
        if let Some(focus) = self.focus.as_mut() {
            focus.set_items(&self.items);
        }
        if let Some(window) = self.last_window {
            let _ = self.provide(window);
        }
    }

    /// Current quantized preview resolution.
    pub fn preview_resolution(&self) -> Resolution {
        self.preview
    }

    /// Change the preview resolution target.
    ///
    /// No-op when the quantized bucket is unchanged; otherwise the primary
    /// tier is rebuilt at the new bucket behind a transition.
    pub fn set_preview_resolution(&mut self, resolution: Resolution) {
        let quantized = resolution.quantized();
        if quantized == self.preview {
            return;
        }
        log::debug!("preview tier switching {} -> {}", self.preview, quantized);
        self.preview = quantized;

        let fresh: Box<dyn Provider> =
            Box::new(self.build_tier("preview", quantized, Priority::Visible));
        let old = self.primary.replace_inner(Box::new(Idle));
        let mut transition = Transition::new(old, fresh);
        transition.set_items(&self.items);
        self.primary.replace_inner(Box::new(transition));
    }

    /// Enable, retarget or disable the focus/detail tier.
    pub fn set_focus_resolution(&mut self, resolution: Option<Resolution>) {
        let quantized = resolution.map(Resolution::quantized);
        if quantized == self.focus_resolution {
            return;
        }
        self.focus_resolution = quantized;

        match quantized {
            Some(resolution) => {
                let fresh = Box::new(self.build_tier("focus", resolution, Priority::Focus));
                self.focus = Some(match self.focus.take() {
                    Some(old) => {
                        let mut transition = Transition::new(old, fresh);
                        transition.set_items(&self.items);
                        Box::new(transition)
                    }
                    None => fresh,
                });
            }
            None => {
                if let Some(mut old) = self.focus.take() {
                    old.provide(&[]);
                }
            }
        }
    }

    /// Best-effort textures for the list view.
    ///
    /// Non-blocking: returns whatever the prefetch-expanded primary tier and
    /// the always-resident fallback tier have ready, preferring the primary.
    pub fn provide(&mut self, window: Window) -> HashMap<ItemId, Texture> {
        self.last_window = Some(window);
        let windows = [window];
        merge_ranked(vec![
            self.primary.provide(&windows),
            self.fallback.provide(&windows),
        ])
    }

    /// Best-effort textures for the detail view (current item plus its
    /// neighbours), preferring the focus tier, then primary, then fallback.
    pub fn provide_focus(&mut self, windows: &[Window]) -> HashMap<ItemId, Texture> {
        let mut maps = Vec::with_capacity(3);
        if let Some(focus) = self.focus.as_mut() {
            maps.push(focus.provide(windows));
        }
        maps.push(self.primary.provide(windows));
        maps.push(self.fallback.provide(windows));
        merge_ranked(maps)
    }

    /// The browser screen closed: release everything every tier holds.
    pub fn close(&mut self) {
        self.primary.provide(&[]);
        self.fallback.provide(&[]);
        if let Some(focus) = self.focus.as_mut() {
            focus.provide(&[]);
        }
        self.last_window = None;
    }

    /// Shared byte budget, for host-side diagnostics.
    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }
}

/// Inert provider used only while the graph is being wired.
struct Idle;

impl Provider for Idle {
    fn provide(&mut self, _windows: &[Window]) -> HashMap<ItemId, Texture> {
        HashMap::new()
    }

    fn set_items(&mut self, _items: &[ItemId]) {}
}
