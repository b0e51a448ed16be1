//! Window combinators: decorators over the windowed `Provider` trait.
//!
//! These shape *what* gets asked for without touching *how* it is produced:
//! `Expand` widens asks for prefetch, `FullSpan` pins the whole item list for
//! the cheap fallback tier, `Preserve` stops the fallback from thrashing when
//! the caller's ask shrinks, `Transition` bridges a resolution-target change
//! without a blank flash, and `Merge` folds an ordered tier list into one
//! result map. All of them forward an empty ask untouched: an empty ask is a
//! release request and must reach the tier underneath.

use crate::item::ItemId;
use crate::texture::{ids_in_windows, Provider, Texture};
use crate::window::{Direction, Window};
use std::collections::HashMap;

/// Widens each requested window by a margin factor so neighbours are decoded
/// before they scroll into view.
///
/// The extra span goes ahead of the window when scrolling forward, behind it
/// when scrolling backward, and is split evenly when the direction is
/// unknown.
pub struct Expand {
    inner: Box<dyn Provider>,
    margin: f64,
    total: usize,
}

impl Expand {
    pub fn new(inner: Box<dyn Provider>, margin: f64) -> Self {
        Self {
            inner,
            margin,
            total: 0,
        }
    }

    /// Swap the wrapped provider, returning the old one. Used by the manager
    /// to splice in a transition when the resolution target changes.
    pub fn replace_inner(&mut self, inner: Box<dyn Provider>) -> Box<dyn Provider> {
        std::mem::replace(&mut self.inner, inner)
    }

    fn expanded(&self, window: Window) -> Window {
        let extra = (window.len() as f64 * self.margin).ceil() as usize;
        let (behind, ahead) = match window.direction {
            Direction::Forward => (0, extra),
            Direction::Backward => (extra, 0),
            Direction::Unknown => (extra / 2, extra - extra / 2),
        };
        Window::new(
            window.start.saturating_sub(behind),
            (window.end + ahead).min(self.total),
            window.direction,
        )
    }
}

impl Provider for Expand {
    fn provide(&mut self, windows: &[Window]) -> HashMap<ItemId, Texture> {
        let expanded: Vec<Window> = windows.iter().map(|w| self.expanded(*w)).collect();
        self.inner.provide(&expanded)
    }

    fn set_items(&mut self, items: &[ItemId]) {
        self.total = items.len();
        self.inner.set_items(items);
    }
}

/// Always requests the entire item list, whatever the caller asked for.
///
/// Only sane on the cheapest tier, where keeping every item resident costs
/// almost nothing and guarantees a fallback for any scroll position.
pub struct FullSpan {
    inner: Box<dyn Provider>,
    total: usize,
}

impl FullSpan {
    pub fn new(inner: Box<dyn Provider>) -> Self {
        Self { inner, total: 0 }
    }
}

impl Provider for FullSpan {
    fn provide(&mut self, windows: &[Window]) -> HashMap<ItemId, Texture> {
        if windows.is_empty() {
            return self.inner.provide(&[]);
        }
        self.inner.provide(&[Window::span(0, self.total)])
    }

    fn set_items(&mut self, items: &[ItemId]) {
        self.total = items.len();
        self.inner.set_items(items);
    }
}

/// Remembers the union of every span it has fully materialized and widens
/// narrower asks back out to it.
///
/// Without this the fallback tier would evict and reload items every time the
/// caller's request shrinks (e.g. while a focus view narrows the ask to one
/// item) and grows again. A span only joins the remembered scope once every
/// item in the ask came back with a result; an error-flagged result counts,
/// as in `Transition`, so one permanently broken item cannot disable scope
/// preservation.
pub struct Preserve {
    inner: Box<dyn Provider>,
    items: Vec<ItemId>,
    span: Option<(usize, usize)>,
}

impl Preserve {
    pub fn new(inner: Box<dyn Provider>) -> Self {
        Self {
            inner,
            items: Vec::new(),
            span: None,
        }
    }
}

impl Provider for Preserve {
    fn provide(&mut self, windows: &[Window]) -> HashMap<ItemId, Texture> {
        if windows.is_empty() {
            self.span = None;
            return self.inner.provide(&[]);
        }

        let total = self.items.len();
        let asked_lo = windows.iter().map(|w| w.start).min().unwrap_or(0).min(total);
        let asked_hi = windows.iter().map(|w| w.end).max().unwrap_or(0).min(total);

        let (lo, hi) = match self.span {
            Some((plo, phi)) => (asked_lo.min(plo), asked_hi.max(phi.min(total))),
            None => (asked_lo, asked_hi),
        };
        let results = self.inner.provide(&[Window::span(lo, hi)]);

        let materialized = (asked_lo..asked_hi).all(|i| results.contains_key(&self.items[i]));
        if materialized {
            self.span = Some((lo, hi));
        }
        results
    }

    fn set_items(&mut self, items: &[ItemId]) {
        self.items = items.to_vec();
        if let Some((lo, hi)) = self.span {
            let total = self.items.len();
            self.span = Some((lo.min(total), hi.min(total)));
        }
        self.inner.set_items(items);
    }
}

/// Bridges a resolution-target change: serves the new provider's results
/// where available and falls back to the old provider's otherwise.
///
/// Once every in-window item has a result from the new provider - an
/// error-flagged result counts, or a permanently failed item would pin the
/// old tier forever - the old provider is released and dropped, and the
/// wrapper degenerates to plain forwarding.
pub struct Transition {
    old: Option<Box<dyn Provider>>,
    new: Box<dyn Provider>,
    items: Vec<ItemId>,
}

impl Transition {
    pub fn new(old: Box<dyn Provider>, new: Box<dyn Provider>) -> Self {
        Self {
            old: Some(old),
            new,
            items: Vec::new(),
        }
    }

    /// Whether the old provider has been torn down.
    pub fn saturated(&self) -> bool {
        self.old.is_none()
    }
}

impl Provider for Transition {
    fn provide(&mut self, windows: &[Window]) -> HashMap<ItemId, Texture> {
        let mut new_results = self.new.provide(windows);
        let Some(old) = self.old.as_mut() else {
            return new_results;
        };

        let wanted = ids_in_windows(&self.items, windows);
        if wanted.iter().all(|id| new_results.contains_key(id)) {
            // New tier covers everything in-window: tear the old one down.
            old.provide(&[]);
            self.old = None;
            log::debug!("resolution transition saturated, old tier released");
            return new_results;
        }

        let old_results = old.provide(windows);
        for (id, texture) in old_results {
            match new_results.get(&id) {
                // Prefer the old tier's good result over a new failure.
                Some(new) if new.failed && !texture.failed => {
                    new_results.insert(id, texture);
                }
                Some(_) => {}
                None => {
                    new_results.insert(id, texture);
                }
            }
        }
        new_results
    }

    fn set_items(&mut self, items: &[ItemId]) {
        self.items = items.to_vec();
        if let Some(old) = self.old.as_mut() {
            old.set_items(items);
        }
        self.new.set_items(items);
    }
}

/// Folds results from an ordered list of providers, most-preferred first:
/// the first non-missing, non-failed entry per item wins.
pub fn merge_ranked(maps: Vec<HashMap<ItemId, Texture>>) -> HashMap<ItemId, Texture> {
    let mut merged: HashMap<ItemId, Texture> = HashMap::new();
    for map in maps {
        for (id, texture) in map {
            match merged.get(&id) {
                None => {
                    merged.insert(id, texture);
                }
                // A failed entry is kept only until any tier has a good one.
                Some(existing) if existing.failed && !texture.failed => {
                    merged.insert(id, texture);
                }
                Some(_) => {}
            }
        }
    }
    merged
}

/// Priority-delegated merge over an ordered tier list.
pub struct Merge {
    tiers: Vec<Box<dyn Provider>>,
}

impl Merge {
    pub fn new(tiers: Vec<Box<dyn Provider>>) -> Self {
        Self { tiers }
    }
}

impl Provider for Merge {
    fn provide(&mut self, windows: &[Window]) -> HashMap<ItemId, Texture> {
        let maps = self
            .tiers
            .iter_mut()
            .map(|tier| tier.provide(windows))
            .collect();
        merge_ranked(maps)
    }

    fn set_items(&mut self, items: &[ItemId]) {
        for tier in &mut self.tiers {
            tier.set_items(items);
        }
    }
}
