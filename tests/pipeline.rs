//! End-to-end pipeline scenarios: liveness, release, tier fallback and
//! resolution transitions, driven through the provider manager exactly the
//! way the browser UI drives it (repeated non-blocking `provide` calls).

use filmstrip::{
    Config, DirectorySource, DiskConfig, Error, ItemId, ProviderManager, RemoteFetch, Resolution,
    Result, Texture, TextureKey, TextureUploader, Window,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory uploader double tracking live GPU handles.
struct TestUploader {
    next: AtomicU64,
    uploads: AtomicUsize,
    live: Mutex<HashSet<TextureKey>>,
}

impl TestUploader {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            uploads: AtomicUsize::new(0),
            live: Mutex::new(HashSet::new()),
        }
    }

    fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

impl TextureUploader for TestUploader {
    fn upload(&self, width: u32, height: u32, pixels: &[u8]) -> Result<TextureKey> {
        assert_eq!(pixels.len(), (width * height * 4) as usize);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let key = self.next.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(key);
        Ok(key)
    }

    fn release(&self, key: TextureKey) {
        self.live.lock().unwrap().remove(&key);
    }
}

/// Remote double: every fetch fails (these tests use local files only).
struct NoRemote;

impl RemoteFetch for NoRemote {
    fn fetch(&self, asset: &str, _target: Resolution) -> Result<Vec<u8>> {
        Err(Error::Fetch {
            asset: asset.to_string(),
            reason: "offline".to_string(),
        })
    }
}

fn write_png(path: &Path, width: u32, height: u32) {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([40, 80, 120, 255]));
    img.save(path).unwrap();
}

struct Harness {
    manager: ProviderManager,
    uploader: Arc<TestUploader>,
    items: Vec<ItemId>,
    _shots: tempfile::TempDir,
    _cache: tempfile::TempDir,
}

/// Browser setup: a screenshot directory with `names` fixture files, a fresh
/// cache root, and a manager at the given preview resolution.
fn harness(names: &[&str], preview: Resolution) -> Harness {
    let shots = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    for name in names {
        if name.ends_with(".png") {
            write_png(&shots.path().join(name), 400, 400);
        } else {
            // Not an image at all; decodes must fail permanently.
            std::fs::write(shots.path().join(name), b"garbage bytes").unwrap();
        }
    }

    let source = Arc::new(DirectorySource::scan(shots.path()));
    let items = source.items().to_vec();
    let uploader = Arc::new(TestUploader::new());
    let config = Config {
        disk: DiskConfig {
            root: cache.path().to_path_buf(),
        },
        ..Config::default()
    };
    let mut manager = ProviderManager::new(
        source,
        Arc::new(NoRemote),
        Arc::clone(&uploader) as Arc<dyn TextureUploader>,
        config,
        preview,
    );
    manager.set_items(items.clone());
    Harness {
        manager,
        uploader,
        items,
        _shots: shots,
        _cache: cache,
    }
}

/// Drive `provide` until the predicate holds or a generous deadline passes.
fn provide_until(
    manager: &mut ProviderManager,
    window: Window,
    predicate: impl Fn(&HashMap<ItemId, Texture>) -> bool,
) -> HashMap<ItemId, Texture> {
    for _ in 0..500 {
        let results = manager.provide(window);
        if predicate(&results) {
            return results;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("pipeline never reached the expected state");
}

#[test]
fn eventually_every_visible_item_has_a_texture() {
    let mut h = harness(&["a.png", "b.png", "c.png"], Resolution::new(210, 210));
    let items = h.items.clone();
    let window = Window::span(0, 3);

    // Preview bucket for 210x210 is 200x200; square fixtures land exactly.
    // Until the primary tier catches up, items may be served by the 64x64
    // fallback, so liveness here means "everything at target resolution".
    let results = provide_until(&mut h.manager, window, |r| {
        items.iter().all(|id| r.get(id).is_some_and(|t| !t.failed && t.width == 200))
    });
    let tex = &results[&items[0]];
    assert_eq!((tex.width, tex.height), (200, 200));
}

#[test]
fn fallback_tier_keeps_every_item_resident() {
    let mut h = harness(&["a.png", "b.png", "c.png", "d.png", "e.png"], Resolution::new(210, 210));
    let items = h.items.clone();

    // Ask only for [1, 3): the full-span fallback still covers all five.
    let results = provide_until(&mut h.manager, Window::span(1, 3), |r| r.len() == 5);
    for id in &items {
        assert!(!results[id].failed);
    }

    // Out-of-window items are served at the 64x64 fallback resolution.
    assert_eq!((results[&items[4]].width, results[&items[4]].height), (64, 64));
}

#[test]
fn corrupt_item_gets_a_stable_error_flag() {
    let mut h = harness(&["a.png", "broken.bmp"], Resolution::new(210, 210));
    let items = h.items.clone();
    let window = Window::span(0, 2);

    let broken = items.iter().find(|id| id.as_str().contains("broken")).unwrap();
    let good = items.iter().find(|id| id.as_str().contains("a.png")).unwrap();

    // Settle: the good item lands in both tiers (two uploads total), the
    // broken one is flagged in the merged result.
    let results = provide_until(&mut h.manager, window, |r| {
        r.get(good).is_some_and(|t| t.width == 200)
            && r.get(broken).is_some_and(|t| t.failed)
            && h.uploader.uploads.load(Ordering::SeqCst) == 2
    });
    assert!(!results[good].failed);

    // The flag is stable: more cycles never flip it or retry anything.
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(10));
        let results = h.manager.provide(window);
        assert!(results[broken].failed);
    }
    assert_eq!(h.uploader.uploads.load(Ordering::SeqCst), 2);
}

#[test]
fn close_releases_all_handles_and_memory() {
    let mut h = harness(&["a.png", "b.png"], Resolution::new(210, 210));
    let items = h.items.clone();
    let window = Window::span(0, 2);

    provide_until(&mut h.manager, window, |r| {
        items.iter().all(|id| r.get(id).is_some_and(|t| !t.failed))
    });
    assert!(h.uploader.live_count() > 0);

    // Wait out any stragglers so the budget is quiescent, then close.
    for _ in 0..500 {
        if h.manager.budget().used() == 0 {
            break;
        }
        h.manager.provide(window);
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(h.manager.budget().used(), 0);

    h.manager.close();
    assert_eq!(h.uploader.live_count(), 0);
}

#[test]
fn resolution_change_never_blanks_a_ready_item() {
    let mut h = harness(&["a.png"], Resolution::new(210, 210));
    let item = h.items[0].clone();
    let window = Window::span(0, 1);

    provide_until(&mut h.manager, window, |r| {
        r.get(&item).is_some_and(|t| t.width == 200)
    });

    // Retarget: 300x300 quantizes to the 338 bucket.
    h.manager.set_preview_resolution(Resolution::new(300, 300));
    assert_eq!(h.manager.preview_resolution(), Resolution::new(338, 338));

    // The very next provide still serves the old 200x200 result.
    let results = h.manager.provide(window);
    assert_eq!(results[&item].width, 200);

    // Every intermediate cycle keeps the item present until the new tier
    // lands, and the final resolution is the new bucket.
    let results = provide_until(&mut h.manager, window, |r| {
        let tex = r.get(&item).expect("item blanked out mid-transition");
        assert!(!tex.failed);
        tex.width == 338
    });
    assert_eq!((results[&item].width, results[&item].height), (338, 338));
}

#[test]
fn unchanged_bucket_does_not_rebuild_the_tier() {
    let mut h = harness(&["a.png"], Resolution::new(210, 210));
    // 190 and 210 share the 200 bucket.
    h.manager.set_preview_resolution(Resolution::new(190, 190));
    assert_eq!(h.manager.preview_resolution(), Resolution::new(200, 200));
}

#[test]
fn focus_tier_serves_full_detail_resolution() {
    let mut h = harness(&["a.png", "b.png", "c.png"], Resolution::new(100, 100));
    let items = h.items.clone();

    h.manager.set_focus_resolution(Some(Resolution::new(400, 400)));
    // Detail view: current item plus one behind and one ahead.
    let windows = [Window::span(0, 1), Window::span(1, 2), Window::span(2, 3)];

    for _ in 0..500 {
        let results = h.manager.provide_focus(&windows);
        // 400x400 quantizes to the 439 bucket; the 400px fixture is never
        // upscaled, so the focus result arrives at its native 400x400.
        if items
            .iter()
            .all(|id| results.get(id).is_some_and(|t| t.width == 400))
        {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("focus tier never delivered detail resolution");
}

#[test]
fn item_list_change_forces_a_fresh_provide() {
    let mut h = harness(&["a.png", "b.png"], Resolution::new(210, 210));
    let items = h.items.clone();
    let window = Window::span(0, 1);

    provide_until(&mut h.manager, window, |r| {
        r.get(&items[0]).is_some_and(|t| !t.failed)
    });

    // Same window, new list: index 0 now denotes what was item b.
    h.manager.set_items(vec![items[1].clone()]);
    let results = provide_until(&mut h.manager, window, |r| {
        r.get(&items[1]).is_some_and(|t| !t.failed)
    });
    assert!(!results.contains_key(&items[0]));
}

#[test]
fn second_run_reuses_the_disk_cache() {
    let shots = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write_png(&shots.path().join("a.png"), 400, 400);

    let run = |uploader: Arc<TestUploader>| {
        let source = Arc::new(DirectorySource::scan(shots.path()));
        let items = source.items().to_vec();
        let config = Config {
            disk: DiskConfig {
                root: cache.path().to_path_buf(),
            },
            ..Config::default()
        };
        let mut manager =
            ProviderManager::new(source, Arc::new(NoRemote), uploader, config, Resolution::new(210, 210));
        manager.set_items(items.clone());
        provide_until(&mut manager, Window::span(0, 1), |r| {
            items.iter().all(|id| r.get(id).is_some_and(|t| !t.failed))
        });
        // The fallback tier's cache write lands after the preview tier has
        // satisfied the predicate above; keep the manager (and its worker
        // pool) alive until both bucket directories exist on disk.
        for _ in 0..500 {
            let have = |d: &str| cache.path().join(d).is_dir();
            if have("preview_200x200") && have("fallback_64x64") {
                break;
            }
            manager.provide(Window::span(0, 1));
            std::thread::sleep(Duration::from_millis(10));
        }
    };

    run(Arc::new(TestUploader::new()));

    // The bucket directories now hold encoded entries from the first run.
    let dirs: Vec<String> = std::fs::read_dir(cache.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(dirs.iter().any(|d| d == "preview_200x200"), "got {dirs:?}");
    assert!(dirs.iter().any(|d| d == "fallback_64x64"), "got {dirs:?}");

    // A second run against the same cache still produces correct textures.
    run(Arc::new(TestUploader::new()));
}
