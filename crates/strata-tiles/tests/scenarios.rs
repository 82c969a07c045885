//! End-to-end frame loops over small synthetic trees.

use std::f64::consts::FRAC_PI_3;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future;
use glam::{DMat4, DVec3};
use strata_tiles::{
    BoundingVolumeHeader, ByteFetcher, CameraState, CameraTracker, ContentCounts, ContentFactory,
    ContentFuture, ContentMemory, ContentPayload, ContentState, ContentUpdateContext, ContentVariant,
    FetchFuture, FrameState, LoadedContent, Refine, TileContent, TileHeader, TileId, Tileset,
    TilesetDescriptor, TilesetEvent, TilesetOptions,
};

const MIB: usize = 1024 * 1024;

/// Answers every fetch at once, except URLs ending in `.never`.
#[derive(Default)]
struct Fetcher {
    urls: Mutex<Vec<String>>,
}

impl Fetcher {
    fn requested(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl ByteFetcher for Fetcher {
    fn fetch(&self, url: &str, _priority: f64) -> FetchFuture {
        self.urls.lock().unwrap().push(url.to_owned());
        if url.ends_with(".never") {
            return future::pending().boxed();
        }
        future::ready(Ok(b"b3dm".to_vec())).boxed()
    }
}

/// Content with a fixed one-megabyte footprint.
struct MegabyteContent;

impl TileContent for MegabyteContent {
    fn variant(&self) -> ContentVariant {
        ContentVariant::BatchedModel
    }
    fn update(&mut self, _context: &ContentUpdateContext, _frame: &FrameState) {}
    fn show(&mut self) {}
    fn hide(&mut self) {}
    fn destroy(&mut self) {}
    fn memory(&self) -> ContentMemory {
        ContentMemory {
            geometry_bytes: MIB,
            ..ContentMemory::default()
        }
    }
    fn counts(&self) -> ContentCounts {
        ContentCounts::default()
    }
    fn has_property(&self, _feature_id: u64, _name: &str) -> bool {
        false
    }
    fn get_property(&self, _feature_id: u64, _name: &str) -> Option<String> {
        None
    }
}

struct Factory;

impl ContentFactory for Factory {
    fn create(&self, _payload: ContentPayload) -> ContentFuture {
        let content: Box<dyn TileContent> = Box::new(MegabyteContent);
        future::ready(Ok(LoadedContent::Renderable(content))).boxed()
    }
}

fn sphere(center: DVec3, radius: f64) -> BoundingVolumeHeader {
    BoundingVolumeHeader::from_sphere([center.x, center.y, center.z, radius])
}

fn options() -> TilesetOptions {
    TilesetOptions {
        cull_requests_while_moving: false,
        ..TilesetOptions::default()
    }
}

struct Scene {
    tileset: Tileset,
    fetcher: Arc<Fetcher>,
    tracker: CameraTracker,
    time: f64,
}

impl Scene {
    fn new(geometric_error: f64, root: TileHeader, options: TilesetOptions) -> Self {
        let fetcher = Arc::new(Fetcher::default());
        let tileset = Tileset::new(
            TilesetDescriptor::new(geometric_error, root),
            options,
            Arc::clone(&fetcher) as Arc<dyn ByteFetcher>,
            Arc::new(Factory),
        )
        .unwrap();
        Self {
            tileset,
            fetcher,
            tracker: CameraTracker::new(1000.0),
            time: 0.0,
        }
    }

    fn view(&mut self, position: DVec3, target: DVec3) {
        self.time += 1.0 / 60.0;
        let camera = CameraState::look_at(position, target, DVec3::Y, FRAC_PI_3);
        let frame = self.tracker.next_frame(camera, self.time);
        self.tileset.update(&frame);
    }

    fn find(&self, url: &str) -> TileId {
        self.tileset
            .tiles()
            .iter()
            .find(|tile| tile.content_url() == Some(url))
            .map(|tile| tile.id())
            .unwrap()
    }

    fn requested_urls(&self) -> Vec<&str> {
        self.tileset
            .requested_tiles()
            .iter()
            .filter_map(|&id| self.tileset.tile(id).content_url())
            .collect()
    }
}

/// A tree whose root already meets the error budget renders nothing and
/// requests nothing.
#[test]
fn test_root_within_budget_selects_nothing() {
    let root = TileHeader::new(sphere(DVec3::ZERO, 10.0), 1.0).with_content("root.b3dm");
    let mut scene = Scene::new(1.0, root, options());
    scene.view(DVec3::new(0.0, 0.0, 1000.0), DVec3::ZERO);

    assert!(scene.tileset.selected_tiles().is_empty());
    assert!(scene.tileset.requested_tiles().is_empty());
    assert!(scene.fetcher.requested().is_empty());
    let root = scene.tileset.root();
    assert!(scene.tileset.tile(root).frame_state().screen_space_error < 16.0);
}

/// An additive parent never pulls in a child that is out of view.
#[test]
fn test_additive_parent_skips_hidden_child() {
    let root = TileHeader::new(sphere(DVec3::ZERO, 100.0), 1000.0)
        .with_refine(Refine::Add)
        .with_content("root.b3dm")
        .with_child(TileHeader::new(sphere(DVec3::new(-50.0, 0.0, 0.0), 5.0), 0.0).with_content("left.b3dm"))
        .with_child(TileHeader::new(sphere(DVec3::new(50.0, 0.0, 0.0), 5.0), 0.0).with_content("right.b3dm"));
    let mut scene = Scene::new(1000.0, root, options());

    for _ in 0..10 {
        scene.view(DVec3::new(50.0, 0.0, 30.0), DVec3::new(50.0, 0.0, 0.0));
    }

    let left = scene.find("left.b3dm");
    let right = scene.find("right.b3dm");
    let root = scene.tileset.root();
    assert_eq!(scene.tileset.tile(left).content_state(), ContentState::Unloaded);
    assert_eq!(scene.tileset.tile(right).content_state(), ContentState::Ready);
    let requested = scene.fetcher.requested();
    assert!(requested.contains(&"right.b3dm".to_owned()));
    assert!(!requested.contains(&"left.b3dm".to_owned()));
    // Additive content is drawn together.
    assert_eq!(scene.tileset.selected_tiles(), &[root, right]);
}

/// With room for one tile, moving across three tiles evicts the previous
/// one, never the tile selected in the current frame. Tiles selected
/// together stay resident even over budget.
#[test]
fn test_eviction_spares_current_selection() {
    let mut root = TileHeader::new(sphere(DVec3::ZERO, 200.0), 1000.0);
    for (x, name) in [(-100.0, "a.b3dm"), (0.0, "b.b3dm"), (100.0, "c.b3dm")] {
        root = root.with_child(TileHeader::new(sphere(DVec3::new(x, 0.0, 0.0), 1.0), 0.0).with_content(name));
    }
    let options = TilesetOptions {
        maximum_memory_usage_mb: 1,
        ..options()
    };
    let mut scene = Scene::new(1000.0, root, options);
    let unloaded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&unloaded);
    scene.tileset.subscribe(move |event| {
        if let TilesetEvent::TileUnloaded(tile) = event {
            sink.lock().unwrap().push(*tile);
        }
    });

    let check_frame = |scene: &Scene| {
        let evicted: Vec<TileId> = unloaded.lock().unwrap().drain(..).collect();
        for tile in scene.tileset.selected_tiles() {
            assert!(!evicted.contains(tile));
            assert_eq!(scene.tileset.tile(*tile).content_state(), ContentState::Ready);
        }
        evicted.len()
    };

    let mut evictions = 0;
    for x in [-100.0, 0.0, 100.0] {
        for _ in 0..3 {
            scene.view(DVec3::new(x, 0.0, 10.0), DVec3::new(x, 0.0, 0.0));
            evictions += check_frame(&scene);
        }
        assert_eq!(scene.tileset.selected_tiles().len(), 1);
        assert!(!scene.tileset.is_over_budget());
    }
    assert_eq!(evictions, 2);
    assert_eq!(scene.tileset.cached_tiles(), 1);

    // Two tiles in view at once: over budget, yet both stay.
    for _ in 0..4 {
        scene.view(DVec3::new(50.0, 0.0, 150.0), DVec3::new(50.0, 0.0, 0.0));
        evictions += check_frame(&scene);
    }
    assert_eq!(scene.tileset.selected_tiles().len(), 2);
    assert!(scene.tileset.is_over_budget());
    assert_eq!(scene.tileset.total_memory_bytes(), 2 * MIB);
    assert_eq!(evictions, 2);
}

/// Parent with a leaf child and an empty child whose own child never loads.
fn partially_resident_tree(grandchild: &str) -> TileHeader {
    TileHeader::new(sphere(DVec3::ZERO, 50.0), 1000.0)
        .with_content("root.b3dm")
        .with_child(TileHeader::new(sphere(DVec3::new(-10.0, 0.0, 0.0), 5.0), 0.0).with_content("a.b3dm"))
        .with_child(
            TileHeader::new(sphere(DVec3::new(10.0, 0.0, 0.0), 5.0), 500.0)
                .with_child(TileHeader::new(sphere(DVec3::new(10.0, 0.0, 0.0), 4.0), 0.0).with_content(grandchild)),
        )
}

/// A parent does not refine while a descendant under an empty child is
/// missing content; it keeps rendering itself instead.
#[test]
fn test_parent_waits_for_descendants_of_empty_child() {
    let mut scene = Scene::new(1000.0, partially_resident_tree("g.never"), options());
    let root = scene.tileset.root();
    for _ in 0..6 {
        scene.view(DVec3::new(0.0, 0.0, 100.0), DVec3::ZERO);
        assert!(!scene.tileset.tile(root).frame_state().refines);
    }
    let a = scene.find("a.b3dm");
    let g = scene.find("g.never");
    assert_eq!(scene.tileset.tile(a).content_state(), ContentState::Ready);
    assert_eq!(scene.tileset.tile(g).content_state(), ContentState::Loading);
    assert_eq!(scene.tileset.selected_tiles(), &[root]);
}

/// Once the whole subtree is resident the parent refines to it.
#[test]
fn test_parent_refines_once_descendants_load() {
    let mut scene = Scene::new(1000.0, partially_resident_tree("g.b3dm"), options());
    for _ in 0..3 {
        scene.view(DVec3::new(0.0, 0.0, 100.0), DVec3::ZERO);
    }
    let root = scene.tileset.root();
    assert!(scene.tileset.tile(root).frame_state().refines);
    let mut selected = scene.tileset.selected_tiles().to_vec();
    selected.sort();
    let mut expected = vec![scene.find("a.b3dm"), scene.find("g.b3dm")];
    expected.sort();
    assert_eq!(selected, expected);
}

/// A chain of co-centered unit spheres. Tiles at the `stalled` depths name
/// content that never arrives.
fn chain(errors: &[f64], stalled: &[usize]) -> TileHeader {
    let mut header: Option<TileHeader> = None;
    for (depth, &error) in errors.iter().enumerate().rev() {
        let extension = if stalled.contains(&depth) { "never" } else { "b3dm" };
        let mut tile =
            TileHeader::new(sphere(DVec3::ZERO, 1.0), error).with_content(format!("{depth}.{extension}"));
        if let Some(child) = header.take() {
            tile = tile.with_child(child);
        }
        header = Some(tile);
    }
    header.unwrap()
}

/// Camera distance from the chain's surfaces at which screen-space error
/// equals geometric error.
fn unit_error_distance() -> f64 {
    1000.0 / (2.0 * (FRAC_PI_3 * 0.5).tan())
}

fn skip_options() -> TilesetOptions {
    TilesetOptions {
        skip_level_of_detail: true,
        maximum_screen_space_error: 1.0,
        skip_screen_space_error_factor: 16.0,
        skip_levels: 1,
        progressive_resolution_height_fraction: 0.0,
        ..options()
    }
}

fn immediate_options() -> TilesetOptions {
    TilesetOptions {
        immediately_load_desired_level_of_detail: true,
        ..skip_options()
    }
}

impl Scene {
    /// Look at the chain from `scale` times the unit-error distance, so each
    /// tile's screen-space error is its geometric error divided by `scale`.
    fn view_chain(&mut self, scale: f64) {
        self.view(DVec3::new(0.0, 0.0, 1.0 + scale * unit_error_distance()), DVec3::ZERO);
    }
}

fn skip_scene(errors: &[f64]) -> Scene {
    let mut scene = Scene::new(100.0, chain(errors, &[]), skip_options());
    scene.view_chain(1.0);
    scene
}

/// Parent 50 and child 10: 50 / 16 is not above 10, so the child is skipped;
/// the grandchild at 3 is two levels down and loads on its own.
#[test]
fn test_skip_traversal_threshold() {
    let scene = skip_scene(&[50.0, 10.0, 3.0, 0.5]);
    assert!(scene.tileset.skip_level_of_detail_active());
    let child = scene.find("1.b3dm");
    assert!((scene.tileset.tile(child).frame_state().screen_space_error - 10.0).abs() < 1e-6);

    let mut requested = scene.requested_urls();
    requested.sort();
    assert_eq!(requested, vec!["0.b3dm", "2.b3dm", "3.b3dm"]);
}

/// An error ratio past the factor is not enough one level down.
#[test]
fn test_skip_traversal_needs_level_gap() {
    let scene = skip_scene(&[50.0, 3.0, 0.5]);
    let mut requested = scene.requested_urls();
    requested.sort();
    assert_eq!(requested, vec!["0.b3dm", "2.b3dm"]);
}

/// While the desired leaf is still loading, its nearest ready ancestor is
/// drawn in its place.
#[test]
fn test_skip_traversal_selects_ready_ancestor() {
    let mut scene = Scene::new(100.0, chain(&[50.0, 10.0, 3.0, 0.5], &[3]), skip_options());
    for _ in 0..3 {
        scene.view_chain(1.0);
    }
    let stand_in = scene.find("2.b3dm");
    let leaf = scene.find("3.never");
    assert_eq!(scene.tileset.tile(leaf).content_state(), ContentState::Loading);
    assert_eq!(scene.tileset.tile(scene.find("1.b3dm")).content_state(), ContentState::Unloaded);
    assert_eq!(scene.tileset.selected_tiles(), &[stand_in]);
    assert!(!scene.tileset.has_mixed_content());
}

/// A ready parent fills in for a missing child while a sibling already
/// renders at full detail, so both levels are drawn together.
#[test]
fn test_skip_traversal_mixes_levels() {
    let root = TileHeader::new(sphere(DVec3::ZERO, 50.0), 1000.0)
        .with_content("root.b3dm")
        .with_child(TileHeader::new(sphere(DVec3::new(-10.0, 0.0, 0.0), 5.0), 0.0).with_content("a.b3dm"))
        .with_child(TileHeader::new(sphere(DVec3::new(10.0, 0.0, 0.0), 5.0), 0.0).with_content("b.never"));
    let options = TilesetOptions {
        skip_level_of_detail: true,
        ..options()
    };
    let mut scene = Scene::new(1000.0, root, options);
    for _ in 0..3 {
        scene.view(DVec3::new(0.0, 0.0, 100.0), DVec3::ZERO);
    }

    let root = scene.tileset.root();
    let a = scene.find("a.b3dm");
    let mut selected = scene.tileset.selected_tiles().to_vec();
    selected.sort();
    let mut expected = vec![root, a];
    expected.sort();
    assert_eq!(selected, expected);
    assert!(scene.tileset.has_mixed_content());

    let root_state = scene.tileset.tile(root).frame_state();
    assert!(!root_state.final_resolution);
    assert_eq!(root_state.selection_depth, 0);
    let child_state = scene.tileset.tile(a).frame_state();
    assert!(child_state.final_resolution);
    assert_eq!(child_state.selection_depth, 1);
}

/// Immediate loading fetches only the tile that meets the error budget.
#[test]
fn test_immediate_loads_only_desired_tile() {
    let mut scene = Scene::new(100.0, chain(&[50.0, 10.0, 3.0, 0.5], &[]), immediate_options());
    for _ in 0..3 {
        scene.view_chain(1.0);
    }
    let leaf = scene.find("3.b3dm");
    assert_eq!(scene.fetcher.requested(), vec!["3.b3dm".to_owned()]);
    assert_eq!(scene.tileset.selected_tiles(), &[leaf]);
    for depth in 0..3 {
        let tile = scene.find(&format!("{depth}.b3dm"));
        assert_eq!(scene.tileset.tile(tile).content_state(), ContentState::Unloaded);
    }
}

/// After zooming out, a desired tile that has not loaded borrows a ready
/// descendant two levels below it.
#[test]
fn test_immediate_falls_back_to_near_descendant() {
    let mut scene = Scene::new(100.0, chain(&[64.0, 16.0, 4.0, 0.0], &[1, 2]), immediate_options());
    for _ in 0..2 {
        scene.view_chain(1.0);
    }
    let leaf = scene.find("3.b3dm");
    assert_eq!(scene.tileset.selected_tiles(), &[leaf]);

    for _ in 0..2 {
        scene.view_chain(32.0);
    }
    let desired = scene.find("1.never");
    assert_eq!(scene.tileset.tile(desired).content_state(), ContentState::Loading);
    assert_eq!(scene.tileset.selected_tiles(), &[leaf]);
}

/// Ready descendants deeper than the fallback depth are not used.
#[test]
fn test_immediate_fallback_depth_is_bounded() {
    let mut scene = Scene::new(100.0, chain(&[64.0, 16.0, 8.0, 4.0, 0.0], &[1, 2, 3]), immediate_options());
    for _ in 0..2 {
        scene.view_chain(1.0);
    }
    let leaf = scene.find("4.b3dm");
    assert_eq!(scene.tileset.selected_tiles(), &[leaf]);

    for _ in 0..2 {
        scene.view_chain(32.0);
    }
    assert!(scene.tileset.selected_tiles().is_empty());
    assert_eq!(scene.tileset.tile(leaf).content_state(), ContentState::Ready);
    assert_eq!(
        scene.fetcher.requested(),
        vec!["4.b3dm".to_owned(), "1.never".to_owned()]
    );
}

/// Re-running visibility with an unchanged transform never rebuilds volumes.
#[test]
fn test_transform_update_counter() {
    let root = TileHeader::new(sphere(DVec3::ZERO, 10.0), 1.0).with_content("root.b3dm");
    let mut scene = Scene::new(1.0, root, options());
    let root = scene.tileset.root();
    for _ in 0..3 {
        scene.view(DVec3::new(0.0, 0.0, 100.0), DVec3::ZERO);
    }
    assert_eq!(scene.tileset.tile(root).bounding_volume_updates(), 0);

    scene
        .tileset
        .set_model_matrix(DMat4::from_translation(DVec3::new(0.0, 5.0, 0.0)));
    for _ in 0..3 {
        scene.view(DVec3::new(0.0, 0.0, 100.0), DVec3::ZERO);
    }
    assert_eq!(scene.tileset.tile(root).bounding_volume_updates(), 1);
    assert_eq!(
        scene.tileset.tile(root).bounding_volume().center(),
        DVec3::new(0.0, 5.0, 0.0)
    );
}
