use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::anyhow;
use image::Rgb;
use tempfile::TempDir;
use tweakview::render::{DisplayImage, Size, lock_buffers};
use tweakview::{Frame, JsonTweakStore, TweakSet, TweakStore, Viewer, ViewerConfig};

const WAIT: Duration = Duration::from_secs(30);

fn gradient(shade: u8) -> DisplayImage {
    DisplayImage::from_fn(16, 8, |x, y| {
        Rgb([shade.wrapping_add((x * 12) as u8), (y * 30) as u8, 128])
    })
}

fn write_png(dir: &Path, name: &str, shade: u8) {
    gradient(shade).save(dir.join(name)).unwrap();
}

fn small_config() -> ViewerConfig {
    ViewerConfig {
        viewport: Size::new(8, 8),
        ..ViewerConfig::default()
    }
}

fn viewer_with(config: ViewerConfig, store: JsonTweakStore) -> Viewer<Vec<Frame>> {
    Viewer::with_files(config, Box::new(store), Vec::new()).unwrap()
}

fn source_pixels(path: &Path) -> DisplayImage {
    image::open(path).unwrap().to_rgb8()
}

#[test]
fn decoded_images_stay_within_the_keep_bound() {
    let temp = TempDir::new().unwrap();
    for i in 0..6u8 {
        write_png(temp.path(), &format!("img{i}.png"), i * 30);
    }
    let config = ViewerConfig {
        keep_decoded: 2,
        ..small_config()
    };
    let mut viewer = viewer_with(config, JsonTweakStore::ephemeral());
    viewer.open(temp.path()).unwrap();
    assert!(viewer.run_until_idle(WAIT));

    let mut steps = 0;
    while viewer.next_image() {
        assert!(viewer.run_until_idle(WAIT));
        assert!(viewer.decoded_count() <= 2, "after step {steps}");
        assert!(viewer.lru_entries().len() <= 2);
        steps += 1;
    }
    assert_eq!(steps, 5);
    assert_eq!(viewer.current_entry().unwrap().name, "img5.png");
    assert!(viewer.current_entry().unwrap().is_decoded());
}

#[test]
fn completion_from_discarded_listing_is_dropped() {
    let temp = TempDir::new().unwrap();
    write_png(temp.path(), "a.png", 10);
    write_png(temp.path(), "b.png", 20);
    let mut viewer = viewer_with(small_config(), JsonTweakStore::ephemeral());
    viewer.open(temp.path()).unwrap();
    assert!(viewer.run_until_idle(WAIT));

    let current = viewer.current().unwrap();
    viewer.enqueue_render(current, true, false);
    assert!(viewer.is_render_in_flight());

    let before = viewer.generation();
    viewer.discard_entries();
    assert!(viewer.generation() > before);
    assert!(!viewer.is_render_in_flight());
    assert!(viewer.entries().is_empty());

    let presented = viewer.sink().len();
    assert!(viewer.wait_for_render(WAIT), "the old render still reports back");
    assert_eq!(viewer.sink().len(), presented);
    assert!(!viewer.is_render_in_flight());
    assert!(viewer.queued_jobs().is_empty());
}

#[test]
fn tweaks_follow_content_across_sessions_and_renames() {
    let images = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let store_path = state.path().join("tweaks.json");
    write_png(images.path(), "photo.png", 50);

    {
        let mut viewer = viewer_with(small_config(), JsonTweakStore::with_file(&store_path));
        viewer.open(&images.path().join("photo.png")).unwrap();
        assert!(viewer.set_black_level(20).unwrap());
        assert!(viewer.rotate_clockwise().unwrap());
        assert!(viewer.run_until_idle(WAIT));
    }
    assert!(store_path.exists(), "dropping the viewer flushes the store");

    let moved = TempDir::new().unwrap();
    fs::copy(
        images.path().join("photo.png"),
        moved.path().join("renamed.png"),
    )
    .unwrap();

    let store = JsonTweakStore::load_or_ephemeral(Some(&store_path));
    let mut viewer = viewer_with(small_config(), store);
    viewer.open(moved.path()).unwrap();
    let tweaks = &viewer.current_entry().unwrap().tweaks;
    assert_eq!(tweaks.black_level, 20);
    assert_eq!(tweaks.rotation.degrees(), 90);

    assert!(viewer.run_until_idle(WAIT));
    let last = viewer.sink().last().unwrap();
    assert!(!last.provisional);
    assert_eq!(Size::of(&last.image), Size::new(4, 8));
}

#[test]
fn neutral_tweaks_show_the_source_unchanged() {
    let temp = TempDir::new().unwrap();
    write_png(temp.path(), "plain.png", 77);
    let mut viewer = viewer_with(small_config(), JsonTweakStore::ephemeral());
    viewer.open(temp.path()).unwrap();
    assert!(viewer.run_until_idle(WAIT));

    let corrected = viewer.current_corrected().unwrap();
    assert_eq!(*corrected, source_pixels(&temp.path().join("plain.png")));
}

#[test]
fn disabling_tweaks_renders_the_source() {
    let temp = TempDir::new().unwrap();
    write_png(temp.path(), "dim.png", 0);
    let source = source_pixels(&temp.path().join("dim.png"));
    let mut viewer = viewer_with(small_config(), JsonTweakStore::ephemeral());
    viewer.open(temp.path()).unwrap();

    assert!(viewer.set_black_level(60).unwrap());
    assert!(viewer.run_until_idle(WAIT));
    assert_ne!(*viewer.current_corrected().unwrap(), source);

    viewer.set_tweaks_enabled(false);
    assert!(viewer.run_until_idle(WAIT));
    assert_eq!(*viewer.current_corrected().unwrap(), source);
    assert_eq!(viewer.current_entry().unwrap().tweaks.black_level, 60);

    viewer.set_tweaks_enabled(true);
    assert!(viewer.run_until_idle(WAIT));
    assert_ne!(*viewer.current_corrected().unwrap(), source);
}

#[test]
fn removing_an_earlier_entry_keeps_the_shown_image() {
    let temp = TempDir::new().unwrap();
    for (i, name) in ["a.png", "b.png", "c.png"].iter().enumerate() {
        write_png(temp.path(), name, i as u8 * 60);
    }
    let mut viewer = viewer_with(small_config(), JsonTweakStore::ephemeral());
    viewer.open(temp.path()).unwrap();
    assert!(viewer.run_until_idle(WAIT));
    while viewer.next_image() {
        assert!(viewer.run_until_idle(WAIT));
    }
    assert_eq!(viewer.current_entry().unwrap().name, "c.png");

    let a = viewer.entries().iter().position(|e| e.name == "a.png").unwrap();
    assert!(viewer.remove_entry(a));
    assert!(viewer.run_until_idle(WAIT));

    assert_eq!(viewer.current_entry().unwrap().name, "c.png");
    assert!(viewer.lru_entries().iter().all(|&i| i < viewer.entries().len()));
    assert!(
        viewer
            .lru_entries()
            .iter()
            .all(|&i| viewer.entries()[i].name != "c.png")
    );
}

#[test]
fn removing_another_entry_shows_the_render_in_flight() {
    let temp = TempDir::new().unwrap();
    for (i, name) in ["a.png", "b.png", "c.png"].iter().enumerate() {
        write_png(temp.path(), name, i as u8 * 60);
    }
    let mut viewer = viewer_with(small_config(), JsonTweakStore::ephemeral());
    viewer.open(temp.path()).unwrap();
    assert!(viewer.run_until_idle(WAIT));
    let before = viewer.sink().last().unwrap().clone();

    assert!(viewer.set_black_level(120).unwrap());
    assert!(viewer.is_render_in_flight());
    let c = viewer.entries().iter().position(|e| e.name == "c.png").unwrap();
    assert!(viewer.remove_entry(c));
    assert!(viewer.run_until_idle(WAIT));

    let entry = viewer.current_entry().unwrap();
    assert_eq!(entry.name, "a.png");
    let scaled = lock_buffers(&entry.record.as_ref().unwrap().buffers)
        .scaled
        .clone()
        .unwrap();
    let last = viewer.sink().last().unwrap();
    assert!(!last.provisional);
    assert_ne!(last.image, before.image);
    assert_eq!(*last.image, *scaled);
}

#[test]
fn removing_the_shown_entry_moves_to_the_next() {
    let temp = TempDir::new().unwrap();
    write_png(temp.path(), "a.png", 0);
    write_png(temp.path(), "b.png", 90);
    let mut viewer = viewer_with(small_config(), JsonTweakStore::ephemeral());
    viewer.open(temp.path()).unwrap();
    assert!(viewer.run_until_idle(WAIT));

    let shown = viewer.current().unwrap();
    assert_eq!(viewer.entries()[shown].name, "a.png");
    assert!(viewer.remove_entry(shown));
    assert_eq!(viewer.current_entry().unwrap().name, "b.png");
    assert!(viewer.run_until_idle(WAIT));
    assert_eq!(viewer.sink().last().unwrap().index, viewer.current().unwrap());
}

#[test]
fn stepping_forward_prefetches_the_following_image() {
    let temp = TempDir::new().unwrap();
    for name in ["1.png", "2.png", "3.png"] {
        write_png(temp.path(), name, 40);
    }
    let mut viewer = viewer_with(small_config(), JsonTweakStore::ephemeral());
    viewer.open(temp.path()).unwrap();
    assert!(viewer.run_until_idle(WAIT));

    let third = viewer.entries().iter().position(|e| e.name == "3.png").unwrap();
    assert!(!viewer.entries()[third].is_decoded());

    assert!(viewer.next_image());
    assert!(viewer.run_until_idle(WAIT));
    assert_eq!(viewer.current_entry().unwrap().name, "2.png");
    assert!(viewer.entries()[third].is_decoded());
    assert!(viewer.lru_entries().contains(&third));
}

#[test]
fn changed_file_is_decoded_again() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("live.png");
    write_png(temp.path(), "live.png", 10);
    let mut viewer = viewer_with(small_config(), JsonTweakStore::ephemeral());
    viewer.open(&path).unwrap();
    assert!(viewer.set_gamma(40).unwrap());
    assert!(viewer.run_until_idle(WAIT));
    let old_hash = viewer.current_entry().unwrap().hash.clone();

    DisplayImage::from_pixel(16, 8, Rgb([200, 10, 10]))
        .save(&path)
        .unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();

    let index = viewer.current().unwrap();
    assert!(viewer.load(index, true));
    assert!(viewer.run_until_idle(WAIT));

    let entry = viewer.current_entry().unwrap();
    assert_ne!(entry.hash, old_hash);
    assert_eq!(entry.tweaks, TweakSet::neutral());
    assert_eq!(*viewer.current_corrected().unwrap(), source_pixels(&path));
}

#[test]
fn undecodable_files_are_skipped() {
    let temp = TempDir::new().unwrap();
    write_png(temp.path(), "a.png", 0);
    fs::write(temp.path().join("b.png"), b"not an image").unwrap();
    write_png(temp.path(), "c.png", 90);
    let mut viewer = viewer_with(small_config(), JsonTweakStore::ephemeral());
    viewer.open(temp.path()).unwrap();
    assert!(viewer.run_until_idle(WAIT));
    let broken = viewer.entries().iter().position(|e| e.name == "b.png").unwrap();

    assert!(viewer.next_image());
    assert_eq!(viewer.current_entry().unwrap().name, "c.png");
    assert!(viewer.queued_jobs().iter().all(|job| job.index != broken));
    assert!(viewer.run_until_idle(WAIT));
    assert!(!viewer.entries()[broken].is_decoded());
    assert!(viewer.entries()[broken].hash.is_none());
    assert!(viewer.sink().iter().all(|frame| frame.index != broken));

    assert!(viewer.prev_image());
    assert_eq!(viewer.current_entry().unwrap().name, "a.png");
    assert!(viewer.run_until_idle(WAIT));
    assert!(!viewer.entries()[broken].is_decoded());
}

/// Store whose disk is always full
struct FullDiskStore;

impl TweakStore for FullDiskStore {
    fn load(&self, _hash: &str) -> Option<TweakSet> {
        None
    }

    fn save(&mut self, _hash: &str, _tweaks: &TweakSet) -> anyhow::Result<()> {
        Err(anyhow!("no space left on device"))
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        Err(anyhow!("no space left on device"))
    }
}

#[test]
fn failed_save_keeps_the_tweaks_and_renders() {
    let temp = TempDir::new().unwrap();
    write_png(temp.path(), "full.png", 30);
    let source = source_pixels(&temp.path().join("full.png"));
    let mut viewer = Viewer::with_files(small_config(), Box::new(FullDiskStore), Vec::new()).unwrap();
    viewer.open(temp.path()).unwrap();
    assert!(viewer.run_until_idle(WAIT));

    let err = viewer.set_black_level(40).unwrap_err();
    assert!(format!("{err:#}").contains("no space left on device"));
    assert_eq!(viewer.current_entry().unwrap().tweaks.black_level, 40);

    assert!(viewer.run_until_idle(WAIT));
    assert_ne!(*viewer.current_corrected().unwrap(), source);
    assert!(!viewer.sink().last().unwrap().provisional);
    assert!(viewer.flush().is_err());
}

#[test]
fn rotating_refreshes_the_display_at_once() {
    let temp = TempDir::new().unwrap();
    write_png(temp.path(), "wide.png", 20);
    let mut viewer = viewer_with(small_config(), JsonTweakStore::ephemeral());
    viewer.open(temp.path()).unwrap();
    assert!(viewer.run_until_idle(WAIT));
    assert_eq!(Size::of(&viewer.sink().last().unwrap().image), Size::new(8, 4));

    assert!(viewer.rotate_clockwise().unwrap());
    assert_eq!(Size::of(&viewer.sink().last().unwrap().image), Size::new(4, 8));

    let presented = viewer.sink().len();
    assert!(viewer.set_black_level(10).unwrap());
    assert_eq!(viewer.sink().len(), presented, "level edits wait for the render");
    assert!(viewer.run_until_idle(WAIT));
}
