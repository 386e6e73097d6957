//! Property editing, metadata, stage polling and image saving through the console.

use spim_live::config::{ConsoleConfig, WidgetBinding};
use spim_live::console::{LiveConsole, PointerButton};
use spim_live::hardware::instrument::{Acquisition, Instrument};
use spim_live::hardware::mock::{
    MockCamera, MockLaser, MockMultiAxisStage, MockSignalGenerator, MockStage,
};
use spim_live::hardware::DeviceKind;
use spim_live::locks::LockRegistry;
use spim_live::property::{PropertyEdit, PropertyValue};
use spim_live::sink::DisplayKey;
use std::sync::Arc;
use std::time::Duration;

fn config(writer_dir: &str) -> ConsoleConfig {
    ConsoleConfig::from_toml_str(&format!(
        r#"
        [live]
        poll_interval_ms = 5
        control_cooldown_ms = 0

        [acquisition.metadata]
        operator = "jdoe"
        specimen = "mouse brain"

        [acquisition.writers.writer0]
        camera = "cam0"
        path = "{writer_dir}"

        [acquisition.transfers.archive]
        external_path = "/mnt/archive"

        [device_widgets.laser_488]
        type = "laser"
        driver = "vendor_widgets"
        module = "LaserPanel"
        "#
    ))
    .unwrap()
}

struct Rig {
    console: LiveConsole,
    scan: Arc<MockStage>,
    tile: Arc<MockMultiAxisStage>,
}

fn rig(config: &ConsoleConfig) -> Rig {
    let scan = Arc::new(MockStage::with_position(1.5));
    let tile = Arc::new(MockMultiAxisStage::new(["x", "y"]));
    let instrument = Instrument::new()
        .with_camera("cam0", Arc::new(MockCamera::new(8, 8)))
        .with_scanning_stage("scan_z", scan.clone())
        .with_tiling_stage("tile_xy", tile.clone())
        .with_daq("daq0", Arc::new(MockSignalGenerator::new()))
        .with_laser("laser_488", Arc::new(MockLaser::new(488, 50.0)));
    let console = LiveConsole::start(
        config,
        Arc::new(instrument),
        Arc::new(Acquisition::from_config(config).unwrap()),
    )
    .unwrap();
    Rig {
        console,
        scan,
        tile,
    }
}

async fn pump_until(console: &mut LiveConsole, mut done: impl FnMut(&LiveConsole) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(console) {
            assert!(console.next_event().await, "event channel closed");
        }
    })
    .await
    .expect("condition not reached within 5s");
}

fn form_value(console: &LiveConsole, device: &str, property: &str) -> Option<PropertyValue> {
    console
        .sink()
        .form(device)
        .and_then(|form| form.values.get(property).cloned())
}

#[tokio::test]
async fn forms_are_loaded_at_startup() {
    let mut rig = rig(&config("/tmp"));
    pump_until(&mut rig.console, |c| {
        form_value(c, "cam0", "exposure_ms").is_some()
            && form_value(c, "laser_488", "power_mw").is_some()
            && !c.sink().metadata().is_empty()
    })
    .await;

    let forms: Vec<_> = rig.console.sink().forms().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        forms,
        vec!["laser_488", "cam0", "tile_xy", "scan_z", "daq0", "writer0", "archive"]
    );
    assert_eq!(
        rig.console.sink().form("writer0").unwrap().kind,
        DeviceKind::Writer
    );

    let laser = rig.console.sink().form("laser_488").unwrap();
    assert!(matches!(
        &laser.binding,
        WidgetBinding::Custom { driver, module, .. } if driver == "vendor_widgets" && module == "LaserPanel"
    ));
    assert_eq!(laser.title("laser_488"), "laser laser_488");
    assert_eq!(
        rig.console.sink().form("cam0").unwrap().binding,
        WidgetBinding::Generic
    );
    assert_eq!(
        rig.console.sink().metadata()["operator"],
        PropertyValue::from("jdoe")
    );

    rig.console.shutdown().await.unwrap();
}

#[tokio::test]
async fn edited_property_shows_device_reported_value() {
    let mut rig = rig(&config("/tmp"));
    rig.console
        .edit_property(PropertyEdit::new("cam0", "exposure_ms", 5000.0))
        .unwrap();
    pump_until(&mut rig.console, |c| {
        form_value(c, "cam0", "exposure_ms") == Some(PropertyValue::Float(MockCamera::MAX_EXPOSURE_MS))
    })
    .await;

    // The derived frame rate was re-read in the same refresh.
    assert_eq!(
        form_value(&rig.console, "cam0", "frame_rate_hz"),
        Some(PropertyValue::Float(1000.0 / MockCamera::MAX_EXPOSURE_MS))
    );

    rig.console.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_edit_is_reported_and_form_keeps_last_value() {
    let mut rig = rig(&config("/tmp"));
    pump_until(&mut rig.console, |c| form_value(c, "cam0", "binning").is_some()).await;

    rig.console
        .edit_property(PropertyEdit::new("cam0", "binning", 3i64))
        .unwrap();
    pump_until(&mut rig.console, |c| c.sink().faults().any(|f| f.source == "cam0")).await;

    assert_eq!(
        form_value(&rig.console, "cam0", "binning"),
        Some(PropertyValue::Int(1))
    );
    rig.console.shutdown().await.unwrap();
}

#[tokio::test]
async fn writer_path_edit_moves_the_save_dialog_folder() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let second_path = second.path().display().to_string();
    let mut rig = rig(&config(&first.path().display().to_string()));

    rig.console
        .edit_property(PropertyEdit::new("writer0", "path", second_path.as_str()))
        .unwrap();
    pump_until(&mut rig.console, |c| {
        form_value(c, "writer0", "path") == Some(PropertyValue::from(second_path.as_str()))
    })
    .await;
    assert_eq!(
        form_value(&rig.console, "writer0", "camera"),
        Some(PropertyValue::from("cam0"))
    );

    // Read-only properties are rejected and reported against the writer.
    rig.console
        .edit_property(PropertyEdit::new("writer0", "camera", "cam1"))
        .unwrap();
    pump_until(&mut rig.console, |c| c.sink().faults().any(|f| f.source == "writer0")).await;

    let key = DisplayKey::new("cam0", "488");
    rig.console.press_snapshot("cam0").await.unwrap();
    pump_until(&mut rig.console, |c| c.sink().entry(&key).is_some()).await;
    let mut offered = None;
    rig.console
        .on_layer_clicked(&key, PointerButton::Secondary, |start| {
            offered = start.map(|p| p.to_path_buf());
            None
        })
        .unwrap();
    assert_eq!(offered.as_deref(), Some(second.path()));

    rig.console.shutdown().await.unwrap();
}

#[tokio::test]
async fn transfer_edit_shows_the_new_setting() {
    let mut rig = rig(&config("/tmp"));
    rig.console
        .edit_property(PropertyEdit::new("archive", "verify_checksums", true))
        .unwrap();
    pump_until(&mut rig.console, |c| {
        form_value(c, "archive", "verify_checksums") == Some(PropertyValue::Bool(true))
    })
    .await;
    assert_eq!(
        rig.console.sink().form("archive").unwrap().title("archive"),
        "transfer archive"
    );

    rig.console.shutdown().await.unwrap();
}

#[tokio::test]
async fn metadata_edits_update_the_acquisition() {
    let mut rig = rig(&config("/tmp"));
    rig.console.edit_metadata("specimen", "zebrafish").unwrap();
    pump_until(&mut rig.console, |c| {
        c.sink().metadata().get("specimen") == Some(&PropertyValue::from("zebrafish"))
    })
    .await;

    rig.console.edit_metadata("unknown_key", 1i64).unwrap();
    pump_until(&mut rig.console, |c| {
        c.sink().faults().any(|f| f.source == "metadata")
    })
    .await;

    rig.console.shutdown().await.unwrap();
}

#[tokio::test]
async fn stage_fields_follow_scalar_and_multi_axis_positions() {
    let mut rig = rig(&config("/tmp"));
    rig.tile.set_axis("x", 12.5).await.unwrap();
    rig.tile.set_axis("y", -3.0).await.unwrap();

    pump_until(&mut rig.console, |c| {
        let scan = c.sink().stage("scan_z").and_then(|r| r.field("position").map(str::to_string));
        let tile_x = c.sink().stage("tile_xy").and_then(|r| r.field("position.x").map(str::to_string));
        scan.as_deref() == Some("1.5") && tile_x.as_deref() == Some("12.5")
    })
    .await;
    assert_eq!(
        rig.console.sink().stage("tile_xy").unwrap().field("position.y"),
        Some("-3")
    );

    rig.scan.set_position(2.0).await;
    pump_until(&mut rig.console, |c| {
        c.sink().stage("scan_z").and_then(|r| r.field("position")) == Some("2")
    })
    .await;

    rig.console.shutdown().await.unwrap();
}

#[tokio::test]
async fn failing_stage_does_not_block_the_others() {
    let mut rig = rig(&config("/tmp"));
    rig.scan.set_failing(true);
    rig.tile.set_axis("y", 7.0).await.unwrap();

    pump_until(&mut rig.console, |c| {
        c.sink().stage("tile_xy").and_then(|r| r.field("position.y")) == Some("7")
    })
    .await;
    assert!(rig.console.sink().stage("scan_z").is_none());

    // Recovery is picked up by the next cycle.
    rig.scan.set_failing(false);
    pump_until(&mut rig.console, |c| c.sink().stage("scan_z").is_some()).await;

    rig.console.shutdown().await.unwrap();
}

#[tokio::test]
async fn poller_reads_hold_the_stage_locks() {
    let locks = LockRegistry::new();
    let scan = Arc::new(MockStage::new().with_lock_watch(locks.clone(), DeviceKind::ScanningStage));
    let tile = Arc::new(
        MockMultiAxisStage::new(["x", "y"]).with_lock_watch(locks.clone(), DeviceKind::TilingStage),
    );
    let instrument = Instrument::new()
        .with_scanning_stage("scan_z", scan.clone())
        .with_tiling_stage("tile_xy", tile.clone());
    let (tx, _rx) = spim_live::live::event_channel(64);
    let poller = spim_live::live::StagePoller::new(
        instrument.stages(),
        Duration::from_millis(1),
        locks,
        tx,
    );

    for _ in 0..5 {
        let summary = poller.poll_once().await.unwrap();
        assert_eq!(summary.sampled, 2);
    }
    assert_eq!(scan.reads(), 5);
    assert_eq!(scan.unlocked_calls(), 0);
    assert_eq!(tile.unlocked_calls(), 0);
}

#[tokio::test]
async fn secondary_click_saves_the_layer_as_tiff() {
    let writer_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let mut rig = rig(&config(&writer_dir.path().display().to_string()));

    rig.console.press_snapshot("cam0").await.unwrap();
    pump_until(&mut rig.console, |c| c.sink().last_report("cam0").is_some()).await;
    rig.console.pump();
    let key = DisplayKey::new("cam0", "488");

    // Other buttons do nothing.
    let saved = rig
        .console
        .on_layer_clicked(&key, PointerButton::Primary, |_| panic!("no dialog expected"))
        .unwrap();
    assert!(saved.is_none());

    // Cancelled dialog saves nothing; the dialog starts in the writer directory.
    let saved = rig
        .console
        .on_layer_clicked(&key, PointerButton::Secondary, |start| {
            assert_eq!(start, Some(writer_dir.path()));
            None
        })
        .unwrap();
    assert!(saved.is_none());

    let path = rig
        .console
        .on_layer_clicked(&key, PointerButton::Secondary, |_| {
            Some(target_dir.path().to_path_buf())
        })
        .unwrap()
        .unwrap();
    assert!(path.starts_with(target_dir.path()));
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("Video cam0 488_"));
    assert!(name.ends_with(".tiff"));
    assert_eq!(image::open(&path).unwrap().to_luma16().dimensions(), (8, 8));

    rig.console.shutdown().await.unwrap();
}
