//! End-to-end runs against the simulated scan engine.

use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tilescan_core::capabilities::{Configurable, FrameStackSink};
use tilescan_core::{DeviceSetup, FrameBuffer, TileScanError, INSTRUMENT_FILE_EXTENSIONS};
use tilescan_driver_mock::{
    ErrorConfig, ErrorScenario, HardwareCall, MockMode, MockScanEngine, ScanTiming,
};
use tilescan_experiment::{
    read_position_list, RecoveryTiming, RunEngine, RunEvent, RunOptions, RunStatus, TileSequence,
    TILE_CONFIG_FILE,
};
use tilescan_storage::TiffStackWriter;

fn quick() -> RunOptions {
    RunOptions {
        warmup_ms: 0,
        recovery: RecoveryTiming {
            clear_settle_ms: 0,
            power_settle_ms: 0,
        },
    }
}

fn write_positions(dir: &Path, rows: &str) -> std::path::PathBuf {
    let path = dir.join("positions.csv");
    std::fs::write(&path, rows).unwrap();
    path
}

async fn saving_engine(builder: tilescan_driver_mock::MockScanEngineBuilder) -> Arc<MockScanEngine> {
    let engine = builder.build();
    engine
        .apply_setup(&DeviceSetup {
            flim_file_saving: true,
            ..DeviceSetup::default()
        })
        .await
        .unwrap();
    Arc::new(engine)
}

fn executed(engine: &MockScanEngine) -> Vec<usize> {
    engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            HardwareCall::ExecuteEvent { sequence, .. } => Some(sequence),
            _ => None,
        })
        .collect()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_three_positions_one_frame() {
    let input = tempdir().unwrap();
    let out = tempdir().unwrap();
    let save = out.path().join("run");
    std::fs::create_dir(&save).unwrap();

    let positions = read_position_list(&write_positions(
        input.path(),
        "100,200,5\n350,200,5\n600,200,5\n",
    ))
    .unwrap();
    let sequence = TileSequence::new(positions, 1).unwrap();

    let mock = saving_engine(MockScanEngine::builder().seed(1)).await;
    let engine = RunEngine::new(mock.clone(), Some(save.clone()), quick())
        .with_sink(Arc::new(TiffStackWriter::new()));

    let summary = engine.run(&sequence).await.unwrap();
    assert_eq!(summary.tiles, 3);
    assert_eq!(summary.recoveries, 0);
    assert_eq!(executed(&mock), vec![0, 1, 2]);

    let manifest = std::fs::read_to_string(save.join(TILE_CONFIG_FILE)).unwrap();
    assert_eq!(
        manifest,
        "pos_0000.tif; ; (100.0,200.0)\n\
         pos_0001.tif; ; (350.0,200.0)\n\
         pos_0002.tif; ; (600.0,200.0)\n"
    );

    for tile in ["pos_0000", "pos_0001", "pos_0002"] {
        assert!(save.join(format!("{tile}.tif")).exists());
        for ext in INSTRUMENT_FILE_EXTENSIONS {
            assert!(save.join(format!("{tile}.{ext}")).exists());
        }
    }

    let labels: Vec<_> = mock
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            HardwareCall::SetOutputLabel(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(
        labels,
        vec![
            save.join("pos_0000"),
            save.join("pos_0001"),
            save.join("pos_0002")
        ]
    );
}

#[tokio::test]
async fn test_shut_off_in_final_frame_recovers_once_and_continues() {
    let mock = Arc::new(
        MockScanEngine::builder()
            .seed(2)
            .overload_at(1, 2)
            .build(),
    );
    let positions = (0..3)
        .map(|i| tilescan_core::Position::new(i as f64 * 250.0, 0.0, 0.0))
        .collect();
    let sequence = TileSequence::new(positions, 3).unwrap();

    let engine = RunEngine::new(mock.clone(), None, quick());
    let mut rx = engine.subscribe();
    let summary = engine.run(&sequence).await.unwrap();

    assert_eq!(summary.tiles, 3);
    assert_eq!(summary.recoveries, 1);
    assert_eq!(executed(&mock), vec![0, 1, 2], "tripped event is not re-run");

    let calls = mock.calls();
    let second = calls
        .iter()
        .position(|c| matches!(c, HardwareCall::ExecuteEvent { sequence: 1, .. }))
        .unwrap();
    let third = calls
        .iter()
        .position(|c| matches!(c, HardwareCall::ExecuteEvent { sequence: 2, .. }))
        .unwrap();
    assert_eq!(
        calls[second + 1..third - 1],
        [
            HardwareCall::DetectorPower(false),
            HardwareCall::ClearOverload,
            HardwareCall::DetectorPower(true),
        ]
    );

    let recoveries: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, RunEvent::RecoveryPerformed { .. }))
        .collect();
    assert_eq!(
        recoveries,
        vec![RunEvent::RecoveryPerformed {
            tile: "pos_0001".into(),
            position: 1
        }]
    );
}

#[tokio::test]
async fn test_short_row_fails_before_hardware() {
    let input = tempdir().unwrap();
    let mock = MockScanEngine::new();

    let err = read_position_list(&write_positions(input.path(), "1,2,3\n4,5\n6,7,8\n")).unwrap_err();
    match &err {
        TileScanError::InputFormat { row, content, .. } => {
            assert_eq!(*row, 2);
            assert_eq!(content, "4,5");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_startup());
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_reused_directory_rejected_at_first_tile() {
    let save = tempdir().unwrap();
    std::fs::write(save.path().join(TILE_CONFIG_FILE), "pos_0000.tif; ; (0.0,0.0)\n").unwrap();

    let mock = saving_engine(MockScanEngine::builder().pixels(8)).await;
    let engine = RunEngine::new(mock.clone(), Some(save.path().to_path_buf()), quick());
    let sequence = TileSequence::new(vec![tilescan_core::Position::new(0.0, 0.0, 0.0)], 1).unwrap();

    let err = engine.run(&sequence).await.unwrap_err();
    assert!(matches!(err, TileScanError::PreexistingManifest { .. }));
    assert_eq!(
        mock.calls().last(),
        Some(&HardwareCall::CloseShutter),
        "shutdown still runs"
    );
}

#[tokio::test]
async fn test_recovery_failure_aborts_but_keeps_earlier_tiles() {
    let save = tempdir().unwrap();
    let mock = saving_engine(
        MockScanEngine::builder()
            .seed(3)
            .overload_at(1, 0)
            .error_config(ErrorConfig::scenario(ErrorScenario::Timeout {
                operation: "clear_detector_overload",
            })),
    )
    .await;
    let positions = (0..4)
        .map(|i| tilescan_core::Position::new(i as f64, 0.0, 0.0))
        .collect();
    let engine = RunEngine::new(mock.clone(), Some(save.path().to_path_buf()), quick());
    let mut rx = engine.subscribe();

    let err = engine
        .run(&TileSequence::new(positions, 1).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, TileScanError::RecoveryFailed { .. }));
    assert_eq!(executed(&mock), vec![0, 1]);

    // Both executed tiles are recorded; nothing is rolled back.
    let manifest = std::fs::read_to_string(save.path().join(TILE_CONFIG_FILE)).unwrap();
    assert_eq!(manifest.lines().count(), 2);

    let finished = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            RunEvent::RunFinished { status, .. } => Some(status),
            _ => None,
        });
    assert_eq!(finished, Some(RunStatus::Failed));
}

struct FailingSink;

impl FrameStackSink for FailingSink {
    fn persist(&self, _tile_prefix: &Path, _frames: &FrameBuffer) -> anyhow::Result<std::path::PathBuf> {
        anyhow::bail!("disk full")
    }
}

#[tokio::test]
async fn test_persistence_failure_is_a_warning() {
    let save = tempdir().unwrap();
    let mock = saving_engine(MockScanEngine::builder().seed(4)).await;
    let engine = RunEngine::new(mock, Some(save.path().to_path_buf()), quick())
        .with_sink(Arc::new(FailingSink));
    let mut rx = engine.subscribe();

    let positions = (0..2)
        .map(|i| tilescan_core::Position::new(i as f64, 0.0, 0.0))
        .collect();
    let summary = engine
        .run(&TileSequence::new(positions, 1).unwrap())
        .await
        .unwrap();

    assert_eq!(summary.tiles, 2);
    assert_eq!(summary.persistence_warnings, 2);
    let warnings = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, RunEvent::PersistenceWarning { .. }))
        .count();
    assert_eq!(warnings, 2);
    assert!(save.path().join("pos_0001.sdt").exists());
}

#[tokio::test(start_paused = true)]
async fn test_abort_takes_effect_at_event_boundary() {
    let mock = Arc::new(
        MockScanEngine::builder()
            .pixels(16)
            .mode(MockMode::Realistic)
            .timing(ScanTiming {
                stage_move_ms: 50,
                frame_scan_ms: 100,
                command_latency_ms: 1,
            })
            .build(),
    );
    let positions = (0..5)
        .map(|i| tilescan_core::Position::new(i as f64, 0.0, 0.0))
        .collect();
    let sequence = TileSequence::new(positions, 2).unwrap();

    let engine = Arc::new(RunEngine::new(mock.clone(), None, quick()));
    let mut rx = engine.subscribe();
    let runner = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(&sequence).await }
    });

    loop {
        if let RunEvent::TileAcquired { .. } = rx.recv().await.unwrap() {
            break;
        }
    }
    engine.abort("operator interrupt").await;

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(err, TileScanError::Aborted(_)));

    // The event in flight when the abort arrived still completes.
    assert_eq!(executed(&mock), vec![0, 1]);
    let finished = drain(&mut rx).into_iter().find_map(|e| match e {
        RunEvent::RunFinished { status, tiles } => Some((status, tiles)),
        _ => None,
    });
    assert_eq!(finished, Some((RunStatus::Aborted, 2)));
    assert!(!mock.detector_powered());
}

#[tokio::test]
async fn test_unsequenced_run_makes_one_tile_per_loop() {
    let save = tempdir().unwrap();
    let mock = saving_engine(MockScanEngine::builder().seed(5)).await;
    let engine = RunEngine::new(mock.clone(), Some(save.path().to_path_buf()), quick());

    let positions = vec![
        tilescan_core::Position::new(1.0, 2.0, 0.0),
        tilescan_core::Position::new(3.0, 4.0, 0.0),
    ];
    let sequence = TileSequence::new(positions, 2)
        .unwrap()
        .with_hardware_sequencing(false);
    let summary = engine.run(&sequence).await.unwrap();

    assert_eq!(summary.tiles, 4);
    let manifest = std::fs::read_to_string(save.path().join(TILE_CONFIG_FILE)).unwrap();
    assert_eq!(
        manifest,
        "pos_0000.tif; ; (1.0,2.0)\n\
         pos_0001.tif; ; (1.0,2.0)\n\
         pos_0002.tif; ; (3.0,4.0)\n\
         pos_0003.tif; ; (3.0,4.0)\n"
    );
}
