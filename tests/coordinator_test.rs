mod common;

use std::{
    fs,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use beer_pos::{
    classifier::Classification,
    coordinator::{CoordinatorConfig, CoordinatorEvent, MutationSource},
    ledger::history,
    models::{CaptureOutcome, Direction, SessionStatus, SkipReason},
    PosError,
};
use common::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

#[tokio::test]
async fn manual_and_sensor_items_land_in_the_sealed_bill() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());

    let info = h.coordinator.start_session(1).await.unwrap();
    assert!(info.bill_path.ends_with("bill_1_09-00_14-07-2025.csv"));
    assert_eq!(h.coordinator.status().await, SessionStatus::Active);

    assert_eq!(
        h.coordinator.manual_adjust("A", Direction::Increment).await.unwrap(),
        1
    );

    let attempt = h.coordinator.trigger_capture().await.wait().await;
    assert_eq!(attempt.outcome, CaptureOutcome::Classified("B".into()));
    assert!(attempt.applied);

    h.clock.set(at(9, 30));
    let closed = h.coordinator.finish_session().await.unwrap();
    assert_eq!(closed.total, 30.0);
    assert_eq!(closed.info.status, SessionStatus::Closed);
    assert_eq!(closed.quantities["A"], 1);
    assert_eq!(closed.quantities["B"], 1);
    assert_eq!(
        closed.info.bill_path,
        h.bills_dir().join("bill_1_09-00_09-30_14-07-2025.csv")
    );
    assert!(!info.bill_path.exists());

    let contents = fs::read_to_string(&closed.info.bill_path).unwrap();
    assert_eq!(
        contents,
        "item,qty,unit_price,total_line\nA,1,10,10\nB,1,20,20\n"
    );
    assert_eq!(h.coordinator.status().await, SessionStatus::Inactive);
}

#[tokio::test]
async fn second_trigger_is_skipped_while_capture_in_flight() {
    let capture = Arc::new(GatedCapture::closed());
    let h = harness(capture.clone(), fast_config());
    h.coordinator.start_session(1).await.unwrap();

    let first = h.coordinator.trigger_capture().await;
    assert!(first.is_launched());
    assert!(h.coordinator.is_capture_in_flight());

    let second = h.coordinator.trigger_capture().await;
    assert_eq!(second.skip_reason(), Some(SkipReason::Busy));

    capture.release();
    let attempt = first.wait().await;
    assert!(attempt.applied);
    assert!(!h.coordinator.is_capture_in_flight());
    assert_eq!(capture.calls.load(Ordering::SeqCst), 1);

    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.total, 20.0);
}

#[tokio::test]
async fn result_arriving_after_finish_is_discarded() {
    let capture = Arc::new(GatedCapture::closed());
    let h = harness(capture.clone(), fast_config());
    h.coordinator.start_session(1).await.unwrap();

    let ticket = h.coordinator.trigger_capture().await;

    h.clock.set(at(9, 30));
    let closed = h.coordinator.finish_session().await.unwrap();

    // A new table opened before the old capture lands must not receive it.
    h.clock.set(at(10, 0));
    h.coordinator.start_session(2).await.unwrap();

    capture.release();
    let attempt = ticket.wait().await;
    assert_eq!(attempt.outcome, CaptureOutcome::Classified("B".into()));
    assert!(!attempt.applied);

    let sealed = fs::read_to_string(&closed.info.bill_path).unwrap();
    assert_eq!(sealed, "item,qty,unit_price,total_line\n");
    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.total, 0.0);
    assert_eq!(snapshot.session.unwrap().table_id, 2);
}

#[tokio::test]
async fn unrecognised_and_off_menu_captures_are_dropped() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());
    h.coordinator.start_session(1).await.unwrap();

    h.classifier.set(Classification::Unknown {
        best_confidence: 0.3,
    });
    let attempt = h.coordinator.trigger_capture().await.wait().await;
    assert_eq!(attempt.outcome, CaptureOutcome::Unknown);
    assert!(!attempt.applied);

    h.classifier.set(item("Z"));
    let attempt = h.coordinator.trigger_capture().await.wait().await;
    assert_eq!(attempt.outcome, CaptureOutcome::Classified("Z".into()));
    assert!(!attempt.applied);

    assert_eq!(h.coordinator.snapshot().await.total, 0.0);
}

#[tokio::test]
async fn uploads_report_recognition_failures() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());

    assert!(matches!(
        h.coordinator.upload_frame(&frame()).await,
        Err(PosError::NoActiveSession)
    ));

    h.coordinator.start_session(1).await.unwrap();

    h.classifier.push(Classification::Unknown {
        best_confidence: 0.4,
    });
    assert!(matches!(
        h.coordinator.upload_frame(&frame()).await,
        Err(PosError::UnrecognizedImage)
    ));

    h.classifier.push(item("Z"));
    assert!(matches!(
        h.coordinator.upload_frame(&frame()).await,
        Err(PosError::UnknownItem(name)) if name == "Z"
    ));

    let missing = h.bills_dir().join("nope.jpg");
    assert!(matches!(
        h.coordinator.upload_image(&missing).await,
        Err(PosError::ImageRead { .. })
    ));

    let result = h.coordinator.upload_frame(&frame()).await.unwrap();
    assert_eq!(result.item, "B");
    assert_eq!(result.quantity, 1);
}

#[tokio::test]
async fn upload_ignores_capture_flag_and_debounce() {
    let capture = Arc::new(GatedCapture::closed());
    let config = CoordinatorConfig {
        debounce: Duration::from_secs(60),
        ..fast_config()
    };
    let h = harness(capture.clone(), config);
    h.coordinator.start_session(1).await.unwrap();

    let ticket = h.coordinator.trigger_capture().await;
    assert!(h.coordinator.is_capture_in_flight());

    let path = h.bills_dir().join("glass.png");
    frame().save(&path).unwrap();
    let uploaded = h.coordinator.upload_image(&path).await.unwrap();
    assert_eq!(uploaded.quantity, 1);

    capture.release();
    assert!(ticket.wait().await.applied);

    // Quiet period is now running, uploads still go through.
    assert_eq!(
        h.coordinator.trigger_capture().await.skip_reason(),
        Some(SkipReason::Debounce)
    );
    assert_eq!(h.coordinator.upload_image(&path).await.unwrap().quantity, 3);
}

#[tokio::test]
async fn decrement_at_zero_writes_nothing() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());
    let info = h.coordinator.start_session(1).await.unwrap();

    assert_eq!(
        h.coordinator.manual_adjust("A", Direction::Decrement).await.unwrap(),
        0
    );
    assert_eq!(
        fs::read_to_string(&info.bill_path).unwrap(),
        "item,qty,unit_price,total_line\n"
    );

    h.coordinator.manual_adjust("A", Direction::Increment).await.unwrap();
    h.coordinator.manual_adjust("A", Direction::Decrement).await.unwrap();
    let lines = history::read_lines(&info.bill_path).unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1].qty, 0);
    assert_eq!(history::bill_total(&info.bill_path).unwrap(), 0.0);
}

#[tokio::test]
async fn rejects_operations_in_the_wrong_state() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());

    assert!(matches!(
        h.coordinator.manual_adjust("A", Direction::Increment).await,
        Err(PosError::NoActiveSession)
    ));
    assert!(matches!(
        h.coordinator.finish_session().await,
        Err(PosError::NoActiveSession)
    ));
    assert_eq!(
        h.coordinator.trigger_capture().await.skip_reason(),
        Some(SkipReason::NoActiveSession)
    );

    h.coordinator.start_session(1).await.unwrap();
    assert!(matches!(
        h.coordinator.start_session(1).await,
        Err(PosError::SessionAlreadyActive)
    ));
    assert!(matches!(
        h.coordinator.manual_adjust("Z", Direction::Increment).await,
        Err(PosError::UnknownItem(_))
    ));
}

#[tokio::test]
async fn empty_menu_blocks_session_start() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());
    *h.menu.0.lock().unwrap() = Default::default();

    assert!(matches!(
        h.coordinator.start_session(1).await,
        Err(PosError::EmptyMenu)
    ));
    assert_eq!(h.coordinator.status().await, SessionStatus::Inactive);
    assert_eq!(fs::read_dir(h.bills_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn menu_is_snapshotted_at_session_start() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());
    h.coordinator.start_session(1).await.unwrap();

    h.menu.0.lock().unwrap().insert("A", 99.0);
    h.coordinator.manual_adjust("A", Direction::Increment).await.unwrap();
    assert_eq!(h.coordinator.snapshot().await.total, 10.0);
}

#[tokio::test]
async fn stalled_capture_times_out_and_frees_the_camera() {
    let config = CoordinatorConfig {
        capture_timeout: Duration::from_millis(50),
        debounce: Duration::ZERO,
    };
    let h = harness(Arc::new(StalledCapture), config);
    h.coordinator.start_session(1).await.unwrap();

    let attempt = h.coordinator.trigger_capture().await.wait().await;
    assert!(matches!(attempt.outcome, CaptureOutcome::CaptureFailed(_)));
    assert!(!attempt.applied);
    assert!(!h.coordinator.is_capture_in_flight());

    assert!(h.coordinator.trigger_capture().await.is_launched());
}

#[tokio::test]
async fn camera_error_is_a_failed_capture() {
    let h = harness(Arc::new(BrokenCapture), fast_config());
    h.coordinator.start_session(1).await.unwrap();

    let attempt = h.coordinator.trigger_capture().await.wait().await;
    match attempt.outcome {
        CaptureOutcome::CaptureFailed(reason) => assert!(reason.contains("camera unplugged")),
        other => panic!("unexpected outcome {other:?}"),
    }
    // No quiet period after a failure.
    assert!(h.coordinator.trigger_capture().await.is_launched());
}

#[tokio::test]
async fn debounce_suppresses_triggers_after_a_recognised_item() {
    let config = CoordinatorConfig {
        capture_timeout: Duration::from_secs(2),
        debounce: Duration::from_millis(200),
    };
    let h = harness(Arc::new(GatedCapture::open()), config);
    h.coordinator.start_session(1).await.unwrap();

    assert!(h.coordinator.trigger_capture().await.wait().await.applied);
    assert_eq!(
        h.coordinator.trigger_capture().await.skip_reason(),
        Some(SkipReason::Debounce)
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.coordinator.trigger_capture().await.wait().await.applied);
    assert_eq!(h.coordinator.snapshot().await.rows[1].quantity, 2);
}

#[tokio::test]
async fn failed_ledger_write_leaves_quantity_unchanged() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());
    let info = h.coordinator.start_session(1).await.unwrap();

    h.ledger.fail_appends.store(true, Ordering::SeqCst);
    assert!(matches!(
        h.coordinator.manual_adjust("A", Direction::Increment).await,
        Err(PosError::LedgerWrite(_))
    ));
    assert!(!h.coordinator.trigger_capture().await.wait().await.applied);
    assert_eq!(h.coordinator.snapshot().await.total, 0.0);

    h.ledger.fail_appends.store(false, Ordering::SeqCst);
    assert_eq!(
        h.coordinator.manual_adjust("A", Direction::Increment).await.unwrap(),
        1
    );
    assert_eq!(history::read_lines(&info.bill_path).unwrap().len(), 1);
}

#[tokio::test]
async fn quantity_changes_are_broadcast() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());
    let mut events = h.coordinator.subscribe();

    let info = h.coordinator.start_session(1).await.unwrap();
    match events.recv().await.unwrap() {
        CoordinatorEvent::SessionStarted { session } => assert_eq!(session.id, info.id),
        other => panic!("unexpected event {other:?}"),
    }

    h.coordinator.manual_adjust("B", Direction::Increment).await.unwrap();
    match events.recv().await.unwrap() {
        CoordinatorEvent::QuantityChanged {
            item,
            quantity,
            total,
            source,
            ..
        } => {
            assert_eq!(item, "B");
            assert_eq!(quantity, 1);
            assert_eq!(total, 20.0);
            assert_eq!(source, MutationSource::Manual);
        }
        other => panic!("unexpected event {other:?}"),
    }

    h.coordinator.finish_session().await.unwrap();
    assert!(matches!(
        events.recv().await.unwrap(),
        CoordinatorEvent::SessionFinished { .. }
    ));
}

#[tokio::test]
async fn ledger_total_tracks_quantities_through_random_edits() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());
    h.menu.0.lock().unwrap().insert("C", 5.5);
    let info = h.coordinator.start_session(3).await.unwrap();
    let prices = [("A", 10.0), ("B", 20.0), ("C", 5.5)];

    let mut rng = StdRng::seed_from_u64(7);
    let mut expected_rows = 0;
    for _ in 0..200 {
        let (name, _) = prices[rng.gen_range(0..prices.len())];
        let direction = if rng.gen_bool(0.6) {
            Direction::Increment
        } else {
            Direction::Decrement
        };

        let before = h.coordinator.snapshot().await;
        let before_qty = before.rows.iter().find(|r| r.item == name).unwrap().quantity;
        let after_qty = h.coordinator.manual_adjust(name, direction).await.unwrap();
        if after_qty != before_qty {
            expected_rows += 1;
        }

        let snapshot = h.coordinator.snapshot().await;
        let counted: f64 = snapshot
            .rows
            .iter()
            .map(|row| f64::from(row.quantity) * row.unit_price)
            .sum();
        let on_disk = history::bill_total(&info.bill_path).unwrap();
        assert!((snapshot.total - counted).abs() < 1e-6);
        assert!((on_disk - counted).abs() < 1e-6);
    }

    assert_eq!(
        history::read_lines(&info.bill_path).unwrap().len(),
        expected_rows
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_edits_and_captures_keep_the_ledger_exact() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());
    let info = h.coordinator.start_session(1).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..50 {
        let coordinator = h.coordinator.clone();
        tasks.push(tokio::spawn(async move {
            if i % 5 == 0 {
                let attempt = coordinator.trigger_capture().await.wait().await;
                (0, usize::from(attempt.applied))
            } else {
                // Each task decrements only after its own increment, so A never clamps.
                coordinator.manual_adjust("A", Direction::Increment).await.unwrap();
                coordinator.manual_adjust("B", Direction::Increment).await.unwrap();
                coordinator.manual_adjust("A", Direction::Decrement).await.unwrap();
                (3, 0)
            }
        }));
    }

    let (mut manual_rows, mut captured) = (0, 0);
    for task in tasks {
        let (rows, applied) = task.await.unwrap();
        manual_rows += rows;
        captured += applied;
    }

    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.rows[0].quantity, 0);
    assert_eq!(snapshot.rows[1].quantity as usize, 40 + captured);
    assert_eq!(snapshot.total, 20.0 * (40 + captured) as f64);
    assert_eq!(history::bill_total(&info.bill_path).unwrap(), snapshot.total);
    assert_eq!(
        history::read_lines(&info.bill_path).unwrap().len(),
        manual_rows + captured
    );
}

#[tokio::test]
async fn slow_bill_writes_do_not_stall_the_runtime() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());
    h.coordinator.start_session(1).await.unwrap();
    h.ledger.append_delay_ms.store(300, Ordering::SeqCst);

    let coordinator = h.coordinator.clone();
    let adjust =
        tokio::spawn(async move { coordinator.manual_adjust("A", Direction::Increment).await });

    // Single-threaded runtime: this timer only fires if the write is off the worker.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!adjust.is_finished());

    assert_eq!(adjust.await.unwrap().unwrap(), 1);
    assert_eq!(h.coordinator.snapshot().await.total, 10.0);
}

#[tokio::test]
async fn same_minute_reopen_after_finish_is_refused() {
    let h = harness(Arc::new(GatedCapture::open()), fast_config());
    h.coordinator.start_session(1).await.unwrap();
    h.coordinator.finish_session().await.unwrap();

    assert!(matches!(
        h.coordinator.start_session(1).await,
        Err(PosError::BillExists(_))
    ));
    assert_eq!(h.coordinator.status().await, SessionStatus::Inactive);

    h.clock.set(at(9, 1));
    h.coordinator.start_session(1).await.unwrap();
    h.clock.set(at(9, 5));
    let closed = h.coordinator.finish_session().await.unwrap();
    assert!(closed
        .info
        .bill_path
        .ends_with("bill_1_09-01_09-05_14-07-2025.csv"));
}
