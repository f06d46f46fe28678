#![allow(dead_code)]

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use beer_pos::{
    capture::CaptureSource,
    classifier::{Classification, Classifier},
    coordinator::{Clock, Collaborators, CoordinatorConfig, SessionCoordinator},
    ledger::{BillHandle, BillLedger, CsvLedger},
    menu::MenuSource,
    models::{LedgerLine, Menu},
    sensing::SensorInput,
};
use chrono::{NaiveDate, NaiveDateTime};
use image::DynamicImage;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 7, 14)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

pub fn frame() -> DynamicImage {
    DynamicImage::new_rgb8(4, 4)
}

pub fn item(name: &str) -> Classification {
    Classification::Item {
        name: name.to_string(),
        confidence: 0.95,
    }
}

pub struct StaticMenu(pub Mutex<Menu>);

impl StaticMenu {
    pub fn new(items: &[(&str, f64)]) -> Self {
        Self(Mutex::new(items.iter().copied().collect()))
    }
}

impl MenuSource for StaticMenu {
    fn current_menu(&self) -> Result<Menu> {
        Ok(self.0.lock().unwrap().clone())
    }
}

/// Answers from a queue, then repeats the fallback.
pub struct ScriptedClassifier {
    queue: Mutex<VecDeque<Classification>>,
    fallback: Mutex<Classification>,
}

impl ScriptedClassifier {
    pub fn always(answer: Classification) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(answer),
        }
    }

    pub fn set(&self, answer: Classification) {
        *self.fallback.lock().unwrap() = answer;
    }

    pub fn push(&self, answer: Classification) {
        self.queue.lock().unwrap().push_back(answer);
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, _image: &DynamicImage) -> Result<Classification> {
        if let Some(answer) = self.queue.lock().unwrap().pop_front() {
            return Ok(answer);
        }
        Ok(self.fallback.lock().unwrap().clone())
    }
}

/// Camera that hands out one frame per `release()`.
pub struct GatedCapture {
    gate: Semaphore,
    gated: AtomicBool,
    pub calls: AtomicUsize,
}

impl GatedCapture {
    pub fn open() -> Self {
        Self {
            gate: Semaphore::new(0),
            gated: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn closed() -> Self {
        let capture = Self::open();
        capture.gated.store(true, Ordering::SeqCst);
        capture
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl CaptureSource for GatedCapture {
    fn name(&self) -> &str {
        "gated"
    }

    async fn capture_frame(&self) -> Result<DynamicImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate.acquire().await?.forget();
        }
        Ok(frame())
    }
}

pub struct StalledCapture;

#[async_trait]
impl CaptureSource for StalledCapture {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn capture_frame(&self) -> Result<DynamicImage> {
        std::future::pending::<()>().await;
        Err(anyhow!("unreachable"))
    }
}

pub struct BrokenCapture;

#[async_trait]
impl CaptureSource for BrokenCapture {
    fn name(&self) -> &str {
        "broken"
    }

    async fn capture_frame(&self) -> Result<DynamicImage> {
        Err(anyhow!("camera unplugged"))
    }
}

pub struct FixedClock(Mutex<NaiveDateTime>);

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

/// CSV ledger whose appends can be made to fail on demand.
pub struct FlakyLedger {
    inner: CsvLedger,
    pub fail_appends: AtomicBool,
    /// Milliseconds each append blocks its thread for, like a slow fsync.
    pub append_delay_ms: AtomicU64,
}

impl FlakyLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: CsvLedger::new(dir),
            fail_appends: AtomicBool::new(false),
            append_delay_ms: AtomicU64::new(0),
        }
    }
}

impl BillLedger for FlakyLedger {
    fn create_session(
        &self,
        table_id: u32,
        started_at: NaiveDateTime,
    ) -> beer_pos::Result<BillHandle> {
        self.inner.create_session(table_id, started_at)
    }

    fn append_line(&self, bill: &BillHandle, line: &LedgerLine) -> beer_pos::Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(beer_pos::PosError::LedgerWrite(anyhow!("disk full")));
        }
        let delay = self.append_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        self.inner.append_line(bill, line)
    }

    fn close_session(&self, bill: &BillHandle, ended_at: NaiveDateTime) -> beer_pos::Result<PathBuf> {
        self.inner.close_session(bill, ended_at)
    }

    fn compute_total(&self, bill: &BillHandle) -> beer_pos::Result<f64> {
        self.inner.compute_total(bill)
    }
}

/// Sensor whose level is set by the test.
#[derive(Default)]
pub struct FakeSensor {
    pub level: AtomicBool,
    pub reads: AtomicUsize,
}

impl SensorInput for FakeSensor {
    fn is_triggered(&self) -> Result<bool> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.level.load(Ordering::SeqCst))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub coordinator: SessionCoordinator,
    pub menu: Arc<StaticMenu>,
    pub ledger: Arc<FlakyLedger>,
    pub classifier: Arc<ScriptedClassifier>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn bills_dir(&self) -> &Path {
        self.dir.path()
    }
}

pub fn harness(capture: Arc<dyn CaptureSource>, config: CoordinatorConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let menu = Arc::new(StaticMenu::new(&[("A", 10.0), ("B", 20.0)]));
    let ledger = Arc::new(FlakyLedger::new(dir.path()));
    let classifier = Arc::new(ScriptedClassifier::always(item("B")));
    let clock = Arc::new(FixedClock::new(at(9, 0)));

    let coordinator = SessionCoordinator::new(
        Collaborators {
            menu: menu.clone(),
            ledger: ledger.clone(),
            classifier: classifier.clone(),
            capture,
            clock: clock.clone(),
        },
        config,
    );

    Harness {
        dir,
        coordinator,
        menu,
        ledger,
        classifier,
        clock,
    }
}

pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        capture_timeout: Duration::from_secs(2),
        debounce: Duration::ZERO,
    }
}
