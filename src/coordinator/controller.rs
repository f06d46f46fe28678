use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex, Weak,
    },
    time::Duration,
};

use anyhow::{anyhow, Context};
use chrono::{Local, NaiveDateTime};
use image::DynamicImage;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
    time::{self, Instant},
};
use uuid::Uuid;

use crate::{
    capture::CaptureSource,
    classifier::{Classification, Classifier},
    error::{PosError, Result},
    ledger::{BillHandle, BillLedger},
    menu::MenuSource,
    models::{
        CaptureAttempt, CaptureOutcome, ClosedSession, Direction, LedgerLine, SessionInfo,
        SessionStatus, SkipReason,
    },
    settings::AppSettings,
};

use super::state::{ActiveSession, SessionSnapshot, SessionState};

// Set to false to silence the capture path
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const EVENT_CAPACITY: usize = 64;

/// Local wall-clock time; bill names are built from it.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound for capture plus classification of one sensor trigger.
    pub capture_timeout: Duration,
    /// Quiet period after a recognised item before the sensor may fire again.
    pub debounce: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            capture_timeout: Duration::from_secs(10),
            debounce: Duration::from_secs(5),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            capture_timeout: settings.capture.timeout(),
            debounce: settings.sensor.debounce(),
        }
    }
}

pub struct Collaborators {
    pub menu: Arc<dyn MenuSource>,
    pub ledger: Arc<dyn BillLedger>,
    pub classifier: Arc<dyn Classifier>,
    pub capture: Arc<dyn CaptureSource>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationSource {
    Manual,
    Sensor,
    Upload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CoordinatorEvent {
    SessionStarted {
        session: SessionInfo,
    },
    QuantityChanged {
        session_id: String,
        item: String,
        quantity: u32,
        total: f64,
        source: MutationSource,
    },
    SessionFinished {
        closed: ClosedSession,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub item: String,
    pub quantity: u32,
}

pub enum CaptureTicket {
    Skipped(CaptureAttempt),
    Launched {
        id: String,
        requested_at: NaiveDateTime,
        handle: JoinHandle<CaptureAttempt>,
    },
}

impl CaptureTicket {
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            CaptureTicket::Skipped(CaptureAttempt {
                outcome: CaptureOutcome::Skipped(reason),
                ..
            }) => Some(*reason),
            _ => None,
        }
    }

    pub fn is_launched(&self) -> bool {
        matches!(self, CaptureTicket::Launched { .. })
    }

    /// Resolves once a launched capture has been applied or discarded.
    pub async fn wait(self) -> CaptureAttempt {
        match self {
            CaptureTicket::Skipped(attempt) => attempt,
            CaptureTicket::Launched {
                id,
                requested_at,
                handle,
            } => match handle.await {
                Ok(attempt) => attempt,
                Err(err) => CaptureAttempt {
                    id,
                    requested_at,
                    outcome: CaptureOutcome::CaptureFailed(format!("capture worker failed: {err}")),
                    applied: false,
                },
            },
        }
    }
}

struct CaptureReport {
    session_id: String,
    attempt: CaptureAttempt,
    reply: oneshot::Sender<CaptureAttempt>,
}

/// Releases the camera claim when dropped, including on panic.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    state: Mutex<SessionState>,
    menu: Arc<dyn MenuSource>,
    ledger: Arc<dyn BillLedger>,
    classifier: Arc<dyn Classifier>,
    capture: Arc<dyn CaptureSource>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    capture_busy: AtomicBool,
    quiet_until: StdMutex<Option<Instant>>,
    events: broadcast::Sender<CoordinatorEvent>,
    reports: mpsc::UnboundedSender<CaptureReport>,
}

/// Sole owner of the active table session.
///
/// Every quantity change (manual buttons, sensor captures, uploads) goes
/// through [`Inner::apply_delta`] while holding the state lock, so changes are
/// applied one at a time and each one is mirrored by exactly one ledger row.
/// Capture workers never touch the state; they post their outcome to the
/// report channel drained by a single applier task.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Must be called from within a Tokio runtime; spawns the report applier.
    pub fn new(parts: Collaborators, config: CoordinatorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            state: Mutex::new(SessionState::Inactive),
            menu: parts.menu,
            ledger: parts.ledger,
            classifier: parts.classifier,
            capture: parts.capture,
            clock: parts.clock,
            config,
            capture_busy: AtomicBool::new(false),
            quiet_until: StdMutex::new(None),
            events,
            reports: reports_tx,
        });

        tokio::spawn(apply_reports(Arc::downgrade(&inner), reports_rx));

        Self { inner }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_capture_in_flight(&self) -> bool {
        self.inner.capture_busy.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.state.lock().await.status()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock().await;
        SessionSnapshot::from_state(&state, self.is_capture_in_flight())
    }

    pub async fn start_session(&self, table_id: u32) -> Result<SessionInfo> {
        let mut state = self.inner.state.lock().await;
        if state.active().is_some() {
            return Err(PosError::SessionAlreadyActive);
        }

        let menu = self
            .inner
            .menu
            .current_menu()
            .map_err(|err| PosError::Menu(format!("{err:#}")))?;
        if menu.is_empty() {
            warn!("refusing to open table {table_id}: menu is empty");
            return Err(PosError::EmptyMenu);
        }

        let menu_len = menu.len();
        let started_at = self.inner.clock.now();
        let bill = self
            .inner
            .on_ledger(move |ledger| ledger.create_session(table_id, started_at))
            .await?;
        let session = ActiveSession::new(
            Uuid::new_v4().to_string(),
            table_id,
            started_at,
            menu,
            bill,
        );
        let info = session.info();
        *state = SessionState::Active(session);
        drop(state);

        self.inner.clear_quiet_period();
        info!(
            "Table {} opened with {} menu items (session {}, bill {})",
            table_id,
            menu_len,
            info.id,
            info.bill_path.display()
        );
        self.inner.emit(CoordinatorEvent::SessionStarted {
            session: info.clone(),
        });
        Ok(info)
    }

    /// Seals the bill and drops the in-memory quantities. A capture still in
    /// flight is not cancelled; its result is discarded when it arrives.
    pub async fn finish_session(&self) -> Result<ClosedSession> {
        let mut state = self.inner.state.lock().await;
        let Some(session) = state.take() else {
            return Err(PosError::NoActiveSession);
        };

        let ended_at = self.inner.clock.now();
        let bill = session.bill.clone();
        let sealed_path = match self
            .inner
            .on_ledger(move |ledger| ledger.close_session(&bill, ended_at))
            .await
        {
            Ok(path) => path,
            Err(err) => {
                *state = SessionState::Active(session);
                return Err(err);
            }
        };
        drop(state);

        let sealed = BillHandle {
            path: sealed_path.clone(),
            name: session.bill.name.closed(ended_at.time()),
        };
        let expected = session.total();
        let total = match self
            .inner
            .on_ledger(move |ledger| ledger.compute_total(&sealed))
            .await
        {
            Ok(total) => {
                if (total - expected).abs() > 1e-6 {
                    warn!(
                        "bill {} totals {} but session counted {}",
                        sealed_path.display(),
                        total,
                        expected
                    );
                }
                total
            }
            Err(err) => {
                warn!("could not re-read sealed bill {}: {err}", sealed_path.display());
                expected
            }
        };

        let closed = ClosedSession {
            info: SessionInfo {
                id: session.id,
                table_id: session.table_id,
                started_at: session.started_at,
                ended_at: Some(ended_at),
                status: SessionStatus::Closed,
                bill_path: sealed_path,
            },
            quantities: session.quantities,
            total,
        };

        info!(
            "Table {} closed, total {} ({})",
            closed.info.table_id,
            total,
            closed.info.bill_path.display()
        );
        self.inner.emit(CoordinatorEvent::SessionFinished {
            closed: closed.clone(),
        });
        Ok(closed)
    }

    /// Returns the item's quantity afterwards. Decrementing at zero is a no-op.
    pub async fn manual_adjust(&self, item: &str, direction: Direction) -> Result<u32> {
        let mut state = self.inner.state.lock().await;
        let session = state.active_mut().ok_or(PosError::NoActiveSession)?;
        let changed = self
            .inner
            .apply_delta(session, item, direction.delta(), MutationSource::Manual)
            .await?;
        Ok(changed.or_else(|| session.quantity(item)).unwrap_or(0))
    }

    /// Sensor entry point. Never blocks on the capture itself.
    pub async fn trigger_capture(&self) -> CaptureTicket {
        let id = Uuid::new_v4().to_string();
        let requested_at = self.inner.clock.now();

        let session_id = self
            .inner
            .state
            .lock()
            .await
            .active()
            .map(|session| session.id.clone());
        let Some(session_id) = session_id else {
            return skipped(id, requested_at, SkipReason::NoActiveSession);
        };

        if self.inner.in_quiet_period() {
            debug!("sensor trigger ignored: inside debounce window");
            return skipped(id, requested_at, SkipReason::Debounce);
        }

        if self
            .inner
            .capture_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log_info!("sensor trigger skipped: capture already in progress");
            return skipped(id, requested_at, SkipReason::Busy);
        }

        let inner = Arc::clone(&self.inner);
        let attempt_id = id.clone();
        let handle = tokio::spawn(async move {
            let outcome = {
                let _busy = BusyGuard(&inner.capture_busy);
                inner.capture_and_classify().await
            };

            let attempt = CaptureAttempt {
                id: attempt_id,
                requested_at,
                outcome,
                applied: false,
            };
            let (reply_tx, reply_rx) = oneshot::channel();
            let report = CaptureReport {
                session_id,
                attempt: attempt.clone(),
                reply: reply_tx,
            };
            if inner.reports.send(report).is_err() {
                return attempt;
            }
            reply_rx.await.unwrap_or(attempt)
        });

        CaptureTicket::Launched {
            id,
            requested_at,
            handle,
        }
    }

    /// Applies a capture outcome produced under `session_id`. Anything other
    /// than a known item for that still-active session is dropped silently.
    pub async fn apply_capture_result(&self, session_id: &str, outcome: &CaptureOutcome) -> bool {
        self.inner.apply_capture_result(session_id, outcome).await
    }

    /// Manual upload: independent of the capture flag, and failures are
    /// reported instead of discarded.
    pub async fn upload_image(&self, path: &Path) -> Result<UploadResult> {
        self.active_session_id().await?;

        let owned = path.to_path_buf();
        let image = tokio::task::spawn_blocking(move || image::open(&owned))
            .await
            .map_err(|err| PosError::ImageRead {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?
            .map_err(|err| PosError::ImageRead {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;

        self.upload_frame(&image).await
    }

    pub async fn upload_frame(&self, image: &DynamicImage) -> Result<UploadResult> {
        let session_id = self.active_session_id().await?;

        let classification = self
            .inner
            .classifier
            .classify(image)
            .await
            .map_err(|err| PosError::Classifier(format!("{err:#}")))?;
        let name = match classification {
            Classification::Item { name, .. } => name,
            Classification::Unknown { best_confidence } => {
                info!("uploaded image not recognised (best score {best_confidence:.2})");
                return Err(PosError::UnrecognizedImage);
            }
        };

        let mut state = self.inner.state.lock().await;
        let session = state
            .active_with_id(&session_id)
            .ok_or(PosError::NoActiveSession)?;
        if !session.menu.contains(&name) {
            return Err(PosError::UnknownItem(name));
        }

        let changed = self
            .inner
            .apply_delta(session, &name, 1, MutationSource::Upload)
            .await?;
        let quantity = changed.or_else(|| session.quantity(&name)).unwrap_or(0);
        Ok(UploadResult {
            item: name,
            quantity,
        })
    }

    async fn active_session_id(&self) -> Result<String> {
        self.inner
            .state
            .lock()
            .await
            .active()
            .map(|session| session.id.clone())
            .ok_or(PosError::NoActiveSession)
    }
}

impl Inner {
    /// The single quantity mutator. Clamps at zero and writes exactly one
    /// ledger row per change; returns `None` when nothing changed. The
    /// in-memory quantity is only updated after the row is durable.
    async fn apply_delta(
        &self,
        session: &mut ActiveSession,
        item: &str,
        delta: i64,
        source: MutationSource,
    ) -> Result<Option<u32>> {
        let unit_price = session
            .menu
            .price(item)
            .ok_or_else(|| PosError::UnknownItem(item.to_string()))?;
        let current = session.quantity(item).unwrap_or(0);
        let next = (i64::from(current) + delta).clamp(0, i64::from(u32::MAX)) as u32;
        if next == current {
            return Ok(None);
        }

        let line = LedgerLine::new(item, next, unit_price);
        let bill = session.bill.clone();
        self.on_ledger(move |ledger| ledger.append_line(&bill, &line))
            .await?;
        session.quantities.insert(item.to_string(), next);

        let total = session.total();
        debug!("{source:?}: {item} -> {next} (total {total})");
        self.emit(CoordinatorEvent::QuantityChanged {
            session_id: session.id.clone(),
            item: item.to_string(),
            quantity: next,
            total,
            source,
        });
        Ok(Some(next))
    }

    async fn capture_and_classify(&self) -> CaptureOutcome {
        let work = async {
            let frame = self
                .capture
                .capture_frame()
                .await
                .context("capture source failed")?;
            let classification = self
                .classifier
                .classify(&frame)
                .await
                .context("classification failed")?;
            Ok::<_, anyhow::Error>(classification)
        };

        match time::timeout(self.config.capture_timeout, work).await {
            Err(_) => {
                log_warn!(
                    "capture timed out after {}ms",
                    self.config.capture_timeout.as_millis()
                );
                CaptureOutcome::CaptureFailed(format!(
                    "timed out after {}ms",
                    self.config.capture_timeout.as_millis()
                ))
            }
            Ok(Err(err)) => {
                log_warn!("capture failed: {err:#}");
                CaptureOutcome::CaptureFailed(format!("{err:#}"))
            }
            Ok(Ok(Classification::Item { name, confidence })) => {
                log_info!("sensor capture recognised '{name}' ({confidence:.2})");
                CaptureOutcome::Classified(name)
            }
            Ok(Ok(Classification::Unknown { best_confidence })) => {
                log_info!("sensor capture below threshold (best score {best_confidence:.2})");
                CaptureOutcome::Unknown
            }
        }
    }

    async fn apply_capture_result(&self, session_id: &str, outcome: &CaptureOutcome) -> bool {
        let CaptureOutcome::Classified(name) = outcome else {
            debug!("capture outcome {outcome:?} discarded");
            return false;
        };

        let mut state = self.state.lock().await;
        let Some(session) = state.active_with_id(session_id) else {
            log_info!("discarding '{name}': session {session_id} is no longer active");
            return false;
        };
        if !session.menu.contains(name) {
            log_warn!("recognised '{name}' is not on the menu, discarded");
            return false;
        }

        match self
            .apply_delta(session, name, 1, MutationSource::Sensor)
            .await
        {
            Ok(Some(_)) => {
                self.start_quiet_period();
                true
            }
            Ok(None) => false,
            Err(err) => {
                log_error!("failed to record sensor item '{name}': {err}");
                false
            }
        }
    }

    /// Ledger calls hit the disk (fsync included), so they run on the
    /// blocking pool. Callers keep holding the state lock meanwhile.
    async fn on_ledger<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn BillLedger) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || op(ledger.as_ref()))
            .await
            .map_err(|err| PosError::LedgerWrite(anyhow!("ledger worker failed: {err}")))?
    }

    fn in_quiet_period(&self) -> bool {
        let guard = self.quiet_until.lock().unwrap_or_else(|p| p.into_inner());
        guard.is_some_and(|until| Instant::now() < until)
    }

    fn start_quiet_period(&self) {
        let mut guard = self.quiet_until.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(Instant::now() + self.config.debounce);
    }

    fn clear_quiet_period(&self) {
        let mut guard = self.quiet_until.lock().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn apply_reports(inner: Weak<Inner>, mut reports: mpsc::UnboundedReceiver<CaptureReport>) {
    while let Some(report) = reports.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let applied = inner
            .apply_capture_result(&report.session_id, &report.attempt.outcome)
            .await;
        let _ = report.reply.send(CaptureAttempt {
            applied,
            ..report.attempt
        });
    }
    debug!("capture report applier stopped");
}

fn skipped(id: String, requested_at: NaiveDateTime, reason: SkipReason) -> CaptureTicket {
    CaptureTicket::Skipped(CaptureAttempt {
        id,
        requested_at,
        outcome: CaptureOutcome::Skipped(reason),
        applied: false,
    })
}
