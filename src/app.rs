//! Wires settings, stores, recognition and the sensor watcher together.

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use tokio::sync::Mutex;

use crate::{
    capture::CaptureChain,
    classifier::CommandClassifier,
    coordinator::{Collaborators, CoordinatorConfig, SessionCoordinator, SystemClock},
    error::PosError,
    ledger::{history, CsvLedger},
    menu::CsvMenuStore,
    models::{ClosedSession, SessionInfo},
    sensing::{SensingController, SensorInput, SysfsGpio},
    settings::{AppSettings, SettingsStore},
};

pub struct BeerPos {
    pub settings: SettingsStore,
    pub menu: Arc<CsvMenuStore>,
    pub coordinator: SessionCoordinator,
    sensor: Option<Arc<dyn SensorInput>>,
    sensing: Mutex<SensingController>,
}

impl BeerPos {
    /// Builds the production stack from settings. Must run inside a Tokio runtime.
    pub fn new(settings: SettingsStore) -> Result<Self> {
        let config = settings.get();
        config.validate()?;
        let menu = Arc::new(CsvMenuStore::new(config.menu_path.clone()));

        let coordinator = SessionCoordinator::new(
            Collaborators {
                menu: menu.clone(),
                ledger: Arc::new(CsvLedger::new(config.bills_dir.clone())),
                classifier: Arc::new(CommandClassifier::from_settings(&config.classifier)),
                capture: Arc::new(CaptureChain::from_settings(&config.capture)),
                clock: Arc::new(SystemClock),
            },
            CoordinatorConfig::from_settings(&config),
        );

        let sensor = open_sensor(&config);
        Ok(Self::from_parts(settings, menu, coordinator, sensor))
    }

    pub fn from_parts(
        settings: SettingsStore,
        menu: Arc<CsvMenuStore>,
        coordinator: SessionCoordinator,
        sensor: Option<Arc<dyn SensorInput>>,
    ) -> Self {
        Self {
            settings,
            menu,
            coordinator,
            sensor,
            sensing: Mutex::new(SensingController::new()),
        }
    }

    pub fn has_sensor(&self) -> bool {
        self.sensor.is_some()
    }

    pub async fn sensing_active(&self) -> bool {
        self.sensing.lock().await.is_running()
    }

    /// Warns about bills never sealed by an earlier run.
    pub fn report_open_bills(&self) -> Result<usize> {
        let bills_dir = self.settings.get().bills_dir;
        let open = history::open_bills(&bills_dir)?;
        for path in &open {
            warn!("Recovered unfinished bill {}; it was left open", path.display());
        }
        Ok(open.len())
    }

    /// Opens a table (the configured one unless given) and arms the sensor.
    pub async fn start_session(&self, table_id: Option<u32>) -> crate::error::Result<SessionInfo> {
        let table_id = table_id.unwrap_or_else(|| self.settings.table_id());
        let info = self.coordinator.start_session(table_id).await?;
        self.arm_sensor().await;
        Ok(info)
    }

    /// Disarms the sensor first so no new capture starts while sealing.
    pub async fn finish_session(&self) -> crate::error::Result<ClosedSession> {
        self.disarm_sensor().await;
        match self.coordinator.finish_session().await {
            Ok(closed) => Ok(closed),
            Err(err) => {
                if !matches!(err, PosError::NoActiveSession) {
                    self.arm_sensor().await;
                }
                Err(err)
            }
        }
    }

    pub async fn shutdown(&self) {
        self.disarm_sensor().await;
    }

    async fn arm_sensor(&self) {
        let Some(sensor) = self.sensor.clone() else {
            return;
        };
        let poll_interval = self.settings.get().sensor.poll_interval();
        let mut sensing = self.sensing.lock().await;
        if let Err(err) = sensing.start_sensing(self.coordinator.clone(), sensor, poll_interval) {
            warn!("sensor watcher not started: {err:#}");
        }
    }

    async fn disarm_sensor(&self) {
        if let Err(err) = self.sensing.lock().await.stop_sensing().await {
            warn!("sensor watcher did not stop cleanly: {err:#}");
        }
    }
}

fn open_sensor(config: &AppSettings) -> Option<Arc<dyn SensorInput>> {
    if !config.sensor.enabled {
        info!("Sensor disabled in settings; automatic capture off");
        return None;
    }
    match SysfsGpio::open(config.sensor.pin, config.sensor.active_high) {
        Ok(gpio) => Some(Arc::new(gpio)),
        Err(err) => {
            warn!("No sensor available ({err:#}); automatic capture off");
            None
        }
    }
}
