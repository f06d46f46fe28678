use anyhow::{Context, Result};
use crate::error::PosError;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

pub const SETTINGS_ENV: &str = "BEER_POS_SETTINGS";
pub const DEBUG_ENV: &str = "BEER_POS_DEBUG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub enabled: bool,
    /// BCM pin number of the presence sensor.
    pub pin: u32,
    pub active_high: bool,
    pub poll_interval_ms: u64,
    pub debounce_secs: u64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            pin: 17,
            active_high: true,
            poll_interval_ms: 100,
            debounce_secs: 5,
        }
    }
}

impl SensorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub image_path: PathBuf,
    /// Tried in order until one produces a frame. `{path}` is the image path.
    pub commands: Vec<Vec<String>>,
    /// Serve this file instead of the camera (bench setups without hardware).
    pub still_image: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let argv = |line: &str| line.split_whitespace().map(String::from).collect::<Vec<_>>();
        Self {
            image_path: PathBuf::from("/tmp/beer_temp.jpg"),
            commands: vec![
                argv("libcamera-still -o {path} --width 640 --height 480 --timeout 500 --nopreview"),
                argv("fswebcam -r 640x480 --no-banner {path}"),
            ],
            still_image: None,
            timeout_secs: 10,
        }
    }
}

impl CaptureSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Inference helper; prints one probability per class as a JSON array.
    pub command: Vec<String>,
    pub input_size: u32,
    pub threshold: f32,
    pub classes: Vec<String>,
    pub display_names: HashMap<String, String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        let display_names = [
            ("budweiser", "Bia Budweiser"),
            ("heniken", "Bia Heineken"),
            ("tiger", "Bia Tiger"),
            ("tiger_bac", "Bia Tiger Bạc"),
        ]
        .into_iter()
        .map(|(class, name)| (class.to_string(), name.to_string()))
        .collect();

        Self {
            command: ["python3", "infer.py", "--model", "best.tflite", "{path}"]
                .into_iter()
                .map(String::from)
                .collect(),
            input_size: 224,
            threshold: 0.8,
            classes: ["budweiser", "heniken", "tiger", "tiger_bac"]
                .into_iter()
                .map(String::from)
                .collect(),
            display_names,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub menu_path: PathBuf,
    pub bills_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub table_id: u32,
    pub sensor: SensorSettings,
    pub capture: CaptureSettings,
    pub classifier: ClassifierSettings,
    pub transfer: Option<TransferSettings>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            menu_path: PathBuf::from("data/menu.csv"),
            bills_dir: PathBuf::from("data/bills"),
            log_file: dirs::home_dir().map(|home| home.join("sensor.log")),
            table_id: 1,
            sensor: SensorSettings::default(),
            capture: CaptureSettings::default(),
            classifier: ClassifierSettings::default(),
            transfer: None,
        }
    }
}

impl AppSettings {
    /// `--settings` wins, then `BEER_POS_SETTINGS`, then the user data dir.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(SETTINGS_ENV).map(PathBuf::from))
            .or_else(|| dirs::data_dir().map(|dir| dir.join("beer-pos").join("settings.json")))
            .unwrap_or_else(|| PathBuf::from("settings.json"))
    }

    /// Rejects settings the recognition pipeline cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let classifier = &self.classifier;
        if classifier.classes.is_empty() {
            return Err(PosError::Config("classifier.classes is empty".into()));
        }
        if !(0.0..=1.0).contains(&classifier.threshold) {
            return Err(PosError::Config(format!(
                "classifier.threshold {} is outside 0..=1",
                classifier.threshold
            )));
        }
        if classifier.command.is_empty() {
            return Err(PosError::Config("classifier.command is empty".into()));
        }
        if self.capture.still_image.is_none() && self.capture.commands.iter().all(Vec::is_empty) {
            return Err(PosError::Config(
                "capture.commands has no usable command and no still_image is set".into(),
            ));
        }
        Ok(())
    }
}

pub fn debug_mode() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid settings in {}", path.display()))?
        } else {
            AppSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> AppSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn table_id(&self) -> u32 {
        self.get().table_id
    }

    pub fn update<F>(&self, change: F) -> Result<AppSettings>
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        change(&mut guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    fn persist(&self, data: &AppSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create settings directory {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

impl SettingsStore {
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: AppSettings = serde_json::from_str(&contents)?;
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let settings = store.get();
        assert_eq!(settings.sensor.pin, 17);
        assert_eq!(settings.sensor.debounce(), Duration::from_secs(5));
        assert_eq!(settings.classifier.threshold, 0.8);
        assert_eq!(settings.capture.commands.len(), 2);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "table_id": 7, "sensor": { "pin": 4 } }"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().get();
        assert_eq!(settings.table_id, 7);
        assert_eq!(settings.sensor.pin, 4);
        assert_eq!(settings.sensor.poll_interval_ms, 100);
        assert_eq!(settings.menu_path, PathBuf::from("data/menu.csv"));
    }

    #[test]
    fn validate_rejects_unusable_recognition_settings() {
        let mut settings = AppSettings::default();
        assert!(settings.validate().is_ok());

        settings.classifier.threshold = 1.5;
        assert!(matches!(settings.validate(), Err(PosError::Config(_))));

        settings = AppSettings::default();
        settings.capture.commands = vec![Vec::new()];
        assert!(settings.validate().is_err());
        settings.capture.still_image = Some(PathBuf::from("glass.jpg"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn explicit_settings_path_wins() {
        assert_eq!(
            AppSettings::resolve_path(Some(Path::new("conf/pos.json"))),
            PathBuf::from("conf/pos.json")
        );
    }

    #[test]
    fn update_persists_and_reload_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();
        store.update(|settings| settings.table_id = 12).unwrap();

        let fresh = SettingsStore::new(path).unwrap();
        assert_eq!(fresh.table_id(), 12);

        store.update(|settings| settings.table_id = 3).unwrap();
        fresh.reload().unwrap();
        assert_eq!(fresh.table_id(), 3);
    }
}
