// src/config.rs
//
// =============================================================================
// SLAWIZARD: CONFIGURATION LAYER (v 0.4 )
// =============================================================================
//
// Responsibilities:
// 1. HwConfig: the tunable printer configuration wizards read and write.
// 2. HwConfigStore: YAML file with factory-defaults fallback.
// 3. ConfigWriter: transactional edits (update -> commit | reset).
// 4. RuntimeConfig: per-run context (testing mode, poll intervals, timeouts, paths).

use crate::persistence::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ============================================================================
// 1. HARDWARE CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HwConfig {
    // Motion
    pub tower_sensitivity: u8,
    pub tilt_sensitivity: u8,
    pub tower_height_nm: i64,
    pub tilt_height: i64,
    pub tilt_fast_time: f64,
    pub tilt_slow_time: f64,
    pub tilt_super_slow_time: f64,
    pub measuring_moves: u32,

    // Exposure
    pub uv_pwm: u32,
    pub uv_warm_up_time_s: u32,
    pub uv_calib_intensity: f64,
    pub uv_calib_min_int_edge: f64,
    pub uv_calib_boost_tolerance: f64,

    // Wizard flags
    pub calibrated: bool,
    pub show_wizard: bool,
    pub show_unboxing: bool,

    // Tank surface cleaner
    pub tank_cleaning_exposure_time_s: u32,
    pub tank_cleaning_gently_up_profile: u8,
}

impl Default for HwConfig {
    fn default() -> Self {
        Self {
            tower_sensitivity: 0,
            tilt_sensitivity: 0,
            tower_height_nm: 128_000_000,
            tilt_height: 4_928,
            tilt_fast_time: 5.5,
            tilt_slow_time: 8.0,
            tilt_super_slow_time: 10.0,
            measuring_moves: 3,
            uv_pwm: 0,
            uv_warm_up_time_s: 120,
            uv_calib_intensity: 140.0,
            uv_calib_min_int_edge: 90.0,
            uv_calib_boost_tolerance: 20.0,
            calibrated: false,
            show_wizard: true,
            show_unboxing: true,
            tank_cleaning_exposure_time_s: 50,
            tank_cleaning_gently_up_profile: 0,
        }
    }
}

// ============================================================================
// 2. STORE
// ============================================================================

/// Holds the live configuration and, optionally, the files backing it.
pub struct HwConfigStore {
    path: Option<PathBuf>,
    factory_path: Option<PathBuf>,
    current: Mutex<HwConfig>,
}

impl HwConfigStore {
    /// Loads `path`, falling back to `factory_path`, then to compiled defaults.
    pub fn open(path: impl AsRef<Path>, factory_path: Option<PathBuf>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let current = if path.exists() {
            read_yaml(&path)?
        } else {
            match &factory_path {
                Some(factory) if factory.exists() => read_yaml(factory)?,
                _ => HwConfig::default(),
            }
        };
        log::debug!("Hardware config loaded from {:?}", path);
        Ok(Self {
            path: Some(path),
            factory_path,
            current: Mutex::new(current),
        })
    }

    /// Store without backing files.
    pub fn in_memory(config: HwConfig) -> Self {
        Self {
            path: None,
            factory_path: None,
            current: Mutex::new(config),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HwConfig> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> HwConfig {
        self.lock().clone()
    }

    pub fn factory_defaults(&self) -> HwConfig {
        match &self.factory_path {
            Some(factory) if factory.exists() => read_yaml(factory).unwrap_or_else(|e| {
                log::warn!("Factory defaults unreadable, using built-in: {:#}", e);
                HwConfig::default()
            }),
            _ => HwConfig::default(),
        }
    }

    pub fn write(&self, config: HwConfig) -> Result<()> {
        if let Some(path) = &self.path {
            write_yaml(path, &config)?;
        }
        *self.lock() = config;
        Ok(())
    }

    pub fn write_factory(&self, config: &HwConfig) -> Result<()> {
        match &self.factory_path {
            Some(factory) => write_yaml(factory, config),
            None => Ok(()),
        }
    }

    pub fn writer(self: &Arc<Self>) -> ConfigWriter {
        ConfigWriter {
            store: Arc::clone(self),
            pending: Arc::new(Mutex::new(None)),
        }
    }
}

fn read_yaml(path: &Path) -> Result<HwConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read hardware config {:?}", path))?;
    serde_yaml::from_str(&raw).with_context(|| format!("Invalid hardware config {:?}", path))
}

fn write_yaml(path: &Path, config: &HwConfig) -> Result<()> {
    let raw = serde_yaml::to_string(config).context("Failed to serialize hardware config")?;
    write_atomic(path, raw.as_bytes())
}

// ============================================================================
// 3. TRANSACTIONAL WRITER
// ============================================================================

/// Pending edits on top of the store. Clones share the same pending copy.
#[derive(Clone)]
pub struct ConfigWriter {
    store: Arc<HwConfigStore>,
    pending: Arc<Mutex<Option<HwConfig>>>,
}

impl ConfigWriter {
    fn pending(&self) -> MutexGuard<'_, Option<HwConfig>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current view: pending edits if any, else the stored configuration.
    pub fn get(&self) -> HwConfig {
        self.pending().clone().unwrap_or_else(|| self.store.get())
    }

    pub fn update(&self, edit: impl FnOnce(&mut HwConfig)) {
        let mut pending = self.pending();
        let config = pending.get_or_insert_with(|| self.store.get());
        edit(config);
    }

    /// Replaces pending edits with the factory defaults.
    pub fn factory_reset(&self) {
        *self.pending() = Some(self.store.factory_defaults());
    }

    pub fn has_changes(&self) -> bool {
        self.pending().is_some()
    }

    pub fn commit(&self) -> Result<()> {
        let taken = self.pending().take();
        match taken {
            Some(config) => {
                log::info!("Committing hardware config changes");
                self.store.write(config)
            }
            None => Ok(()),
        }
    }

    pub fn reset(&self) {
        if self.pending().take().is_some() {
            log::debug!("Discarded pending hardware config changes");
        }
    }

    pub fn store(&self) -> &Arc<HwConfigStore> {
        &self.store
    }
}

// ============================================================================
// 4. RUNTIME CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Shortens fixed hardware waits (warm-up, voltage settle).
    pub testing: bool,
    pub factory_mode: bool,
    pub poll_interval_ms: u64,
    pub cover_poll_interval_ms: u64,
    pub cover_timeout_s: u64,
    pub uv_meter_timeout_s: u64,
    /// Wizard result documents.
    pub data_dir: PathBuf,
    /// Root the factory-reset steps operate under.
    pub system_root: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            testing: false,
            factory_mode: false,
            poll_interval_ms: 250,
            cover_poll_interval_ms: 500,
            cover_timeout_s: 600,
            uv_meter_timeout_s: 10,
            data_dir: PathBuf::from("/var/sl1fw"),
            system_root: PathBuf::from("/"),
        }
    }
}

impl RuntimeConfig {
    /// Fast settings for tests and the simulator.
    pub fn testing(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            testing: true,
            factory_mode: false,
            poll_interval_ms: 5,
            cover_poll_interval_ms: 5,
            cover_timeout_s: 2,
            uv_meter_timeout_s: 1,
            system_root: data_dir.join("root"),
            data_dir,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cover_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cover_poll_interval_ms)
    }

    pub fn cover_timeout(&self) -> Duration {
        Duration::from_secs(self.cover_timeout_s)
    }

    pub fn uv_meter_timeout(&self) -> Duration {
        Duration::from_secs(self.uv_meter_timeout_s)
    }

    /// One "second" of a fixed hardware wait.
    pub fn tick(&self) -> Duration {
        if self.testing {
            Duration::from_millis(10)
        } else {
            Duration::from_secs(1)
        }
    }
}
