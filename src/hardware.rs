// src/hardware.rs
//
// =============================================================================
// SLAWIZARD: HARDWARE PORT (v 0.4 )
// =============================================================================
//
// The Hexagonal Port.
//
// Responsibilities:
// 1. Define the `Hardware` trait (motion, exposure unit, sensors, identity).
// 2. Define the `ExposureImage` and `UvMeter` collaborator traits.
// 3. Provide the shared motion helpers every check uses (move_wait, verify_axis).
//
// Positions are axis-native: nanometres for the tower, microsteps for the tilt.

use crate::errors::PrinterError;
use crate::setup::Resource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod sim;

// ============================================================================
// 1. VALUE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    Tower,
    Tilt,
}

impl Axis {
    pub fn home_failed(self) -> PrinterError {
        match self {
            Axis::Tower => PrinterError::TowerHomeFailed,
            Axis::Tilt => PrinterError::TiltHomeFailed,
        }
    }

    /// Locks a check needs before it may home or park this axis.
    pub fn resources(self) -> &'static [Resource] {
        match self {
            Axis::Tower => &[Resource::Tower, Resource::TowerDown],
            Axis::Tilt => &[Resource::Tilt],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisProfile {
    HomingFast,
    HomingSlow,
    MoveFast,
    MoveSlow,
    SuperSlow,
    LayerMoveSlow,
    ResinSensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisLimits {
    pub min: i64,
    pub max: i64,
    /// Where a verified axis is parked.
    pub park: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerLedMode {
    Normal,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanReading {
    pub name: String,
    pub rpm: i64,
    pub target_rpm: i64,
    pub error: bool,
}

/// `None` means the sensor could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperatures {
    pub a64: f64,
    pub uv_led: Option<f64>,
    pub ambient: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UvStatistics {
    pub led_seconds: u64,
    pub display_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvCalibrationParams {
    pub min_pwm: u32,
    pub max_pwm: u32,
    pub safe_default_pwm: u32,
    pub intensity_error_threshold: f64,
    pub param_p: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterModel {
    pub name: String,
    pub has_uv_calibration: bool,
    pub calibration: UvCalibrationParams,
}

impl PrinterModel {
    pub fn sl1() -> Self {
        Self {
            name: "SL1".into(),
            has_uv_calibration: true,
            calibration: UvCalibrationParams {
                min_pwm: 150,
                max_pwm: 250,
                safe_default_pwm: 208,
                intensity_error_threshold: 1.0,
                param_p: 0.75,
            },
        }
    }

    pub fn sl1s() -> Self {
        Self {
            name: "SL1S".into(),
            has_uv_calibration: false,
            calibration: UvCalibrationParams {
                min_pwm: 30,
                max_pwm: 250,
                safe_default_pwm: 208,
                intensity_error_threshold: 1.0,
                param_p: 0.75,
            },
        }
    }
}

// ============================================================================
// 2. THE HARDWARE TRAIT (The Contract)
// ============================================================================

#[async_trait]
pub trait Hardware: Send + Sync {
    // --- Identity ---
    fn model(&self) -> PrinterModel;
    fn is_kit(&self) -> bool;
    fn a64_serial(&self) -> String;
    fn mc_serial(&self) -> String;
    fn mc_fw_version(&self) -> String;
    fn mc_board_revision(&self) -> String;
    fn os_version(&self) -> String;

    // --- Motion ---
    /// One homing attempt, no internal retries.
    async fn home(&self, axis: Axis) -> Result<(), PrinterError>;
    fn is_synced(&self, axis: Axis) -> bool;
    fn set_sensitivity(&self, axis: Axis, level: u8) -> Result<(), PrinterError>;
    fn set_profile(&self, axis: Axis, profile: AxisProfile);
    fn start_move(&self, axis: Axis, target: i64) -> Result<(), PrinterError>;
    fn is_moving(&self, axis: Axis) -> bool;
    fn position(&self, axis: Axis) -> i64;
    fn set_position(&self, axis: Axis, position: i64);
    fn limits(&self, axis: Axis) -> AxisLimits;
    fn release_motors(&self);

    // --- Exposure unit ---
    fn set_uv_led(&self, on: bool);
    fn set_uv_pwm(&self, pwm: u32);
    fn uv_pwm(&self) -> u32;
    /// Row voltages followed by the power supply voltage.
    fn uv_voltages(&self) -> Vec<f64>;
    fn uv_statistics(&self) -> UvStatistics;
    fn clear_uv_statistics(&self);
    fn clear_display_statistics(&self);
    fn start_fans(&self);
    fn stop_fans(&self);
    fn fans(&self) -> Vec<FanReading>;

    // --- Sensors & misc ---
    fn temperatures(&self) -> Temperatures;
    fn is_cover_closed(&self) -> bool;
    async fn measure_resin_mm(&self) -> Result<f64, PrinterError>;
    fn beep_alarm(&self, count: u32);
    fn set_power_led(&self, mode: PowerLedMode);
    fn erase_eeprom(&self) -> Result<(), PrinterError>;

    // ------------------------------------------------------------------------
    // Provided helpers
    // ------------------------------------------------------------------------

    /// Starts a move and polls until the axis stops. Returns the final position.
    async fn move_wait(&self, axis: Axis, target: i64, poll: Duration) -> Result<i64, PrinterError> {
        self.start_move(axis, target)?;
        while self.is_moving(axis) {
            tokio::time::sleep(poll).await;
        }
        Ok(self.position(axis))
    }

    /// Homes an unsynced axis, otherwise parks it.
    async fn verify_axis(&self, axis: Axis, poll: Duration) -> Result<(), PrinterError> {
        if !self.is_synced(axis) {
            self.set_profile(axis, AxisProfile::HomingFast);
            return self.home(axis).await;
        }
        self.set_profile(axis, AxisProfile::MoveFast);
        let park = self.limits(axis).park;
        self.move_wait(axis, park, poll).await?;
        Ok(())
    }
}

/// Switches UV and (optionally) fans off when dropped, on every exit path.
pub struct ExposureShutdown<'a> {
    hw: &'a dyn Hardware,
    fans: bool,
}

impl<'a> ExposureShutdown<'a> {
    pub fn uv(hw: &'a dyn Hardware) -> Self {
        Self { hw, fans: false }
    }

    pub fn uv_and_fans(hw: &'a dyn Hardware) -> Self {
        Self { hw, fans: true }
    }
}

impl Drop for ExposureShutdown<'_> {
    fn drop(&mut self) {
        self.hw.set_uv_led(false);
        if self.fans {
            self.hw.stop_fans();
        }
    }
}

// ============================================================================
// 3. COLLABORATORS
// ============================================================================

/// Full-screen pattern on the exposure panel.
pub trait ExposureImage: Send + Sync {
    fn show_system_image(&self, name: &str);
    fn open_screen(&self);
    fn blank_screen(&self);
    fn inverse(&self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UvMeasurement {
    pub uv_mean: f64,
    pub uv_std_dev: f64,
    pub uv_min_value: f64,
    pub uv_max_value: f64,
    pub uv_found_pwm: i64,
}

#[async_trait]
pub trait UvMeter: Send + Sync {
    fn present(&self) -> bool;
    async fn connect(&self) -> Result<(), PrinterError>;
    /// Verifies the meter sits in the middle of the exposure area.
    async fn check_place(&self) -> Result<(), PrinterError>;
    async fn read_data(&self) -> Result<UvMeasurement, PrinterError>;
    fn close(&self);
}
