// src/hardware/sim.rs
//
// =============================================================================
// SLAWIZARD: SIMULATED PRINTER (v 0.4 )
// =============================================================================
//
// In-memory printer used by the CLI demo mode and the test-suite.
//
// Responsibilities:
// 1. Keep axis positions, exposure unit and sensor values in one locked state.
// 2. Replay a scripted list of homing failures per axis.
// 3. Count the calls tests care about (homing attempts, sensitivity changes, LED modes).

use super::{
    Axis, AxisLimits, AxisProfile, ExposureImage, FanReading, Hardware, PowerLedMode, PrinterModel,
    Temperatures, UvMeasurement, UvMeter, UvStatistics,
};
use crate::errors::PrinterError;
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const TOWER_LIMITS: AxisLimits = AxisLimits {
    min: 0,
    max: 150_000_000,
    park: 150_000_000,
};

pub const TILT_LIMITS: AxisLimits = AxisLimits {
    min: 0,
    max: 5_500,
    park: 4_928,
};

// ============================================================================
// 1. STATE
// ============================================================================

#[derive(Debug, Clone)]
struct AxisState {
    position: i64,
    synced: bool,
    profile: AxisProfile,
    sensitivity: u8,
    home_script: VecDeque<PrinterError>,
    home_calls: u32,
    sensitivity_history: Vec<u8>,
}

impl AxisState {
    fn new(position: i64) -> Self {
        Self {
            position,
            synced: false,
            profile: AxisProfile::HomingFast,
            sensitivity: 0,
            home_script: VecDeque::new(),
            home_calls: 0,
            sensitivity_history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct SimState {
    model: PrinterModel,
    kit: bool,
    axes: BTreeMap<Axis, AxisState>,
    /// Tower stops here when moving down past it (cleaning adaptor, resin).
    tower_obstacle_nm: Option<i64>,
    uv_led: bool,
    uv_pwm: u32,
    uv_stats: UvStatistics,
    fans_running: bool,
    fan_error: bool,
    temperatures: Temperatures,
    cover_closed: bool,
    resin_mm: f64,
    power_led: Vec<PowerLedMode>,
    beeps: u32,
    eeprom_erased: bool,
    home_delay: Duration,
}

// ============================================================================
// 2. SIMULATED HARDWARE
// ============================================================================

pub struct SimulatedHardware {
    state: Mutex<SimState>,
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new(PrinterModel::sl1())
    }
}

impl SimulatedHardware {
    pub fn new(model: PrinterModel) -> Self {
        let mut axes = BTreeMap::new();
        axes.insert(Axis::Tower, AxisState::new(TOWER_LIMITS.park));
        axes.insert(Axis::Tilt, AxisState::new(TILT_LIMITS.park));
        Self {
            state: Mutex::new(SimState {
                model,
                kit: false,
                axes,
                tower_obstacle_nm: None,
                uv_led: false,
                uv_pwm: 0,
                uv_stats: UvStatistics {
                    led_seconds: 3_600,
                    display_seconds: 1_800,
                },
                fans_running: false,
                fan_error: false,
                temperatures: Temperatures {
                    a64: 45.0,
                    uv_led: Some(28.0),
                    ambient: Some(24.0),
                },
                cover_closed: true,
                resin_mm: 12.0,
                power_led: Vec::new(),
                beeps: 0,
                eeprom_erased: false,
                home_delay: Duration::ZERO,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_axis<R>(&self, axis: Axis, f: impl FnOnce(&mut AxisState) -> R) -> R {
        let mut state = self.lock();
        let entry = state
            .axes
            .entry(axis)
            .or_insert_with(|| AxisState::new(0));
        f(entry)
    }

    // --- Scripting (tests / demo) ---

    /// Queues errors returned by the next homing attempts, in order.
    pub fn script_homing(&self, axis: Axis, failures: impl IntoIterator<Item = PrinterError>) {
        self.with_axis(axis, |a| a.home_script.extend(failures));
    }

    pub fn set_home_delay(&self, delay: Duration) {
        self.lock().home_delay = delay;
    }

    pub fn set_kit(&self, kit: bool) {
        self.lock().kit = kit;
    }

    pub fn set_cover_closed(&self, closed: bool) {
        self.lock().cover_closed = closed;
    }

    pub fn set_resin_mm(&self, mm: f64) {
        self.lock().resin_mm = mm;
    }

    pub fn set_tower_obstacle(&self, position_nm: Option<i64>) {
        self.lock().tower_obstacle_nm = position_nm;
    }

    pub fn set_temperatures(&self, temperatures: Temperatures) {
        self.lock().temperatures = temperatures;
    }

    pub fn set_fan_error(&self, error: bool) {
        self.lock().fan_error = error;
    }

    // --- Inspection ---

    pub fn home_calls(&self, axis: Axis) -> u32 {
        self.with_axis(axis, |a| a.home_calls)
    }

    pub fn sensitivity(&self, axis: Axis) -> u8 {
        self.with_axis(axis, |a| a.sensitivity)
    }

    pub fn sensitivity_history(&self, axis: Axis) -> Vec<u8> {
        self.with_axis(axis, |a| a.sensitivity_history.clone())
    }

    pub fn power_led_history(&self) -> Vec<PowerLedMode> {
        self.lock().power_led.clone()
    }

    pub fn uv_led_on(&self) -> bool {
        self.lock().uv_led
    }

    pub fn fans_running(&self) -> bool {
        self.lock().fans_running
    }

    pub fn eeprom_erased(&self) -> bool {
        self.lock().eeprom_erased
    }

    pub fn beeps(&self) -> u32 {
        self.lock().beeps
    }
}

#[async_trait]
impl Hardware for SimulatedHardware {
    fn model(&self) -> PrinterModel {
        self.lock().model.clone()
    }

    fn is_kit(&self) -> bool {
        self.lock().kit
    }

    fn a64_serial(&self) -> String {
        "CZPX2921X009XC14321".into()
    }

    fn mc_serial(&self) -> String {
        "CZPX2821X012XK00104".into()
    }

    fn mc_fw_version(&self) -> String {
        "1.1.0".into()
    }

    fn mc_board_revision(&self) -> String {
        "6c".into()
    }

    fn os_version(&self) -> String {
        "1.7.3".into()
    }

    async fn home(&self, axis: Axis) -> Result<(), PrinterError> {
        let delay = self.lock().home_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let home_position = match axis {
            Axis::Tower => TOWER_LIMITS.max,
            Axis::Tilt => TILT_LIMITS.min,
        };
        self.with_axis(axis, |a| {
            a.home_calls += 1;
            match a.home_script.pop_front() {
                Some(err) => {
                    a.synced = false;
                    Err(err)
                }
                None => {
                    a.synced = true;
                    a.position = home_position;
                    Ok(())
                }
            }
        })
    }

    fn is_synced(&self, axis: Axis) -> bool {
        self.with_axis(axis, |a| a.synced)
    }

    fn set_sensitivity(&self, axis: Axis, level: u8) -> Result<(), PrinterError> {
        self.with_axis(axis, |a| {
            a.sensitivity = level;
            a.sensitivity_history.push(level);
        });
        Ok(())
    }

    fn set_profile(&self, axis: Axis, profile: AxisProfile) {
        self.with_axis(axis, |a| a.profile = profile);
    }

    fn start_move(&self, axis: Axis, target: i64) -> Result<(), PrinterError> {
        let mut state = self.lock();
        let obstacle = state.tower_obstacle_nm;
        let Some(entry) = state.axes.get_mut(&axis) else {
            return Err(PrinterError::Internal(format!("unknown axis {:?}", axis)));
        };
        let stop = match (axis, obstacle) {
            (Axis::Tower, Some(obstacle)) if target < obstacle && entry.position >= obstacle => obstacle,
            _ => target,
        };
        entry.position = stop;
        Ok(())
    }

    fn is_moving(&self, _axis: Axis) -> bool {
        false
    }

    fn position(&self, axis: Axis) -> i64 {
        self.with_axis(axis, |a| a.position)
    }

    fn set_position(&self, axis: Axis, position: i64) {
        self.with_axis(axis, |a| a.position = position);
    }

    fn limits(&self, axis: Axis) -> AxisLimits {
        match axis {
            Axis::Tower => TOWER_LIMITS,
            Axis::Tilt => TILT_LIMITS,
        }
    }

    fn release_motors(&self) {
        let mut state = self.lock();
        for axis in state.axes.values_mut() {
            axis.synced = false;
        }
    }

    fn set_uv_led(&self, on: bool) {
        self.lock().uv_led = on;
    }

    fn set_uv_pwm(&self, pwm: u32) {
        self.lock().uv_pwm = pwm;
    }

    fn uv_pwm(&self) -> u32 {
        self.lock().uv_pwm
    }

    fn uv_voltages(&self) -> Vec<f64> {
        let pwm = self.lock().uv_pwm as f64;
        let base = 20.0 + pwm / 100.0;
        vec![base, base + 0.05, base + 0.1, 24.1]
    }

    fn uv_statistics(&self) -> UvStatistics {
        self.lock().uv_stats
    }

    fn clear_uv_statistics(&self) {
        self.lock().uv_stats.led_seconds = 0;
    }

    fn clear_display_statistics(&self) {
        self.lock().uv_stats.display_seconds = 0;
    }

    fn start_fans(&self) {
        self.lock().fans_running = true;
    }

    fn stop_fans(&self) {
        self.lock().fans_running = false;
    }

    fn fans(&self) -> Vec<FanReading> {
        let state = self.lock();
        let running = state.fans_running;
        [("UV LED", 3_700), ("blower", 3_300), ("rear", 1_000)]
            .into_iter()
            .map(|(name, target)| FanReading {
                name: name.to_string(),
                rpm: if running { target } else { 0 },
                target_rpm: target,
                error: state.fan_error,
            })
            .collect()
    }

    fn temperatures(&self) -> Temperatures {
        self.lock().temperatures
    }

    fn is_cover_closed(&self) -> bool {
        self.lock().cover_closed
    }

    async fn measure_resin_mm(&self) -> Result<f64, PrinterError> {
        Ok(self.lock().resin_mm)
    }

    fn beep_alarm(&self, count: u32) {
        self.lock().beeps += count;
    }

    fn set_power_led(&self, mode: PowerLedMode) {
        self.lock().power_led.push(mode);
    }

    fn erase_eeprom(&self) -> Result<(), PrinterError> {
        self.lock().eeprom_erased = true;
        Ok(())
    }
}

// ============================================================================
// 3. COLLABORATOR DOUBLES
// ============================================================================

/// Records every screen operation.
#[derive(Default)]
pub struct SimExposureImage {
    ops: Mutex<Vec<String>>,
}

impl SimExposureImage {
    pub fn operations(&self) -> Vec<String> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, op: impl Into<String>) {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op.into());
    }
}

impl ExposureImage for SimExposureImage {
    fn show_system_image(&self, name: &str) {
        self.record(format!("show:{}", name));
    }

    fn open_screen(&self) {
        self.record("open");
    }

    fn blank_screen(&self) {
        self.record("blank");
    }

    fn inverse(&self) {
        self.record("inverse");
    }
}

/// UV meter whose reading follows the simulated LED PWM linearly.
pub struct SimUvMeter {
    hw: Arc<SimulatedHardware>,
    present: AtomicBool,
    /// Intensity per PWM unit.
    gain: f64,
}

impl SimUvMeter {
    pub fn new(hw: Arc<SimulatedHardware>) -> Self {
        Self {
            hw,
            present: AtomicBool::new(true),
            gain: 0.7,
        }
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }
}

#[async_trait]
impl UvMeter for SimUvMeter {
    fn present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), PrinterError> {
        if self.present() {
            Ok(())
        } else {
            Err(PrinterError::UvMeterFailedToRespond)
        }
    }

    async fn check_place(&self) -> Result<(), PrinterError> {
        if self.present() {
            Ok(())
        } else {
            Err(PrinterError::UvMeterCommunicationFailed)
        }
    }

    async fn read_data(&self) -> Result<UvMeasurement, PrinterError> {
        if !self.present() {
            return Err(PrinterError::UvMeterCommunicationFailed);
        }
        let mean = if self.hw.uv_led_on() {
            self.hw.uv_pwm() as f64 * self.gain
        } else {
            0.0
        };
        Ok(UvMeasurement {
            uv_mean: mean,
            uv_std_dev: 4.0,
            uv_min_value: mean * 0.95,
            uv_max_value: mean * 1.05,
            uv_found_pwm: -1,
        })
    }

    fn close(&self) {
        log::debug!("Simulated UV meter closed");
    }
}
