// src/checks/uv_calibration.rs
//
// =============================================================================
// SLAWIZARD: UV CALIBRATION CHECKS (v 0.4 )
// =============================================================================
//
// Responsibilities:
// 1. Find and connect the UV meter, warm the LEDs up, verify meter placement.
// 2. Tune the PWM so the center reads the target intensity (PI loop).
// 3. Raise the PWM until the dimmest edge point is bright enough.
// 4. Let the user apply or discard the result.
//
// Fans and UV stay on from warm-up to the edge check; every check switches
// them off when it fails and the edge check switches them off always.

use crate::actions::UserAction;
use crate::check::{Check, CheckContext, DangerousCheck, ResultData};
use crate::errors::{CheckError, PrinterError};
use crate::hardware::{ExposureShutdown, Hardware, UvMeasurement};
use crate::persistence::write_atomic;
use crate::setup::Resource;
use crate::states::{WizardCheckType, WizardState};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

pub const INTENSITY_DEVIATION_THRESHOLD: f64 = 25.0;
pub const SECOND_PASS_THRESHOLD: f64 = 240.0;
pub const BOOST_MULTIPLIER: f64 = 1.2;
/// PWM assumed when the factory value is unset or parts were replaced.
pub const TEMPORARY_FACTORY_PWM: u32 = 200;

const PARAM_I: f64 = 0.0025;
const TUNING_ITERATIONS: u32 = 30;
const SUCCESS_ITERATIONS: u32 = 3;
const STALL_ITERATIONS: u32 = 5;

pub const COUNTER_LOG_FILE: &str = "uv_counters.log";

// ============================================================================
// 1. SHARED RESULT
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct UvCalibrationResult {
    pub boost: bool,
    pub data: Option<UvMeasurement>,
}

/// Written by the calibrate checks, read by the apply check.
#[derive(Clone, Default)]
pub struct SharedUvResult(Arc<Mutex<UvCalibrationResult>>);

impl SharedUvResult {
    pub fn lock(&self) -> MutexGuard<'_, UvCalibrationResult> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> UvCalibrationResult {
        self.lock().clone()
    }
}

fn exposure_off(hw: &dyn Hardware) {
    hw.set_uv_led(false);
    hw.stop_fans();
}

/// Switches UV and fans off when `result` is an error.
fn off_on_error<T>(hw: &dyn Hardware, result: Result<T, CheckError>) -> Result<T, CheckError> {
    if result.is_err() {
        exposure_off(hw);
    }
    result
}

// ============================================================================
// 2. METER, WARM-UP, PLACEMENT
// ============================================================================

#[derive(Default)]
pub struct UvMeterPresentTest;

#[async_trait]
impl Check for UvMeterPresentTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::UvMeterPresent
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Uv]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let meter = ctx.package().uv_meter()?;
        let timeout = ctx.runtime().uv_meter_timeout();
        let started = Instant::now();
        while !meter.present() && started.elapsed() < timeout {
            ctx.set_progress(started.elapsed().as_secs_f64() / timeout.as_secs_f64());
            ctx.poll().await?;
        }
        if !meter.present() {
            return Err(PrinterError::FailedToDetectUvMeter.into());
        }
        log::info!("UV meter device found");
        meter.connect().await?;
        Ok(())
    }
}

impl DangerousCheck for UvMeterPresentTest {}

#[derive(Default)]
pub struct UvWarmupTest;

impl UvWarmupTest {
    async fn warm_up(ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        let calibration = hw.model().calibration;
        hw.start_fans();
        hw.set_uv_pwm(calibration.max_pwm);
        ctx.package().exposure_image()?.blank_screen();
        hw.set_uv_led(true);

        let ticks = ctx.package().config_writer.get().uv_warm_up_time_s.max(1);
        for tick in 0..ticks {
            ctx.set_progress(tick as f64 / ticks as f64);
            ctx.sleep(ctx.runtime().tick()).await?;
        }
        hw.set_uv_pwm(calibration.min_pwm);
        Ok(())
    }
}

#[async_trait]
impl Check for UvWarmupTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::UvWarmup
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Uv, Resource::Fans]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let result = Self::warm_up(ctx).await;
        off_on_error(ctx.hw(), result)
    }
}

impl DangerousCheck for UvWarmupTest {}

#[derive(Default)]
pub struct UvMeterPlacementTest;

#[async_trait]
impl Check for UvMeterPlacementTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::UvMeterPlacement
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Uv, Resource::Fans]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let placed = async {
            let image = ctx.package().exposure_image()?;
            let meter = ctx.package().uv_meter()?;
            image.inverse();
            let placed = meter.check_place().await;
            image.inverse();
            placed.map_err(CheckError::from)
        }
        .await;
        off_on_error(ctx.hw(), placed)
    }
}

impl DangerousCheck for UvMeterPlacementTest {}

// ============================================================================
// 3. CENTER (PI loop)
// ============================================================================

pub struct UvCalibrateCenter {
    result: SharedUvResult,
    replacement: bool,
}

impl UvCalibrateCenter {
    pub fn new(result: SharedUvResult, replacement: bool) -> Self {
        Self {
            result,
            replacement,
        }
    }

    fn factory_pwm(&self, ctx: &CheckContext) -> u32 {
        let factory = ctx.package().config_store().factory_defaults().uv_pwm;
        if factory == 0 {
            log::error!("Factory UV PWM == 0, not set yet");
        }
        if self.replacement || factory == 0 {
            log::info!("Using temporary default factory UV PWM {}", TEMPORARY_FACTORY_PWM);
            TEMPORARY_FACTORY_PWM
        } else {
            factory
        }
    }

    /// One tuning pass. Returns the final (unrounded) PWM.
    async fn calibrate(&self, ctx: &CheckContext) -> Result<f64, CheckError> {
        let hw = ctx.hw();
        let meter = ctx.package().uv_meter()?;
        let params = hw.model().calibration;
        let config = ctx.package().config_writer.get();
        let boost = self.result.lock().boost;
        let threshold = params.intensity_error_threshold;

        let mut pwm = params.min_pwm as f64;
        let mut last_pwm = pwm;
        let mut error = 0.0;
        let mut integrated_error = 0.0;
        let mut success_count = 0;
        let mut stall_count = 0;
        let mut intensity = 0.0;
        let mut data = UvMeasurement::default();

        hw.start_fans();
        for iteration in 0..TUNING_ITERATIONS {
            hw.set_uv_pwm(pwm as u32);
            data = tokio::select! {
                _ = ctx.actions().cancelled() => return Err(CheckError::Canceled),
                read = meter.read_data() => read?,
            };
            intensity = if boost {
                data.uv_mean * BOOST_MULTIPLIER
            } else {
                data.uv_mean
            };
            error = config.uv_calib_intensity - intensity;
            integrated_error += error;
            log::info!(
                "UV pwm tuning: pwm: {:.0}, intensity: {:.2}, error: {:.2}, integrated: {:.2}, iteration: {}, success count: {}",
                pwm,
                intensity,
                error,
                integrated_error,
                iteration,
                success_count
            );

            ctx.set_progress(if error == 0.0 {
                1.0
            } else {
                (threshold / error.abs()).min(1.0)
            });

            if error.abs() < threshold {
                if success_count >= SUCCESS_ITERATIONS {
                    break;
                }
                success_count += 1;
            } else {
                success_count = 0;
            }

            pwm += params.param_p * error + PARAM_I * integrated_error;
            pwm = pwm.clamp(params.min_pwm as f64, params.max_pwm as f64);

            if pwm == last_pwm {
                stall_count += 1;
                if stall_count > STALL_ITERATIONS {
                    log::warn!("UV calibration stall detected");
                    break;
                }
            } else {
                last_pwm = pwm;
                stall_count = 0;
            }
        }

        if error > threshold {
            log::error!("UV intensity error: {}", error);
            return Err(PrinterError::UvTooDimm {
                value: intensity,
                threshold: config.uv_calib_intensity - threshold,
            }
            .into());
        }
        if error < -threshold {
            log::error!("UV intensity error: {}", error);
            return Err(PrinterError::UvTooBright {
                value: intensity,
                threshold: config.uv_calib_intensity + threshold,
            }
            .into());
        }
        if data.uv_std_dev > INTENSITY_DEVIATION_THRESHOLD {
            log::error!("UV deviation: {}", data.uv_std_dev);
            return Err(PrinterError::UvDeviationTooHigh {
                deviation: data.uv_std_dev,
                threshold: INTENSITY_DEVIATION_THRESHOLD,
            }
            .into());
        }

        data.uv_found_pwm = hw.uv_pwm() as i64;
        self.result.lock().data = Some(data);
        Ok(pwm)
    }

    async fn tune(&self, ctx: &CheckContext) -> Result<(), CheckError> {
        let pwm = match self.calibrate(ctx).await {
            Err(CheckError::Printer(e)) if is_calibration_error(&e) && !self.result.lock().boost => {
                // The sensor may not match the LED wavelength; retry with boosted readings.
                log::info!("Requested intensity not reachable ({}), retrying boosted", e);
                self.result.lock().boost = true;
                self.calibrate(ctx).await?
            }
            other => other?,
        };

        let factory = self.factory_pwm(ctx) as f64;
        let tolerance = ctx.package().config_writer.get().uv_calib_boost_tolerance;
        let boost_threshold = factory / 100.0 * (100.0 + tolerance);
        let too_high = pwm > SECOND_PASS_THRESHOLD || pwm > boost_threshold;
        if too_high && !self.result.lock().boost {
            log::info!(
                "Boosted results applied due to bigger tolerance. Factory: {}, max: {}, tolerance: {}",
                factory,
                boost_threshold,
                tolerance
            );
            self.result.lock().boost = true;
            ctx.hw().beep_alarm(2);
            self.calibrate(ctx).await?;
        }
        Ok(())
    }
}

fn is_calibration_error(e: &PrinterError) -> bool {
    matches!(
        e,
        PrinterError::UvTooDimm { .. }
            | PrinterError::UvTooBright { .. }
            | PrinterError::UvDeviationTooHigh { .. }
    )
}

#[async_trait]
impl Check for UvCalibrateCenter {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::UvCalibrateCenter
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Uv]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let result = self.tune(ctx).await;
        off_on_error(ctx.hw(), result)
    }
}

impl DangerousCheck for UvCalibrateCenter {}

// ============================================================================
// 4. EDGE
// ============================================================================

pub struct UvCalibrateEdge {
    result: SharedUvResult,
}

impl UvCalibrateEdge {
    pub fn new(result: SharedUvResult) -> Self {
        Self { result }
    }

    async fn calibrate(&self, ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        let meter = ctx.package().uv_meter()?;
        let image = ctx.package().exposure_image()?;
        let max_pwm = hw.model().calibration.max_pwm;
        let min_edge = ctx.package().config_writer.get().uv_calib_min_int_edge;
        let boost = self.result.lock().boost;

        image.blank_screen();
        image.inverse();
        let mut pwm = hw.uv_pwm();
        let mut data = UvMeasurement::default();
        while pwm <= max_pwm {
            hw.set_uv_pwm(pwm);
            data = tokio::select! {
                _ = ctx.actions().cancelled() => return Err(CheckError::Canceled),
                read = meter.read_data() => read?,
            };
            let min_value = if boost {
                data.uv_min_value * BOOST_MULTIPLIER
            } else {
                data.uv_min_value
            };
            log::info!("UV pwm tuning: pwm: {}, minValue: {:.2}", pwm, min_value);
            ctx.set_progress((min_value / min_edge).min(1.0));
            if min_value >= min_edge {
                break;
            }
            pwm += 1;
        }

        if pwm > max_pwm {
            log::error!("UV PWM {} > allowed PWM {}", pwm, max_pwm);
            return Err(PrinterError::UvTooDimm {
                value: pwm as f64,
                threshold: max_pwm as f64,
            }
            .into());
        }
        if data.uv_std_dev > INTENSITY_DEVIATION_THRESHOLD {
            log::error!("UV deviation: {}", data.uv_std_dev);
            return Err(PrinterError::UvDeviationTooHigh {
                deviation: data.uv_std_dev,
                threshold: INTENSITY_DEVIATION_THRESHOLD,
            }
            .into());
        }

        data.uv_found_pwm = hw.uv_pwm() as i64;
        self.result.lock().data = Some(data);
        Ok(())
    }
}

#[async_trait]
impl Check for UvCalibrateEdge {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::UvCalibrateEdge
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::Uv]
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let hw = ctx.hw();
        let _off = ExposureShutdown::uv_and_fans(hw);
        let result = self.calibrate(ctx).await;
        if let Ok(image) = ctx.package().exposure_image() {
            image.blank_screen();
        }
        result
    }
}

impl DangerousCheck for UvCalibrateEdge {}

// ============================================================================
// 5. REMOVE METER & APPLY
// ============================================================================

#[derive(Default)]
pub struct UvMeterRemovedTest;

#[async_trait]
impl Check for UvMeterRemovedTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::UvMeterRemoved
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let meter = ctx.package().uv_meter()?;
        let _shown = ctx.actions().push_state(WizardState::UvCalibrationRemoveUvMeter);
        log::info!("Waiting for user to remove UV calibrator");
        while meter.present() && !ctx.runtime().testing {
            log::debug!("UV meter still present");
            ctx.sleep(ctx.runtime().tick()).await?;
        }
        meter.close();
        log::info!("UV calibrator removed");
        Ok(())
    }
}

pub struct UvCalibrateApply {
    result: SharedUvResult,
    reset_display_counter: bool,
    reset_led_counter: bool,
    applied: Option<UvCalibrationResult>,
}

impl UvCalibrateApply {
    pub fn new(result: SharedUvResult, reset_display_counter: bool, reset_led_counter: bool) -> Self {
        Self {
            result,
            reset_display_counter,
            reset_led_counter,
            applied: None,
        }
    }

    fn apply(&self, ctx: &CheckContext, data: &UvMeasurement) -> Result<(), PrinterError> {
        let hw = ctx.hw();
        let writer = &ctx.package().config_writer;
        let previous_pwm = writer.get().uv_pwm;
        let found = data.uv_found_pwm.max(0) as u32;

        writer.update(|cfg| cfg.uv_pwm = found);
        hw.set_uv_pwm(found);

        let store = ctx.package().config_store();
        if ctx.runtime().factory_mode || store.factory_defaults().uv_pwm == 0 {
            let mut factory = store.factory_defaults();
            factory.uv_pwm = found;
            store
                .write_factory(&factory)
                .map_err(|e| PrinterError::FailedToSaveFactoryConfig {
                    reason: format!("{:#}", e),
                })?;
        }

        if self.reset_led_counter || self.reset_display_counter {
            let stats = hw.uv_statistics();
            let record = json!({
                "timestamp": Utc::now().to_rfc3339(),
                "uvLedSeconds": stats.led_seconds,
                "displaySeconds": stats.display_seconds,
                "factoryMode": ctx.runtime().factory_mode,
                "resetDisplayCounter": self.reset_display_counter,
                "resetUvLedCounter": self.reset_led_counter,
                "previousUvPwm": previous_pwm,
                "newUvPwm": found,
            });
            log::info!("Counter data: {}", record);
            append_counter_log(ctx, &record).map_err(|e| PrinterError::FailedToSaveFactoryConfig {
                reason: format!("{:#}", e),
            })?;
        }
        if self.reset_led_counter {
            hw.clear_uv_statistics();
        }
        if self.reset_display_counter {
            hw.clear_display_statistics();
        }
        Ok(())
    }
}

fn append_counter_log(ctx: &CheckContext, record: &serde_json::Value) -> anyhow::Result<()> {
    let path = ctx.runtime().data_dir.join(COUNTER_LOG_FILE);
    let mut raw = std::fs::read_to_string(&path).unwrap_or_default();
    raw.push_str(&record.to_string());
    raw.push('\n');
    write_atomic(&path, raw.as_bytes())
}

#[async_trait]
impl Check for UvCalibrateApply {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::UvCalibrationApplyResults
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let broker = ctx.actions();
        let decision = {
            let mut slot = broker.register(&[UserAction::UvApplyResult, UserAction::UvDiscardResults])?;
            let _shown = broker.push_state(WizardState::UvCalibrationApplyResults);
            log::info!("Waiting for result apply resolve");
            tokio::select! {
                _ = broker.cancelled() => return Err(CheckError::Canceled),
                received = slot.recv() => received,
            }
        };
        match decision {
            Some((UserAction::UvApplyResult, _)) => {}
            _ => {
                log::info!("User decided not to apply result, canceling");
                return Err(CheckError::Canceled);
            }
        }

        let result = self.result.snapshot();
        let data = result.data.ok_or_else(|| {
            PrinterError::Internal("UV calibration finished without a measurement".into())
        })?;
        log::info!("Applying results");
        self.apply(ctx, &data)?;
        self.applied = Some(result);
        Ok(())
    }

    fn result_data(&self) -> ResultData {
        let Some(UvCalibrationResult {
            boost,
            data: Some(data),
        }) = &self.applied
        else {
            return ResultData::new();
        };
        ResultData::from([
            ("uvMean".to_string(), data.uv_mean.into()),
            ("uvStdDev".to_string(), data.uv_std_dev.into()),
            ("uvMinValue".to_string(), data.uv_min_value.into()),
            ("uvMaxValue".to_string(), data.uv_max_value.into()),
            ("uvFoundPwm".to_string(), data.uv_found_pwm.into()),
            ("boost".to_string(), (*boost).into()),
        ])
    }
}
