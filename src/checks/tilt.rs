// src/checks/tilt.rs
//
// Tilt homing, range, timing and the user-driven leveling.

use super::DEFAULT_TILT_HEIGHT;
use crate::actions::{ActionPayload, UserAction};
use crate::check::{Check, CheckContext, DangerousCheck, ResultData};
use crate::errors::{CheckError, PrinterError};
use crate::hardware::{Axis, AxisProfile};
use crate::setup::{Configuration, Resource, TankSetup};
use crate::states::{WizardCheckType, WizardState};

use async_trait::async_trait;
use tokio::time::Instant;

pub const TILT_HOME_ATTEMPTS: u32 = 3;
/// Accepted distance from zero after a slow move onto the endstop [microsteps].
pub const TILT_HOMING_TOLERANCE: i64 = 96;
/// Fast travel down stops here, the rest is done on the slow profile.
pub const TILT_SLOW_APPROACH: i64 = 512;
pub const TILT_CALIBRATION_START: i64 = 4_352;
/// One user-requested alignment step [microsteps].
pub const TILT_FULLSTEP: i64 = 32;

fn tilt_resources() -> Vec<Resource> {
    vec![Resource::Tilt, Resource::TowerDown]
}

/// Homes the tilt at the configured sensitivity, a bounded number of times.
async fn home_tilt(ctx: &CheckContext) -> Result<(), CheckError> {
    let hw = ctx.hw();
    let sensitivity = ctx.package().config_writer.get().tilt_sensitivity;
    hw.set_sensitivity(Axis::Tilt, sensitivity)?;
    hw.set_profile(Axis::Tilt, AxisProfile::HomingFast);

    let mut last = PrinterError::TiltHomeFailed;
    for attempt in 1..=TILT_HOME_ATTEMPTS {
        let homed = tokio::select! {
            _ = ctx.actions().cancelled() => return Err(CheckError::Canceled),
            homed = hw.home(Axis::Tilt) => homed,
        };
        match homed {
            Ok(()) => return Ok(()),
            Err(PrinterError::TiltEndstopNotReached) => {
                return Err(PrinterError::TiltEndstopNotReached.into())
            }
            Err(e) => {
                log::warn!("Tilt homing attempt {} failed: {}", attempt, e);
                last = e;
            }
        }
    }
    Err(last.into())
}

// ============================================================================
// HOME
// ============================================================================

#[derive(Default)]
pub struct TiltHomeTest;

#[async_trait]
impl Check for TiltHomeTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TiltHome
    }

    fn resources(&self) -> Vec<Resource> {
        tilt_resources()
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let _led = ctx.actions().warn_led();
        home_tilt(ctx).await
    }
}

impl DangerousCheck for TiltHomeTest {}

// ============================================================================
// RANGE
// ============================================================================

#[derive(Default)]
pub struct TiltRangeTest;

#[async_trait]
impl Check for TiltRangeTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TiltRange
    }

    fn resources(&self) -> Vec<Resource> {
        tilt_resources()
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let _led = ctx.actions().warn_led();
        let hw = ctx.hw();
        let limits = hw.limits(Axis::Tilt);

        hw.set_profile(Axis::Tilt, AxisProfile::MoveFast);
        ctx.move_wait(Axis::Tilt, limits.max).await?;
        ctx.set_progress(0.25);

        ctx.move_wait(Axis::Tilt, TILT_SLOW_APPROACH).await?;
        ctx.set_progress(0.5);

        hw.set_profile(Axis::Tilt, AxisProfile::HomingSlow);
        let position = ctx.move_wait(Axis::Tilt, limits.min).await?;
        ctx.set_progress(0.75);

        if position.abs() > TILT_HOMING_TOLERANCE && !ctx.runtime().testing {
            return Err(PrinterError::TiltAxisCheckFailed { position }.into());
        }

        hw.set_profile(Axis::Tilt, AxisProfile::MoveFast);
        ctx.move_wait(Axis::Tilt, DEFAULT_TILT_HEIGHT).await?;
        Ok(())
    }
}

impl DangerousCheck for TiltRangeTest {}

// ============================================================================
// CALIBRATION START
// ============================================================================

/// Parks the tilt slightly below level so the user can align it upwards.
#[derive(Default)]
pub struct TiltCalibrationStartTest;

#[async_trait]
impl Check for TiltCalibrationStartTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TiltCalibrationStart
    }

    fn resources(&self) -> Vec<Resource> {
        tilt_resources()
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let _led = ctx.actions().warn_led();
        ctx.hw().set_profile(Axis::Tilt, AxisProfile::HomingFast);
        ctx.move_wait(Axis::Tilt, TILT_CALIBRATION_START).await?;
        Ok(())
    }
}

impl DangerousCheck for TiltCalibrationStartTest {}

// ============================================================================
// TIMING
// ============================================================================

/// Measures average up+down tilt cycle times for each speed class.
#[derive(Default)]
pub struct TiltTimingTest {
    times_ms: Option<[i64; 3]>,
}

impl TiltTimingTest {
    async fn cycle_time_s(
        &self,
        ctx: &CheckContext,
        profile: AxisProfile,
        progress_base: f64,
    ) -> Result<f64, CheckError> {
        let config = ctx.package().config_writer.get();
        let total = config.measuring_moves.max(1);
        let mut elapsed = 0.0;
        for i in 0..total {
            let started = Instant::now();
            ctx.hw().set_profile(Axis::Tilt, profile);
            ctx.move_wait(Axis::Tilt, config.tilt_height).await?;
            ctx.move_wait(Axis::Tilt, 0).await?;
            elapsed += started.elapsed().as_secs_f64();
            ctx.set_progress(progress_base + (i + 1) as f64 / (3 * total) as f64);
            log::info!("{:?} move {}/{}", profile, i + 1, total);
        }
        Ok(elapsed / total as f64)
    }
}

#[async_trait]
impl Check for TiltTimingTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TiltTiming
    }

    fn resources(&self) -> Vec<Resource> {
        tilt_resources()
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let _led = ctx.actions().warn_led();
        let hw = ctx.hw();

        if !hw.is_synced(Axis::Tower) {
            hw.set_profile(Axis::Tower, AxisProfile::HomingFast);
            hw.home(Axis::Tower).await?;
        }
        home_tilt(ctx).await?;

        let fast = self.cycle_time_s(ctx, AxisProfile::MoveFast, 0.0).await?;
        let slow = self.cycle_time_s(ctx, AxisProfile::LayerMoveSlow, 1.0 / 3.0).await?;
        let super_slow = self.cycle_time_s(ctx, AxisProfile::SuperSlow, 2.0 / 3.0).await?;
        ctx.package().config_writer.update(|cfg| {
            cfg.tilt_fast_time = fast;
            cfg.tilt_slow_time = slow;
            cfg.tilt_super_slow_time = super_slow;
        });
        self.times_ms = Some([
            (fast * 1000.0) as i64,
            (slow * 1000.0) as i64,
            (super_slow * 1000.0) as i64,
        ]);

        hw.set_profile(Axis::Tower, AxisProfile::HomingFast);
        hw.set_profile(Axis::Tilt, AxisProfile::MoveFast);
        let height = ctx.package().config_writer.get().tilt_height;
        ctx.move_wait(Axis::Tilt, height).await?;
        Ok(())
    }

    fn result_data(&self) -> ResultData {
        match self.times_ms {
            Some([fast, slow, super_slow]) => ResultData::from([
                ("tilt_fast_time_ms".to_string(), fast.into()),
                ("tilt_slow_time_ms".to_string(), slow.into()),
                ("tilt_superslow_time_ms".to_string(), super_slow.into()),
            ]),
            None => ResultData::new(),
        }
    }
}

impl DangerousCheck for TiltTimingTest {}

// ============================================================================
// ALIGN (user driven)
// ============================================================================

/// The user nudges the tilt until the tank sits flat, then confirms.
#[derive(Default)]
pub struct TiltAlignTest {
    tilt_height: Option<i64>,
}

#[async_trait]
impl Check for TiltAlignTest {
    fn check_type(&self) -> WizardCheckType {
        WizardCheckType::TiltCalibration
    }

    fn configuration(&self) -> Configuration {
        Configuration::new(Some(TankSetup::Removed), None)
    }

    fn resources(&self) -> Vec<Resource> {
        tilt_resources()
    }

    async fn async_task_run(&mut self, ctx: &CheckContext) -> Result<(), CheckError> {
        let _led = ctx.actions().warn_led();
        let broker = ctx.actions();
        let hw = ctx.hw();
        let mut slot = broker.register(&[UserAction::TiltMove, UserAction::TiltAligned])?;
        let _shown = broker.push_state(WizardState::LevelTilt);

        loop {
            let received = tokio::select! {
                _ = broker.cancelled() => return Err(CheckError::Canceled),
                received = slot.recv() => received,
            };
            match received {
                Some((UserAction::TiltMove, ActionPayload::Direction(direction))) => {
                    log::debug!("Tilt move direction: {}", direction);
                    let limits = hw.limits(Axis::Tilt);
                    let target = (hw.position(Axis::Tilt) + direction.signum() as i64 * TILT_FULLSTEP)
                        .clamp(limits.min, limits.max);
                    hw.start_move(Axis::Tilt, target)?;
                }
                Some((UserAction::TiltAligned, _)) => {
                    let position = hw.position(Axis::Tilt);
                    let limits = hw.limits(Axis::Tilt);
                    if position <= limits.min || position > limits.max {
                        hw.beep_alarm(3);
                        return Err(PrinterError::InvalidTiltAlignPosition { position }.into());
                    }
                    log::info!("Tilt aligned at {}", position);
                    ctx.package()
                        .config_writer
                        .update(|cfg| cfg.tilt_height = position);
                    self.tilt_height = Some(position);
                    return Ok(());
                }
                Some((action, payload)) => {
                    log::warn!("Ignoring {:?} with payload {:?}", action, payload);
                }
                None => return Err(CheckError::Canceled),
            }
        }
    }

    fn result_data(&self) -> ResultData {
        self.tilt_height
            .map(|h| ResultData::from([("tiltHeight".to_string(), h.into())]))
            .unwrap_or_default()
    }
}
